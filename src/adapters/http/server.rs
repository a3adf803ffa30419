//! Participant-facing HTTP server.
//!
//! Experiment clients call these endpoints to set up a participant, fetch
//! trials and register choices. Identity and chain coordinates travel in
//! `x-*` headers; choices travel in JSON bodies.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::error::ApiError;
use crate::domain::models::{
    AttentionCheckOutcome, Choice, ChoiceRegistration, ConsensusChoice, ConsensusRegistration, PollOutcome,
    RegistrationOutcome, ServerConfig, SetUpResponse, TeamAssignment, TrialPayload, TrialRequest, TrialType,
};
use crate::services::{ConsensusCoordinator, ConsensusSeat, TrialController};

pub const PARTICIPANT_HEADER: &str = "x-participant-id";
pub const CATEGORY_HEADER: &str = "x-category";
pub const REPLICA_HEADER: &str = "x-replica";
pub const TRIAL_TYPE_HEADER: &str = "x-trial-type";
pub const CURRENT_DIM_HEADER: &str = "x-current-dim";
pub const TEAM_HEADER: &str = "x-team-id";
pub const TRIAL_INDEX_HEADER: &str = "x-trial-index";

/// Body of `register_choice`.
#[derive(Debug, Deserialize)]
pub struct RegisterChoiceRequest {
    pub choice: Choice,
}

/// Body of `attention_check`.
#[derive(Debug, Deserialize)]
pub struct AttentionCheckRequest {
    pub passed: bool,
}

/// Body of the consensus `register_choice`.
#[derive(Debug, Deserialize)]
pub struct ConsensusChoiceRequest {
    pub choice: ConsensusChoice,
}

/// Query of the consensus poll.
#[derive(Debug, Default, Deserialize)]
pub struct PollParams {
    /// Hold the request up to this long waiting for the turn
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

/// Shared state for the participant server.
pub struct AppState {
    pub task: String,
    pub trials: Arc<TrialController>,
    pub consensus: Arc<ConsensusCoordinator>,
}

/// MCMCP HTTP server.
pub struct McmcpHttpServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl McmcpHttpServer {
    pub fn new(state: AppState, config: ServerConfig) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Build the router.
    pub fn build_router(&self) -> Router {
        let app = Router::new()
            .route("/api/consensus/join", post(consensus_join))
            .route("/api/consensus/poll", get(consensus_poll))
            .route("/api/consensus/register_choice", post(consensus_register))
            .route("/api/{task}/set_up", post(set_up))
            .route("/api/{task}/next_trial", get(next_trial))
            .route("/api/{task}/register_choice", post(register_choice))
            .route("/api/{task}/attention_check", post(attention_check))
            .route("/health", get(health_check))
            .with_state(Arc::clone(&self.state));

        if self.config.enable_cors {
            app.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
                .layer(TraceLayer::new_for_http())
        } else {
            app.layer(TraceLayer::new_for_http())
        }
    }

    /// Start the server.
    pub async fn serve(self) -> anyhow::Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server with a shutdown signal.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        tracing::info!(addr = %listener.local_addr()?, task = %self.state.task, "MCMCP HTTP server listening");
        axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;
        Ok(())
    }
}

// Header helpers

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, ApiError> {
    headers
        .get(name)
        .map(|value| {
            value.to_str().map(str::trim).map_err(|_| ApiError::InvalidHeader {
                name,
                value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            })
        })
        .transpose()
        .map(|value| value.filter(|v| !v.is_empty()))
}

fn required<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, ApiError> {
    header(headers, name)?.ok_or(ApiError::MissingHeader(name))
}

fn parsed<T: FromStr>(headers: &HeaderMap, name: &'static str) -> Result<Option<T>, ApiError> {
    header(headers, name)?
        .map(|value| {
            value.parse().map_err(|_| ApiError::InvalidHeader {
                name,
                value: value.to_string(),
            })
        })
        .transpose()
}

fn check_task(state: &AppState, task: &str) -> Result<(), ApiError> {
    if task == state.task {
        Ok(())
    } else {
        Err(ApiError::UnknownTask(task.to_string()))
    }
}

fn seat(headers: &HeaderMap) -> Result<ConsensusSeat, ApiError> {
    let participant = required(headers, PARTICIPANT_HEADER)?;
    let team_id = parsed(headers, TEAM_HEADER)?.ok_or(ApiError::MissingHeader(TEAM_HEADER))?;
    let category = required(headers, CATEGORY_HEADER)?;
    let replica = parsed(headers, REPLICA_HEADER)?.ok_or(ApiError::MissingHeader(REPLICA_HEADER))?;
    Ok(ConsensusSeat::new(participant, team_id, category, replica))
}

// Handler functions

async fn health_check() -> &'static str {
    "OK"
}

async fn set_up(
    State(state): State<Arc<AppState>>,
    Path(task): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SetUpResponse>, ApiError> {
    check_task(&state, &task)?;
    let participant = required(&headers, PARTICIPANT_HEADER)?;
    Ok(Json(state.trials.set_up(participant).await?))
}

async fn next_trial(
    State(state): State<Arc<AppState>>,
    Path(task): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TrialPayload>, ApiError> {
    check_task(&state, &task)?;
    let request = TrialRequest {
        participant: required(&headers, PARTICIPANT_HEADER)?.to_string(),
        category: header(&headers, CATEGORY_HEADER)?.map(str::to_string),
        replica: parsed(&headers, REPLICA_HEADER)?,
        trial_index: parsed(&headers, TRIAL_INDEX_HEADER)?,
    };
    Ok(Json(state.trials.next_trial(&request).await?))
}

async fn register_choice(
    State(state): State<Arc<AppState>>,
    Path(task): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RegisterChoiceRequest>,
) -> Result<Json<RegistrationOutcome>, ApiError> {
    check_task(&state, &task)?;
    let trial_type = required(&headers, TRIAL_TYPE_HEADER)?;
    let registration = ChoiceRegistration {
        participant: required(&headers, PARTICIPANT_HEADER)?.to_string(),
        category: header(&headers, CATEGORY_HEADER)?.map(str::to_string),
        replica: parsed(&headers, REPLICA_HEADER)?.ok_or(ApiError::MissingHeader(REPLICA_HEADER))?,
        trial_type: TrialType::from_str(trial_type).ok_or_else(|| ApiError::InvalidHeader {
            name: TRIAL_TYPE_HEADER,
            value: trial_type.to_string(),
        })?,
        current_dim: parsed(&headers, CURRENT_DIM_HEADER)?,
        trial_index: parsed(&headers, TRIAL_INDEX_HEADER)?,
        choice: body.choice,
    };
    Ok(Json(state.trials.register_choice(&registration).await?))
}

async fn attention_check(
    State(state): State<Arc<AppState>>,
    Path(task): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AttentionCheckRequest>,
) -> Result<Json<AttentionCheckOutcome>, ApiError> {
    check_task(&state, &task)?;
    let participant = required(&headers, PARTICIPANT_HEADER)?;
    Ok(Json(state.trials.register_attention_check(participant, body.passed).await?))
}

async fn consensus_join(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TeamAssignment>, ApiError> {
    let participant = required(&headers, PARTICIPANT_HEADER)?;
    Ok(Json(state.consensus.join(participant).await?))
}

async fn consensus_poll(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PollParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let seat = seat(&headers)?;
    let outcome = match params.wait_ms {
        Some(wait_ms) => {
            tokio::time::timeout(Duration::from_millis(wait_ms), state.consensus.wait_until_ready(&seat))
                .await
                .unwrap_or(Ok(PollOutcome::NotReady))?
        }
        None => state.consensus.poll(&seat).await?,
    };

    Ok(match outcome {
        PollOutcome::Ready(trial) => (StatusCode::OK, Json(trial)).into_response(),
        PollOutcome::NotReady => StatusCode::NO_CONTENT.into_response(),
        PollOutcome::Finished => StatusCode::CREATED.into_response(),
    })
}

async fn consensus_register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ConsensusChoiceRequest>,
) -> Result<Json<ConsensusRegistration>, ApiError> {
    let seat = seat(&headers)?;
    Ok(Json(state.consensus.register(&seat, body.choice).await?))
}
