//! End-to-end tests of the participant API over a real socket.

use mcmcp::adapters::http::{
    AppState, McmcpHttpServer, CATEGORY_HEADER, PARTICIPANT_HEADER, REPLICA_HEADER, TEAM_HEADER, TRIAL_TYPE_HEADER,
};
use mcmcp::adapters::sqlite::create_migrated_test_pool;
use mcmcp::domain::models::{Config, RendererMode};
use mcmcp::infrastructure::setup::build_engine_with_pool;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct TestServer {
    base: String,
    client: reqwest::Client,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

async fn start(mut config: Config) -> TestServer {
    config.renderer.mode = RendererMode::Raw;
    let pool = create_migrated_test_pool().await.unwrap();
    let engine = build_engine_with_pool(config, pool).unwrap();
    let state = AppState {
        task: engine.config.task.name.clone(),
        trials: engine.trials,
        consensus: engine.consensus,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let server = McmcpHttpServer::new(state, engine.config.server.clone());
    tokio::spawn(server.serve_on(listener, async {
        let _ = rx.await;
    }));

    TestServer {
        base: format!("http://{addr}"),
        client: reqwest::Client::new(),
        _shutdown: tx,
    }
}

#[tokio::test]
async fn test_health() {
    let server = start(Config::default()).await;
    let response = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_unknown_task_and_missing_participant() {
    let server = start(Config::default()).await;

    let response = server
        .client
        .post(server.url("/api/faces/set_up"))
        .header(PARTICIPANT_HEADER, "p1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "UNKNOWN_TASK");

    let response = server.client.post(server.url("/api/mcmcp/set_up")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "MISSING_HEADER");
}

#[tokio::test]
async fn test_blockwise_trial_round_trip() {
    let server = start(Config::default()).await;

    let response = server
        .client
        .post(server.url("/api/mcmcp/set_up"))
        .header(PARTICIPANT_HEADER, "p1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let set_up: Value = response.json().await.unwrap();
    assert_eq!(set_up["max_trial"], 10);
    assert_eq!(set_up["categories"], json!(["happy", "sad"]));

    let trial: Value = server
        .client
        .get(server.url("/api/mcmcp/next_trial"))
        .header(PARTICIPANT_HEADER, "p1")
        .header(REPLICA_HEADER, "1")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(trial["trial_type"], "likelihood");
    assert_eq!(trial["table_no"], 1);
    assert_eq!(trial["proposal_state"].as_array().map(Vec::len), Some(3));

    let response = server
        .client
        .post(server.url("/api/mcmcp/register_choice"))
        .header(PARTICIPANT_HEADER, "p1")
        .header(REPLICA_HEADER, "1")
        .header(TRIAL_TYPE_HEADER, "likelihood")
        .json(&json!({ "choice": trial["proposal_state"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["finished"], 0);

    // The chain now waits for a prior choice
    let response = server
        .client
        .post(server.url("/api/mcmcp/register_choice"))
        .header(PARTICIPANT_HEADER, "p1")
        .header(REPLICA_HEADER, "1")
        .header(TRIAL_TYPE_HEADER, "likelihood")
        .json(&json!({ "choice": trial["proposal_state"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_CHOICE");

    let trial: Value = server
        .client
        .get(server.url("/api/mcmcp/next_trial"))
        .header(PARTICIPANT_HEADER, "p1")
        .header(REPLICA_HEADER, "1")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(trial["trial_type"], "prior");
}

#[tokio::test]
async fn test_dimension_mismatch_is_a_bad_request() {
    let mut config = Config::default();
    config.task.variant = mcmcp::SamplingVariant::Independent;
    let server = start(config).await;

    let response = server
        .client
        .post(server.url("/api/mcmcp/register_choice"))
        .header(PARTICIPANT_HEADER, "p1")
        .header(CATEGORY_HEADER, "happy")
        .header(REPLICA_HEADER, "1")
        .header(TRIAL_TYPE_HEADER, "likelihood")
        .json(&json!({ "choice": [1.0] }))
        .send()
        .await
        .unwrap();
    // No chain yet
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server
        .client
        .post(server.url("/api/mcmcp/set_up"))
        .header(PARTICIPANT_HEADER, "p1")
        .send()
        .await
        .unwrap();
    let response = server
        .client
        .post(server.url("/api/mcmcp/register_choice"))
        .header(PARTICIPANT_HEADER, "p1")
        .header(CATEGORY_HEADER, "happy")
        .header(REPLICA_HEADER, "1")
        .header(TRIAL_TYPE_HEADER, "likelihood")
        .json(&json!({ "choice": [1.0] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "DIMENSION_MISMATCH");
}

#[tokio::test]
async fn test_consensus_poll_status_codes() {
    let mut config = Config::default();
    config.task.n_chain = 1;
    config.task.max_trial = 1;
    config.consensus.team_size = 1;
    let server = start(config).await;

    let team: Value = server
        .client
        .post(server.url("/api/consensus/join"))
        .header(PARTICIPANT_HEADER, "a")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(team["team_id"], 1);

    let poll = || {
        server
            .client
            .get(server.url("/api/consensus/poll"))
            .header(PARTICIPANT_HEADER, "a")
            .header(TEAM_HEADER, "1")
            .header(CATEGORY_HEADER, "happy")
            .header(REPLICA_HEADER, "1")
            .send()
    };

    assert_eq!(poll().await.unwrap().status(), StatusCode::NO_CONTENT);
    let ready = poll().await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
    let trial: Value = ready.json().await.unwrap();
    assert_eq!(trial["current_class"], "happy");

    let response = server
        .client
        .post(server.url("/api/consensus/register_choice"))
        .header(PARTICIPANT_HEADER, "a")
        .header(TEAM_HEADER, "1")
        .header(CATEGORY_HEADER, "happy")
        .header(REPLICA_HEADER, "1")
        .json(&json!({ "choice": "take_proposal" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["finished"], 1);

    assert_eq!(poll().await.unwrap().status(), StatusCode::CREATED);

    let response = server
        .client
        .get(server.url("/api/consensus/poll"))
        .header(PARTICIPANT_HEADER, "a")
        .header(CATEGORY_HEADER, "happy")
        .header(REPLICA_HEADER, "1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
