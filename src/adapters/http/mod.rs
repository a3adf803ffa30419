//! HTTP API served to experiment clients.

mod error;
mod server;

pub use error::{ApiError, ErrorResponse};
pub use server::{
    AppState, McmcpHttpServer, CATEGORY_HEADER, CURRENT_DIM_HEADER, PARTICIPANT_HEADER, REPLICA_HEADER,
    TEAM_HEADER, TRIAL_INDEX_HEADER, TRIAL_TYPE_HEADER,
};
