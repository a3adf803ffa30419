//! Adapters: concrete implementations of the domain ports and the HTTP API.

pub mod http;
pub mod renderer;
pub mod sqlite;
