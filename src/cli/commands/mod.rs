//! CLI command implementations.

pub mod diagnose;
pub mod gatekeepers;
pub mod init;
pub mod serve;
