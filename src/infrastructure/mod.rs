//! Infrastructure: configuration, logging and project setup.

pub mod config;
pub mod logging;
pub mod setup;
