//! Process infrastructure: configuration and logging.

pub mod config;
pub mod logging;
