//! Canvas Tree CLI
//!
//! Operator interface over a configured store. Each invocation runs one
//! command and prints one response envelope as JSON.

pub mod commands;
pub mod response;

pub use commands::{execute, load_config, run, Cli, Commands};
pub use response::{status_code, Envelope, Status};
