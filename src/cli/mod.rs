//! CLI command handlers

pub mod commands;

pub use commands::{cmd_predict, cmd_send, cmd_server_key, cmd_setup, CliResult};
