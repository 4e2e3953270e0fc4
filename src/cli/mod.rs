//! CLI module
//!
//! Provides command-line interface for:
//! - init: Create an empty routing state file
//! - exec: Apply JSON requests from stdin, one per line
//! - route: Sample an alias's traffic split
//! - inspect: Print the routing state

mod args;
mod commands;
mod config;
mod errors;
mod io;
mod requests;

pub use args::{Cli, Command};
pub use commands::{exec, init, inspect, route, run, run_command};
pub use config::Config;
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_requests, write_error, write_json, write_response};
pub use requests::{apply, Request};
