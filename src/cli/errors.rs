//! CLI error types
//!
//! A `CliError` ends the running command. Per-request failures inside
//! `canary exec` are reported on stdout instead and never become one.

use std::fmt;
use std::io;

use crate::routing::RoutingError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (stdin/stdout)
    IoError,
    /// State file already exists
    AlreadyInitialized,
    /// State file missing
    NotInitialized,
    /// Routing library rejected the command
    RoutingFailed,
}

impl CliErrorCode {
    /// Stable code string printed before the message
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "CANARY_CLI_CONFIG_ERROR",
            Self::IoError => "CANARY_CLI_IO_ERROR",
            Self::AlreadyInitialized => "CANARY_CLI_ALREADY_INITIALIZED",
            Self::NotInitialized => "CANARY_CLI_NOT_INITIALIZED",
            Self::RoutingFailed => "CANARY_CLI_ROUTING_FAILED",
        }
    }
}

/// Error that ends a CLI command
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Error with an explicit code
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Config file missing, unreadable or invalid
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    /// Terminal or state file I/O failed
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    /// `canary init` found an existing state file
    pub fn already_initialized() -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            "Routing state already initialized",
        )
    }

    /// A command needs a state file that `canary init` never wrote
    pub fn not_initialized() -> Self {
        Self::new(
            CliErrorCode::NotInitialized,
            "Routing state not initialized. Run 'canary init' first.",
        )
    }

    /// Routing rejected the command; the routing code leads the message
    pub fn routing_failed(err: &RoutingError) -> Self {
        Self::new(CliErrorCode::RoutingFailed, format!("{}: {}", err.code(), err))
    }

    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<RoutingError> for CliError {
    fn from(e: RoutingError) -> Self {
        Self::routing_failed(&e)
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
