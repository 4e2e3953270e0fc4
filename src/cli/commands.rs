//! CLI command implementations
//!
//! Every command loads the config, applies its log level, and works on the
//! routing state file named there.

use std::collections::BTreeMap;
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use crate::observability::{log_event_with_fields, Event, Logger};
use crate::routing::{FileRoutingStore, Gateway, RoutingState, RoutingStore};

use super::args::Command;
use super::config::Config;
use super::errors::{CliError, CliResult};
use super::io::{read_requests, write_error, write_response};
use super::requests::{apply, Request};

/// Main CLI entry point
///
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Exec { config } => exec(&config),
        Command::Route {
            config,
            function,
            alias,
            draws,
            seed,
        } => route(&config, &function, &alias, draws, seed),
        Command::Inspect { config } => inspect(&config),
    }
}

fn load_config(config_path: &Path) -> CliResult<Config> {
    let config = Config::load(config_path)?;
    Logger::set_min_severity(config.severity()?);
    Ok(config)
}

/// Open the state file and rebuild the gateway from it
fn open(config: &Config) -> CliResult<(FileRoutingStore, Gateway)> {
    let store = FileRoutingStore::new(config.state_path());
    if !store.path().exists() {
        return Err(CliError::not_initialized());
    }
    let gateway = Gateway::restore(&store, config.account_pool_limit)?;
    Ok((store, gateway))
}

/// Create an empty routing state file
pub fn init(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let store = FileRoutingStore::new(config.state_path());

    if store.path().exists() {
        return Err(CliError::already_initialized());
    }

    store
        .save(&RoutingState::empty(config.account_pool_limit))
        .map_err(|e| CliError::io_error(e.to_string()))?;

    write_response(json!({ "initialized": true, "state_file": config.state_file }))
}

/// Apply requests from stdin until EOF
///
/// Each mutating request is persisted before its response is written, so a
/// client never sees success for a change that was not saved.
pub fn exec(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let (store, gateway) = open(&config)?;
    let mut rng = StdRng::from_entropy();

    for value in read_requests() {
        let value = match value {
            Ok(value) => value,
            Err(e) => {
                write_error(e.code_str(), e.message())?;
                continue;
            }
        };

        let request: Request = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                let message = format!("Invalid request: {}", e);
                log_event_with_fields(Event::RequestRejected, &[("reason", &message)]);
                write_error("CANARY_INVALID_REQUEST", &message)?;
                continue;
            }
        };

        let mutation = request.is_mutation();
        match apply(&gateway, request, &config.retry, &mut rng) {
            Ok(data) => {
                if mutation {
                    if let Err(e) = gateway.persist(&store) {
                        let reason = e.to_string();
                        log_event_with_fields(Event::StateSaveFailed, &[("reason", &reason)]);
                        return Err(e.into());
                    }
                    log_event_with_fields(
                        Event::StateSaved,
                        &[("path", &store.path().display().to_string())],
                    );
                }
                write_response(data)?;
            }
            Err(e) => write_error(e.code(), &e.to_string())?,
        }
    }

    Ok(())
}

/// Sample `draws` routing decisions for an alias
///
/// Sampling only routes; nothing is admitted and nothing is saved.
pub fn route(
    config_path: &Path,
    function: &str,
    alias: &str,
    draws: u64,
    seed: Option<u64>,
) -> CliResult<()> {
    let config = load_config(config_path)?;
    let (_store, gateway) = open(&config)?;

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let routing = gateway.aliases().resolve(function, alias)?;
    let mut counts: BTreeMap<u64, u64> = BTreeMap::new();
    for _ in 0..draws {
        let version = gateway
            .router()
            .resolve_invocation_target(function, alias, &mut rng)?;
        *counts.entry(version).or_default() += 1;
    }

    let secondary_count = routing
        .secondary_version_id
        .and_then(|v| counts.get(&v).copied())
        .unwrap_or(0);
    let secondary_fraction = if draws == 0 {
        0.0
    } else {
        secondary_count as f64 / draws as f64
    };

    write_response(json!({
        "function": function,
        "alias": alias,
        "routing": routing,
        "draws": draws,
        "counts": counts,
        "secondary_fraction": secondary_fraction,
    }))
}

/// Print the routing state
pub fn inspect(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let (_store, gateway) = open(&config)?;

    let state = gateway.snapshot()?;
    let governor = gateway.governor();
    write_response(json!({
        "state": state,
        "unreserved_capacity": governor.unreserved_capacity(),
        "account_pool_limit": governor.account_pool_limit(),
    }))
}
