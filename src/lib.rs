//! canary-router - version aliases, weighted traffic splitting and
//! concurrency admission for invocable functions

pub mod cli;
pub mod observability;
pub mod routing;
