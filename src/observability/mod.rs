//! Observability
//!
//! - Structured logging (JSON, one line per event)
//! - Per-function routing and admission counters
//! - Typed lifecycle events
//!
//! # Usage
//!
//! ```ignore
//! use canary_router::observability::{log_event_with_fields, Event, RoutingMetrics};
//!
//! log_event_with_fields(Event::AliasUpdated, &[("alias", "PROD")]);
//!
//! let metrics = RoutingMetrics::new();
//! metrics.record_admitted("orders");
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{FunctionMetrics, MetricsSnapshot, RoutingMetrics};

fn severity_of(event: Event) -> Severity {
    if event.is_failure() {
        Severity::Error
    } else if event.is_warning() {
        Severity::Warn
    } else {
        Severity::Info
    }
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(severity_of(event), event.as_str(), fields);
}
