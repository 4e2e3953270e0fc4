//! Lifecycle events
//!
//! Configuration changes are logged; per-invocation routing and admission
//! decisions are only counted (see `RoutingMetrics`).

use std::fmt;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Functions and versions
    FunctionCreated,
    VersionPublished,
    VersionDeleted,

    // Aliases
    AliasCreated,
    AliasUpdated,
    AliasDeleted,

    // Admission
    ReservationChanged,

    // State
    StateLoaded,
    StateSaved,
    StateSaveFailed,

    // CLI
    RequestRejected,
}

impl Event {
    /// Returns the event name
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::FunctionCreated => "FUNCTION_CREATED",
            Event::VersionPublished => "VERSION_PUBLISHED",
            Event::VersionDeleted => "VERSION_DELETED",
            Event::AliasCreated => "ALIAS_CREATED",
            Event::AliasUpdated => "ALIAS_UPDATED",
            Event::AliasDeleted => "ALIAS_DELETED",
            Event::ReservationChanged => "RESERVATION_CHANGED",
            Event::StateLoaded => "STATE_LOADED",
            Event::StateSaved => "STATE_SAVED",
            Event::StateSaveFailed => "STATE_SAVE_FAILED",
            Event::RequestRejected => "REQUEST_REJECTED",
        }
    }

    /// Failures are logged at ERROR, rejections at WARN
    pub fn is_failure(&self) -> bool {
        matches!(self, Event::StateSaveFailed)
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Event::RequestRejected)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
