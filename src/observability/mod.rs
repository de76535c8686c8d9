//! Observability for the consistency core
//!
//! - Structured events with explicit severity
//! - Counter metrics
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on routing or quorum decisions
//! 3. Deterministic field ordering
//!
//! # Usage
//!
//! ```ignore
//! use replicore::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::QuorumSelected, &[("lsn", "5")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log an event at its default severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log an event with fields at its default severity
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::QuorumMet);
        log_event(Event::SessionTokenInvariantViolated);
    }

    #[test]
    fn test_log_event_with_fields() {
        log_event_with_fields(Event::GoneRetry, &[("attempt", "2"), ("backoff_ms", "1000")]);
    }
}
