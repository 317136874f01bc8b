//! Error taxonomy (§7).
//!
//! Typed, matchable errors at every module boundary. Handler-level errors
//! never escape the bus; these types are how a service turns an internal
//! failure into the status/response codes external callers can act on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised by [`crate::Payload`] validation or bus delivery.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BusError {
    /// A payload did not validate against its topic's schema (invariant 1).
    #[error("payload for topic {topic} failed validation: {reason}")]
    PublishValidation { topic: String, reason: String },

    /// Second subscription attempt on a command-kind topic (§4.5, §8.6).
    #[error("topic {topic} already has a command subscriber")]
    DuplicateCommandSubscription { topic: String },
}

/// Errors a service surfaces through its own status/response path.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    /// Vendor API rate limit, hardware reconnect in progress, etc. Retried
    /// with bounded backoff before being treated as a failure.
    #[error("transient error in {service}: {message}")]
    Transient { service: String, message: String },

    /// File missing, device unavailable. The service may fall back to a
    /// degraded mock mode if configured.
    #[error("local resource error in {service}: {message}")]
    LocalResource { service: String, message: String },

    /// Duplicate command-topic subscription, malformed plan, unknown
    /// cache_key, unbalanced duck/unduck on plan termination.
    #[error("invariant violation in {service}: {message}")]
    Invariant { service: String, message: String },
}

/// Errors surfaced back to the CLI or web bridge command origin.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("missing required argument: {field}")]
    MissingArgument { field: String },
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::UnknownCommand { .. } => "unknown_command",
            DispatchError::MissingArgument { .. } => "missing_argument",
        }
    }
}

/// Mode Manager transition failures (§4.9).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModeError {
    #[error("transition into {to} is not permitted")]
    InvalidTransition { to: String },
}

/// Timeline executor failures, surfaced through `PLAN_ENDED`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanError {
    #[error("step {step_id} failed: {reason}")]
    StepFailed { step_id: uuid::Uuid, reason: String },

    #[error("unknown cache key: {cache_key}")]
    UnknownCacheKey { cache_key: String },

    #[error("plan cancelled")]
    Cancelled,
}

/// Structured validation error returned to the Web Bridge for a failing
/// inbound command (`VALIDATION_ERROR` in §4.8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised at configuration time (duplicate registrations, bad
/// config files). These are the ones that may legitimately terminate the
/// process during startup (§7 propagation policy).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("duplicate command registration for pattern {pattern:?}")]
    DuplicateCommandPattern { pattern: Vec<String> },

    #[error("duplicate command-topic subscription for {topic}")]
    DuplicateCommandTopic { topic: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_error_codes_match_spec() {
        assert_eq!(
            DispatchError::UnknownCommand {
                command: "fly".into()
            }
            .code(),
            "unknown_command"
        );
        assert_eq!(
            DispatchError::MissingArgument {
                field: "track_name".into()
            }
            .code(),
            "missing_argument"
        );
    }

    #[test]
    fn validation_error_serializes_with_field() {
        let e = ValidationError::new("track_name", "required for action play");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["field"], "track_name");
    }
}
