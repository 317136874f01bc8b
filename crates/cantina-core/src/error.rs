//! Top-level error type for binary/service glue (§7's propagation
//! policy). Module boundaries inside the core use the typed errors from
//! `cantina-proto` directly; this aggregate exists for code that needs a
//! single `Result` at the edges -- `main.rs` and config loading.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Bus(#[from] cantina_proto::BusError),

    #[error(transparent)]
    Service(#[from] cantina_proto::ServiceError),

    #[error(transparent)]
    Dispatch(#[from] cantina_proto::DispatchError),

    #[error(transparent)]
    Plan(#[from] cantina_proto::PlanError),

    #[error(transparent)]
    Mode(#[from] cantina_proto::ModeError),

    #[error(transparent)]
    Configuration(#[from] cantina_proto::ConfigurationError),

    #[error("failed to bind web bridge listener on port {port}: {source}")]
    Bind { port: u16, #[source] source: std::io::Error },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
