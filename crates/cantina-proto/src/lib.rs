//! Wire types shared by every CantinaOS service: topics, payload schemas,
//! the envelope they travel in, the plan/step/layer format the Timeline
//! Executor consumes, the music library entity, and the error taxonomy
//! used at every module boundary.
//!
//! This crate has no I/O and no async runtime dependency; it exists so
//! that `cantina-core`'s bus, services, and tests all agree on one
//! definition of what a message looks like.

pub mod envelope;
pub mod errors;
pub mod music;
pub mod payload;
pub mod plan;
pub mod topic;

pub use envelope::Envelope;
pub use errors::{BusError, ConfigurationError, DispatchError, ModeError, PlanError, ServiceError, ValidationError};
pub use music::{MusicSource, MusicTrack};
pub use payload::{LifecycleState, Mode, MusicAction, Payload, Severity, Source};
pub use plan::{Layer, Plan, PlanStatus, PlayMusicTarget, Step};
pub use topic::Topic;
