//! Typed payloads for every topic.
//!
//! Every topic has exactly one payload schema (§4.3). All payloads are
//! JSON-serializable: timestamps are ISO-8601 strings, enums are their
//! string form. `Payload` is the single tag-discriminated enum covering
//! every schema; `Envelope` is what actually travels on the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::music::MusicTrack;
use crate::plan::{Plan, PlanStatus};

/// Severity accompanying a `ServiceStatus` heartbeat or an invariant
/// violation surfaced through `emit_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Lifecycle state reported in a `ServiceStatus` payload, mirroring the
/// `{UNINITIALIZED, STARTING, RUNNING, DEGRADED, ERROR, STOPPING, STOPPED}`
/// state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Uninitialized,
    Starting,
    Running,
    Degraded,
    Error,
    Stopping,
    Stopped,
}

/// Global operating mode, `{STARTUP, IDLE, AMBIENT, INTERACTIVE}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Startup,
    Idle,
    Ambient,
    Interactive,
}

/// Origin of a music/voice command, used for the source-aware intro rule
/// in §4.7.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Voice,
    Cli,
    Dashboard,
    Web,
    Dj,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MusicAction {
    Play,
    Stop,
    Pause,
    Resume,
    Next,
    Crossfade,
}

/// Every topic's payload, tag-discriminated on `type`. Adding a topic in
/// [`crate::topic::Topic`] means adding its variant here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    ServiceStatus {
        service_name: String,
        status: LifecycleState,
        uptime_secs: f64,
        message: String,
        severity: Severity,
    },
    StatusRequest {},

    MemoryGet {
        key: String,
        request_id: Uuid,
    },
    MemoryValue {
        key: String,
        value: Option<serde_json::Value>,
        present: bool,
        request_id: Uuid,
    },
    MemorySet {
        key: String,
        value: serde_json::Value,
    },
    MemoryUpdated {
        key: String,
        value: serde_json::Value,
        previous: Option<serde_json::Value>,
    },
    MemoryWait {
        key: String,
        predicate_id: Uuid,
        condition: serde_json::Value,
    },
    MemoryWaitResolved {
        predicate_id: Uuid,
        value: serde_json::Value,
    },
    MemoryWaitTimeout {
        predicate_id: Uuid,
    },

    CliCommand {
        raw_input: String,
        source: Source,
        sid: Option<String>,
    },
    CliResponse {
        success: bool,
        message: String,
        data: Option<serde_json::Value>,
        code: Option<String>,
        field: Option<String>,
        sid: Option<String>,
    },

    IntentDetected {
        name: String,
        args: serde_json::Value,
        conversation_id: Uuid,
    },
    DjCommentaryRequest {
        request_id: Uuid,
        context: String,
        current_track: String,
        next_track: String,
        style: String,
    },
    GptCommentaryResponse {
        request_id: Uuid,
        text: String,
    },
    CommentaryMissed {
        track: String,
    },

    TtsGenerateRequest {
        text: String,
        clip_id: Uuid,
        plan_id: Uuid,
    },
    TtsCancel {
        clip_id: Uuid,
    },
    SpeechGenerationComplete {
        clip_id: Uuid,
    },
    SpeechCacheRequest {
        cache_key: String,
        text: String,
    },
    SpeechCacheReady {
        cache_key: String,
    },
    SpeechCachePlaybackRequest {
        cache_key: String,
        step_id: Uuid,
        plan_id: Uuid,
    },
    SpeechCachePlaybackCompleted {
        step_id: Uuid,
    },

    MusicCommand {
        action: MusicAction,
        source: Source,
        track_name: Option<String>,
        track_id: Option<String>,
        fade_ms: Option<u64>,
        ceiling_volume: Option<f32>,
    },
    MusicPlaybackStarted {
        source: Source,
        track: MusicTrack,
    },
    MusicPlaybackStopped {
        source: Source,
    },
    MusicLibraryUpdated {
        tracks: Vec<MusicTrack>,
    },
    TrackPlaying {
        track_id: String,
    },
    TrackStopped {},
    TrackEndingSoon {
        track: String,
        seconds_remaining: u32,
    },
    AudioDuckingStart {
        level: f32,
        fade_ms: u64,
    },
    AudioDuckingStop {
        fade_ms: u64,
    },
    CrossfadeComplete {
        step_id: Uuid,
    },

    PlanReady {
        plan: Plan,
    },
    PlanStarted {
        plan_id: Uuid,
        layer: crate::plan::Layer,
    },
    PlanEnded {
        plan_id: Uuid,
        status: PlanStatus,
        failed_step_id: Option<Uuid>,
        reason: Option<String>,
    },

    DjModeChanged {
        active: bool,
        reason: Option<String>,
        /// Correlates back to the `CliCommand` that triggered this, if any,
        /// so the handler that owns the outcome can answer with a matching
        /// `CliResponse`.
        sid: Option<String>,
    },

    SystemSetModeRequest {
        mode: Mode,
        sid: Option<String>,
    },
    ModeTransitionStarted {
        from: Mode,
        to: Mode,
    },
    SystemModeChange {
        mode: Mode,
        previous: Mode,
    },
    ModeTransitionComplete {
        to: Mode,
    },

    DashboardLog {
        timestamp: DateTime<Utc>,
        service_name: String,
        level: String,
        message: String,
    },
}

impl Payload {
    /// The topic this payload variant belongs to. Used by the bus to
    /// cross-check a caller-supplied topic against the payload it is
    /// paired with in an [`crate::envelope::Envelope`].
    pub fn topic(&self) -> crate::topic::Topic {
        use crate::topic::Topic;
        match self {
            Payload::ServiceStatus { .. } => Topic::ServiceStatus,
            Payload::StatusRequest {} => Topic::StatusRequest,
            Payload::MemoryGet { .. } => Topic::MemoryGet,
            Payload::MemoryValue { .. } => Topic::MemoryValue,
            Payload::MemorySet { .. } => Topic::MemorySet,
            Payload::MemoryUpdated { .. } => Topic::MemoryUpdated,
            Payload::MemoryWait { .. } => Topic::MemoryWait,
            Payload::MemoryWaitResolved { .. } => Topic::MemoryWaitResolved,
            Payload::MemoryWaitTimeout { .. } => Topic::MemoryWaitTimeout,
            Payload::CliCommand { .. } => Topic::CliCommand,
            Payload::CliResponse { .. } => Topic::CliResponse,
            Payload::IntentDetected { .. } => Topic::IntentDetected,
            Payload::DjCommentaryRequest { .. } => Topic::DjCommentaryRequest,
            Payload::GptCommentaryResponse { .. } => Topic::GptCommentaryResponse,
            Payload::CommentaryMissed { .. } => Topic::CommentaryMissed,
            Payload::TtsGenerateRequest { .. } => Topic::TtsGenerateRequest,
            Payload::TtsCancel { .. } => Topic::TtsCancel,
            Payload::SpeechGenerationComplete { .. } => Topic::SpeechGenerationComplete,
            Payload::SpeechCacheRequest { .. } => Topic::SpeechCacheRequest,
            Payload::SpeechCacheReady { .. } => Topic::SpeechCacheReady,
            Payload::SpeechCachePlaybackRequest { .. } => Topic::SpeechCachePlaybackRequest,
            Payload::SpeechCachePlaybackCompleted { .. } => Topic::SpeechCachePlaybackCompleted,
            Payload::MusicCommand { .. } => Topic::MusicCommand,
            Payload::MusicPlaybackStarted { .. } => Topic::MusicPlaybackStarted,
            Payload::MusicPlaybackStopped { .. } => Topic::MusicPlaybackStopped,
            Payload::MusicLibraryUpdated { .. } => Topic::MusicLibraryUpdated,
            Payload::TrackPlaying { .. } => Topic::TrackPlaying,
            Payload::TrackStopped {} => Topic::TrackStopped,
            Payload::TrackEndingSoon { .. } => Topic::TrackEndingSoon,
            Payload::AudioDuckingStart { .. } => Topic::AudioDuckingStart,
            Payload::AudioDuckingStop { .. } => Topic::AudioDuckingStop,
            Payload::CrossfadeComplete { .. } => Topic::CrossfadeComplete,
            Payload::PlanReady { .. } => Topic::PlanReady,
            Payload::PlanStarted { .. } => Topic::PlanStarted,
            Payload::PlanEnded { .. } => Topic::PlanEnded,
            Payload::DjModeChanged { .. } => Topic::DjModeChanged,
            Payload::SystemSetModeRequest { .. } => Topic::SystemSetModeRequest,
            Payload::ModeTransitionStarted { .. } => Topic::ModeTransitionStarted,
            Payload::SystemModeChange { .. } => Topic::SystemModeChange,
            Payload::ModeTransitionComplete { .. } => Topic::ModeTransitionComplete,
            Payload::DashboardLog { .. } => Topic::DashboardLog,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::Topic;

    #[test]
    fn payload_topic_matches_variant() {
        let p = Payload::TrackStopped {};
        assert_eq!(p.topic(), Topic::TrackStopped);
    }

    #[test]
    fn service_status_round_trips() {
        let p = Payload::ServiceStatus {
            service_name: "memory_store".into(),
            status: LifecycleState::Running,
            uptime_secs: 12.5,
            message: "ok".into(),
            severity: Severity::Info,
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"type\":\"service_status\""));
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.topic(), Topic::ServiceStatus);
    }

    #[test]
    fn music_command_round_trips_with_optional_fields() {
        let p = Payload::MusicCommand {
            action: MusicAction::Play,
            source: Source::Cli,
            track_name: Some("cantina".into()),
            track_id: None,
            fade_ms: None,
            ceiling_volume: None,
        };
        let json = serde_json::to_string(&p).unwrap();
        let back: Payload = serde_json::from_str(&json).unwrap();
        match back {
            Payload::MusicCommand { track_name, .. } => {
                assert_eq!(track_name.as_deref(), Some("cantina"))
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn memory_get_for_unknown_key_is_not_an_error() {
        let p = Payload::MemoryValue {
            key: "nonexistent".into(),
            value: None,
            present: false,
            request_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["present"], false);
        assert_eq!(json["value"], serde_json::Value::Null);
    }
}
