//! Canonical topic names.
//!
//! A [`Topic`] is the closed, versioned enumeration described by the event
//! bus contract: services only ever address each other by topic, never by
//! peer reference. `Topic::as_str` is the wire form used everywhere a
//! topic appears as a map key, a subscription argument, or JSON field.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A canonical event name.
///
/// New topics are added here and nowhere else; every subscriber and every
/// payload schema is indexed by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Topic {
    // --- Service lifecycle ---
    ServiceStatus,
    StatusRequest,

    // --- Memory store ---
    MemoryGet,
    MemoryValue,
    MemorySet,
    MemoryUpdated,
    MemoryWait,
    MemoryWaitResolved,
    MemoryWaitTimeout,

    // --- Command dispatch ---
    CliCommand,
    CliResponse,

    // --- Intent / brain ---
    IntentDetected,
    DjCommentaryRequest,
    GptCommentaryResponse,
    CommentaryMissed,

    // --- Speech / TTS ---
    TtsGenerateRequest,
    TtsCancel,
    SpeechGenerationComplete,
    SpeechCacheRequest,
    SpeechCacheReady,
    SpeechCachePlaybackRequest,
    SpeechCachePlaybackCompleted,

    // --- Music / audio coordination ---
    MusicCommand,
    MusicPlaybackStarted,
    MusicPlaybackStopped,
    MusicLibraryUpdated,
    TrackPlaying,
    TrackStopped,
    TrackEndingSoon,
    AudioDuckingStart,
    AudioDuckingStop,
    CrossfadeComplete,

    // --- Timeline / plans ---
    PlanReady,
    PlanStarted,
    PlanEnded,

    // --- DJ mode ---
    DjModeChanged,

    // --- Mode manager ---
    SystemSetModeRequest,
    ModeTransitionStarted,
    SystemModeChange,
    ModeTransitionComplete,

    // --- Logging ---
    DashboardLog,
}

impl Topic {
    /// All topics, used to build static lookup tables at startup.
    pub const ALL: &'static [Topic] = &[
        Topic::ServiceStatus,
        Topic::StatusRequest,
        Topic::MemoryGet,
        Topic::MemoryValue,
        Topic::MemorySet,
        Topic::MemoryUpdated,
        Topic::MemoryWait,
        Topic::MemoryWaitResolved,
        Topic::MemoryWaitTimeout,
        Topic::CliCommand,
        Topic::CliResponse,
        Topic::IntentDetected,
        Topic::DjCommentaryRequest,
        Topic::GptCommentaryResponse,
        Topic::CommentaryMissed,
        Topic::TtsGenerateRequest,
        Topic::TtsCancel,
        Topic::SpeechGenerationComplete,
        Topic::SpeechCacheRequest,
        Topic::SpeechCacheReady,
        Topic::SpeechCachePlaybackRequest,
        Topic::SpeechCachePlaybackCompleted,
        Topic::MusicCommand,
        Topic::MusicPlaybackStarted,
        Topic::MusicPlaybackStopped,
        Topic::MusicLibraryUpdated,
        Topic::TrackPlaying,
        Topic::TrackStopped,
        Topic::TrackEndingSoon,
        Topic::AudioDuckingStart,
        Topic::AudioDuckingStop,
        Topic::CrossfadeComplete,
        Topic::PlanReady,
        Topic::PlanStarted,
        Topic::PlanEnded,
        Topic::DjModeChanged,
        Topic::SystemSetModeRequest,
        Topic::ModeTransitionStarted,
        Topic::SystemModeChange,
        Topic::ModeTransitionComplete,
        Topic::DashboardLog,
    ];

    /// Sticky topics: the bus retains the last payload per (topic, origin
    /// service) and replays it to new subscribers in origin order.
    pub fn is_sticky(self) -> bool {
        matches!(
            self,
            Topic::ServiceStatus
                | Topic::SystemModeChange
                | Topic::DjModeChanged
                | Topic::MusicPlaybackStarted
                | Topic::MusicPlaybackStopped
                | Topic::MusicLibraryUpdated
        )
    }

    /// Command-kind topics accept at most one subscriber (§4.5 uniqueness
    /// rule). Notification topics may have any number of subscribers.
    pub fn is_command(self) -> bool {
        matches!(
            self,
            Topic::MusicCommand
                | Topic::CliCommand
                | Topic::SystemSetModeRequest
                | Topic::MemoryGet
                | Topic::MemorySet
                | Topic::MemoryWait
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::ServiceStatus => "SERVICE_STATUS",
            Topic::StatusRequest => "STATUS_REQUEST",
            Topic::MemoryGet => "MEMORY_GET",
            Topic::MemoryValue => "MEMORY_VALUE",
            Topic::MemorySet => "MEMORY_SET",
            Topic::MemoryUpdated => "MEMORY_UPDATED",
            Topic::MemoryWait => "MEMORY_WAIT",
            Topic::MemoryWaitResolved => "MEMORY_WAIT_RESOLVED",
            Topic::MemoryWaitTimeout => "MEMORY_WAIT_TIMEOUT",
            Topic::CliCommand => "CLI_COMMAND",
            Topic::CliResponse => "CLI_RESPONSE",
            Topic::IntentDetected => "INTENT_DETECTED",
            Topic::DjCommentaryRequest => "DJ_COMMENTARY_REQUEST",
            Topic::GptCommentaryResponse => "GPT_COMMENTARY_RESPONSE",
            Topic::CommentaryMissed => "COMMENTARY_MISSED",
            Topic::TtsGenerateRequest => "TTS_GENERATE_REQUEST",
            Topic::TtsCancel => "TTS_CANCEL",
            Topic::SpeechGenerationComplete => "SPEECH_GENERATION_COMPLETE",
            Topic::SpeechCacheRequest => "SPEECH_CACHE_REQUEST",
            Topic::SpeechCacheReady => "SPEECH_CACHE_READY",
            Topic::SpeechCachePlaybackRequest => "SPEECH_CACHE_PLAYBACK_REQUEST",
            Topic::SpeechCachePlaybackCompleted => "SPEECH_CACHE_PLAYBACK_COMPLETED",
            Topic::MusicCommand => "MUSIC_COMMAND",
            Topic::MusicPlaybackStarted => "MUSIC_PLAYBACK_STARTED",
            Topic::MusicPlaybackStopped => "MUSIC_PLAYBACK_STOPPED",
            Topic::MusicLibraryUpdated => "MUSIC_LIBRARY_UPDATED",
            Topic::TrackPlaying => "TRACK_PLAYING",
            Topic::TrackStopped => "TRACK_STOPPED",
            Topic::TrackEndingSoon => "TRACK_ENDING_SOON",
            Topic::AudioDuckingStart => "AUDIO_DUCKING_START",
            Topic::AudioDuckingStop => "AUDIO_DUCKING_STOP",
            Topic::CrossfadeComplete => "CROSSFADE_COMPLETE",
            Topic::PlanReady => "PLAN_READY",
            Topic::PlanStarted => "PLAN_STARTED",
            Topic::PlanEnded => "PLAN_ENDED",
            Topic::DjModeChanged => "DJ_MODE_CHANGED",
            Topic::SystemSetModeRequest => "SYSTEM_SET_MODE_REQUEST",
            Topic::ModeTransitionStarted => "MODE_TRANSITION_STARTED",
            Topic::SystemModeChange => "SYSTEM_MODE_CHANGE",
            Topic::ModeTransitionComplete => "MODE_TRANSITION_COMPLETE",
            Topic::DashboardLog => "DASHBOARD_LOG",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
