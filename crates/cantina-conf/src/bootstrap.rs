//! Bootstrap configuration - seeds runtime state (timeouts, caps, the DJ
//! keyword map), then the runtime owns it. None of this is infrastructure:
//! every field here has a documented spec default and is safe to change
//! between restarts without touching how the process binds or where it
//! stores files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Timeout and interval defaults named throughout §5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Bus slow-handler warning threshold (§4.1).
    #[serde(default = "TimeoutsConfig::default_slow_handler_warn_ms")]
    pub slow_handler_warn_ms: u64,

    /// Late-subscriber bootstrap wait for `STATUS_REQUEST` replies (§4.2).
    #[serde(default = "TimeoutsConfig::default_subscribe_response_wait_secs")]
    pub subscribe_response_wait_secs: u64,

    /// `speak` step completion wait, T_speak (§4.6).
    #[serde(default = "TimeoutsConfig::default_speech_completion_secs")]
    pub speech_completion_secs: u64,

    /// Extra seconds added to `2 * fade_ms` for crossfade completion wait,
    /// T_cross (§4.6).
    #[serde(default = "TimeoutsConfig::default_crossfade_extra_secs")]
    pub crossfade_extra_secs: u64,

    /// `post_from_thread` crossing timeout (§4.2, §5).
    #[serde(default = "TimeoutsConfig::default_thread_crossing_post_ms")]
    pub thread_crossing_post_ms: u64,

    /// `MEMORY_WAIT` default timeout, T (§4.4).
    #[serde(default = "TimeoutsConfig::default_memory_wait_secs")]
    pub memory_wait_secs: u64,

    /// Service heartbeat interval, H (§3 invariant 9, §4.2).
    #[serde(default = "TimeoutsConfig::default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Memory store persistence debounce (§4.4).
    #[serde(default = "TimeoutsConfig::default_persistence_debounce_ms")]
    pub persistence_debounce_ms: u64,

    /// `stop()` grace period, T_stop (§5).
    #[serde(default = "TimeoutsConfig::default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

impl TimeoutsConfig {
    fn default_slow_handler_warn_ms() -> u64 {
        100
    }
    fn default_subscribe_response_wait_secs() -> u64 {
        5
    }
    fn default_speech_completion_secs() -> u64 {
        25
    }
    fn default_crossfade_extra_secs() -> u64 {
        2
    }
    fn default_thread_crossing_post_ms() -> u64 {
        100
    }
    fn default_memory_wait_secs() -> u64 {
        5
    }
    fn default_heartbeat_interval_secs() -> u64 {
        30
    }
    fn default_persistence_debounce_ms() -> u64 {
        500
    }
    fn default_stop_grace_secs() -> u64 {
        5
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            slow_handler_warn_ms: Self::default_slow_handler_warn_ms(),
            subscribe_response_wait_secs: Self::default_subscribe_response_wait_secs(),
            speech_completion_secs: Self::default_speech_completion_secs(),
            crossfade_extra_secs: Self::default_crossfade_extra_secs(),
            thread_crossing_post_ms: Self::default_thread_crossing_post_ms(),
            memory_wait_secs: Self::default_memory_wait_secs(),
            heartbeat_interval_secs: Self::default_heartbeat_interval_secs(),
            persistence_debounce_ms: Self::default_persistence_debounce_ms(),
            stop_grace_secs: Self::default_stop_grace_secs(),
        }
    }
}

/// Web Bridge connection and throttling caps (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebBridgeConfig {
    /// Hard cap on concurrent clients.
    #[serde(default = "WebBridgeConfig::default_max_connections")]
    pub max_connections: usize,

    /// Per-client command rate limit, per minute.
    #[serde(default = "WebBridgeConfig::default_client_rate_limit_per_min")]
    pub client_rate_limit_per_min: u32,

    /// High-frequency topic cap (audio amplitude, interim transcription),
    /// coalesce-latest.
    #[serde(default = "WebBridgeConfig::default_high_freq_per_sec")]
    pub high_freq_per_sec: u32,

    /// Medium-frequency topic cap (service-status, voice-state), tail-drop.
    #[serde(default = "WebBridgeConfig::default_medium_freq_per_sec")]
    pub medium_freq_per_sec: u32,
}

impl WebBridgeConfig {
    fn default_max_connections() -> usize {
        10
    }
    fn default_client_rate_limit_per_min() -> u32 {
        60
    }
    fn default_high_freq_per_sec() -> u32 {
        10
    }
    fn default_medium_freq_per_sec() -> u32 {
        30
    }
}

impl Default for WebBridgeConfig {
    fn default() -> Self {
        Self {
            max_connections: Self::default_max_connections(),
            client_rate_limit_per_min: Self::default_client_rate_limit_per_min(),
            high_freq_per_sec: Self::default_high_freq_per_sec(),
            medium_freq_per_sec: Self::default_medium_freq_per_sec(),
        }
    }
}

/// DJ-mode loop policy (§4.7.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DjConfig {
    /// `TRACK_ENDING_SOON` lead time the implementer chose (spec leaves
    /// the exact value open beyond "≈30s").
    #[serde(default = "DjConfig::default_track_ending_lead_secs")]
    pub track_ending_lead_secs: u32,

    /// Last-N-played history size for track-selection filtering (§4.7.2).
    #[serde(default = "DjConfig::default_history_size")]
    pub history_size: usize,

    /// Default implicit/explicit ducking level applied around commentary.
    #[serde(default = "DjConfig::default_duck_level")]
    pub duck_level: f32,

    #[serde(default = "DjConfig::default_duck_fade_ms")]
    pub duck_fade_ms: u64,

    #[serde(default = "DjConfig::default_crossfade_fade_ms")]
    pub crossfade_fade_ms: u64,

    /// Round-robin commentary styles (§4.7.3 step 2).
    #[serde(default = "DjConfig::default_commentary_styles")]
    pub commentary_styles: Vec<String>,
}

impl DjConfig {
    fn default_track_ending_lead_secs() -> u32 {
        30
    }
    fn default_history_size() -> usize {
        5
    }
    fn default_duck_level() -> f32 {
        0.5
    }
    fn default_duck_fade_ms() -> u64 {
        500
    }
    fn default_crossfade_fade_ms() -> u64 {
        4000
    }
    fn default_commentary_styles() -> Vec<String> {
        vec![
            "hype".to_string(),
            "trivia".to_string(),
            "mellow".to_string(),
            "banter".to_string(),
        ]
    }
}

impl Default for DjConfig {
    fn default() -> Self {
        Self {
            track_ending_lead_secs: Self::default_track_ending_lead_secs(),
            history_size: Self::default_history_size(),
            duck_level: Self::default_duck_level(),
            duck_fade_ms: Self::default_duck_fade_ms(),
            crossfade_fade_ms: Self::default_crossfade_fade_ms(),
            commentary_styles: Self::default_commentary_styles(),
        }
    }
}

/// Keyword map for mood/genre free-text track queries (§4.7.2 step 2).
/// Maps a keyword to a set of candidate track identities
/// (`MusicTrack::path_or_uri`).
pub type KeywordMap = HashMap<String, Vec<String>>;

/// Bootstrap configuration - seeds runtime, then runtime owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub web_bridge: WebBridgeConfig,

    #[serde(default)]
    pub dj: DjConfig,

    /// Initial keyword map; empty until an operator seeds one.
    #[serde(default)]
    pub keyword_map: KeywordMap,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutsConfig::default(),
            web_bridge: WebBridgeConfig::default(),
            dj: DjConfig::default(),
            keyword_map: KeywordMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_match_spec_defaults() {
        let t = TimeoutsConfig::default();
        assert_eq!(t.slow_handler_warn_ms, 100);
        assert_eq!(t.subscribe_response_wait_secs, 5);
        assert_eq!(t.speech_completion_secs, 25);
        assert_eq!(t.crossfade_extra_secs, 2);
        assert_eq!(t.thread_crossing_post_ms, 100);
        assert_eq!(t.memory_wait_secs, 5);
        assert_eq!(t.heartbeat_interval_secs, 30);
        assert_eq!(t.persistence_debounce_ms, 500);
        assert_eq!(t.stop_grace_secs, 5);
    }

    #[test]
    fn web_bridge_defaults_match_spec() {
        let w = WebBridgeConfig::default();
        assert_eq!(w.max_connections, 10);
        assert_eq!(w.client_rate_limit_per_min, 60);
        assert_eq!(w.high_freq_per_sec, 10);
        assert_eq!(w.medium_freq_per_sec, 30);
    }

    #[test]
    fn dj_defaults_match_spec() {
        let dj = DjConfig::default();
        assert_eq!(dj.track_ending_lead_secs, 30);
        assert_eq!(dj.history_size, 5);
        assert_eq!(dj.commentary_styles.len(), 4);
    }
}
