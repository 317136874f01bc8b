//! Music library entities.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MusicSource {
    Local,
    Remote,
}

/// A library track. Identity is `path_or_uri`, never the display title —
/// selection and history tracking must key off it to avoid aliasing two
/// tracks that merely share a similar name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicTrack {
    pub track_id: String,
    pub title: String,
    pub artist: Option<String>,
    pub duration_ms: Option<u64>,
    pub path_or_uri: String,
    pub source: MusicSource,
}

impl MusicTrack {
    /// The canonical identity used for history/dedup comparisons.
    pub fn identity(&self) -> &str {
        &self.path_or_uri
    }
}
