//! Track selection (§4.7.2): a synchronized view of the music library,
//! refreshed by `MUSIC_LIBRARY_UPDATED`, plus the free-text selection
//! algorithm.

use cantina_proto::MusicTrack;
use rand::seq::SliceRandom;
use std::collections::HashMap;

#[derive(Default)]
pub struct MusicLibrary {
    tracks: Vec<MusicTrack>,
    /// Closed keyword -> candidate identity map (§4.7.2 step 2). Seeded
    /// from `BootstrapConfig::keyword_map` at service start.
    keyword_map: HashMap<String, Vec<String>>,
}

impl MusicLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, tracks: Vec<MusicTrack>) {
        self.tracks = tracks;
    }

    pub fn set_keyword_map(&mut self, keyword_map: HashMap<String, Vec<String>>) {
        self.keyword_map = keyword_map;
    }

    /// Select a track for `query`, excluding identities in `recent_history`
    /// when alternatives exist. `query` may be empty (DJ-mode "pick
    /// anything" selection).
    pub fn select(&self, query: &str, recent_history: &[String]) -> Option<MusicTrack> {
        if self.tracks.is_empty() {
            return None;
        }

        let candidates = self.candidates_for_query(query);
        let pool: Vec<&MusicTrack> = if candidates.is_empty() {
            self.tracks.iter().collect()
        } else {
            candidates
        };

        let filtered: Vec<&MusicTrack> = pool
            .iter()
            .copied()
            .filter(|t| !recent_history.iter().any(|id| id == t.identity()))
            .collect();

        let chosen_pool = if filtered.is_empty() { pool } else { filtered };
        chosen_pool.choose(&mut rand::thread_rng()).map(|t| (*t).clone())
    }

    /// Steps 1-2 of §4.7.2: exact title match, then substring across
    /// title+artist, then the keyword map. Empty if nothing narrows the
    /// set (caller then falls back to the whole library).
    fn candidates_for_query(&self, query: &str) -> Vec<&MusicTrack> {
        if query.is_empty() {
            return Vec::new();
        }
        let query_lower = query.to_lowercase();

        let exact: Vec<&MusicTrack> = self
            .tracks
            .iter()
            .filter(|t| t.title.to_lowercase() == query_lower)
            .collect();
        if !exact.is_empty() {
            return exact;
        }

        let substring: Vec<&MusicTrack> = self
            .tracks
            .iter()
            .filter(|t| {
                t.title.to_lowercase().contains(&query_lower)
                    || t.artist.as_deref().is_some_and(|a| a.to_lowercase().contains(&query_lower))
            })
            .collect();
        if !substring.is_empty() {
            return substring;
        }

        if let Some(identities) = self.keyword_map.get(&query_lower) {
            return self.tracks.iter().filter(|t| identities.iter().any(|id| id == t.identity())).collect();
        }

        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cantina_proto::MusicSource;

    fn track(title: &str, path: &str) -> MusicTrack {
        MusicTrack {
            track_id: path.to_string(),
            title: title.to_string(),
            artist: None,
            duration_ms: None,
            path_or_uri: path.to_string(),
            source: MusicSource::Local,
        }
    }

    #[test]
    fn exact_title_match_wins_over_substring() {
        let mut lib = MusicLibrary::new();
        lib.replace(vec![track("Cantina Band", "/a"), track("Cantina Band (Remix)", "/b")]);
        let selected = lib.select("Cantina Band", &[]).unwrap();
        assert_eq!(selected.path_or_uri, "/a");
    }

    #[test]
    fn recent_history_is_excluded_when_alternatives_exist() {
        let mut lib = MusicLibrary::new();
        lib.replace(vec![track("One", "/one"), track("Two", "/two")]);
        let selected = lib.select("", &["/one".to_string()]).unwrap();
        assert_eq!(selected.path_or_uri, "/two");
    }

    #[test]
    fn keyword_map_resolves_mood_queries() {
        let mut lib = MusicLibrary::new();
        lib.replace(vec![track("Mellow Tune", "/mellow"), track("Upbeat Tune", "/upbeat")]);
        let mut map = HashMap::new();
        map.insert("chill".to_string(), vec!["/mellow".to_string()]);
        lib.set_keyword_map(map);
        let selected = lib.select("chill", &[]).unwrap();
        assert_eq!(selected.path_or_uri, "/mellow");
    }

    #[test]
    fn empty_library_returns_none() {
        let lib = MusicLibrary::new();
        assert!(lib.select("anything", &[]).is_none());
    }

    #[test]
    fn selection_uses_identity_not_title_for_history_filtering() {
        let mut lib = MusicLibrary::new();
        lib.replace(vec![track("Cantina Band", "/a"), track("Cantina Band", "/b")]);
        let selected = lib.select("", &["/a".to_string()]).unwrap();
        assert_eq!(selected.path_or_uri, "/b");
    }
}
