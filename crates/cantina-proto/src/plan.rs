//! Plan/Step/Layer: the declarative multi-step audio timeline format.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Preemption layer. `override > foreground > ambient` (§3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Ambient,
    Foreground,
    Override,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Where a `play_music` step's track comes from: a free-text query to run
/// through track selection, or a request to stop playback outright.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayMusicTarget {
    Query(String),
    Stop,
}

/// A single tagged action inside a plan. Every step carries a stable
/// `step_id`, used to correlate completion events and to cancel targeted
/// work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum Step {
    Speak {
        step_id: Uuid,
        text: String,
    },
    PlayCachedSpeech {
        step_id: Uuid,
        cache_key: String,
    },
    MusicDuck {
        step_id: Uuid,
        level: f32,
        fade_ms: u64,
    },
    MusicUnduck {
        step_id: Uuid,
        fade_ms: u64,
    },
    MusicCrossfade {
        step_id: Uuid,
        next_track: String,
        fade_ms: u64,
    },
    PlayMusic {
        step_id: Uuid,
        target: PlayMusicTarget,
        source: crate::payload::Source,
    },
    Parallel {
        step_id: Uuid,
        children: Vec<Step>,
    },
}

impl Step {
    pub fn step_id(&self) -> Uuid {
        match self {
            Step::Speak { step_id, .. }
            | Step::PlayCachedSpeech { step_id, .. }
            | Step::MusicDuck { step_id, .. }
            | Step::MusicUnduck { step_id, .. }
            | Step::MusicCrossfade { step_id, .. }
            | Step::PlayMusic { step_id, .. }
            | Step::Parallel { step_id, .. } => *step_id,
        }
    }
}

/// An ordered, layered description of audio/speech actions, consumed by
/// exactly one executor instance per layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    pub layer: Layer,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(layer: Layer, steps: Vec<Step>) -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            layer,
            steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_priority_ordering() {
        assert!(Layer::Override > Layer::Foreground);
        assert!(Layer::Foreground > Layer::Ambient);
    }

    #[test]
    fn plan_round_trips_through_json() {
        let plan = Plan::new(
            Layer::Foreground,
            vec![
                Step::MusicDuck {
                    step_id: Uuid::new_v4(),
                    level: 0.5,
                    fade_ms: 500,
                },
                Step::Speak {
                    step_id: Uuid::new_v4(),
                    text: "hello there".into(),
                },
                Step::MusicUnduck {
                    step_id: Uuid::new_v4(),
                    fade_ms: 500,
                },
            ],
        );
        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.steps.len(), 3);
        assert_eq!(back.layer, Layer::Foreground);
    }

    #[test]
    fn parallel_step_nests_children() {
        let parallel = Step::Parallel {
            step_id: Uuid::new_v4(),
            children: vec![
                Step::MusicCrossfade {
                    step_id: Uuid::new_v4(),
                    next_track: "track-2".into(),
                    fade_ms: 4000,
                },
                Step::Speak {
                    step_id: Uuid::new_v4(),
                    text: "coming up next".into(),
                },
            ],
        };
        let json = serde_json::to_value(&parallel).unwrap();
        assert_eq!(json["step_type"], "parallel");
        assert_eq!(json["children"].as_array().unwrap().len(), 2);
    }
}
