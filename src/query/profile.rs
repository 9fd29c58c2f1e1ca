//! Query profiles
//!
//! A profile is a named preset of gating knobs plus a result ordering.
//! Per-call overrides merge over the preset.

use serde::{Deserialize, Serialize};

/// Knobs steering the adaptive term gate and candidate budget
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatingKnobs {
    /// Candidate cap: both the greedy MUST-stop threshold and the final
    /// truncation limit
    pub budget: u64,
    /// Minimum number of MUST terms the gate keeps ANDing toward
    pub min_must: usize,
    /// Maximum number of SHOULD terms
    pub should_cap: usize,
    /// Percentage of query terms dropped from the top of the DF ranking
    pub df_drop_top_percent: f64,
}

/// Named knob presets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Recall-oriented default
    #[default]
    Rag,
    /// High-precision near-duplicate matching
    ParaphraseHp,
    /// Recency ordering, no term gating
    Recent,
}

impl Profile {
    /// Preset knobs; the recency profile's budget defaults to `k`
    pub fn knobs(&self, k: usize) -> GatingKnobs {
        match self {
            Profile::Rag => GatingKnobs {
                budget: 150_000,
                min_must: 0,
                should_cap: 200,
                df_drop_top_percent: 0.5,
            },
            Profile::ParaphraseHp => GatingKnobs {
                budget: 10_000,
                min_must: 3,
                should_cap: 24,
                df_drop_top_percent: 3.0,
            },
            Profile::Recent => GatingKnobs {
                budget: k as u64,
                min_must: 0,
                should_cap: 0,
                df_drop_top_percent: 0.0,
            },
        }
    }

    pub fn is_recent(&self) -> bool {
        matches!(self, Profile::Recent)
    }
}

/// Per-call knob overrides, merged over the profile preset
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KnobOverrides {
    pub budget: Option<u64>,
    pub min_must: Option<usize>,
    pub should_cap: Option<usize>,
    pub df_drop_top_percent: Option<f64>,
}

impl KnobOverrides {
    pub fn apply(&self, mut knobs: GatingKnobs) -> GatingKnobs {
        if let Some(v) = self.budget {
            knobs.budget = v;
        }
        if let Some(v) = self.min_must {
            knobs.min_must = v;
        }
        if let Some(v) = self.should_cap {
            knobs.should_cap = v;
        }
        if let Some(v) = self.df_drop_top_percent {
            knobs.df_drop_top_percent = v;
        }
        knobs
    }
}
