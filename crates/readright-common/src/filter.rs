//! Ranking and filtering of an analysis into the view the user browses.
//!
//! Everything here is a pure function of `(AnalysisResult, FilterState)`: no I/O, no
//! interior state, and the stored sentences are never reordered in place. Callers
//! recompute the view on every read instead of caching it.
use schemars::JsonSchema;
use serde::Serialize;

use crate::model::{AnalysisResult, ScoredSentence};

pub const MIN_RISK_FLOOR: f64 = 0.0;
pub const MIN_RISK_CEILING: f64 = 999.0;
pub const TOP_N_MIN: i64 = 1;
pub const TOP_N_MAX: i64 = 200;
pub const DEFAULT_MIN_RISK: f64 = 1.0;
pub const DEFAULT_TOP_N: i64 = 10;
/// Hotspots derived client-side when the backend sends no shortlist.
pub const HOTSPOT_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, JsonSchema)]
pub struct FilterState {
    pub min_risk: f64,
    pub top_n: i64,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            min_risk: DEFAULT_MIN_RISK,
            top_n: DEFAULT_TOP_N,
        }
    }
}

impl FilterState {
    pub fn effective_min_risk(&self) -> f64 {
        if self.min_risk.is_nan() {
            return MIN_RISK_FLOOR;
        }
        self.min_risk.clamp(MIN_RISK_FLOOR, MIN_RISK_CEILING)
    }

    pub fn effective_top_n(&self) -> usize {
        self.top_n.clamp(TOP_N_MIN, TOP_N_MAX) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HotspotSource {
    /// `top_risk_sentences` as sent by the backend.
    Backend,
    /// Head of the filtered ranking.
    Derived,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct DerivedView {
    pub min_risk: f64,
    pub top_n: usize,
    /// Sentences passing the risk threshold, before truncation.
    pub matching: usize,
    pub ranked: Vec<ScoredSentence>,
    pub hotspots: Vec<ScoredSentence>,
    pub hotspot_source: HotspotSource,
}

/// Stable descending sort by score. Ties keep their original relative order.
pub fn rank(sentences: &[ScoredSentence]) -> Vec<&ScoredSentence> {
    let mut ranked: Vec<&ScoredSentence> = sentences.iter().collect();
    ranked.sort_by(|a, b| b.rank_score().total_cmp(&a.rank_score()));
    ranked
}

pub fn derive_view(result: &AnalysisResult, filters: &FilterState) -> DerivedView {
    let min_risk = filters.effective_min_risk();
    let top_n = filters.effective_top_n();

    let passing: Vec<&ScoredSentence> = rank(&result.all_sentences)
        .into_iter()
        .filter(|s| s.rank_score() >= min_risk)
        .collect();
    let matching = passing.len();

    let ranked: Vec<ScoredSentence> = passing.into_iter().take(top_n).cloned().collect();

    let (hotspots, hotspot_source) = if result.top_risk_sentences.is_empty() {
        (
            ranked.iter().take(HOTSPOT_COUNT).cloned().collect(),
            HotspotSource::Derived,
        )
    } else {
        (result.top_risk_sentences.clone(), HotspotSource::Backend)
    };

    DerivedView {
        min_risk,
        top_n,
        matching,
        ranked,
        hotspots,
        hotspot_source,
    }
}
