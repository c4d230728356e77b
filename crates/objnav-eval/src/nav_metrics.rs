//! Run-level navigation and hallucination metrics.
//!
//! SPL (success weighted by path length) uses the straight-line start
//! distance as the shortest path:
//!
//! ```text
//! min_steps = max(1, round(start_distance / step_distance))
//! spl_i     = min_steps / max(steps_i, min_steps)    if success_i, else 0
//! SPL       = mean over all episodes
//! ```

use objnav_types::{EpisodeSummary, StepRecord};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Aggregate navigation quality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NavMetrics {
    pub success_rate: f64,
    /// Mean step count of successful episodes only.
    pub avg_steps: f64,
    pub spl: f64,
}

/// Run-wide hallucination tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HallucinationCounts {
    #[serde(rename = "PH_Existence")]
    pub ph_existence: u32,
    #[serde(rename = "PH_Localization")]
    pub ph_localization: u32,
    pub overconfident_stop: u32,
}

impl HallucinationCounts {
    /// Count labelled steps and sum overconfident stops.
    ///
    /// Steps without labels count as clean.
    pub fn tally(steps: &[StepRecord], summaries: &[EpisodeSummary]) -> Self {
        let mut counts = Self::default();
        for labels in steps.iter().filter_map(|s| s.hallucinations) {
            counts.ph_existence += u32::from(labels.ph_existence);
            counts.ph_localization += u32::from(labels.ph_localization);
        }
        counts.overconfident_stop = summaries.iter().map(|e| e.overconfident_stop).sum();
        counts
    }
}

/// Contents of `metrics.json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunMetrics {
    pub nav: NavMetrics,
    pub hallucinations: HallucinationCounts,
}

impl RunMetrics {
    pub fn compute(steps: &[StepRecord], episodes: &[EpisodeSummary], step_distance: f64) -> Self {
        Self {
            nav: summarize(episodes, step_distance),
            hallucinations: HallucinationCounts::tally(steps, episodes),
        }
    }
}

/// Shortest-path step count implied by `start_distance`.
///
/// Halfway cases round to even.
pub fn min_steps(start_distance: f64, step_distance: f64) -> u32 {
    let ratio = start_distance / step_distance;
    if !ratio.is_finite() {
        return 1;
    }
    (ratio.round_ties_even().max(0.0) as u32).max(1)
}

/// Reduce episode summaries to [`NavMetrics`].  An empty input yields zeros.
pub fn summarize(episodes: &[EpisodeSummary], step_distance: f64) -> NavMetrics {
    if episodes.is_empty() {
        return NavMetrics::default();
    }
    let successes: Vec<&EpisodeSummary> = episodes.iter().filter(|e| e.success).collect();
    let avg_steps = successes.iter().map(|e| f64::from(e.steps)).sum::<f64>()
        / successes.len().max(1) as f64;

    let spl_total: f64 = successes
        .iter()
        .map(|e| {
            let shortest = min_steps(e.start_distance, step_distance);
            let taken = e.steps.max(1);
            f64::from(shortest) / f64::from(taken.max(shortest))
        })
        .sum();

    let metrics = NavMetrics {
        success_rate: successes.len() as f64 / episodes.len() as f64,
        avg_steps,
        spl: spl_total / episodes.len() as f64,
    };
    debug!(
        episodes = episodes.len(),
        successes = successes.len(),
        spl = metrics.spl,
        "navigation metrics"
    );
    metrics
}
