//! Claim-versus-truth classification of recorded steps.
//!
//! Two kinds of perception hallucination are labelled:
//!
//! - **PH_Existence** – the policy claimed the target was visible while the
//!   environment says it was not.
//! - **PH_Localization** – the target was visible and the policy named a
//!   concrete side of the image (left/center/right) that disagrees with where
//!   the target's bounding box actually is.
//!
//! Labels are attached after the episode; they never feed back into
//! decisions.

use objnav_types::{BoundingBox, GroundTruth, HallucinationLabels, RelativePosition, StepRecord};

/// Bands splitting the frame into thirds.
const LEFT_BAND: f64 = 0.33;
const RIGHT_BAND: f64 = 0.66;

/// What the policy asserted about the target at one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimRecord {
    pub claimed_visible: bool,
    pub claimed_relative: RelativePosition,
}

/// Horizontal band containing the box centre; `Unknown` without a box or width.
pub fn relative_from_bbox(bbox: Option<&BoundingBox>, frame_width: u32) -> RelativePosition {
    let Some(bbox) = bbox else {
        return RelativePosition::Unknown;
    };
    if frame_width == 0 {
        return RelativePosition::Unknown;
    }
    let width = f64::from(frame_width);
    let center = bbox.center_x();
    if center < width * LEFT_BAND {
        RelativePosition::Left
    } else if center > width * RIGHT_BAND {
        RelativePosition::Right
    } else {
        RelativePosition::Center
    }
}

/// Label one claim against ground truth.
pub fn classify(claim: &ClaimRecord, truth: &GroundTruth) -> HallucinationLabels {
    let ph_existence = claim.claimed_visible && !truth.target_visible;
    let concrete = claim.claimed_relative != RelativePosition::Unknown;
    let ph_localization = truth.target_visible && concrete && {
        let actual = relative_from_bbox(truth.target_bbox.as_ref(), truth.frame_width);
        actual != RelativePosition::Unknown && actual != claim.claimed_relative
    };
    HallucinationLabels {
        ph_existence,
        ph_localization,
    }
}

/// Fill `hallucinations` on every record from its own claims and snapshot.
///
/// A missing seen-claim counts as "not claimed visible".
pub fn annotate_steps(steps: &mut [StepRecord]) {
    for step in steps {
        let claim = ClaimRecord {
            claimed_visible: step.target_seen_claim.unwrap_or(false),
            claimed_relative: step.target_relative_claim,
        };
        step.hallucinations = Some(classify(&claim, &step.env_meta_for_eval_only));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objnav_types::{Action, DecisionOutput, DecisionSource};

    fn bbox_centered_at(center: f64) -> BoundingBox {
        BoundingBox {
            x: center - 10.0,
            y: 0.0,
            width: 20.0,
            height: 20.0,
        }
    }

    fn truth(visible: bool, bbox: Option<BoundingBox>) -> GroundTruth {
        GroundTruth {
            target_visible: visible,
            target_bbox: bbox,
            target_distance: None,
            frame_width: 300,
        }
    }

    fn claim(visible: bool, relative: RelativePosition) -> ClaimRecord {
        ClaimRecord {
            claimed_visible: visible,
            claimed_relative: relative,
        }
    }

    // ── buckets ──────────────────────────────────────────────────────────────

    #[test]
    fn buckets_split_frame_in_thirds() {
        let b = |c| relative_from_bbox(Some(&bbox_centered_at(c)), 300);
        assert_eq!(b(50.0), RelativePosition::Left);
        assert_eq!(b(150.0), RelativePosition::Center);
        assert_eq!(b(250.0), RelativePosition::Right);
        // 0.33 * 300 = 99 and 0.66 * 300 = 198 are both centre.
        assert_eq!(b(99.0), RelativePosition::Center);
        assert_eq!(b(198.0), RelativePosition::Center);
    }

    #[test]
    fn bucket_unknown_without_box_or_width() {
        assert_eq!(relative_from_bbox(None, 300), RelativePosition::Unknown);
        assert_eq!(
            relative_from_bbox(Some(&bbox_centered_at(10.0)), 0),
            RelativePosition::Unknown
        );
    }

    // ── classify ─────────────────────────────────────────────────────────────

    #[test]
    fn existence_hallucination_ignores_relative_claim() {
        let labels = classify(&claim(true, RelativePosition::Right), &truth(false, None));
        assert!(labels.ph_existence);
        assert!(!labels.ph_localization);
    }

    #[test]
    fn wrong_side_is_localization_hallucination() {
        let gt = truth(true, Some(bbox_centered_at(40.0)));
        let labels = classify(&claim(true, RelativePosition::Right), &gt);
        assert!(!labels.ph_existence);
        assert!(labels.ph_localization);
    }

    #[test]
    fn right_side_or_unknown_claim_is_clean() {
        let gt = truth(true, Some(bbox_centered_at(40.0)));
        assert_eq!(
            classify(&claim(true, RelativePosition::Left), &gt),
            HallucinationLabels::default()
        );
        assert_eq!(
            classify(&claim(true, RelativePosition::Unknown), &gt),
            HallucinationLabels::default()
        );
    }

    #[test]
    fn visible_without_box_never_localizes() {
        let labels = classify(&claim(false, RelativePosition::Left), &truth(true, None));
        assert_eq!(labels, HallucinationLabels::default());
    }

    // ── annotate_steps ───────────────────────────────────────────────────────

    fn record(seen: Option<bool>, relative: RelativePosition, gt: GroundTruth) -> StepRecord {
        StepRecord {
            step_idx: 0,
            episode_id: 0,
            scene: "FloorPlan1".into(),
            target_object_type: "Mug".into(),
            target_prompt: "mug".into(),
            action: Action::MoveAhead,
            collision: false,
            vlm_output: DecisionOutput {
                action: Action::MoveAhead,
                source: DecisionSource::Planner,
            },
            vlm_raw_preview: String::new(),
            vlm_raw_hash: String::new(),
            lmk_preview: String::new(),
            lmk_list: Vec::new(),
            target_seen_claim: seen,
            target_loc_claim: String::new(),
            target_relative_claim: relative,
            rag_hit_ids: Vec::new(),
            env_meta_for_eval_only: gt,
            memory_updates: Vec::new(),
            loop_break_triggered: false,
            planner_input_token_estimate: 0,
            vlm_raw: None,
            hallucinations: None,
        }
    }

    #[test]
    fn annotate_fills_labels_and_keeps_decisions() {
        let mut steps = vec![
            record(Some(true), RelativePosition::Unknown, truth(false, None)),
            record(None, RelativePosition::Unknown, truth(false, None)),
            record(Some(true), RelativePosition::Left, truth(true, Some(bbox_centered_at(280.0)))),
        ];
        annotate_steps(&mut steps);

        let labels: Vec<HallucinationLabels> =
            steps.iter().map(|s| s.hallucinations.unwrap()).collect();
        assert!(labels[0].ph_existence);
        assert_eq!(labels[1], HallucinationLabels::default());
        assert!(labels[2].ph_localization && !labels[2].ph_existence);
        assert!(steps.iter().all(|s| s.action == Action::MoveAhead));
    }
}
