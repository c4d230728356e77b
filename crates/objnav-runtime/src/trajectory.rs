//! [`TrajectoryHistory`] – bounded record of the most recent steps.
//!
//! Keeps the last *K* actions and their outcomes in two parallel ring
//! buffers.  The textual [`summary`][TrajectoryHistory::summary] is what the
//! decision prompt sees as "recent history".
//!
//! # Example
//!
//! ```rust
//! use objnav_runtime::trajectory::TrajectoryHistory;
//! use objnav_types::Action;
//!
//! let mut history = TrajectoryHistory::new(2);
//! assert_eq!(history.summary(), "(none)");
//!
//! history.add(Action::MoveAhead, false, true, Default::default());
//! history.add(Action::RotateLeft, true, false, Default::default());
//! history.add(Action::MoveAhead, true, false, Default::default());
//! assert_eq!(history.summary(), "RotateLeft. MoveAhead");
//! ```

use std::collections::VecDeque;

use objnav_types::{Action, StepOutcome};
use serde_json::{Map, Value};

/// Default number of steps kept by the history.
pub const DEFAULT_HISTORY_K: usize = 6;

/// Fixed-capacity history of actions and outcomes.
#[derive(Debug, Clone)]
pub struct TrajectoryHistory {
    capacity: usize,
    actions: VecDeque<Action>,
    outcomes: VecDeque<StepOutcome>,
}

impl Default for TrajectoryHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_K)
    }
}

impl TrajectoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            actions: VecDeque::with_capacity(capacity),
            outcomes: VecDeque::with_capacity(capacity),
        }
    }

    /// Record a step, evicting the oldest one when full.
    pub fn add(
        &mut self,
        action: Action,
        success: bool,
        collision: bool,
        info: Map<String, Value>,
    ) {
        self.actions.push_back(action);
        self.outcomes.push_back(StepOutcome {
            action,
            success,
            collision,
            info,
        });
        while self.actions.len() > self.capacity {
            self.actions.pop_front();
        }
        while self.outcomes.len() > self.capacity {
            self.outcomes.pop_front();
        }
    }

    /// Render recent outcomes as `"MoveAhead (blocked). RotateLeft"`.
    pub fn summary(&self) -> String {
        if self.outcomes.is_empty() {
            return "(none)".to_string();
        }
        self.outcomes
            .iter()
            .map(|o| {
                if o.collision {
                    format!("{} (blocked)", o.action)
                } else {
                    o.action.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(". ")
    }

    /// Recent actions, oldest first.
    pub fn recent_actions(&self) -> &VecDeque<Action> {
        &self.actions
    }

    pub fn outcomes(&self) -> &VecDeque<StepOutcome> {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.actions.clear();
        self.outcomes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(history: &mut TrajectoryHistory, action: Action, collision: bool) {
        history.add(action, !collision, collision, Map::new());
    }

    #[test]
    fn empty_summary_is_none_marker() {
        assert_eq!(TrajectoryHistory::new(4).summary(), "(none)");
    }

    #[test]
    fn collisions_render_as_blocked() {
        let mut history = TrajectoryHistory::new(4);
        add(&mut history, Action::MoveAhead, true);
        add(&mut history, Action::RotateRight, false);
        assert_eq!(history.summary(), "MoveAhead (blocked). RotateRight");
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let mut history = TrajectoryHistory::new(3);
        for i in 0..10 {
            let action = Action::ALL[i % Action::ALL.len()];
            add(&mut history, action, false);
            assert!(history.len() <= 3);
            assert!(history.recent_actions().len() <= 3);
        }
        // Steps 7, 8, 9 → indices 1, 2, 3 of the vocabulary.
        let recent: Vec<Action> = history.recent_actions().iter().copied().collect();
        assert_eq!(recent, vec![Action::RotateLeft, Action::RotateRight, Action::LookUp]);
    }

    #[test]
    fn outcome_info_is_kept() {
        let mut history = TrajectoryHistory::default();
        let mut info = Map::new();
        info.insert("step".into(), Value::from(4));
        history.add(Action::LookDown, true, false, info);
        assert_eq!(history.outcomes()[0].info["step"], 4);
        assert_eq!(history.capacity(), DEFAULT_HISTORY_K);
    }

    #[test]
    fn clear_empties_both_buffers() {
        let mut history = TrajectoryHistory::new(2);
        add(&mut history, Action::Stop, false);
        history.clear();
        assert!(history.is_empty());
        assert!(history.recent_actions().is_empty());
    }
}
