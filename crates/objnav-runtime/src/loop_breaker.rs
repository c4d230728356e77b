//! [`LoopBreakDetector`] – overrides the policy when the agent is stuck.
//!
//! Vision-language policies readily fall into degenerate patterns: spinning
//! in place, nodding the camera up and down, or walking into the same wall.
//! Before the policy is consulted each step, the detector inspects the last
//! [`WINDOW`] actions and collision flags ([`LoopWindows`]) and, if one of
//! its [`LoopRule`]s matches, dictates a corrective turn instead.
//!
//! # Rules
//!
//! Rules are evaluated in registration order and the first match wins.  The
//! [standard set][LoopBreakDetector::standard] is:
//!
//! 1. last 4 actions all `RotateLeft` → `RotateRight`
//! 2. last 4 actions all `RotateRight` → `RotateLeft`
//! 3. last 6 actions all looks, with both `LookUp` and `LookDown` → alternating turn
//! 4. the 3 most recent `MoveAhead`s in the window all collided → alternating turn
//!
//! An *alternating turn* reads a [`TurnToggle`]: `RotateRight` when clear,
//! `RotateLeft` when set, and the toggle flips.  The toggle is passed in and
//! handed back so its lifetime (per episode or per run) is the caller's call.
//!
//! # Example
//!
//! ```rust
//! use objnav_runtime::loop_breaker::{LoopBreakDetector, LoopWindows, TurnToggle};
//! use objnav_types::Action;
//!
//! let detector = LoopBreakDetector::standard();
//! let mut windows = LoopWindows::new();
//! for _ in 0..4 {
//!     windows.push(Action::RotateLeft, false);
//! }
//!
//! let (fired, _toggle) = detector.evaluate(&windows, TurnToggle::default());
//! assert_eq!(fired.map(|f| f.action), Some(Action::RotateRight));
//! ```

use std::collections::VecDeque;

use objnav_types::Action;

/// Number of recent steps the detector can see.
pub const WINDOW: usize = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Windows & toggle
// ─────────────────────────────────────────────────────────────────────────────

/// Ring buffers of the last [`WINDOW`] actions and their collision flags.
#[derive(Debug, Clone, Default)]
pub struct LoopWindows {
    actions: VecDeque<Action>,
    collisions: VecDeque<bool>,
}

impl LoopWindows {
    pub fn new() -> Self {
        Self {
            actions: VecDeque::with_capacity(WINDOW),
            collisions: VecDeque::with_capacity(WINDOW),
        }
    }

    /// Record an executed step.
    pub fn push(&mut self, action: Action, collision: bool) {
        self.actions.push_back(action);
        self.collisions.push_back(collision);
        while self.actions.len() > WINDOW {
            self.actions.pop_front();
        }
        while self.collisions.len() > WINDOW {
            self.collisions.pop_front();
        }
    }

    pub fn actions(&self) -> &VecDeque<Action> {
        &self.actions
    }

    pub fn collisions(&self) -> &VecDeque<bool> {
        &self.collisions
    }

    /// The last `n` actions, or `None` when fewer were recorded.
    pub fn tail(&self, n: usize) -> Option<impl Iterator<Item = Action> + '_> {
        let len = self.actions.len();
        (len >= n).then(|| self.actions.range(len - n..).copied())
    }

    pub fn clear(&mut self) {
        self.actions.clear();
        self.collisions.clear();
    }
}

/// Which way the next alternating turn goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnToggle(bool);

impl TurnToggle {
    /// Emit the turn for the current state and return the flipped toggle.
    pub fn turn(self) -> (Action, TurnToggle) {
        let action = if self.0 {
            Action::RotateLeft
        } else {
            Action::RotateRight
        };
        (action, TurnToggle(!self.0))
    }

    pub fn is_set(self) -> bool {
        self.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rule trait
// ─────────────────────────────────────────────────────────────────────────────

/// What a matching rule asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remedy {
    /// A fixed corrective action.
    Turn(Action),
    /// Whatever the [`TurnToggle`] says next.
    AlternatingTurn,
}

/// A single stuck-pattern check.
pub trait LoopRule: Send + Sync {
    /// Short identifier recorded in logs.
    fn name(&self) -> &str;

    /// Return a remedy when the pattern is present in `windows`.
    fn check(&self, windows: &LoopWindows) -> Option<Remedy>;
}

/// `run` consecutive rotations in the same direction.
pub struct RepeatedRotation {
    pub direction: Action,
    pub run: usize,
}

impl LoopRule for RepeatedRotation {
    fn name(&self) -> &str {
        match self.direction {
            Action::RotateLeft => "repeated_rotate_left",
            Action::RotateRight => "repeated_rotate_right",
            _ => "repeated_rotation",
        }
    }

    fn check(&self, windows: &LoopWindows) -> Option<Remedy> {
        let mut tail = windows.tail(self.run)?;
        if !tail.all(|a| a == self.direction) {
            return None;
        }
        match self.direction {
            Action::RotateLeft => Some(Remedy::Turn(Action::RotateRight)),
            Action::RotateRight => Some(Remedy::Turn(Action::RotateLeft)),
            _ => Some(Remedy::AlternatingTurn),
        }
    }
}

/// The camera has been nodding up and down for `run` steps.
pub struct LookOscillation {
    pub run: usize,
}

impl LoopRule for LookOscillation {
    fn name(&self) -> &str {
        "look_oscillation"
    }

    fn check(&self, windows: &LoopWindows) -> Option<Remedy> {
        let tail: Vec<Action> = windows.tail(self.run)?.collect();
        let all_looks = tail.iter().all(|a| a.is_look());
        let both = tail.contains(&Action::LookUp) && tail.contains(&Action::LookDown);
        (all_looks && both).then_some(Remedy::AlternatingTurn)
    }
}

/// The last `run` forward moves in the window all hit something.
pub struct BlockedForward {
    pub run: usize,
}

impl LoopRule for BlockedForward {
    fn name(&self) -> &str {
        "blocked_forward"
    }

    fn check(&self, windows: &LoopWindows) -> Option<Remedy> {
        let forward: Vec<bool> = windows
            .actions()
            .iter()
            .zip(windows.collisions())
            .filter(|(a, _)| **a == Action::MoveAhead)
            .map(|(_, c)| *c)
            .collect();
        if self.run == 0 || forward.len() < self.run {
            return None;
        }
        forward[forward.len() - self.run..]
            .iter()
            .all(|c| *c)
            .then_some(Remedy::AlternatingTurn)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LoopBreakDetector
// ─────────────────────────────────────────────────────────────────────────────

/// A fired override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopBreak {
    pub action: Action,
    pub rule: String,
}

/// Ordered rule list; the first matching rule decides the action.
#[derive(Default)]
pub struct LoopBreakDetector {
    rules: Vec<Box<dyn LoopRule>>,
}

impl LoopBreakDetector {
    /// A detector with no rules (never fires).
    pub fn new() -> Self {
        Self::default()
    }

    /// The four built-in rules in priority order.
    pub fn standard() -> Self {
        let mut detector = Self::new();
        detector.add_rule(Box::new(RepeatedRotation {
            direction: Action::RotateLeft,
            run: 4,
        }));
        detector.add_rule(Box::new(RepeatedRotation {
            direction: Action::RotateRight,
            run: 4,
        }));
        detector.add_rule(Box::new(LookOscillation { run: 6 }));
        detector.add_rule(Box::new(BlockedForward { run: 3 }));
        detector
    }

    /// Append a rule with the lowest priority so far.
    pub fn add_rule(&mut self, rule: Box<dyn LoopRule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Evaluate the rules against `windows`.
    ///
    /// Returns the override (if any) and the toggle to use next time.  The
    /// toggle only changes when an alternating turn was emitted.
    pub fn evaluate(
        &self,
        windows: &LoopWindows,
        toggle: TurnToggle,
    ) -> (Option<LoopBreak>, TurnToggle) {
        for rule in &self.rules {
            let Some(remedy) = rule.check(windows) else {
                continue;
            };
            let (action, toggle) = match remedy {
                Remedy::Turn(action) => (action, toggle),
                Remedy::AlternatingTurn => toggle.turn(),
            };
            let fired = LoopBreak {
                action,
                rule: rule.name().to_string(),
            };
            return (Some(fired), toggle);
        }
        (None, toggle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows(steps: &[(Action, bool)]) -> LoopWindows {
        let mut w = LoopWindows::new();
        for (a, c) in steps {
            w.push(*a, *c);
        }
        w
    }

    fn ok(a: Action) -> (Action, bool) {
        (a, false)
    }

    fn blocked(a: Action) -> (Action, bool) {
        (a, true)
    }

    // ── windows ──────────────────────────────────────────────────────────────

    #[test]
    fn windows_keep_last_eight() {
        let mut w = LoopWindows::new();
        for _ in 0..20 {
            w.push(Action::MoveAhead, true);
        }
        assert_eq!(w.actions().len(), WINDOW);
        assert_eq!(w.collisions().len(), WINDOW);
        assert!(w.tail(9).is_none());
    }

    // ── rotation rules ───────────────────────────────────────────────────────

    #[test]
    fn four_left_turns_force_right() {
        let w = windows(&[
            ok(Action::MoveAhead),
            ok(Action::RotateLeft),
            ok(Action::RotateLeft),
            ok(Action::RotateLeft),
            ok(Action::RotateLeft),
        ]);
        let (fired, toggle) = LoopBreakDetector::standard().evaluate(&w, TurnToggle::default());
        let fired = fired.unwrap();
        assert_eq!(fired.action, Action::RotateRight);
        assert_eq!(fired.rule, "repeated_rotate_left");
        assert!(!toggle.is_set(), "fixed turns leave the toggle alone");
    }

    #[test]
    fn four_right_turns_force_left() {
        let w = windows(&[ok(Action::RotateRight); 4]);
        let (fired, _) = LoopBreakDetector::standard().evaluate(&w, TurnToggle::default());
        assert_eq!(fired.unwrap().action, Action::RotateLeft);
    }

    #[test]
    fn three_turns_do_not_fire() {
        let w = windows(&[ok(Action::RotateLeft); 3]);
        let (fired, _) = LoopBreakDetector::standard().evaluate(&w, TurnToggle::default());
        assert!(fired.is_none());
    }

    // ── look oscillation ─────────────────────────────────────────────────────

    #[test]
    fn look_oscillation_emits_alternating_turns() {
        let detector = LoopBreakDetector::standard();
        let w = windows(&[
            ok(Action::LookUp),
            ok(Action::LookDown),
            ok(Action::LookUp),
            ok(Action::LookDown),
            ok(Action::LookUp),
            ok(Action::LookDown),
        ]);
        let (first, toggle) = detector.evaluate(&w, TurnToggle::default());
        assert_eq!(first.unwrap().action, Action::RotateRight);
        assert!(toggle.is_set());

        let (second, toggle) = detector.evaluate(&w, toggle);
        assert_eq!(second.unwrap().action, Action::RotateLeft);
        assert!(!toggle.is_set());
    }

    #[test]
    fn looking_one_way_only_is_not_oscillation() {
        let w = windows(&[ok(Action::LookDown); 6]);
        let (fired, _) = LoopBreakDetector::standard().evaluate(&w, TurnToggle::default());
        assert!(fired.is_none());
    }

    // ── blocked forward ──────────────────────────────────────────────────────

    #[test]
    fn three_blocked_moves_fire_even_when_interleaved() {
        let w = windows(&[
            blocked(Action::MoveAhead),
            ok(Action::RotateLeft),
            blocked(Action::MoveAhead),
            ok(Action::LookUp),
            blocked(Action::MoveAhead),
        ]);
        let (fired, toggle) = LoopBreakDetector::standard().evaluate(&w, TurnToggle::default());
        let fired = fired.unwrap();
        assert_eq!(fired.rule, "blocked_forward");
        assert_eq!(fired.action, Action::RotateRight);
        assert!(toggle.is_set());
    }

    #[test]
    fn a_successful_recent_move_clears_the_pattern() {
        let w = windows(&[
            blocked(Action::MoveAhead),
            blocked(Action::MoveAhead),
            blocked(Action::MoveAhead),
            ok(Action::MoveAhead),
        ]);
        let (fired, _) = LoopBreakDetector::standard().evaluate(&w, TurnToggle::default());
        assert!(fired.is_none());
    }

    #[test]
    fn blocked_moves_outside_the_window_are_forgotten() {
        let mut steps = vec![blocked(Action::MoveAhead), blocked(Action::MoveAhead)];
        steps.extend(std::iter::repeat_n(ok(Action::LookDown), 6));
        steps.push(blocked(Action::MoveAhead));
        let w = windows(&steps);
        let (fired, _) = LoopBreakDetector::standard().evaluate(&w, TurnToggle::default());
        assert!(fired.is_none());
    }

    // ── priority ─────────────────────────────────────────────────────────────

    #[test]
    fn first_matching_rule_wins() {
        // Both "four right turns" and "three blocked moves" hold; rule 2 wins
        // and the toggle is untouched.
        let w = windows(&[
            blocked(Action::MoveAhead),
            blocked(Action::MoveAhead),
            blocked(Action::MoveAhead),
            ok(Action::RotateRight),
            ok(Action::RotateRight),
            ok(Action::RotateRight),
            ok(Action::RotateRight),
        ]);
        let (fired, toggle) = LoopBreakDetector::standard().evaluate(&w, TurnToggle::default());
        assert_eq!(fired.unwrap().action, Action::RotateLeft);
        assert!(!toggle.is_set());
    }

    #[test]
    fn custom_rules_append_after_builtins() {
        struct AlwaysTurn;
        impl LoopRule for AlwaysTurn {
            fn name(&self) -> &str {
                "always"
            }
            fn check(&self, _: &LoopWindows) -> Option<Remedy> {
                Some(Remedy::Turn(Action::RotateLeft))
            }
        }
        let mut detector = LoopBreakDetector::standard();
        detector.add_rule(Box::new(AlwaysTurn));
        assert_eq!(detector.rule_names().last(), Some(&"always"));
        let (fired, _) = detector.evaluate(&LoopWindows::new(), TurnToggle::default());
        assert_eq!(fired.unwrap().rule, "always");
    }

    #[test]
    fn empty_detector_never_fires() {
        let w = windows(&[ok(Action::RotateLeft); 8]);
        let (fired, toggle) = LoopBreakDetector::new().evaluate(&w, TurnToggle::default());
        assert!(fired.is_none());
        assert_eq!(toggle, TurnToggle::default());
    }
}
