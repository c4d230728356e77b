//! `objnav-types` – shared data model for the object-search agent.
//!
//! Every other crate in the workspace speaks in terms of these types: the
//! closed [`Action`] vocabulary, the environment step payload, per-step
//! telemetry rows ([`StepRecord`]) and the immutable [`EpisodeSummary`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use schemars::JsonSchema;

// ─────────────────────────────────────────────────────────────────────────────
// Action vocabulary
// ─────────────────────────────────────────────────────────────────────────────

/// The closed set of discrete actions the agent may take.
///
/// Unknown tokens never become an `Action`; use [`Action::from_name`] to
/// validate free-form policy output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Action {
    MoveAhead,
    RotateLeft,
    RotateRight,
    LookUp,
    LookDown,
    Stop,
}

/// Forward step length in metres.
pub const MOVE_MAGNITUDE: f32 = 0.25;
/// Yaw change of a single rotation, in degrees.
pub const ROTATE_DEGREES: f32 = 90.0;
/// Pitch change of a single look-up/look-down, in degrees.
pub const LOOK_DEGREES: f32 = 30.0;

impl Action {
    /// The full vocabulary in canonical order.
    pub const ALL: [Action; 6] = [
        Action::MoveAhead,
        Action::RotateLeft,
        Action::RotateRight,
        Action::LookUp,
        Action::LookDown,
        Action::Stop,
    ];

    /// Canonical action name as it appears in prompts and telemetry.
    pub fn name(self) -> &'static str {
        match self {
            Action::MoveAhead => "MoveAhead",
            Action::RotateLeft => "RotateLeft",
            Action::RotateRight => "RotateRight",
            Action::LookUp => "LookUp",
            Action::LookDown => "LookDown",
            Action::Stop => "Stop",
        }
    }

    /// Resolve a canonical name.  Matching is exact; anything else is `None`.
    pub fn from_name(name: &str) -> Option<Action> {
        Action::ALL.into_iter().find(|a| a.name() == name)
    }

    /// Translate the action into the environment's step schema.
    pub fn payload(self) -> ActionPayload {
        let (magnitude, degrees) = match self {
            Action::MoveAhead => (Some(MOVE_MAGNITUDE), None),
            Action::RotateLeft | Action::RotateRight => (None, Some(ROTATE_DEGREES)),
            Action::LookUp | Action::LookDown => (None, Some(LOOK_DEGREES)),
            Action::Stop => (None, None),
        };
        ActionPayload {
            action: match self {
                Action::Stop => "Done".to_string(),
                other => other.name().to_string(),
            },
            move_magnitude: magnitude,
            degrees,
        }
    }

    /// `true` for the two pitch changes.
    pub fn is_look(self) -> bool {
        matches!(self, Action::LookUp | Action::LookDown)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Environment step payload, e.g. `{"action": "MoveAhead", "moveMagnitude": 0.25}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    pub action: String,
    #[serde(rename = "moveMagnitude", default, skip_serializing_if = "Option::is_none")]
    pub move_magnitude: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degrees: Option<f32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Step outcomes & perception ground truth
// ─────────────────────────────────────────────────────────────────────────────

/// Result of executing one action, as kept by the trajectory history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub action: Action,
    pub success: bool,
    pub collision: bool,
    /// Free-form auxiliary fields (e.g. the step index).
    #[serde(default)]
    pub info: Map<String, Value>,
}

/// Screen-space bounding box of an object, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Horizontal centre of the box.
    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }
}

/// Where the target sits horizontally in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RelativePosition {
    Left,
    Center,
    Right,
    #[default]
    Unknown,
}

impl RelativePosition {
    /// Parse a free-form claim; anything unrecognised is `Unknown`.
    pub fn parse(text: &str) -> RelativePosition {
        match text.trim().to_ascii_lowercase().as_str() {
            "left" => RelativePosition::Left,
            "center" | "centre" => RelativePosition::Center,
            "right" => RelativePosition::Right,
            _ => RelativePosition::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelativePosition::Left => "left",
            RelativePosition::Center => "center",
            RelativePosition::Right => "right",
            RelativePosition::Unknown => "unknown",
        }
    }
}

/// What the environment reports as visible after a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Visibility {
    pub target_visible: bool,
    pub target_bbox: Option<BoundingBox>,
    pub target_distance: Option<f64>,
    #[serde(default)]
    pub visible_objects: Vec<String>,
}

/// Ground-truth snapshot stored with each step, for evaluation only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GroundTruth {
    pub target_visible: bool,
    pub target_bbox: Option<BoundingBox>,
    pub target_distance: Option<f64>,
    pub frame_width: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a retrievable memory entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MemoryType {
    /// Landmarks observed together.
    Place,
    /// Location hint (room type).
    Loc,
    /// Direction hint towards the target.
    Dir,
    Other(String),
}

impl MemoryType {
    pub fn as_str(&self) -> &str {
        match self {
            MemoryType::Place => "PLACE",
            MemoryType::Loc => "LOC",
            MemoryType::Dir => "DIR",
            MemoryType::Other(s) => s,
        }
    }
}

impl From<String> for MemoryType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "PLACE" => MemoryType::Place,
            "LOC" => MemoryType::Loc,
            "DIR" => MemoryType::Dir,
            _ => MemoryType::Other(s),
        }
    }
}

impl From<MemoryType> for String {
    fn from(t: MemoryType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One memory entry written during a step, echoed into telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MemoryUpdate {
    #[serde(rename = "type")]
    #[schemars(with = "String")]
    pub kind: MemoryType,
    pub text: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Telemetry
// ─────────────────────────────────────────────────────────────────────────────

/// Which component chose the step's action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Planner,
    LoopBreaker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DecisionOutput {
    pub action: Action,
    pub source: DecisionSource,
}

/// Post-hoc hallucination labels attached to a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HallucinationLabels {
    #[serde(rename = "PH_Existence")]
    pub ph_existence: bool,
    #[serde(rename = "PH_Localization")]
    pub ph_localization: bool,
}

/// The canonical per-step telemetry row (one JSON object per line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepRecord {
    pub step_idx: u32,
    pub episode_id: u32,
    pub scene: String,
    pub target_object_type: String,
    pub target_prompt: String,
    pub action: Action,
    pub collision: bool,
    pub vlm_output: DecisionOutput,
    pub vlm_raw_preview: String,
    pub vlm_raw_hash: String,
    pub lmk_preview: String,
    pub lmk_list: Vec<String>,
    pub target_seen_claim: Option<bool>,
    pub target_loc_claim: String,
    #[serde(default)]
    pub target_relative_claim: RelativePosition,
    pub rag_hit_ids: Vec<u64>,
    pub env_meta_for_eval_only: GroundTruth,
    pub memory_updates: Vec<MemoryUpdate>,
    pub loop_break_triggered: bool,
    pub planner_input_token_estimate: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlm_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hallucinations: Option<HallucinationLabels>,
}

/// Immutable per-episode result consumed by the metrics aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EpisodeSummary {
    pub episode_id: u32,
    pub scene: String,
    pub target_object_type: String,
    pub target_prompt: String,
    pub success: bool,
    pub steps: u32,
    pub collisions: u32,
    pub failed_move_ahead: u32,
    pub overconfident_stop: u32,
    pub start_distance: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Run-level error spanning collaborator failures, storage and configuration.
#[derive(Error, Debug)]
pub enum NavError {
    #[error("Episode source error: {0}")]
    EpisodeSource(String),

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Decision policy error: {0}")]
    Policy(String),

    #[error("Memory store error: {0}")]
    Memory(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Artefact error: {0}")]
    Artifact(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl NavError {
    /// Wrap an I/O error together with the path that produced it.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        NavError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_roundtrip_through_from_name() {
        for action in Action::ALL {
            assert_eq!(Action::from_name(action.name()), Some(action));
        }
        assert_eq!(Action::from_name("moveahead"), None);
        assert_eq!(Action::from_name("Jump"), None);
    }

    #[test]
    fn move_ahead_payload_carries_magnitude() {
        let json = serde_json::to_value(Action::MoveAhead.payload()).unwrap();
        assert_eq!(json, serde_json::json!({"action": "MoveAhead", "moveMagnitude": 0.25}));
    }

    #[test]
    fn rotation_and_look_payload_degrees() {
        let rot = serde_json::to_value(Action::RotateLeft.payload()).unwrap();
        assert_eq!(rot, serde_json::json!({"action": "RotateLeft", "degrees": 90.0}));
        let look = serde_json::to_value(Action::LookDown.payload()).unwrap();
        assert_eq!(look, serde_json::json!({"action": "LookDown", "degrees": 30.0}));
    }

    #[test]
    fn stop_payload_is_done() {
        let json = serde_json::to_value(Action::Stop.payload()).unwrap();
        assert_eq!(json, serde_json::json!({"action": "Done"}));
    }

    #[test]
    fn memory_type_serializes_as_plain_string() {
        let update = MemoryUpdate {
            kind: MemoryType::Place,
            text: "PLACE: sofa".into(),
        };
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"type\":\"PLACE\""));
        let custom: MemoryType = serde_json::from_str("\"OBJ\"").unwrap();
        assert_eq!(custom, MemoryType::Other("OBJ".into()));
    }

    #[test]
    fn relative_position_parse_is_tolerant() {
        assert_eq!(RelativePosition::parse(" Left "), RelativePosition::Left);
        assert_eq!(RelativePosition::parse("centre"), RelativePosition::Center);
        assert_eq!(RelativePosition::parse("behind"), RelativePosition::Unknown);
    }

    #[test]
    fn hallucination_labels_use_ph_field_names() {
        let labels = HallucinationLabels {
            ph_existence: true,
            ph_localization: false,
        };
        let json = serde_json::to_value(labels).unwrap();
        assert_eq!(json["PH_Existence"], true);
        assert_eq!(json["PH_Localization"], false);
    }

    #[test]
    fn nav_error_display() {
        let err = NavError::EpisodeSource("missing scene".into());
        assert!(err.to_string().contains("missing scene"));
        let io = NavError::io("/tmp/x", std::io::Error::other("boom"));
        assert!(io.to_string().contains("/tmp/x"));
    }
}
