//! Episode sources: dataset files or the configured scene × target fallback.
//!
//! Dataset records come from several tools and spell the same fields
//! differently, so scene, target and start pose are looked up through a
//! list of aliases.

use std::fs;
use std::path::Path;

use objnav_env::{StartPose, Vec3};
use objnav_types::NavError;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::RunSection;

const SCENE_KEYS: [&str; 4] = ["scene_id", "scene", "scene_name", "sceneId"];
const TARGET_KEYS: [&str; 5] = [
    "object_type",
    "objectType",
    "target_object_type",
    "targetObjectType",
    "target",
];
const POSE_KEYS: [&str; 3] = ["agent_start_pose", "start_pose", "initial_pose"];
const POSITION_KEYS: [&str; 4] = [
    "agent_start_position",
    "start_position",
    "initial_position",
    "agentStartPosition",
];
const ROTATION_KEYS: [&str; 4] = [
    "agent_start_rotation",
    "start_rotation",
    "initial_rotation",
    "agentStartRotation",
];
const HORIZON_KEYS: [&str; 4] = [
    "agent_start_horizon",
    "start_horizon",
    "initial_horizon",
    "cameraHorizon",
];

/// One raw dataset record.
pub type EpisodeRecord = Map<String, Value>;

/// A resolved episode ready to hand to the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedEpisode {
    pub scene: String,
    pub target: String,
    pub start_pose: Option<StartPose>,
}

/// Line written to `episode_meta.jsonl` before each episode runs.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeMeta<'a> {
    pub episode_id: u32,
    pub scene: &'a str,
    pub target: &'a str,
    pub start_pose: Option<&'a StartPose>,
    pub seed: Option<u64>,
    pub split: Option<&'a str>,
    pub dataset: Option<&'a str>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Read every record of `path`.
///
/// `.jsonl` files hold one object per non-blank line; anything else is a
/// JSON array or an object with an `episodes` array.
pub fn load_episodes(path: &Path) -> Result<Vec<EpisodeRecord>, NavError> {
    let raw = fs::read_to_string(path).map_err(|e| NavError::io(path, e))?;
    let is_jsonl = path.extension().is_some_and(|ext| ext == "jsonl");
    if is_jsonl {
        return raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_str::<EpisodeRecord>(line).map_err(NavError::from))
            .collect();
    }

    let payload: Value = serde_json::from_str(&raw)?;
    let list = match payload {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("episodes") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(NavError::EpisodeSource(format!(
                    "{} has no \"episodes\" array",
                    path.display()
                )));
            }
        },
        _ => {
            return Err(NavError::EpisodeSource(format!(
                "{} is neither an array nor an object",
                path.display()
            )));
        }
    };
    list.into_iter()
        .map(|item| match item {
            Value::Object(obj) => Ok(obj),
            other => Err(NavError::EpisodeSource(format!(
                "episode entry is not an object: {other}"
            ))),
        })
        .collect()
}

/// First non-empty string value among `keys`.
fn first_string(record: &EpisodeRecord, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find_map(|v| v.as_str().filter(|s| !s.is_empty()).map(str::to_string))
}

/// First present, non-null value among `keys`.
fn first_value<'a>(record: &'a EpisodeRecord, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| record.get(*k)).find(|v| !v.is_null())
}

pub fn scene_and_target(record: &EpisodeRecord) -> (Option<String>, Option<String>) {
    (
        first_string(record, &SCENE_KEYS),
        first_string(record, &TARGET_KEYS),
    )
}

/// Record at `idx` (wrapping) with its scene and target.
pub fn pick_episode(
    episodes: &[EpisodeRecord],
    idx: usize,
) -> Result<(String, String, &EpisodeRecord), NavError> {
    if episodes.is_empty() {
        return Err(NavError::EpisodeSource("episode list is empty".into()));
    }
    let record = &episodes[idx % episodes.len()];
    match scene_and_target(record) {
        (Some(scene), Some(target)) => Ok((scene, target, record)),
        _ => Err(NavError::EpisodeSource(format!(
            "episode {idx} is missing scene or target fields"
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Start pose
// ─────────────────────────────────────────────────────────────────────────────

fn vec3(value: Option<&Value>) -> Option<Vec3> {
    serde_json::from_value(value?.clone()).ok()
}

/// A bare number is a yaw angle.
fn rotation(value: Option<&Value>) -> Option<Vec3> {
    match value? {
        Value::Number(n) => n.as_f64().map(|y| Vec3 { x: 0.0, y, z: 0.0 }),
        other => vec3(Some(other)),
    }
}

fn standing(value: Option<&Value>) -> bool {
    value.and_then(Value::as_bool).unwrap_or(true)
}

fn nested_pose(pose: &EpisodeRecord, position_keys: &[&str], rotation_keys: &[&str]) -> StartPose {
    StartPose {
        position: vec3(first_value(pose, position_keys)),
        rotation: rotation(first_value(pose, rotation_keys)),
        horizon: first_value(pose, &["horizon", "cameraHorizon"]).and_then(Value::as_f64),
        standing: standing(first_value(pose, &["standing", "isStanding"])),
    }
}

/// Starting pose described by `record`, if any.
///
/// Checked in order: an `agentPose` object, a nested
/// `agent_start_pose`/`start_pose`/`initial_pose` object, then flat
/// `*_position`/`*_rotation`/`*_horizon` keys.
pub fn extract_start_pose(record: &EpisodeRecord) -> Option<StartPose> {
    if let Some(Value::Object(pose)) = record.get("agentPose") {
        return Some(nested_pose(pose, &["position"], &["rotation"]));
    }
    if let Some(Value::Object(pose)) = first_value(record, &POSE_KEYS) {
        return Some(nested_pose(pose, &["position", "pos"], &["rotation", "rot"]));
    }

    let position = first_value(record, &POSITION_KEYS);
    let rot = first_value(record, &ROTATION_KEYS);
    let horizon = first_value(record, &HORIZON_KEYS);
    if position.is_none() && rot.is_none() && horizon.is_none() {
        return None;
    }
    Some(StartPose {
        position: vec3(position),
        rotation: rotation(rot),
        horizon: horizon.and_then(Value::as_f64),
        standing: standing(first_value(record, &["isStanding", "standing"])),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Planning
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve the `num_episodes` episodes of a run.
///
/// With dataset records, episode `i` is record `i % len`.  Otherwise, when
/// `allow_fallback` is set, scenes and targets cycle independently.
pub fn plan_episodes(
    run: &RunSection,
    records: Option<&[EpisodeRecord]>,
) -> Result<Vec<PlannedEpisode>, NavError> {
    let count = run.num_episodes as usize;
    match records {
        Some(records) if !records.is_empty() => (0..count)
            .map(|idx| {
                let (scene, target, record) = pick_episode(records, idx)?;
                Ok(PlannedEpisode {
                    scene,
                    target,
                    start_pose: extract_start_pose(record),
                })
            })
            .collect(),
        _ if run.allow_fallback => {
            if run.scenes.is_empty() || run.target_objects.is_empty() {
                return Err(NavError::Config(
                    "fallback episodes need at least one scene and one target object".into(),
                ));
            }
            Ok((0..count)
                .map(|idx| PlannedEpisode {
                    scene: run.scenes[idx % run.scenes.len()].clone(),
                    target: run.target_objects[idx % run.target_objects.len()].clone(),
                    start_pose: None,
                })
                .collect())
        }
        _ => Err(NavError::Config(
            "no episodes found; set run.episodes_file or run.allow_fallback = true".into(),
        )),
    }
}
