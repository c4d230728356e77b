//! `objnav-env` – the environment seam.
//!
//! The agent never talks to a simulator or robot directly; it only sees the
//! [`Environment`] trait.  Any backend (a remote simulator bridge, a real
//! robot, the in-process [`sim::SimEnvironment`]) can be swapped in without
//! touching the control loop.
//!
//! # Modules
//!
//! - [`sim`] – [`SimEnvironment`][sim::SimEnvironment]: a deterministic grid
//!   world used for tests and dry runs without any external simulator.

pub mod sim;

use objnav_types::{ActionPayload, NavError, Visibility};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by environment backends.
#[derive(Error, Debug)]
pub enum EnvError {
    #[error("unknown scene: {0}")]
    UnknownScene(String),
    #[error("unsupported action payload: {0}")]
    UnsupportedAction(String),
    #[error("environment backend failure: {0}")]
    Backend(String),
}

impl From<EnvError> for NavError {
    fn from(e: EnvError) -> Self {
        NavError::Environment(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Observation types
// ─────────────────────────────────────────────────────────────────────────────

/// A raw RGB24 image frame captured from the agent's camera.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row-major RGB24 pixel data (`width * height * 3` bytes).
    pub data: Vec<u8>,
}

impl Frame {
    /// A uniformly filled frame.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self { width, height, data }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Starting pose for an episode.  Absent fields keep the scene default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartPose {
    pub position: Option<Vec3>,
    pub rotation: Option<Vec3>,
    pub horizon: Option<f64>,
    pub standing: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment trait
// ─────────────────────────────────────────────────────────────────────────────

/// An embodied environment the agent can act in.
///
/// Implementations hold the current observation internally; every call
/// refers to the state left by the most recent `reset` or `step`.
pub trait Environment {
    /// Load `scene` and place the agent at `start_pose` (or the scene default).
    fn reset(&mut self, scene: &str, start_pose: Option<&StartPose>) -> Result<(), EnvError>;

    /// Execute one action payload.
    fn step(&mut self, payload: &ActionPayload) -> Result<(), EnvError>;

    /// Capture the current camera frame.
    fn get_frame(&self) -> Result<Frame, EnvError>;

    /// Report visibility of objects of `target_type` in the current observation.
    fn list_visible(&self, target_type: &str) -> Result<Visibility, EnvError>;

    /// Whether the most recent `step` succeeded (no collision / blocked move).
    fn last_action_success(&self) -> bool;

    /// Name of the currently loaded scene.
    fn scene(&self) -> &str;
}
