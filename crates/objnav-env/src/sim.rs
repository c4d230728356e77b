//! In-process grid-world simulator for CI/CD testing without an external
//! simulator.
//!
//! [`SimEnvironment`] models a flat room discretised into 0.25 m cells.  The
//! agent occupies one cell and faces one of four yaw headings; objects sit on
//! cells and block movement.  Visibility is a 90° horizontal field of view
//! limited to [`VISIBILITY_DISTANCE`], which mirrors how the object-search
//! benchmarks define "target visible".
//!
//! # Example
//!
//! ```rust
//! use objnav_env::Environment;
//! use objnav_env::sim::{SimEnvironment, SimScene};
//! use objnav_types::Action;
//!
//! let scene = SimScene::new(6, 6)
//!     .with_start((2, 0), 0)
//!     .with_object("Mug", (2, 3));
//! let mut env = SimEnvironment::new().with_scene("Kitchen", scene);
//!
//! env.reset("Kitchen", None).unwrap();
//! assert!(env.list_visible("Mug").unwrap().target_visible);
//!
//! env.step(&Action::MoveAhead.payload()).unwrap();
//! assert!(env.last_action_success());
//! ```

use std::collections::{HashMap, HashSet};

use objnav_types::{ActionPayload, BoundingBox, Visibility};
use tracing::debug;

use crate::{EnvError, Environment, Frame, StartPose};

/// Edge length of one grid cell in metres.
pub const CELL_SIZE: f64 = 0.25;
/// Maximum distance at which an object counts as visible, in metres.
pub const VISIBILITY_DISTANCE: f64 = 1.5;

const HALF_FOV_DEG: f64 = 45.0;
const MIN_HORIZON: f64 = -30.0;
const MAX_HORIZON: f64 = 60.0;
/// Objects are on the floor plane; looking too far up or down loses them.
const MAX_VISIBLE_HORIZON: f64 = 30.0;

// ────────────────────────────────────────────────────────────────────────────
// Scene description
// ────────────────────────────────────────────────────────────────────────────

/// A named object placed on a grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct SimObject {
    pub object_type: String,
    pub cell: (i32, i32),
}

/// Static layout of one simulated scene.
#[derive(Debug, Clone)]
pub struct SimScene {
    /// Number of cells along x.
    pub width: i32,
    /// Number of cells along z.
    pub depth: i32,
    pub obstacles: HashSet<(i32, i32)>,
    pub objects: Vec<SimObject>,
    pub start_cell: (i32, i32),
    /// Start yaw in degrees, a multiple of 90.
    pub start_heading: i32,
}

impl SimScene {
    /// An empty `width × depth` room with the agent in the corner facing +z.
    pub fn new(width: i32, depth: i32) -> Self {
        Self {
            width,
            depth,
            obstacles: HashSet::new(),
            objects: Vec::new(),
            start_cell: (0, 0),
            start_heading: 0,
        }
    }

    pub fn with_obstacle(mut self, cell: (i32, i32)) -> Self {
        self.obstacles.insert(cell);
        self
    }

    pub fn with_object(mut self, object_type: impl Into<String>, cell: (i32, i32)) -> Self {
        self.objects.push(SimObject {
            object_type: object_type.into(),
            cell,
        });
        self
    }

    pub fn with_start(mut self, cell: (i32, i32), heading: i32) -> Self {
        self.start_cell = cell;
        self.start_heading = heading.rem_euclid(360);
        self
    }

    /// A furnished 12×12 room with every requested target placed somewhere
    /// reachable.  Used by the CLI when no real simulator is attached.
    pub fn demo(targets: &[String]) -> Self {
        let mut scene = SimScene::new(12, 12)
            .with_start((6, 1), 0)
            .with_object("Sofa", (2, 9))
            .with_object("Television", (9, 10))
            .with_object("DiningTable", (9, 4))
            .with_obstacle((5, 5))
            .with_obstacle((6, 5))
            .with_obstacle((7, 5));
        const SLOTS: [(i32, i32); 6] = [(6, 8), (3, 4), (10, 7), (1, 1), (8, 11), (4, 10)];
        for (i, target) in targets.iter().enumerate() {
            scene = scene.with_object(target.clone(), SLOTS[i % SLOTS.len()]);
        }
        scene
    }

    fn blocked(&self, cell: (i32, i32)) -> bool {
        cell.0 < 0
            || cell.1 < 0
            || cell.0 >= self.width
            || cell.1 >= self.depth
            || self.obstacles.contains(&cell)
            || self.objects.iter().any(|o| o.cell == cell)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimEnvironment
// ────────────────────────────────────────────────────────────────────────────

/// Deterministic grid-world implementation of [`Environment`].
pub struct SimEnvironment {
    scenes: HashMap<String, SimScene>,
    current: Option<String>,
    cell: (i32, i32),
    heading: i32,
    horizon: f64,
    last_success: bool,
    frame_width: u32,
    frame_height: u32,
}

impl Default for SimEnvironment {
    fn default() -> Self {
        Self {
            scenes: HashMap::new(),
            current: None,
            cell: (0, 0),
            heading: 0,
            horizon: 0.0,
            last_success: true,
            frame_width: 300,
            frame_height: 300,
        }
    }
}

impl SimEnvironment {
    /// Create a simulator with no scenes and a 300×300 camera.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scene under `name`.  Re-registering replaces the layout.
    pub fn with_scene(mut self, name: impl Into<String>, scene: SimScene) -> Self {
        self.scenes.insert(name.into(), scene);
        self
    }

    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame_width = width;
        self.frame_height = height;
        self
    }

    /// Current agent cell, yaw and camera pitch.
    pub fn pose(&self) -> ((i32, i32), i32, f64) {
        (self.cell, self.heading, self.horizon)
    }

    fn active_scene(&self) -> Result<&SimScene, EnvError> {
        let name = self
            .current
            .as_deref()
            .ok_or_else(|| EnvError::Backend("no scene loaded; call reset first".into()))?;
        self.scenes
            .get(name)
            .ok_or_else(|| EnvError::UnknownScene(name.to_string()))
    }

    fn forward_cell(&self) -> (i32, i32) {
        let (dx, dz) = match self.heading {
            0 => (0, 1),
            90 => (1, 0),
            180 => (0, -1),
            _ => (-1, 0),
        };
        (self.cell.0 + dx, self.cell.1 + dz)
    }

    /// Distance (m) and screen-space box of `obj` if it is currently visible.
    fn project(&self, obj: &SimObject) -> Option<(f64, BoundingBox)> {
        if self.horizon.abs() > MAX_VISIBLE_HORIZON {
            return None;
        }
        let dx = f64::from(obj.cell.0 - self.cell.0);
        let dz = f64::from(obj.cell.1 - self.cell.1);
        let distance = (dx * dx + dz * dz).sqrt() * CELL_SIZE;
        if distance > VISIBILITY_DISTANCE {
            return None;
        }
        let relative = if distance == 0.0 {
            0.0
        } else {
            let bearing = dx.atan2(dz).to_degrees();
            wrap_degrees(bearing - f64::from(self.heading))
        };
        if relative.abs() > HALF_FOV_DEG {
            return None;
        }
        let w = f64::from(self.frame_width);
        let h = f64::from(self.frame_height);
        let center = w / 2.0 * (1.0 + relative / HALF_FOV_DEG);
        let size = (w * CELL_SIZE / distance.max(CELL_SIZE)).min(w);
        let bbox = BoundingBox {
            x: (center - size / 2.0).clamp(0.0, w),
            y: (h * 0.4).min(h - size.min(h)),
            width: size,
            height: size.min(h),
        };
        Some((distance, bbox))
    }
}

/// Wrap an angle into `(-180, 180]`.
fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped > 180.0 { wrapped - 360.0 } else { wrapped }
}

impl Environment for SimEnvironment {
    fn reset(&mut self, scene: &str, start_pose: Option<&StartPose>) -> Result<(), EnvError> {
        let layout = self
            .scenes
            .get(scene)
            .ok_or_else(|| EnvError::UnknownScene(scene.to_string()))?;
        self.cell = layout.start_cell;
        self.heading = layout.start_heading;
        self.horizon = 0.0;
        if let Some(pose) = start_pose {
            if let Some(p) = pose.position {
                self.cell = (
                    (p.x / CELL_SIZE).round() as i32,
                    (p.z / CELL_SIZE).round() as i32,
                );
            }
            if let Some(r) = pose.rotation {
                self.heading = (((r.y / 90.0).round() as i32) * 90).rem_euclid(360);
            }
            if let Some(h) = pose.horizon {
                self.horizon = h.clamp(MIN_HORIZON, MAX_HORIZON);
            }
        }
        self.current = Some(scene.to_string());
        self.last_success = true;
        debug!(scene, cell = ?self.cell, heading = self.heading, "sim reset");
        Ok(())
    }

    fn step(&mut self, payload: &ActionPayload) -> Result<(), EnvError> {
        self.active_scene()?;
        let success = match payload.action.as_str() {
            "MoveAhead" => {
                let next = self.forward_cell();
                if self.active_scene()?.blocked(next) {
                    false
                } else {
                    self.cell = next;
                    true
                }
            }
            "RotateLeft" | "RotateRight" => {
                let degrees = payload.degrees.unwrap_or(90.0).round() as i32;
                if degrees % 90 != 0 {
                    return Err(EnvError::UnsupportedAction(format!(
                        "rotation by {degrees}° (grid only supports multiples of 90)"
                    )));
                }
                let signed = if payload.action == "RotateLeft" { -degrees } else { degrees };
                self.heading = (self.heading + signed).rem_euclid(360);
                true
            }
            "LookUp" | "LookDown" => {
                let degrees = f64::from(payload.degrees.unwrap_or(30.0));
                // Positive horizon looks down.
                let next = if payload.action == "LookUp" {
                    self.horizon - degrees
                } else {
                    self.horizon + degrees
                };
                if (MIN_HORIZON..=MAX_HORIZON).contains(&next) {
                    self.horizon = next;
                    true
                } else {
                    false
                }
            }
            "Done" => true,
            other => return Err(EnvError::UnsupportedAction(other.to_string())),
        };
        self.last_success = success;
        debug!(
            action = %payload.action,
            success,
            cell = ?self.cell,
            heading = self.heading,
            "sim step"
        );
        Ok(())
    }

    fn get_frame(&self) -> Result<Frame, EnvError> {
        let scene = self.active_scene()?;
        let mut frame = Frame::filled(self.frame_width, self.frame_height, [90, 90, 90]);
        let stride = self.frame_width as usize * 3;
        for obj in &scene.objects {
            let Some((_, bbox)) = self.project(obj) else {
                continue;
            };
            let x0 = bbox.x as usize;
            let x1 = ((bbox.x + bbox.width) as usize).min(self.frame_width as usize);
            let y0 = bbox.y as usize;
            let y1 = ((bbox.y + bbox.height) as usize).min(self.frame_height as usize);
            for y in y0..y1 {
                for x in x0..x1 {
                    let i = y * stride + x * 3;
                    frame.data[i..i + 3].copy_from_slice(&[200, 180, 60]);
                }
            }
        }
        Ok(frame)
    }

    fn list_visible(&self, target_type: &str) -> Result<Visibility, EnvError> {
        let scene = self.active_scene()?;
        let mut report = Visibility::default();
        for obj in &scene.objects {
            let Some((distance, bbox)) = self.project(obj) else {
                continue;
            };
            report.visible_objects.push(obj.object_type.clone());
            if !report.target_visible && obj.object_type.eq_ignore_ascii_case(target_type) {
                report.target_visible = true;
                report.target_bbox = Some(bbox);
                report.target_distance = Some(distance);
            }
        }
        Ok(report)
    }

    fn last_action_success(&self) -> bool {
        self.last_success
    }

    fn scene(&self) -> &str {
        self.current.as_deref().unwrap_or("")
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
