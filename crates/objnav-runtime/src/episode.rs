//! [`EpisodeController`] – the per-step observe/recall/decide/act loop.
//!
//! One call to [`EpisodeController::run_episode`] drives the agent from
//! `reset` until it says `Stop` or exhausts its step budget:
//!
//! ```text
//!  frame ─► probe ─► retrieve ─► loop breaker ──fired──────────┐
//!                                   │                          │
//!                                   └─► prompt ─► policy ─► parse
//!                                                              │
//!  record ◄── memory writes ◄── trajectory ◄── env.step ◄── action
//! ```
//!
//! The controller borrows its collaborators: the environment, the policy,
//! the run-wide [`MemoryStore`] and the `steps.jsonl` sink all outlive a
//! single episode.  Ground truth from [`Environment::list_visible`] is
//! recorded for evaluation only; it never reaches the prompt.

use std::collections::HashSet;

use objnav_env::{Environment, Frame, StartPose};
use objnav_memory::retrieval::{build_dir, build_loc, build_place, format_snippets, retrieve};
use objnav_memory::store::{MemoryMetadata, MemoryStore};
use objnav_types::{
    Action, DecisionOutput, DecisionSource, EpisodeSummary, GroundTruth, MemoryType, MemoryUpdate,
    NavError, RelativePosition, StepRecord, Visibility,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, info_span, warn};

use crate::action_parser::{parse_action_line, safe_fallback};
use crate::frames::save_png;
use crate::journal::{JsonlWriter, RunPaths, write_json, write_text};
use crate::loop_breaker::{LoopBreakDetector, LoopWindows, TurnToggle};
use crate::policy::{DecisionPolicy, parse_candidates, select_action};
use crate::probe::{PROBE_MAX_NEW_TOKENS, ProbeReading, build_query, probe_prompt, stoplist_from};
use crate::prompt::{DEFAULT_TEMPLATE, build_prompt, estimate_tokens};
use crate::trajectory::{DEFAULT_HISTORY_K, TrajectoryHistory};

const RAW_PREVIEW_CHARS: usize = 200;
const LMK_PREVIEW_CHARS: usize = 120;
const RAW_HASH_HEX_CHARS: usize = 16;
const SANITY_LOG_STEPS: u32 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Whether the memory pipeline (probe + retrieval) runs before each decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryMode {
    #[default]
    Off,
    Retrieve,
}

/// Lifetime of the loop breaker's alternating-turn toggle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleScope {
    /// Reset at the start of every episode.
    #[default]
    Episode,
    /// Carried across episodes by the controller.
    Run,
}

/// Debug artefacts written next to the telemetry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactOptions {
    pub save_frames: bool,
    pub frame_stride: u32,
    pub save_vlm_raw: bool,
    pub save_rag_hits: bool,
    pub save_env_meta: bool,
}

/// Immutable settings shared by every episode of a run.
#[derive(Debug, Clone)]
pub struct EpisodeConfig {
    pub max_steps: u32,
    /// A `Stop` within this distance (m) of a visible target is a success.
    pub success_distance: f64,
    pub history_k: usize,
    /// Executed when the policy output names no known action.
    pub safe_fallback: Action,
    pub action_space: Vec<Action>,
    pub memory_mode: MemoryMode,
    /// Memory kinds written after every step and searched on retrieval.
    pub memory_types: Vec<MemoryType>,
    pub top_k: usize,
    pub stoplist: Vec<String>,
    pub toggle_scope: ToggleScope,
    pub prompt_template: String,
    pub max_new_tokens: usize,
    /// Ask the probe for a `REL=` field as well.
    pub probe_relative: bool,
    pub artifacts: ArtifactOptions,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            success_distance: 1.0,
            history_k: DEFAULT_HISTORY_K,
            safe_fallback: Action::MoveAhead,
            action_space: Action::ALL.to_vec(),
            memory_mode: MemoryMode::Off,
            memory_types: vec![MemoryType::Place, MemoryType::Loc],
            top_k: 3,
            stoplist: Vec::new(),
            toggle_scope: ToggleScope::Episode,
            prompt_template: DEFAULT_TEMPLATE.to_string(),
            max_new_tokens: 256,
            probe_relative: false,
            artifacts: ArtifactOptions {
                frame_stride: 1,
                ..ArtifactOptions::default()
            },
        }
    }
}

impl EpisodeConfig {
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_memory(mut self, mode: MemoryMode, types: Vec<MemoryType>) -> Self {
        self.memory_mode = mode;
        self.memory_types = types;
        self
    }

    pub fn with_toggle_scope(mut self, scope: ToggleScope) -> Self {
        self.toggle_scope = scope;
        self
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactOptions) -> Self {
        self.artifacts = artifacts;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Episode input / output
// ─────────────────────────────────────────────────────────────────────────────

/// One episode to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSpec {
    pub episode_id: u32,
    pub scene: String,
    /// Object type queried against the environment's ground truth.
    pub target_object_type: String,
    /// Description of the target shown to the policy.
    pub target_prompt: String,
    pub start_pose: Option<StartPose>,
}

impl EpisodeSpec {
    /// An episode whose prompt is the lower-cased object type.
    pub fn new(episode_id: u32, scene: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            episode_id,
            scene: scene.into(),
            target_prompt: target.to_lowercase(),
            target_object_type: target,
            start_pose: None,
        }
    }

    pub fn with_start_pose(mut self, pose: Option<StartPose>) -> Self {
        self.start_pose = pose;
        self
    }
}

#[derive(Debug, Clone)]
pub struct EpisodeOutcome {
    pub steps: Vec<StepRecord>,
    pub summary: EpisodeSummary,
}

/// A retrieved memory as written to `debug/rag_hits`.
#[derive(Debug, Serialize)]
struct HitDump {
    id: u64,
    text: String,
    metadata: MemoryMetadata,
    score: f64,
}

/// Output of the memory pipeline for one step.
#[derive(Default)]
struct Recall {
    reading: ProbeReading,
    snippets: Vec<String>,
    hits: Vec<HitDump>,
}

/// What was decided this step and how.
struct Decision {
    action: Action,
    source: DecisionSource,
    raw: String,
    full_text: String,
    token_estimate: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// EpisodeController
// ─────────────────────────────────────────────────────────────────────────────

/// Runs episodes against borrowed collaborators.
pub struct EpisodeController<'a, E: ?Sized, P: ?Sized> {
    config: &'a EpisodeConfig,
    env: &'a mut E,
    policy: &'a mut P,
    memory: &'a mut MemoryStore,
    journal: &'a mut JsonlWriter,
    output: Option<RunPaths>,
    detector: LoopBreakDetector,
    stoplist: HashSet<String>,
    run_toggle: TurnToggle,
}

impl<'a, E, P> EpisodeController<'a, E, P>
where
    E: Environment + ?Sized,
    P: DecisionPolicy + ?Sized,
{
    pub fn new(
        config: &'a EpisodeConfig,
        env: &'a mut E,
        policy: &'a mut P,
        memory: &'a mut MemoryStore,
        journal: &'a mut JsonlWriter,
    ) -> Self {
        Self {
            stoplist: stoplist_from(&config.stoplist),
            config,
            env,
            policy,
            memory,
            journal,
            output: None,
            detector: LoopBreakDetector::standard(),
            run_toggle: TurnToggle::default(),
        }
    }

    /// Directory for frames and debug artefacts.  Without one they are skipped.
    pub fn with_output(mut self, paths: RunPaths) -> Self {
        self.output = Some(paths);
        self
    }

    /// Replace the standard loop-break rules.
    pub fn with_detector(mut self, detector: LoopBreakDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Run one episode to completion.
    ///
    /// # Errors
    ///
    /// Environment, policy, memory and enabled artefact failures are
    /// propagated as-is; steps already journaled stay on disk.
    pub fn run_episode(&mut self, spec: &EpisodeSpec) -> Result<EpisodeOutcome, NavError> {
        let span = info_span!(
            "episode",
            id = spec.episode_id,
            scene = %spec.scene,
            target = %spec.target_object_type
        );
        let _enter = span.enter();
        let cfg = self.config;

        self.env.reset(&spec.scene, spec.start_pose.as_ref())?;
        let start = self.env.list_visible(&spec.target_object_type)?;
        let start_distance = start.target_distance.unwrap_or(cfg.success_distance);
        info!(start_distance, visible = start.target_visible, "episode started");

        let mut trajectory = TrajectoryHistory::new(cfg.history_k);
        let mut windows = LoopWindows::new();
        let mut toggle = match cfg.toggle_scope {
            ToggleScope::Episode => TurnToggle::default(),
            ToggleScope::Run => self.run_toggle,
        };

        let mut steps: Vec<StepRecord> = Vec::new();
        let mut collisions = 0u32;
        let mut failed_move_ahead = 0u32;
        let mut last_action: Option<Action> = None;
        let mut last_visibility = start;

        for step_idx in 0..cfg.max_steps {
            let frame = self.env.get_frame()?;
            self.save_frame(spec.episode_id, step_idx, &frame)?;

            let recall = match cfg.memory_mode {
                MemoryMode::Retrieve => self.recall(spec, step_idx, &frame)?,
                MemoryMode::Off => Recall::default(),
            };

            let (fired, next_toggle) = self.detector.evaluate(&windows, toggle);
            toggle = next_toggle;
            let decision = match fired {
                Some(brk) => {
                    warn!(
                        step_idx,
                        rule = %brk.rule,
                        action = %brk.action,
                        "loop breaker override"
                    );
                    Decision {
                        action: brk.action,
                        source: DecisionSource::LoopBreaker,
                        raw: String::new(),
                        full_text: String::new(),
                        token_estimate: 0,
                    }
                }
                None => self.plan(spec, &frame, &trajectory, &recall.snippets)?,
            };
            let action = decision.action;
            let loop_break_triggered = decision.source == DecisionSource::LoopBreaker;

            if step_idx < SANITY_LOG_STEPS {
                info!(
                    step_idx,
                    tokens = decision.token_estimate,
                    action = %action,
                    loop_break = loop_break_triggered,
                    "sanity"
                );
            }

            let done = action == Action::Stop;
            if !done {
                self.env.step(&action.payload())?;
            }
            let visibility = self.env.list_visible(&spec.target_object_type)?;
            let success = done || self.env.last_action_success();
            let collision = !success;
            if collision {
                collisions += 1;
                if action == Action::MoveAhead {
                    failed_move_ahead += 1;
                }
            }

            let mut info = Map::new();
            info.insert("t".into(), Value::from(step_idx));
            trajectory.add(action, success, collision, info);
            windows.push(action, collision);

            let memory_updates = self.write_memories(&recall.reading)?;

            self.save_step_artifacts(step_idx, &decision, &recall, &visibility)?;

            let record = StepRecord {
                step_idx,
                episode_id: spec.episode_id,
                scene: spec.scene.clone(),
                target_object_type: spec.target_object_type.clone(),
                target_prompt: spec.target_prompt.clone(),
                action,
                collision,
                vlm_output: DecisionOutput {
                    action,
                    source: decision.source,
                },
                vlm_raw_preview: preview(&decision.raw, RAW_PREVIEW_CHARS),
                vlm_raw_hash: raw_hash(&decision.raw),
                lmk_preview: preview(&recall.reading.raw, LMK_PREVIEW_CHARS),
                lmk_list: recall.reading.landmarks.clone(),
                target_seen_claim: recall.reading.seen,
                target_loc_claim: recall.reading.location.clone(),
                target_relative_claim: recall.reading.relative,
                rag_hit_ids: recall.hits.iter().map(|h| h.id).collect(),
                env_meta_for_eval_only: GroundTruth {
                    target_visible: visibility.target_visible,
                    target_bbox: visibility.target_bbox,
                    target_distance: visibility.target_distance,
                    frame_width: frame.width,
                },
                memory_updates,
                loop_break_triggered,
                planner_input_token_estimate: decision.token_estimate,
                vlm_raw: cfg.artifacts.save_vlm_raw.then(|| decision.full_text.clone()),
                hallucinations: None,
            };
            self.journal.append(&record)?;
            steps.push(record);

            last_action = Some(action);
            last_visibility = visibility;
            if done {
                break;
            }
        }

        if cfg.toggle_scope == ToggleScope::Run {
            self.run_toggle = toggle;
        }

        let stopped = last_action == Some(Action::Stop);
        let success = stopped
            && last_visibility.target_visible
            && last_visibility
                .target_distance
                .is_none_or(|d| d <= cfg.success_distance);
        let overconfident_stop = u32::from(stopped && !success);

        let summary = EpisodeSummary {
            episode_id: spec.episode_id,
            scene: spec.scene.clone(),
            target_object_type: spec.target_object_type.clone(),
            target_prompt: spec.target_prompt.clone(),
            success,
            steps: steps.len() as u32,
            collisions,
            failed_move_ahead,
            overconfident_stop,
            start_distance,
        };
        info!(
            success,
            steps = summary.steps,
            collisions,
            overconfident_stop,
            "episode finished"
        );
        Ok(EpisodeOutcome { steps, summary })
    }

    // ── step phases ──────────────────────────────────────────────────────────

    /// Landmark probe, query construction and retrieval.
    fn recall(
        &mut self,
        spec: &EpisodeSpec,
        step_idx: u32,
        frame: &Frame,
    ) -> Result<Recall, NavError> {
        let cfg = self.config;
        let prompt = probe_prompt(&spec.target_prompt, cfg.probe_relative);
        let (raw, _) = self
            .policy
            .generate_with_debug(frame, &prompt, PROBE_MAX_NEW_TOKENS)?;
        if cfg.artifacts.save_vlm_raw {
            if let Some(paths) = &self.output {
                write_text(paths.lmk_raw(spec.episode_id, step_idx), &raw)?;
            }
        }
        let reading = ProbeReading::parse(raw, &self.stoplist);
        let query = build_query(&spec.target_prompt, &reading.landmarks);

        let hits = retrieve(self.memory.entries(), &query, cfg.top_k, &cfg.memory_types);
        let snippets = format_snippets(&hits);
        let hits: Vec<HitDump> = hits
            .iter()
            .map(|h| HitDump {
                id: h.entry.id,
                text: h.entry.text.clone(),
                metadata: h.entry.metadata.clone(),
                score: h.score,
            })
            .collect();
        debug!(
            step_idx,
            %query,
            hits = hits.len(),
            landmarks = ?reading.landmarks,
            "memory recall"
        );
        Ok(Recall {
            reading,
            snippets,
            hits,
        })
    }

    /// Ask the policy for the next action.
    fn plan(
        &mut self,
        spec: &EpisodeSpec,
        frame: &Frame,
        trajectory: &TrajectoryHistory,
        snippets: &[String],
    ) -> Result<Decision, NavError> {
        let cfg = self.config;
        let prompt = build_prompt(
            &cfg.prompt_template,
            &spec.target_prompt,
            &cfg.action_space,
            &trajectory.summary(),
            snippets,
        );
        let token_estimate = estimate_tokens(&prompt);
        let (raw, dbg) = self
            .policy
            .generate_with_debug(frame, &prompt, cfg.max_new_tokens)?;
        let action = interpret(&raw, cfg.safe_fallback);
        debug!(
            action = %action,
            tokens = token_estimate,
            elapsed_ms = dbg.elapsed_ms,
            "policy decision"
        );
        Ok(Decision {
            action,
            source: DecisionSource::Planner,
            raw,
            full_text: dbg.full_text,
            token_estimate,
        })
    }

    /// Append one entry per enabled memory kind.
    fn write_memories(&mut self, reading: &ProbeReading) -> Result<Vec<MemoryUpdate>, NavError> {
        let mut updates = Vec::new();
        for kind in [MemoryType::Place, MemoryType::Loc, MemoryType::Dir] {
            if !self.config.memory_types.contains(&kind) {
                continue;
            }
            let text = match kind {
                MemoryType::Place => build_place(&reading.landmarks),
                MemoryType::Loc => build_loc(&reading.location),
                _ => build_dir(RelativePosition::Unknown.as_str()),
            };
            self.memory.upsert(text.clone(), MemoryMetadata::of(kind.clone()))?;
            updates.push(MemoryUpdate { kind, text });
        }
        Ok(updates)
    }

    // ── artefacts ────────────────────────────────────────────────────────────

    fn save_frame(&self, episode: u32, step_idx: u32, frame: &Frame) -> Result<(), NavError> {
        let opts = &self.config.artifacts;
        let Some(paths) = self.output.as_ref().filter(|_| opts.save_frames) else {
            return Ok(());
        };
        if step_idx % opts.frame_stride.max(1) != 0 {
            return Ok(());
        }
        save_png(frame, &paths.frame(episode, step_idx))?;
        Ok(())
    }

    fn save_step_artifacts(
        &self,
        step_idx: u32,
        decision: &Decision,
        recall: &Recall,
        visibility: &Visibility,
    ) -> Result<(), NavError> {
        let Some(paths) = &self.output else {
            return Ok(());
        };
        let opts = &self.config.artifacts;
        if opts.save_vlm_raw {
            write_text(paths.vlm_raw(step_idx), &decision.full_text)?;
        }
        if opts.save_rag_hits {
            write_json(paths.rag_hits(step_idx), &recall.hits)?;
        }
        if opts.save_env_meta {
            write_json(paths.env_meta(step_idx), visibility)?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Map raw policy text to an action, substituting `fallback` when needed.
///
/// An `ACTION=` line (or bare action word) wins; otherwise a JSON candidate
/// list is accepted.
pub fn interpret(raw: &str, fallback: Action) -> Action {
    if let Some(word) = parse_action_line(raw) {
        return match Action::from_name(safe_fallback(&word)) {
            Some(action) => action,
            None => {
                warn!(%word, fallback = %fallback, "policy named an unknown action");
                fallback
            }
        };
    }
    if let Some(candidates) = parse_candidates(raw) {
        return select_action(&candidates, fallback);
    }
    warn!(fallback = %fallback, "no action found in policy output");
    fallback
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// First 16 hex characters of the SHA-256 of `text`.
fn raw_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(RAW_HASH_HEX_CHARS);
    hex
}
