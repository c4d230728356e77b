//! `objnav-runtime` – the agent's control loop and decision pipeline.
//!
//! Everything that happens between "here is a camera frame" and "here is the
//! next action" lives in this crate.
//!
//! # Modules
//!
//! - [`episode`] – [`EpisodeController`][episode::EpisodeController]: runs
//!   one episode step by step, wiring the probe, memory retrieval, loop
//!   breaker, policy and environment together and journaling a
//!   [`StepRecord`][objnav_types::StepRecord] per step.
//! - [`action_parser`] – tolerant extraction of an action word from policy
//!   text.
//! - [`trajectory`] – [`TrajectoryHistory`][trajectory::TrajectoryHistory]:
//!   bounded recent-step history and its prompt summary.
//! - [`loop_breaker`] – [`LoopBreakDetector`][loop_breaker::LoopBreakDetector]:
//!   an ordered list of stuck-pattern rules that override the policy with a
//!   corrective turn.
//! - [`probe`] – the landmark probe prompt and its `LMK=…; SEEN=…; LOC=…`
//!   parser.
//! - [`prompt`] – decision prompt templating and token estimate.
//! - [`policy`] – the [`DecisionPolicy`][policy::DecisionPolicy] trait with
//!   an OpenAI-compatible [`HttpPolicy`][policy::HttpPolicy] and a
//!   [`ScriptedPolicy`][policy::ScriptedPolicy] for tests and dry runs.
//! - [`frames`] – PNG encoding of camera frames.
//! - [`journal`] – run directory layout and JSON/JSONL writers.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: `tracing`
//!   subscriber with optional OTLP span export.

pub mod action_parser;
pub mod episode;
pub mod frames;
pub mod journal;
pub mod loop_breaker;
pub mod policy;
pub mod probe;
pub mod prompt;
pub mod telemetry;
pub mod trajectory;

pub use episode::{
    ArtifactOptions, EpisodeConfig, EpisodeController, EpisodeOutcome, EpisodeSpec, MemoryMode,
    ToggleScope,
};
pub use journal::{JsonlWriter, RunPaths};
pub use loop_breaker::{LoopBreakDetector, LoopRule, LoopWindows, TurnToggle};
pub use policy::{DecisionPolicy, HttpPolicy, PolicyDebug, PolicyError, ScriptedPolicy};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use trajectory::TrajectoryHistory;
