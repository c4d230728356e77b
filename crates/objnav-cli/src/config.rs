//! Run configuration – reads/writes the TOML file passed with `--config`.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration.  A minimal file looks like:
//!
//! ```toml
//! [run]
//! num_episodes = 5
//! scenes = ["FloorPlan1", "FloorPlan2"]
//! target_objects = ["Mug", "Apple"]
//!
//! [memory]
//! mode = "retrieve"
//! types = ["PLACE", "LOC"]
//!
//! [policy]
//! kind = "http"
//! base_url = "http://localhost:8000"
//! model = "qwen2-vl-7b-instruct"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use objnav_runtime::episode::{ArtifactOptions, EpisodeConfig, MemoryMode, ToggleScope};
use objnav_runtime::prompt::DEFAULT_TEMPLATE;
use objnav_types::{Action, MemoryType, NavError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file {} not found", .0.display())]
    Missing(PathBuf),

    #[error("failed to read config at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for NavError {
    fn from(e: ConfigError) -> Self {
        NavError::Config(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// `[run]` – episode selection and output location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Parent directory; each run creates `run_<unix ts>/` below it.
    pub output_dir: PathBuf,
    pub num_episodes: u32,
    pub max_steps: u32,
    pub success_distance: f64,
    /// Forward step length used for the SPL shortest-path estimate.
    pub step_distance: f64,
    /// `.json` (array or `{"episodes": [...]}`) or `.jsonl`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episodes_file: Option<PathBuf>,
    pub scenes: Vec<String>,
    pub target_objects: Vec<String>,
    /// Cycle through `scenes` × `target_objects` when no episodes file is set.
    pub allow_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("runs"),
            num_episodes: 1,
            max_steps: 100,
            success_distance: 1.0,
            step_distance: 0.25,
            episodes_file: None,
            scenes: vec!["FloorPlan1".to_string()],
            target_objects: vec!["Mug".to_string()],
            allow_fallback: true,
            seed: None,
            split: None,
            dataset: None,
        }
    }
}

/// `[agent]` – decision loop knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub history_k: usize,
    pub safe_fallback: Action,
    pub action_space: Vec<Action>,
    /// Ask the landmark probe for the target's side of the image as well.
    pub probe_relative: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            history_k: 6,
            safe_fallback: Action::MoveAhead,
            action_space: Action::ALL.to_vec(),
            probe_relative: false,
        }
    }
}

/// `[memory]` – retrieval-augmented scratch memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub mode: MemoryMode,
    /// `PLACE`, `LOC`, `DIR` (case-insensitive).
    pub types: Vec<String>,
    pub top_k: usize,
    /// Landmarks never written to or queried from memory.
    pub stoplist: Vec<String>,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            mode: MemoryMode::Off,
            types: vec!["PLACE".to_string(), "LOC".to_string()],
            top_k: 3,
            stoplist: Vec::new(),
        }
    }
}

impl MemorySection {
    pub fn memory_types(&self) -> Vec<MemoryType> {
        self.types
            .iter()
            .map(|t| MemoryType::from(t.trim().to_ascii_uppercase()))
            .collect()
    }
}

/// `[loop_break]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopBreakSection {
    pub toggle_scope: ToggleScope,
}

/// `[logging]` – optional debug artefacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub save_frames: bool,
    pub frame_stride: u32,
    pub debug_save_vlm_raw: bool,
    pub debug_save_rag_hits: bool,
    pub debug_save_env_meta_full: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            save_frames: false,
            frame_stride: 1,
            debug_save_vlm_raw: false,
            debug_save_rag_hits: false,
            debug_save_env_meta_full: false,
        }
    }
}

/// Which [`DecisionPolicy`][objnav_runtime::DecisionPolicy] drives the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// OpenAI-compatible vision chat endpoint.
    #[default]
    Http,
    /// Replays `script` / `probe_script`; no model needed.
    Scripted,
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyKind::Http => write!(f, "http"),
            PolicyKind::Scripted => write!(f, "scripted"),
        }
    }
}

/// `[policy]`
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    pub kind: PolicyKind,
    pub base_url: String,
    pub model: String,
    pub max_new_tokens: usize,
    pub timeout_secs: u64,
    /// Never written back to disk; prefer `OBJNAV_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: String,
    pub script: Vec<String>,
    pub probe_script: Vec<String>,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            kind: PolicyKind::Http,
            base_url: "http://localhost:8000".to_string(),
            model: "qwen2-vl-7b-instruct".to_string(),
            max_new_tokens: 256,
            timeout_secs: 120,
            api_key: String::new(),
            script: vec!["ACTION=MoveAhead".to_string()],
            probe_script: Vec::new(),
        }
    }
}

impl std::fmt::Debug for PolicySection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicySection")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_new_tokens", &self.max_new_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("script", &self.script)
            .field("probe_script", &self.probe_script)
            .finish()
    }
}

/// `[prompt]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSection {
    /// Placeholders: `{target}`, `{action_space}`, `{trajectory}`, `{rag_snippets}`.
    pub template: String,
}

impl Default for PromptSection {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

/// `[sim]` – the built-in grid simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSection {
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for SimSection {
    fn default() -> Self {
        Self {
            frame_width: 300,
            frame_height: 300,
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub run: RunSection,
    pub agent: AgentSection,
    pub memory: MemorySection,
    pub loop_break: LoopBreakSection,
    pub logging: LoggingSection,
    pub policy: PolicySection,
    pub prompt: PromptSection,
    pub sim: SimSection,
}

impl RunConfig {
    /// Reject values the run loop cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.run.step_distance > 0.0) {
            return Err(ConfigError::Invalid("run.step_distance must be positive".into()));
        }
        if self.agent.history_k == 0 {
            return Err(ConfigError::Invalid("agent.history_k must be at least 1".into()));
        }
        if self.agent.action_space.is_empty() {
            return Err(ConfigError::Invalid("agent.action_space must not be empty".into()));
        }
        if self.logging.frame_stride == 0 {
            return Err(ConfigError::Invalid("logging.frame_stride must be at least 1".into()));
        }
        if self.policy.kind == PolicyKind::Scripted && self.policy.script.is_empty() {
            return Err(ConfigError::Invalid("policy.script must not be empty".into()));
        }
        Ok(())
    }

    /// Settings handed to every episode of the run.
    pub fn to_episode_config(&self) -> EpisodeConfig {
        EpisodeConfig {
            max_steps: self.run.max_steps,
            success_distance: self.run.success_distance,
            history_k: self.agent.history_k,
            safe_fallback: self.agent.safe_fallback,
            action_space: self.agent.action_space.clone(),
            memory_mode: self.memory.mode,
            memory_types: self.memory.memory_types(),
            top_k: self.memory.top_k,
            stoplist: self.memory.stoplist.clone(),
            toggle_scope: self.loop_break.toggle_scope,
            prompt_template: self.prompt.template.clone(),
            max_new_tokens: self.policy.max_new_tokens,
            probe_relative: self.agent.probe_relative,
            artifacts: ArtifactOptions {
                save_frames: self.logging.save_frames,
                frame_stride: self.logging.frame_stride,
                save_vlm_raw: self.logging.debug_save_vlm_raw,
                save_rag_hits: self.logging.debug_save_rag_hits,
                save_env_meta: self.logging.debug_save_env_meta_full,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading / saving
// ─────────────────────────────────────────────────────────────────────────────

/// Load `path` (or the defaults without one) and apply `OBJNAV_*` overrides.
pub fn load(path: Option<&Path>) -> Result<RunConfig, ConfigError> {
    let mut cfg = match path {
        Some(p) => load_from(p)?.ok_or_else(|| ConfigError::Missing(p.to_path_buf()))?,
        None => RunConfig::default(),
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Parse the file at `path`.  Returns `None` if it does not exist.
pub fn load_from(path: &Path) -> Result<Option<RunConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Some(toml::from_str(&raw)?))
}

/// Apply `OBJNAV_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `OBJNAV_OUTPUT_DIR` | `run.output_dir` |
/// | `OBJNAV_MAX_STEPS` | `run.max_steps` |
/// | `OBJNAV_POLICY_URL` | `policy.base_url` |
/// | `OBJNAV_POLICY_MODEL` | `policy.model` |
/// | `OBJNAV_API_KEY` | `policy.api_key` |
pub fn apply_env_overrides(cfg: &mut RunConfig) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut RunConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("OBJNAV_OUTPUT_DIR") {
        cfg.run.output_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("OBJNAV_MAX_STEPS")
        && let Ok(steps) = v.trim().parse::<u32>()
    {
        cfg.run.max_steps = steps;
    }
    if let Some(v) = lookup("OBJNAV_POLICY_URL") {
        cfg.policy.base_url = v;
    }
    if let Some(v) = lookup("OBJNAV_POLICY_MODEL") {
        cfg.policy.model = v;
    }
    if let Some(v) = lookup("OBJNAV_API_KEY") {
        cfg.policy.api_key = v;
    }
}

/// Write `cfg` as TOML, creating parent directories.  The API key is omitted.
pub fn save_to(cfg: &RunConfig, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let raw = toml::to_string_pretty(cfg)?;
    fs::write(path, raw).map_err(write_err)
}
