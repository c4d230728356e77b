//! Run output layout and JSON/JSONL writers.
//!
//! Everything a run produces lives under one directory:
//!
//! ```text
//! <run>/
//!   config.toml            configuration snapshot
//!   rag_store.jsonl        memory log
//!   steps.jsonl            one StepRecord per executed step (canonical)
//!   steps_eval.jsonl       annotated copy, appended after each episode
//!   episode_meta.jsonl     one line per episode
//!   episode_summary.json   {"episodes": [...]}, rewritten after each episode
//!   metrics.json           {"nav": ..., "hallucinations": ...}
//!   debug/vlm_raw/step_00000.txt
//!   debug/lmk_raw/episode_000/step_00000.txt
//!   debug/rag_hits/step_00000.json
//!   debug/env_meta/step_00000.json
//!   frames/episode_000/step_00000.png
//! ```
//!
//! JSONL lines are flushed as soon as they are written, so a run that dies
//! mid-episode leaves valid telemetry behind.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use objnav_types::NavError;
use serde::Serialize;
use serde::de::DeserializeOwned;

// ─────────────────────────────────────────────────────────────────────────────
// RunPaths
// ─────────────────────────────────────────────────────────────────────────────

/// Paths of every artefact of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    root: PathBuf,
}

impl RunPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_snapshot(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn rag_store(&self) -> PathBuf {
        self.root.join("rag_store.jsonl")
    }

    pub fn steps(&self) -> PathBuf {
        self.root.join("steps.jsonl")
    }

    pub fn steps_eval(&self) -> PathBuf {
        self.root.join("steps_eval.jsonl")
    }

    pub fn episode_meta(&self) -> PathBuf {
        self.root.join("episode_meta.jsonl")
    }

    pub fn episode_summary(&self) -> PathBuf {
        self.root.join("episode_summary.json")
    }

    pub fn metrics(&self) -> PathBuf {
        self.root.join("metrics.json")
    }

    pub fn vlm_raw(&self, step: u32) -> PathBuf {
        self.root
            .join("debug")
            .join("vlm_raw")
            .join(format!("step_{step:05}.txt"))
    }

    pub fn lmk_raw(&self, episode: u32, step: u32) -> PathBuf {
        self.root
            .join("debug")
            .join("lmk_raw")
            .join(format!("episode_{episode:03}"))
            .join(format!("step_{step:05}.txt"))
    }

    pub fn rag_hits(&self, step: u32) -> PathBuf {
        self.root
            .join("debug")
            .join("rag_hits")
            .join(format!("step_{step:05}.json"))
    }

    pub fn env_meta(&self, step: u32) -> PathBuf {
        self.root
            .join("debug")
            .join("env_meta")
            .join(format!("step_{step:05}.json"))
    }

    pub fn frame(&self, episode: u32, step: u32) -> PathBuf {
        self.root
            .join("frames")
            .join(format!("episode_{episode:03}"))
            .join(format!("step_{step:05}.png"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JsonlWriter
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only JSON-Lines sink.
pub struct JsonlWriter {
    path: PathBuf,
    file: File,
    lines: usize,
}

impl JsonlWriter {
    /// Open `path` for appending, creating it and its parents if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, NavError> {
        let path = path.as_ref().to_path_buf();
        ensure_parent(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| NavError::io(&path, e))?;
        Ok(Self {
            path,
            file,
            lines: 0,
        })
    }

    /// Serialise `row` as one line and flush it.
    pub fn append<T: Serialize>(&mut self, row: &T) -> Result<(), NavError> {
        let mut line = serde_json::to_string(row)?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|e| NavError::io(&self.path, e))?;
        self.lines += 1;
        Ok(())
    }

    /// Lines written through this handle.
    pub fn lines_written(&self) -> usize {
        self.lines
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// One-shot helpers
// ─────────────────────────────────────────────────────────────────────────────

fn ensure_parent(path: &Path) -> Result<(), NavError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| NavError::io(parent, e))
        }
        _ => Ok(()),
    }
}

/// Pretty-print `value` to `path`, replacing any previous content.
pub fn write_json<T: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    value: &T,
) -> Result<(), NavError> {
    let path = path.as_ref();
    let text = serde_json::to_string_pretty(value)?;
    write_text(path, &text)
}

/// Write `text` to `path`, replacing any previous content.
pub fn write_text(path: impl AsRef<Path>, text: &str) -> Result<(), NavError> {
    let path = path.as_ref();
    ensure_parent(path)?;
    std::fs::write(path, text).map_err(|e| NavError::io(path, e))
}

/// Read every non-blank line of a JSONL file.
pub fn read_jsonl<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, NavError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| NavError::io(path, e))?;
    let mut rows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| NavError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok(rows)
}
