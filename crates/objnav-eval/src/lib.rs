//! `objnav-eval` – offline scoring of recorded runs.
//!
//! - [`hallucination`] – labels each [`StepRecord`][objnav_types::StepRecord]
//!   with PH_Existence / PH_Localization by comparing the policy's claims to
//!   the environment snapshot.
//! - [`nav_metrics`] – success rate, average steps and SPL over
//!   [`EpisodeSummary`][objnav_types::EpisodeSummary] lists, plus run-wide
//!   hallucination counts.
//!
//! # Example
//!
//! ```rust
//! use objnav_eval::summarize;
//!
//! let metrics = summarize(&[], 0.25);
//! assert_eq!(metrics.spl, 0.0);
//! ```

pub mod hallucination;
pub mod nav_metrics;

pub use hallucination::{ClaimRecord, annotate_steps, classify, relative_from_bbox};
pub use nav_metrics::{HallucinationCounts, NavMetrics, RunMetrics, min_steps, summarize};
