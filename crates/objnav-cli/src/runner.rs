//! Run orchestration: one configured run from episode plan to `metrics.json`.
//!
//! ```text
//! config.toml ─► plan_episodes ─► for each episode:
//!                                   episode_meta.jsonl  ◄─ meta line
//!                                   EpisodeController   ─► steps.jsonl
//!                                   annotate_steps      ─► steps_eval.jsonl
//!                                   episode_summary.json (rewritten)
//!                                 ─► metrics.json
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use objnav_env::sim::{SimEnvironment, SimScene};
use objnav_eval::{RunMetrics, annotate_steps};
use objnav_memory::MemoryStore;
use objnav_runtime::journal::write_json;
use objnav_runtime::{
    DecisionPolicy, EpisodeController, EpisodeSpec, HttpPolicy, JsonlWriter, RunPaths,
    ScriptedPolicy,
};
use objnav_types::{EpisodeSummary, NavError, StepRecord};
use serde::Serialize;
use tracing::info;

use crate::config::{self, PolicyKind, PolicySection, RunConfig};
use crate::episodes::{EpisodeMeta, PlannedEpisode, load_episodes, plan_episodes};

/// What a finished run leaves behind.
#[derive(Debug)]
pub struct RunReport {
    pub run_dir: PathBuf,
    pub summaries: Vec<EpisodeSummary>,
    pub metrics: RunMetrics,
}

#[derive(Serialize)]
struct SummaryFile<'a> {
    episodes: &'a [EpisodeSummary],
}

/// `run_<unix seconds>` below `output_dir`.
pub fn run_dir_name(timestamp: i64) -> String {
    format!("run_{timestamp}")
}

/// A grid simulator with one demo room per planned scene, furnished with
/// every target that scene is searched for.
pub fn build_environment(cfg: &RunConfig, plan: &[PlannedEpisode]) -> SimEnvironment {
    let mut scenes: Vec<(&str, Vec<String>)> = Vec::new();
    for episode in plan {
        match scenes.iter_mut().find(|(scene, _)| *scene == episode.scene) {
            Some((_, targets)) => {
                if !targets.contains(&episode.target) {
                    targets.push(episode.target.clone());
                }
            }
            None => scenes.push((&episode.scene, vec![episode.target.clone()])),
        }
    }
    scenes.into_iter().fold(
        SimEnvironment::new().with_frame_size(cfg.sim.frame_width, cfg.sim.frame_height),
        |env, (scene, targets)| env.with_scene(scene, SimScene::demo(&targets)),
    )
}

pub fn build_policy(section: &PolicySection) -> Result<Box<dyn DecisionPolicy>, NavError> {
    match section.kind {
        PolicyKind::Http => {
            let mut policy = HttpPolicy::new(section.base_url.clone(), section.model.clone())
                .with_timeout(Duration::from_secs(section.timeout_secs))?;
            if !section.api_key.is_empty() {
                policy = policy.with_api_key(section.api_key.clone());
            }
            info!(endpoint = %policy.endpoint(), model = %section.model, "using HTTP policy");
            Ok(Box::new(policy))
        }
        PolicyKind::Scripted => {
            info!(answers = section.script.len(), "using scripted policy");
            Ok(Box::new(
                ScriptedPolicy::new(section.script.iter().cloned())
                    .with_probe_answers(section.probe_script.iter().cloned()),
            ))
        }
    }
}

/// Execute every episode of `cfg` and write all run artefacts under `run_dir`.
///
/// `on_episode` is called with each summary as soon as its episode ends.
///
/// # Errors
///
/// The first failing episode aborts the run; everything written before it
/// stays on disk.
pub fn execute(
    cfg: &RunConfig,
    run_dir: &Path,
    mut on_episode: impl FnMut(&EpisodeSummary),
) -> Result<RunReport, NavError> {
    let paths = RunPaths::new(run_dir);
    config::save_to(cfg, &paths.config_snapshot())?;

    let records = cfg
        .run
        .episodes_file
        .as_deref()
        .map(load_episodes)
        .transpose()?;
    let plan = plan_episodes(&cfg.run, records.as_deref())?;
    info!(
        run_dir = %run_dir.display(),
        episodes = plan.len(),
        from_file = records.is_some(),
        "run planned"
    );

    let mut env = build_environment(cfg, &plan);
    let mut policy = build_policy(&cfg.policy)?;
    let mut memory = MemoryStore::open(paths.rag_store())?;
    let mut journal = JsonlWriter::open(paths.steps())?;
    let mut meta_log = JsonlWriter::open(paths.episode_meta())?;
    let mut eval_log = JsonlWriter::open(paths.steps_eval())?;

    let episode_config = cfg.to_episode_config();
    let mut controller = EpisodeController::new(
        &episode_config,
        &mut env,
        policy.as_mut(),
        &mut memory,
        &mut journal,
    )
    .with_output(paths.clone());

    let mut summaries: Vec<EpisodeSummary> = Vec::with_capacity(plan.len());
    let mut all_steps: Vec<StepRecord> = Vec::new();

    for (idx, planned) in plan.iter().enumerate() {
        let episode_id = idx as u32;
        meta_log.append(&EpisodeMeta {
            episode_id,
            scene: &planned.scene,
            target: &planned.target,
            start_pose: planned.start_pose.as_ref(),
            seed: cfg.run.seed,
            split: cfg.run.split.as_deref(),
            dataset: cfg.run.dataset.as_deref(),
        })?;

        let spec = EpisodeSpec::new(episode_id, &planned.scene, &planned.target)
            .with_start_pose(planned.start_pose.clone());
        let outcome = controller.run_episode(&spec)?;

        let mut steps = outcome.steps;
        annotate_steps(&mut steps);
        for step in &steps {
            eval_log.append(step)?;
        }
        on_episode(&outcome.summary);
        summaries.push(outcome.summary);
        write_json(
            paths.episode_summary(),
            &SummaryFile {
                episodes: &summaries,
            },
        )?;
        all_steps.extend(steps);
    }

    let metrics = RunMetrics::compute(&all_steps, &summaries, cfg.run.step_distance);
    write_json(paths.metrics(), &metrics)?;
    info!(
        success_rate = metrics.nav.success_rate,
        spl = metrics.nav.spl,
        ph_existence = metrics.hallucinations.ph_existence,
        ph_localization = metrics.hallucinations.ph_localization,
        "run finished"
    );

    Ok(RunReport {
        run_dir: run_dir.to_path_buf(),
        summaries,
        metrics,
    })
}
