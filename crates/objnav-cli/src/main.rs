//! `objnav` – runs object-search episodes and scores them.
//!
//! ```text
//! objnav [--config <path>] [--schema]
//! ```
//!
//! 1. Loads the TOML configuration (defaults when `--config` is omitted)
//!    and applies `OBJNAV_*` environment overrides.
//! 2. Creates `<output_dir>/run_<unix ts>/` and runs every planned episode
//!    against the built-in grid simulator.
//! 3. Writes step telemetry, episode summaries and `metrics.json`, then
//!    prints a short report.
//!
//! `--schema` prints the JSON schema of the telemetry records instead.

mod config;
mod episodes;
mod runner;

use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use objnav_eval::RunMetrics;
use objnav_types::{EpisodeSummary, NavError, StepRecord};
use tracing::error;

fn main() {
    let _telemetry = objnav_runtime::init_tracing("objnav");

    let args = Args::parse();
    if args.schema {
        print_schemas();
        return;
    }

    print_banner();
    if let Err(e) = run(&args) {
        error!(error = %e, "run aborted");
        eprintln!("\n  {} {}", "✗".red().bold(), e.to_string().red());
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), NavError> {
    let cfg = config::load(args.config.as_deref())?;
    match &args.config {
        Some(path) => println!("  Config loaded from {}", path.display().to_string().bold()),
        None => println!("  Using default configuration."),
    }
    println!(
        "  Policy: {} ({})   Memory: {:?}   Episodes: {}",
        cfg.policy.kind.to_string().bold(),
        cfg.policy.model.dimmed(),
        cfg.memory.mode,
        cfg.run.num_episodes
    );

    let run_dir = cfg
        .run
        .output_dir
        .join(runner::run_dir_name(chrono::Utc::now().timestamp()));
    println!("  Writing to {}\n", run_dir.display().to_string().bold());

    let report = runner::execute(&cfg, &run_dir, print_episode)?;
    print_report(&report.metrics, report.summaries.len());
    println!("  Artefacts in {}\n", report.run_dir.display().to_string().bold());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "objnav", version)]
#[command(about = "Run object-search episodes and score them", long_about = None)]
struct Args {
    /// TOML run configuration; built-in defaults when omitted.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the JSON schemas of the telemetry records and exit.
    #[arg(long)]
    schema: bool,
}

fn print_schemas() {
    let step = schemars::schema_for!(StepRecord);
    let summary = schemars::schema_for!(EpisodeSummary);
    let metrics = schemars::schema_for!(RunMetrics);
    let schemas = serde_json::json!({
        "StepRecord": step,
        "EpisodeSummary": summary,
        "RunMetrics": metrics,
    });
    match serde_json::to_string_pretty(&schemas) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("{}: {}", "Schema error".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "objnav".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Embodied object search");
    println!();
}

fn print_episode(summary: &EpisodeSummary) {
    let status = if summary.success {
        "success".green().bold()
    } else if summary.overconfident_stop > 0 {
        "wrong stop".yellow().bold()
    } else {
        "failed".red().bold()
    };
    println!(
        "  [{:>3}] {:<14} {:<16} {}  steps={} collisions={}",
        summary.episode_id,
        summary.scene,
        summary.target_object_type,
        status,
        summary.steps,
        summary.collisions
    );
}

fn print_report(metrics: &RunMetrics, episodes: usize) {
    println!();
    println!("  {} ({} episode(s))", "Results".bold(), episodes);
    println!("    success rate   {:.3}", metrics.nav.success_rate);
    println!("    avg steps      {:.1}", metrics.nav.avg_steps);
    println!("    SPL            {:.3}", metrics.nav.spl);
    println!(
        "    hallucinations existence={} localization={} overconfident_stop={}",
        metrics.hallucinations.ph_existence,
        metrics.hallucinations.ph_localization,
        metrics.hallucinations.overconfident_stop
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("objnav").chain(args.iter().copied()))
    }

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_config_and_flags() {
        let args = parse(&["--config", "run.toml", "--schema"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("run.toml")));
        assert!(args.schema);

        let defaults = parse(&[]).unwrap();
        assert_eq!(defaults.config, None);
        assert!(!defaults.schema);
    }

    #[test]
    fn accepts_short_and_equals_forms() {
        assert_eq!(parse(&["-c", "a.toml"]).unwrap().config, Some(PathBuf::from("a.toml")));
        assert_eq!(
            parse(&["--config=b.toml"]).unwrap().config,
            Some(PathBuf::from("b.toml"))
        );
    }

    #[test]
    fn rejects_unknown_and_incomplete_arguments() {
        use clap::error::ErrorKind;
        assert!(parse(&["--config"]).is_err());
        assert_eq!(parse(&["--verbose"]).unwrap_err().kind(), ErrorKind::UnknownArgument);
        assert_eq!(parse(&["--help"]).unwrap_err().kind(), ErrorKind::DisplayHelp);
    }
}
