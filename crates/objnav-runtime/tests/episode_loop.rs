//! End-to-end episodes against the grid simulator with a scripted policy.

use objnav_env::sim::{SimEnvironment, SimScene};
use objnav_memory::MemoryStore;
use objnav_runtime::journal::read_jsonl;
use objnav_runtime::{
    EpisodeConfig, EpisodeController, EpisodeSpec, JsonlWriter, MemoryMode, RunPaths,
    ScriptedPolicy,
};
use objnav_types::{Action, DecisionSource, MemoryType, StepRecord};

fn demo_env() -> SimEnvironment {
    SimEnvironment::new().with_scene("FloorPlan1", SimScene::demo(&["Mug".to_string()]))
}

#[test]
fn walking_into_a_wall_triggers_alternating_turns() {
    let dir = tempfile::tempdir().unwrap();
    let paths = RunPaths::new(dir.path());
    let mut journal = JsonlWriter::open(paths.steps()).unwrap();
    let mut memory = MemoryStore::open(paths.rag_store()).unwrap();
    let mut env = demo_env();
    let mut policy = ScriptedPolicy::new(["ACTION=MoveAhead"])
        .with_probe_answers(["LMK=sofa, tv; SEEN=no; LOC=living room"]);
    let config = EpisodeConfig::default()
        .with_max_steps(9)
        .with_memory(MemoryMode::Retrieve, vec![MemoryType::Place, MemoryType::Loc]);

    let spec = EpisodeSpec::new(0, "FloorPlan1", "Mug");
    let outcome = EpisodeController::new(&config, &mut env, &mut policy, &mut memory, &mut journal)
        .with_output(paths.clone())
        .run_episode(&spec)
        .unwrap();

    // Start (6,1) facing +z; the obstacle row at z=5 blocks the fourth move.
    let collided: Vec<bool> = outcome.steps.iter().take(6).map(|s| s.collision).collect();
    assert_eq!(collided, vec![false, false, false, true, true, true]);

    let overrides: Vec<(u32, Action)> = outcome
        .steps
        .iter()
        .filter(|s| s.vlm_output.source == DecisionSource::LoopBreaker)
        .map(|s| (s.step_idx, s.action))
        .collect();
    assert_eq!(
        overrides,
        vec![
            (6, Action::RotateRight),
            (7, Action::RotateLeft),
            (8, Action::RotateRight),
        ]
    );
    assert_eq!(outcome.summary.collisions, 3);
    assert_eq!(outcome.summary.failed_move_ahead, 3);
    assert!(!outcome.summary.success);
}

#[test]
fn telemetry_and_memory_survive_across_episodes() {
    let dir = tempfile::tempdir().unwrap();
    let paths = RunPaths::new(dir.path());
    let config = EpisodeConfig::default()
        .with_max_steps(4)
        .with_memory(MemoryMode::Retrieve, vec![MemoryType::Place, MemoryType::Loc]);

    let total_steps = {
        let mut journal = JsonlWriter::open(paths.steps()).unwrap();
        let mut memory = MemoryStore::open(paths.rag_store()).unwrap();
        let mut env = demo_env();
        let mut policy =
            ScriptedPolicy::new(["ACTION=RotateLeft", "ACTION=MoveAhead", "ACTION=Stop"])
                .with_probe_answers(["LMK=dining table (wooden), chair; SEEN=no; LOC=dining room"]);
        let mut controller =
            EpisodeController::new(&config, &mut env, &mut policy, &mut memory, &mut journal);

        let first = controller
            .run_episode(&EpisodeSpec::new(0, "FloorPlan1", "Mug"))
            .unwrap();
        let second = controller
            .run_episode(&EpisodeSpec::new(1, "FloorPlan1", "Mug"))
            .unwrap();

        assert_eq!(first.summary.steps, 3);
        assert_eq!(first.steps[2].action, Action::Stop);
        assert_eq!(first.summary.overconfident_stop, 1);
        // Memories from episode 0 are visible to episode 1 from its first step.
        assert!(!second.steps[0].rag_hit_ids.is_empty());
        assert_eq!(second.steps[0].lmk_list, vec!["dining table (wooden)", "chair"]);

        first.steps.len() + second.steps.len()
    };

    let rows: Vec<StepRecord> = read_jsonl(paths.steps()).unwrap();
    assert_eq!(rows.len(), total_steps);
    assert_eq!(rows.iter().filter(|r| r.episode_id == 1).count(), total_steps - 3);

    let reloaded = MemoryStore::open(paths.rag_store()).unwrap();
    assert_eq!(reloaded.len(), total_steps * 2);
    let ids: Vec<u64> = reloaded.entries().iter().map(|e| e.id).collect();
    let expected: Vec<u64> = (0..ids.len() as u64).collect();
    assert_eq!(ids, expected);
}
