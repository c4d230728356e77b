//! Decision prompt assembly.
//!
//! The template is plain text with four placeholders:
//!
//! | Placeholder | Replaced with |
//! |---|---|
//! | `{target}` | the target description |
//! | `{action_space}` | the action vocabulary, comma separated |
//! | `{trajectory}` | [`TrajectoryHistory::summary`][crate::trajectory::TrajectoryHistory::summary] |
//! | `{rag_snippets}` | memory snippets joined by `" | "`, or `(none)` |
//!
//! Any other braces are left untouched.

use objnav_types::Action;

/// Template used when the configuration does not provide one.
pub const DEFAULT_TEMPLATE: &str = "You are a household robot searching for a {target}.\n\
Allowed actions: {action_space}.\n\
Recent steps: {trajectory}.\n\
Memory: {rag_snippets}\n\
Choose the single best next action. Answer with exactly one line: ACTION=<action>";

/// Render the action vocabulary as it appears in prompts.
pub fn action_space_text(actions: &[Action]) -> String {
    actions
        .iter()
        .map(|a| a.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fill `template` with the current decision context.
pub fn build_prompt(
    template: &str,
    target: &str,
    action_space: &[Action],
    trajectory: &str,
    rag_snippets: &[String],
) -> String {
    let snippets = if rag_snippets.is_empty() {
        "(none)".to_string()
    } else {
        rag_snippets.join(" | ")
    };
    template
        .replace("{target}", target)
        .replace("{action_space}", &action_space_text(action_space))
        .replace("{trajectory}", trajectory)
        .replace("{rag_snippets}", &snippets)
}

/// Rough prompt size: whitespace-separated words.
pub fn estimate_tokens(prompt: &str) -> usize {
    prompt.split_whitespace().count()
}
