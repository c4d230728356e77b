//! Extraction of an action word from free-form policy output.
//!
//! The policy is asked to answer with a single `ACTION=<Name>` line, but
//! language models wrap the answer in chatter, echo the prompt, or prefix it
//! with a role marker.  The parser is deliberately forgiving: it never fails,
//! it only returns `None` when no plausible action word exists.  Whether the
//! word names a real [`Action`][objnav_types::Action] is decided by the
//! caller.
//!
//! # Example
//!
//! ```rust
//! use objnav_runtime::action_parser::parse_action_line;
//!
//! assert_eq!(parse_action_line("ACTION=RotateLeft\nnoise\nACTION=MoveAhead").as_deref(), Some("MoveAhead"));
//! assert_eq!(parse_action_line("assistant LookUp").as_deref(), Some("LookUp"));
//! assert_eq!(parse_action_line("no action here"), None);
//! ```

use std::sync::LazyLock;

use regex::Regex;

static ACTION_ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ACTION\s*=\s*([A-Za-z_]+)").expect("valid regex"));

static ROLE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^assistant\s*").expect("valid regex"));

static BARE_ACTION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:ACTION\s*=\s*)?([A-Za-z_]+)$").expect("valid regex"));

/// Return the action word named in `text`, if any.
///
/// The last `ACTION=<word>` occurrence anywhere in the text wins.  Without
/// one, the last non-empty line is accepted when it consists of a single word
/// (optionally preceded by an `assistant` role marker).
pub fn parse_action_line(text: &str) -> Option<String> {
    if let Some(caps) = ACTION_ASSIGNMENT.captures_iter(text).last() {
        return caps.get(1).map(|m| m.as_str().to_string());
    }
    let last_line = text.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
    let stripped = ROLE_MARKER.replace(last_line, "");
    BARE_ACTION_LINE
        .captures(stripped.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// The action executed when parsing fails.  Currently the identity.
pub fn safe_fallback(action: &str) -> &str {
    action
}
