//! Landmark probe: a short, constrained question asked before each decision.
//!
//! The probe asks the policy to list what it sees in one fixed-format line:
//!
//! ```text
//! LMK=sofa, lamp, tv; SEEN=no; LOC=living room
//! ```
//!
//! Every field is parsed on its own and tolerantly; a missing or garbled
//! field degrades to "none"/unknown instead of failing the step.  The
//! surviving landmarks become the retrieval query and the PLACE memory.

use std::collections::HashSet;
use std::sync::LazyLock;

use objnav_types::RelativePosition;
use regex::Regex;

/// Token budget for the probe answer.
pub const PROBE_MAX_NEW_TOKENS: usize = 32;
/// Most landmarks kept from one probe.
pub const MAX_LANDMARKS: usize = 5;
/// Landmarks ending in one of these are room structure, not landmarks.
const STRUCTURAL_SUFFIXES: [&str; 4] = [" wall", " floor", " ceiling", " baseboard"];

static LMK_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)LMK\s*[:=]\s*(.*)").expect("valid regex"));
static SEEN_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)SEEN\s*[:=]\s*(yes|no|true|false)").expect("valid regex"));
static LOC_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)LOC\s*[:=]\s*([^;\n]+)").expect("valid regex"));
static REL_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)REL\s*[:=]\s*([A-Za-z]+)").expect("valid regex"));
static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\(.*?\)\s*").expect("valid regex"));
static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\s]").expect("valid regex"));

/// The probe question for `target`.
///
/// With `ask_relative` the answer format gains a `REL=<left/center/right/unknown>`
/// field describing where the target sits in the image.
pub fn probe_prompt(target: &str, ask_relative: bool) -> String {
    let mut prompt = format!(
        "Target: {target}. List up to 5 prominent objects you can see in the image, \
         and a short location hint (e.g., kitchen, bedroom). and target object visibility.\
         Return exactly one line: \
         LMK=<comma-separated objects or none>; SEEN=<yes/no>; LOC=<short location or none>"
    );
    if ask_relative {
        prompt.push_str("; REL=<left/center/right/unknown>");
    }
    prompt
}

// ─────────────────────────────────────────────────────────────────────────────
// Field extraction
// ─────────────────────────────────────────────────────────────────────────────

/// Raw landmark labels from the `LMK=` field (at most [`MAX_LANDMARKS`]).
pub fn extract_landmarks(raw: &str) -> Vec<String> {
    let Some(caps) = LMK_FIELD.captures(raw) else {
        return Vec::new();
    };
    let line = caps.get(1).map_or("", |m| m.as_str()).trim();
    let payload = line.split_once(';').map_or(line, |(head, _)| head).trim();
    if payload.is_empty() || payload.eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    payload
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(MAX_LANDMARKS)
        .map(str::to_string)
        .collect()
}

/// The `SEEN=` flag; `None` when absent or not a yes/no/true/false word.
pub fn extract_seen(raw: &str) -> Option<bool> {
    let caps = SEEN_FIELD.captures(raw)?;
    let value = caps.get(1)?.as_str().to_ascii_lowercase();
    Some(value == "yes" || value == "true")
}

/// The `LOC=` hint, or an empty string when absent or `none`.
pub fn extract_location(raw: &str) -> String {
    let Some(loc) = LOC_FIELD.captures(raw).and_then(|c| c.get(1)) else {
        return String::new();
    };
    let loc = loc.as_str().trim();
    if loc.eq_ignore_ascii_case("none") {
        String::new()
    } else {
        loc.to_string()
    }
}

/// The optional `REL=` field.
pub fn extract_relative(raw: &str) -> RelativePosition {
    REL_FIELD
        .captures(raw)
        .and_then(|c| c.get(1))
        .map_or(RelativePosition::Unknown, |m| RelativePosition::parse(m.as_str()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Landmark filtering
// ─────────────────────────────────────────────────────────────────────────────

/// Strip parenthetical text and punctuation, then lowercase.
pub fn normalize_landmark(text: &str) -> String {
    let without_parens = PARENTHETICAL.replace_all(text, "");
    NON_ALNUM
        .replace_all(&without_parens, "")
        .trim()
        .to_lowercase()
}

/// Labels that carry no retrieval value.
pub fn is_stop_landmark(text: &str, stoplist: &HashSet<String>) -> bool {
    let norm = normalize_landmark(text);
    norm.is_empty()
        || stoplist.contains(&norm)
        || STRUCTURAL_SUFFIXES.iter().any(|s| norm.ends_with(s))
}

/// Drop stop landmarks, dedupe case-insensitively, keep at most five.
pub fn filter_landmarks(items: Vec<String>, stoplist: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| !is_stop_landmark(item, stoplist))
        .filter(|item| seen.insert(item.to_lowercase()))
        .take(MAX_LANDMARKS)
        .collect()
}

/// Normalise configured stoplist entries the same way labels are.
pub fn stoplist_from<I, S>(entries: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .map(|s| normalize_landmark(s.as_ref()))
        .filter(|s| !s.is_empty())
        .collect()
}

/// `target=<target> lmk=<a, b>` (or `lmk=none`).
pub fn build_query(target: &str, landmarks: &[String]) -> String {
    if landmarks.is_empty() {
        format!("target={target} lmk=none")
    } else {
        format!("target={target} lmk={}", landmarks.join(", "))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProbeReading
// ─────────────────────────────────────────────────────────────────────────────

/// Everything extracted from one probe answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReading {
    pub raw: String,
    pub landmarks: Vec<String>,
    pub seen: Option<bool>,
    pub location: String,
    pub relative: RelativePosition,
}

impl ProbeReading {
    pub fn parse(raw: impl Into<String>, stoplist: &HashSet<String>) -> Self {
        let raw = raw.into();
        Self {
            landmarks: filter_landmarks(extract_landmarks(&raw), stoplist),
            seen: extract_seen(&raw),
            location: extract_location(&raw),
            relative: extract_relative(&raw),
            raw,
        }
    }
}
