//! Lexical retrieval over the memory log.
//!
//! Memory entries are short, templated strings (`"PLACE: sofa, lamp"`,
//! `"LOC: kitchen"`, `"DIR: target_rel=left"`), so a bag-of-tokens cosine
//! similarity is enough to rank them against a query such as
//! `"target=mug lmk=sofa, lamp"`.
//!
//! ```text
//! similarity(a, b) = Σ min(count_a(t), count_b(t)) / sqrt(|a| · |b|)
//! ```
//!
//! where `|a|` is the number of tokens in `a` (with multiplicity).  The score
//! lies in `[0, 1]` and is `0` whenever either side has no tokens.
//!
//! # Example
//!
//! ```rust
//! use objnav_memory::retrieval::{retrieve, similarity};
//! use objnav_memory::store::{MemoryMetadata, MemoryStore};
//! use objnav_types::MemoryType;
//!
//! assert!((similarity("red mug", "mug red") - 1.0).abs() < 1e-12);
//!
//! let mut store = MemoryStore::in_memory();
//! store.upsert("PLACE: sofa, lamp", MemoryMetadata::of(MemoryType::Place)).unwrap();
//! store.upsert("LOC: kitchen", MemoryMetadata::of(MemoryType::Loc)).unwrap();
//!
//! let hits = retrieve(store.entries(), "target=mug lmk=sofa", 1, &[]);
//! assert_eq!(hits[0].entry.id, 0);
//! ```

use std::collections::HashMap;

use objnav_types::MemoryType;

use crate::store::MemoryEntry;

/// Maximum characters kept from an unrecognised memory text.
const SNIPPET_MAX_CHARS: usize = 220;

// ─────────────────────────────────────────────────────────────────────────────
// Similarity
// ─────────────────────────────────────────────────────────────────────────────

/// Lowercase alphanumeric runs of `text`; everything else separates tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .chars()
        .flat_map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().collect::<Vec<_>>()
            } else {
                vec![' ']
            }
        })
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

fn counts(tokens: &[String]) -> HashMap<&str, usize> {
    let mut map = HashMap::new();
    for t in tokens {
        *map.entry(t.as_str()).or_insert(0) += 1;
    }
    map
}

/// Token-multiset cosine similarity in `[0, 1]`.  Symmetric.
pub fn similarity(a: &str, b: &str) -> f64 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    let counts_a = counts(&tokens_a);
    let counts_b = counts(&tokens_b);
    let common: usize = counts_a
        .iter()
        .filter_map(|(tok, &ca)| counts_b.get(tok).map(|&cb| ca.min(cb)))
        .sum();
    let denom = ((tokens_a.len() * tokens_b.len()) as f64).sqrt();
    common as f64 / denom
}

// ─────────────────────────────────────────────────────────────────────────────
// Retrieval
// ─────────────────────────────────────────────────────────────────────────────

/// A scored memory entry.  Recomputed on every query.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalHit<'a> {
    pub entry: &'a MemoryEntry,
    pub score: f64,
}

/// Return at most `top_k` entries ranked by similarity to `query`.
///
/// Entries whose type is not in `types` are skipped unless `types` is empty.
/// Ties keep their original relative order.
pub fn retrieve<'a>(
    entries: &'a [MemoryEntry],
    query: &str,
    top_k: usize,
    types: &[MemoryType],
) -> Vec<RetrievalHit<'a>> {
    let mut scored: Vec<RetrievalHit<'a>> = entries
        .iter()
        .filter(|e| types.is_empty() || e.kind().is_some_and(|k| types.contains(k)))
        .map(|entry| RetrievalHit {
            entry,
            score: similarity(query, &entry.text),
        })
        .collect();
    // `sort_by` is stable, which keeps equal scores in log order.
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_k);
    scored
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry builders
// ─────────────────────────────────────────────────────────────────────────────

/// `"PLACE: a, b, c"`, or `"PLACE: none"` when nothing was seen.
pub fn build_place(landmarks: &[String]) -> String {
    if landmarks.is_empty() {
        "PLACE: none".to_string()
    } else {
        format!("PLACE: {}", landmarks.join(", "))
    }
}

/// `"LOC: <location>"`, or `"LOC: none"` when unknown.
pub fn build_loc(location: &str) -> String {
    if location.is_empty() {
        "LOC: none".to_string()
    } else {
        format!("LOC: {location}")
    }
}

/// `"DIR: target_rel=<relative>"`.
pub fn build_dir(target_rel: &str) -> String {
    format!("DIR: target_rel={target_rel}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Snippet formatting
// ─────────────────────────────────────────────────────────────────────────────

fn payload<'t>(text: &'t str, prefix: &str) -> Option<&'t str> {
    text.strip_prefix(prefix).map(str::trim)
}

fn truncate_snippet(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(2)
        .collect();
    lines.join("\n").chars().take(SNIPPET_MAX_CHARS).collect()
}

/// Render one memory text as a prompt sentence.
pub fn format_snippet(text: &str) -> String {
    if let Some(p) = payload(text, "PLACE:") {
        return format!("Memory: these landmarks are near each other: {p}.");
    }
    if let Some(p) = payload(text, "LOC:") {
        return format!("Memory: location hint is {p}.");
    }
    if let Some(p) = payload(text, "DIR:") {
        return format!("Memory: {p}.");
    }
    truncate_snippet(text)
}

/// Render retrieved hits as prompt sentences.
///
/// The first usable PLACE and LOC hits are merged into a single sentence
/// (`"Memory: In kitchen, these landmarks are near each other: sink."`); all
/// other hits go through [`format_snippet`].  Payloads of `none` are dropped.
pub fn format_snippets(hits: &[RetrievalHit<'_>]) -> Vec<String> {
    let mut place: Option<&str> = None;
    let mut loc: Option<&str> = None;
    let mut rest: Vec<&str> = Vec::new();

    for hit in hits {
        let text = hit.entry.text.trim();
        if place.is_none() {
            if let Some(p) = payload(text, "PLACE:") {
                if !p.eq_ignore_ascii_case("none") {
                    place = Some(p);
                }
                continue;
            }
        }
        if loc.is_none() {
            if let Some(l) = payload(text, "LOC:") {
                if !l.eq_ignore_ascii_case("none") {
                    loc = Some(l);
                }
                continue;
            }
        }
        rest.push(text);
    }

    let mut snippets = Vec::with_capacity(rest.len() + 1);
    match (place, loc) {
        (Some(p), Some(l)) => snippets.push(format!(
            "Memory: In {l}, these landmarks are near each other: {p}."
        )),
        (Some(p), None) => {
            snippets.push(format!("Memory: these landmarks are near each other: {p}."))
        }
        (None, Some(l)) => snippets.push(format!("Memory: location hint is {l}.")),
        (None, None) => {}
    }
    snippets.extend(rest.into_iter().map(format_snippet));
    snippets
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryMetadata, MemoryStore};

    fn store_with(texts: &[(&str, MemoryType)]) -> MemoryStore {
        let mut store = MemoryStore::in_memory();
        for (text, kind) in texts {
            store.upsert(*text, MemoryMetadata::of(kind.clone())).unwrap();
        }
        store
    }

    // ── tokenize / similarity ────────────────────────────────────────────────

    #[test]
    fn tokenize_lowercases_and_splits_on_punctuation() {
        assert_eq!(
            tokenize("target=Mug lmk=Sofa, TV-stand"),
            vec!["target", "mug", "lmk", "sofa", "tv", "stand"]
        );
        assert!(tokenize("  ,;= ").is_empty());
    }

    #[test]
    fn similarity_is_symmetric_and_bounded() {
        let pairs = [
            ("red mug on table", "table mug"),
            ("a a b", "a b b b"),
            ("PLACE: sofa, lamp", "target=mug lmk=lamp"),
        ];
        for (a, b) in pairs {
            let ab = similarity(a, b);
            let ba = similarity(b, a);
            assert!((ab - ba).abs() < 1e-12);
            assert!((0.0..=1.0).contains(&ab));
        }
    }

    #[test]
    fn similarity_zero_without_shared_tokens() {
        assert_eq!(similarity("sofa lamp", "kitchen sink"), 0.0);
        assert_eq!(similarity("", "kitchen"), 0.0);
        assert_eq!(similarity("!!!", "???"), 0.0);
    }

    #[test]
    fn similarity_counts_multiset_overlap() {
        // common = min(2,1) + min(1,3) = 2 ; denom = sqrt(3 * 4)
        let s = similarity("a a b", "a b b b");
        assert!((s - 2.0 / 12f64.sqrt()).abs() < 1e-12);
    }

    // ── retrieve ─────────────────────────────────────────────────────────────

    #[test]
    fn retrieve_respects_top_k() {
        let store = store_with(&[
            ("PLACE: sofa", MemoryType::Place),
            ("PLACE: lamp", MemoryType::Place),
            ("PLACE: sofa lamp", MemoryType::Place),
        ]);
        let hits = retrieve(store.entries(), "sofa lamp", 2, &[]);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.id, 2);
    }

    #[test]
    fn retrieve_filters_by_type() {
        let store = store_with(&[
            ("PLACE: sofa", MemoryType::Place),
            ("LOC: sofa room", MemoryType::Loc),
            ("DIR: target_rel=unknown", MemoryType::Dir),
        ]);
        let hits = retrieve(store.entries(), "sofa", 10, &[MemoryType::Loc, MemoryType::Dir]);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.entry.kind() != Some(&MemoryType::Place)));
    }

    #[test]
    fn retrieve_is_stable_under_ties() {
        let store = store_with(&[
            ("LOC: none", MemoryType::Loc),
            ("PLACE: none", MemoryType::Place),
            ("DIR: target_rel=unknown", MemoryType::Dir),
        ]);
        // The query shares nothing with any entry: every score is 0.
        let hits = retrieve(store.entries(), "mug", 3, &[]);
        let ids: Vec<u64> = hits.iter().map(|h| h.entry.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn retrieve_on_empty_store_is_empty() {
        let store = MemoryStore::in_memory();
        assert!(retrieve(store.entries(), "anything", 3, &[]).is_empty());
    }

    // ── builders ─────────────────────────────────────────────────────────────

    #[test]
    fn builders_render_none_for_empty_input() {
        assert_eq!(build_place(&[]), "PLACE: none");
        assert_eq!(build_place(&["sofa".into(), "lamp".into()]), "PLACE: sofa, lamp");
        assert_eq!(build_loc(""), "LOC: none");
        assert_eq!(build_loc("kitchen"), "LOC: kitchen");
        assert_eq!(build_dir("unknown"), "DIR: target_rel=unknown");
    }

    // ── snippets ─────────────────────────────────────────────────────────────

    #[test]
    fn place_and_loc_merge_into_one_sentence() {
        let store = store_with(&[
            ("PLACE: sink, fridge", MemoryType::Place),
            ("LOC: kitchen", MemoryType::Loc),
        ]);
        let hits = retrieve(store.entries(), "", 5, &[]);
        assert_eq!(
            format_snippets(&hits),
            vec!["Memory: In kitchen, these landmarks are near each other: sink, fridge."]
        );
    }

    #[test]
    fn lone_place_or_loc_use_their_own_template() {
        let only_place = store_with(&[("PLACE: bed", MemoryType::Place)]);
        let hits = retrieve(only_place.entries(), "", 5, &[]);
        assert_eq!(
            format_snippets(&hits),
            vec!["Memory: these landmarks are near each other: bed."]
        );

        let only_loc = store_with(&[("LOC: bedroom", MemoryType::Loc)]);
        let hits = retrieve(only_loc.entries(), "", 5, &[]);
        assert_eq!(format_snippets(&hits), vec!["Memory: location hint is bedroom."]);
    }

    #[test]
    fn none_payloads_are_dropped() {
        let store = store_with(&[
            ("PLACE: none", MemoryType::Place),
            ("LOC: none", MemoryType::Loc),
        ]);
        let hits = retrieve(store.entries(), "", 5, &[]);
        assert!(format_snippets(&hits).is_empty());
    }

    #[test]
    fn second_place_and_dir_render_separately() {
        let store = store_with(&[
            ("PLACE: sofa", MemoryType::Place),
            ("PLACE: desk", MemoryType::Place),
            ("DIR: target_rel=left", MemoryType::Dir),
        ]);
        let hits = retrieve(store.entries(), "", 5, &[]);
        assert_eq!(
            format_snippets(&hits),
            vec![
                "Memory: these landmarks are near each other: sofa.",
                "Memory: these landmarks are near each other: desk.",
                "Memory: target_rel=left.",
            ]
        );
    }

    #[test]
    fn unrecognised_text_is_truncated_to_two_lines() {
        let long = format!("first line\n\n  second line  \nthird line {}", "x".repeat(10));
        assert_eq!(format_snippet(&long), "first line\nsecond line");

        let wide = "y".repeat(500);
        assert_eq!(format_snippet(&wide).chars().count(), SNIPPET_MAX_CHARS);
    }
}
