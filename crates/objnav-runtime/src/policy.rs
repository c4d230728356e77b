//! Decision policies – the "brain" the controller consults each step.
//!
//! A [`DecisionPolicy`] receives the current camera frame and a text prompt
//! and returns free-form text.  Interpreting that text is the job of
//! [`action_parser`][crate::action_parser] and [`probe`][crate::probe].
//!
//! Two implementations are provided:
//!
//! - [`HttpPolicy`] – a blocking client for any OpenAI-compatible
//!   `/v1/chat/completions` endpoint that accepts images (vLLM, Ollama,
//!   llama.cpp server, hosted APIs).  The frame is sent as a base64 PNG data
//!   URI.
//! - [`ScriptedPolicy`] – replays canned answers.  Used by tests and dry runs.
//!
//! # Example
//!
//! ```rust
//! use objnav_env::Frame;
//! use objnav_runtime::policy::{DecisionPolicy, ScriptedPolicy};
//!
//! let mut policy = ScriptedPolicy::new(["ACTION=MoveAhead", "ACTION=Stop"]);
//! let frame = Frame::filled(8, 8, [0, 0, 0]);
//!
//! let (first, _) = policy.generate_with_debug(&frame, "go", 16).unwrap();
//! let (second, _) = policy.generate_with_debug(&frame, "go", 16).unwrap();
//! assert_eq!((first.as_str(), second.as_str()), ("ACTION=MoveAhead", "ACTION=Stop"));
//! ```

use std::time::{Duration, Instant};

use base64::Engine as _;
use objnav_env::Frame;
use objnav_types::{Action, NavError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::frames::{FrameError, encode_png};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from policy calls.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response from the model server could not be interpreted.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    /// The frame could not be encoded for transport.
    #[error("Frame encoding failed: {0}")]
    Frame(#[from] FrameError),
    /// A scripted policy has nothing to replay.
    #[error("Script error: {0}")]
    Script(String),
}

impl From<PolicyError> for NavError {
    fn from(e: PolicyError) -> Self {
        NavError::Policy(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Auxiliary information about one generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PolicyDebug {
    /// Full text returned by the backend before any trimming.
    pub full_text: String,
    pub model: String,
    pub elapsed_ms: u64,
}

/// A single-step decision maker.  Calls are blocking and never retried.
pub trait DecisionPolicy {
    fn generate_with_debug(
        &mut self,
        frame: &Frame,
        prompt: &str,
        max_new_tokens: usize,
    ) -> Result<(String, PolicyDebug), PolicyError>;
}

impl<P: DecisionPolicy + ?Sized> DecisionPolicy for Box<P> {
    fn generate_with_debug(
        &mut self,
        frame: &Frame,
        prompt: &str,
        max_new_tokens: usize,
    ) -> Result<(String, PolicyDebug), PolicyError> {
        (**self).generate_with_debug(frame, prompt, max_new_tokens)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

/// The role of a chat message.  Every request is a single user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

/// One element of a multi-part message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// A blocking client for an OpenAI-compatible vision chat endpoint.
pub struct HttpPolicy {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpPolicy {
    /// Create a policy pointing at `base_url` (e.g. `"http://localhost:8000"`)
    /// and using `model`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Replace the HTTP client with one using `timeout` per request.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, PolicyError> {
        self.client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// Build the single user message carrying `frame` and `prompt`.
    pub fn build_messages(frame: &Frame, prompt: &str) -> Result<Vec<ChatMessage>, PolicyError> {
        let png = encode_png(frame)?;
        let b64 = base64::engine::general_purpose::STANDARD.encode(png);
        Ok(vec![ChatMessage {
            role: Role::User,
            content: vec![
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/png;base64,{b64}"),
                    },
                },
                ContentPart::Text {
                    text: prompt.to_string(),
                },
            ],
        }])
    }
}

impl DecisionPolicy for HttpPolicy {
    fn generate_with_debug(
        &mut self,
        frame: &Frame,
        prompt: &str,
        max_new_tokens: usize,
    ) -> Result<(String, PolicyDebug), PolicyError> {
        let messages = Self::build_messages(frame, prompt)?;
        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
            max_tokens: max_new_tokens,
            temperature: 0.0,
            stream: false,
        };

        let started = Instant::now();
        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response: ChatResponse = request.send()?.error_for_status()?.json()?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let text = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| PolicyError::BadResponse("empty choices array".into()))?;
        debug!(model = %self.model, elapsed_ms, chars = text.len(), "policy reply");
        Ok((
            text.trim().to_string(),
            PolicyDebug {
                full_text: text,
                model: self.model.clone(),
                elapsed_ms,
            },
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScriptedPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// Replays canned answers, cycling when exhausted.
///
/// Probe prompts (those asking for an `LMK=` line) can be answered from a
/// separate script via [`with_probe_answers`][ScriptedPolicy::with_probe_answers];
/// otherwise they consume the decision script like any other prompt.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPolicy {
    decisions: Vec<String>,
    next_decision: usize,
    probes: Vec<String>,
    next_probe: usize,
    prompts: Vec<String>,
}

impl ScriptedPolicy {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            decisions: answers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_probe_answers<I, S>(mut self, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.probes = answers.into_iter().map(Into::into).collect();
        self
    }

    /// Every prompt received so far, in order.
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    fn next(script: &[String], cursor: &mut usize) -> Option<String> {
        if script.is_empty() {
            return None;
        }
        let answer = script[*cursor % script.len()].clone();
        *cursor += 1;
        Some(answer)
    }
}

impl DecisionPolicy for ScriptedPolicy {
    fn generate_with_debug(
        &mut self,
        _frame: &Frame,
        prompt: &str,
        _max_new_tokens: usize,
    ) -> Result<(String, PolicyDebug), PolicyError> {
        self.prompts.push(prompt.to_string());
        let is_probe = prompt.contains("LMK=");
        let answer = if is_probe && !self.probes.is_empty() {
            Self::next(&self.probes, &mut self.next_probe)
        } else {
            Self::next(&self.decisions, &mut self.next_decision)
        };
        let answer = answer.ok_or_else(|| PolicyError::Script("no scripted answers".into()))?;
        Ok((
            answer.clone(),
            PolicyDebug {
                full_text: answer,
                model: "scripted".into(),
                elapsed_ms: 0,
            },
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Candidate selection
// ─────────────────────────────────────────────────────────────────────────────

/// One scored action proposal, e.g. `{"action": "MoveAhead", "confidence": 0.7}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Candidate {
    pub action: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Pick the highest-confidence candidate naming a known action.
///
/// Earlier candidates win ties.  Returns `fallback` when none is valid.
pub fn select_action(candidates: &[Candidate], fallback: Action) -> Action {
    let mut best: Option<(Action, f64)> = None;
    for candidate in candidates {
        let Some(action) = Action::from_name(&candidate.action) else {
            continue;
        };
        if best.is_none_or(|(_, conf)| candidate.confidence > conf) {
            best = Some((action, candidate.confidence));
        }
    }
    best.map_or(fallback, |(action, _)| action)
}

/// Read a JSON candidate list (`[...]` or `{"candidates": [...]}`) from text.
pub fn parse_candidates(text: &str) -> Option<Vec<Candidate>> {
    #[derive(Deserialize)]
    struct Wrapped {
        candidates: Vec<Candidate>,
    }
    let text = text.trim();
    serde_json::from_str::<Vec<Candidate>>(text)
        .ok()
        .or_else(|| serde_json::from_str::<Wrapped>(text).ok().map(|w| w.candidates))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::filled(4, 4, [10, 10, 10])
    }

    fn cand(action: &str, confidence: f64) -> Candidate {
        Candidate {
            action: action.into(),
            confidence,
        }
    }

    // ── ScriptedPolicy ───────────────────────────────────────────────────────

    #[test]
    fn scripted_policy_cycles() {
        let mut policy = ScriptedPolicy::new(["a", "b"]);
        let answers: Vec<String> = (0..5)
            .map(|_| policy.generate_with_debug(&frame(), "p", 8).unwrap().0)
            .collect();
        assert_eq!(answers, vec!["a", "b", "a", "b", "a"]);
        assert_eq!(policy.prompts().len(), 5);
    }

    #[test]
    fn scripted_policy_routes_probe_prompts() {
        let mut policy =
            ScriptedPolicy::new(["ACTION=Stop"]).with_probe_answers(["LMK=sofa; SEEN=no; LOC=den"]);
        let (probe, _) = policy.generate_with_debug(&frame(), "Return LMK=<...>", 32).unwrap();
        let (decision, debug) = policy.generate_with_debug(&frame(), "decide", 32).unwrap();
        assert!(probe.starts_with("LMK=sofa"));
        assert_eq!(decision, "ACTION=Stop");
        assert_eq!(debug.model, "scripted");
    }

    #[test]
    fn empty_script_is_an_error() {
        let mut policy = ScriptedPolicy::default();
        let err = policy.generate_with_debug(&frame(), "p", 8).unwrap_err();
        assert!(matches!(err, PolicyError::Script(_)));
        let nav: NavError = err.into();
        assert!(nav.to_string().contains("no scripted answers"));
    }

    // ── HttpPolicy request shape ─────────────────────────────────────────────

    #[test]
    fn endpoint_strips_trailing_slash() {
        let policy = HttpPolicy::new("http://localhost:8000/", "qwen2-vl");
        assert_eq!(policy.endpoint(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn request_carries_image_data_uri_and_text() {
        let messages = HttpPolicy::build_messages(&frame(), "find the mug").unwrap();
        let json = serde_json::to_value(&messages).unwrap();
        assert_eq!(json[0]["role"], "user");
        let url = json[0]["content"][0]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(json[0]["content"][0]["type"], "image_url");
        assert_eq!(json[0]["content"][1]["type"], "text");
        assert_eq!(json[0]["content"][1]["text"], "find the mug");
    }

    // ── select_action ────────────────────────────────────────────────────────

    #[test]
    fn highest_confidence_valid_candidate_wins() {
        let picked = select_action(
            &[cand("Fly", 0.99), cand("MoveAhead", 0.4), cand("RotateLeft", 0.8)],
            Action::Stop,
        );
        assert_eq!(picked, Action::RotateLeft);
    }

    #[test]
    fn ties_keep_the_earlier_candidate() {
        let picked = select_action(&[cand("LookUp", 0.5), cand("LookDown", 0.5)], Action::Stop);
        assert_eq!(picked, Action::LookUp);
    }

    #[test]
    fn no_valid_candidate_yields_fallback() {
        assert_eq!(select_action(&[cand("Jump", 1.0)], Action::MoveAhead), Action::MoveAhead);
        assert_eq!(select_action(&[], Action::LookDown), Action::LookDown);
    }

    #[test]
    fn candidates_parse_from_both_json_shapes() {
        let bare = parse_candidates(r#"[{"action": "Stop", "confidence": 0.9}]"#).unwrap();
        assert_eq!(bare, vec![cand("Stop", 0.9)]);
        let wrapped = parse_candidates(r#"{"candidates": [{"action": "MoveAhead"}]}"#).unwrap();
        assert_eq!(wrapped, vec![cand("MoveAhead", 0.0)]);
        assert!(parse_candidates("ACTION=Stop").is_none());
    }
}
