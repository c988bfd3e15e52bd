use anyhow::Result;
use async_trait::async_trait;

use crate::intent::{Inference, Intent, IntentRegistry, Variant};
use crate::kernel::request::Request;
use crate::kernel::response::ResponseBuilder;
use crate::kernel::session::Session;

pub const EXACT_MATCH_CONFIDENCE: f32 = 1.0;
pub const PARTIAL_MATCH_CONFIDENCE: f32 = 0.6;

/// NLU collaborator. Called at most once per turn, and only when the
/// transport did not attach an inference already.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn inference(&self, req: &Request, res: &ResponseBuilder, session: &Session) -> Result<Inference>;
}

struct Entry {
    intent: Intent,
    phrases: Vec<String>,
    action: Option<String>,
}

/// Phrase and server-action matching over a registered intent table.
pub struct MatcherRecognizer {
    entries: Vec<Entry>,
}

impl MatcherRecognizer {
    pub fn new(registry: &IntentRegistry) -> Self {
        let entries = registry
            .entries()
            .iter()
            .map(|e| Entry {
                intent: e.intent.clone(),
                phrases: e.matchers.iter().map(|m| normalize(m)).filter(|m| !m.is_empty()).collect(),
                action: e.action.clone(),
            })
            .collect();
        Self { entries }
    }

    /// Pure scoring, exposed for callers that do not run a full turn.
    pub fn recognize(&self, utterance: &str, action_type: Option<&str>) -> Inference {
        let text = normalize(utterance);
        let mut variants = Vec::new();

        for entry in &self.entries {
            let action_hit = action_type.is_some() && action_type == entry.action.as_deref();

            let score = if action_hit {
                Some(EXACT_MATCH_CONFIDENCE)
            } else if text.is_empty() {
                None
            } else if entry.phrases.iter().any(|p| *p == text) {
                Some(EXACT_MATCH_CONFIDENCE)
            } else if entry.phrases.iter().any(|p| contains_phrase(&text, p)) {
                Some(PARTIAL_MATCH_CONFIDENCE)
            } else {
                None
            };

            if let Some(confidence) = score {
                variants.push(Variant::new(entry.intent.clone(), confidence));
            }
        }

        // Stable: registry order survives between equal scores
        variants.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Inference::new(variants)
    }
}

#[async_trait]
impl Recognizer for MatcherRecognizer {
    async fn inference(&self, req: &Request, _res: &ResponseBuilder, _session: &Session) -> Result<Inference> {
        Ok(self.recognize(req.message.utterance(), req.action_type()))
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-word containment, so "hi" does not match inside "this".
fn contains_phrase(text: &str, phrase: &str) -> bool {
    let words: Vec<&str> = text.split(' ').collect();
    let needle: Vec<&str> = phrase.split(' ').collect();
    words.windows(needle.len()).any(|w| w == needle.as_slice())
}
