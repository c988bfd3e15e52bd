use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_MAX_DISPATCH_HOPS: u32 = 3;
pub const DEFAULT_SLOT_OVERRIDE_THRESHOLD: f32 = 0.8;
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.3;
pub const DEFAULT_MAX_SLOT_PROMPTS: u32 = 3;
pub const DEFAULT_HISTORY_DEPTH: usize = 10;

/// Dispatcher tuning. Every field has a default so partial JSON files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Redirects a single turn may perform through `dispatch`
    pub max_dispatch_hops: u32,
    /// A different intent above this confidence abandons slot filling
    pub slot_override_threshold: f32,
    /// Variants below this confidence are treated as unrecognized
    pub min_confidence: f32,
    /// Prompts issued for one slot before giving up
    pub max_slot_prompts: u32,
    /// Intent name used when nothing was recognized
    pub fallback_intent: String,
    /// Bubble shown when the scenario tree has no answer at all
    pub no_match_text: String,
    /// Resolved paths kept in the session for handlers
    pub history_depth: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_dispatch_hops: DEFAULT_MAX_DISPATCH_HOPS,
            slot_override_threshold: DEFAULT_SLOT_OVERRIDE_THRESHOLD,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            max_slot_prompts: DEFAULT_MAX_SLOT_PROMPTS,
            fallback_intent: "default".to_string(),
            no_match_text: "Sorry, I did not understand that.".to_string(),
            history_depth: DEFAULT_HISTORY_DEPTH,
        }
    }
}

impl DispatcherConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading dispatcher config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing dispatcher config {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
