use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

pub type IntentId = u32;

/// Slot values accumulated for a conversation (name -> value).
/// Array slots hold a JSON array, everything else a scalar.
pub type Variables = HashMap<String, Value>;

/// One named entity an intent expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentSlot {
    pub name: String,
    /// Entity type as the NLU engine names it
    pub entity: String,
    /// Blocks completion until filled
    #[serde(default)]
    pub required: bool,
    /// Questions asked while collecting this slot
    #[serde(default)]
    pub prompts: Vec<String>,
    /// Several values may live under one name
    #[serde(default)]
    pub array: bool,
}

impl IntentSlot {
    pub fn new(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            required: false,
            prompts: Vec::new(),
            array: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompts.push(prompt.into());
        self
    }

    /// A required slot nobody can ask for.
    pub fn is_unpromptable(&self) -> bool {
        self.required && self.prompts.is_empty()
    }
}

/// Entity recognized for one turn. Not yet checked against any intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundSlot {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub array: bool,
}

impl FoundSlot {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            array: false,
        }
    }
}

/// Statically declared unit of application behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub id: IntentId,
    /// Slash separated; a leading `/` requests dispatch from the tree root
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,
    #[serde(default)]
    pub slots: Vec<IntentSlot>,
}

impl Intent {
    pub fn new(id: IntentId, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
            answer: None,
            custom_data: None,
            slots: Vec::new(),
        }
    }

    pub fn with_slot(mut self, slot: IntentSlot) -> Self {
        self.slots.push(slot);
        self
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }

    /// Path without the absolute marker; this is what matchers compare against.
    pub fn name(&self) -> &str {
        self.path.trim_start_matches('/')
    }

    pub fn is_absolute(&self) -> bool {
        self.path.starts_with('/')
    }

    pub fn slot(&self, name: &str) -> Option<&IntentSlot> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// Required slots with no value in `found` nor in `known`, declaration order.
    pub fn missing_slots<'a>(&'a self, found: &[FoundSlot], known: &Variables) -> Vec<&'a IntentSlot> {
        self.slots
            .iter()
            .filter(|slot| slot.required)
            .filter(|slot| !known.contains_key(&slot.name))
            .filter(|slot| !found.iter().any(|f| f.name == slot.name))
            .collect()
    }
}

/// One candidate interpretation of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub intent: Intent,
    /// 0.0 to 1.0
    pub confidence: f32,
    #[serde(default)]
    pub slots: Vec<FoundSlot>,
}

impl Variant {
    pub fn new(intent: Intent, confidence: f32) -> Self {
        Self {
            intent,
            confidence,
            slots: Vec::new(),
        }
    }

    pub fn with_slot(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.slots.push(FoundSlot::new(name, value));
        self
    }

    pub fn has_valid_confidence(&self) -> bool {
        self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }

    /// Well-formed: every required slot is either found now or already known.
    /// A malformed variant is not an error, only a slot-filling candidate.
    pub fn is_well_formed(&self, known: &Variables) -> bool {
        self.intent.missing_slots(&self.slots, known).is_empty()
    }

    /// Missing a required slot that has no prompt, so it can never complete.
    pub fn is_blocked(&self, known: &Variables) -> bool {
        self.intent
            .missing_slots(&self.slots, known)
            .iter()
            .any(|slot| slot.is_unpromptable())
    }

    /// Found slots that the intent actually declares.
    pub fn declared_slots(&self) -> impl Iterator<Item = &FoundSlot> {
        self.slots.iter().filter(|f| self.intent.slot(&f.name).is_some())
    }
}

/// Ranked interpretations for a single turn. Empty is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inference {
    #[serde(default)]
    pub variants: Vec<Variant>,
}

impl Inference {
    pub fn new(variants: Vec<Variant>) -> Self {
        Self { variants }
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Re-validates the recognizer's ordering instead of trusting it.
    /// Out-of-range confidences are dropped; equal confidences fall back
    /// to `declaration_order` (lower first), then to the original position.
    pub fn ranked<F>(&self, declaration_order: F) -> Vec<&Variant>
    where
        F: Fn(&Intent) -> usize,
    {
        let mut ranked: Vec<&Variant> = self
            .variants
            .iter()
            .filter(|v| v.has_valid_confidence())
            .collect();
        ranked.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| declaration_order(&a.intent).cmp(&declaration_order(&b.intent)))
        });
        ranked
    }
}
