use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::intent::{FoundSlot, Variables};

/// Continuity state carried between turns of one conversation.
///
/// This is the only thing that survives a turn. The dispatcher owns it for
/// the duration of a turn and hands a new value back at the commit point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Position in the scenario tree; empty means root
    #[serde(default)]
    pub path: Vec<String>,
    /// True while collecting slots for `current_intent`
    #[serde(default)]
    pub slot_filling: bool,
    /// Never cleared implicitly
    #[serde(default)]
    pub variables: Variables,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_intent: Option<String>,
    /// Handler-defined data
    #[serde(default)]
    pub state: Map<String, Value>,
    /// Prompts issued for the slot currently being collected
    #[serde(default)]
    pub slot_prompts: u32,
    /// Most recent resolved paths, oldest first
    #[serde(default)]
    pub history: Vec<Vec<String>>,
}

/// Strict session delta. This is the ONLY way a session mutates.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionDelta {
    SetPath(Vec<String>),
    BeginSlotFilling { intent: String },
    SlotPrompted,
    /// A collected answer restarts the prompt budget
    SlotAnswered,
    EndSlotFilling,
    SetVariable { name: String, value: Value },
    AppendVariable { name: String, value: Value },
    SetState { key: String, value: Value },
    RecordHistory { path: Vec<String>, depth: usize },
}

impl SessionDelta {
    /// Non-array slots overwrite, array slots append.
    pub fn from_found_slot(found: &FoundSlot, array: bool) -> Self {
        let value = Value::String(found.value.clone());
        if array || found.array {
            SessionDelta::AppendVariable {
                name: found.name.clone(),
                value,
            }
        } else {
            SessionDelta::SetVariable {
                name: found.name.clone(),
                value,
            }
        }
    }
}

/// Derived view of where slot collection stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotFillingState {
    Idle,
    Collecting { intent: String, prompts: u32 },
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot_state(&self) -> SlotFillingState {
        match (&self.current_intent, self.slot_filling) {
            (Some(intent), true) => SlotFillingState::Collecting {
                intent: intent.clone(),
                prompts: self.slot_prompts,
            },
            _ => SlotFillingState::Idle,
        }
    }

    /// Pure reduction: Session + Delta -> Mutated Session
    pub fn reduce(&mut self, delta: SessionDelta) {
        match delta {
            SessionDelta::SetPath(path) => {
                self.path = path;
            }
            SessionDelta::BeginSlotFilling { intent } => {
                // Re-entering for the same intent keeps the prompt count
                if self.current_intent.as_deref() != Some(intent.as_str()) {
                    self.slot_prompts = 0;
                }
                self.slot_filling = true;
                self.current_intent = Some(intent);
            }
            SessionDelta::SlotPrompted => {
                self.slot_prompts += 1;
            }
            SessionDelta::SlotAnswered => {
                self.slot_prompts = 0;
            }
            SessionDelta::EndSlotFilling => {
                self.slot_filling = false;
                self.current_intent = None;
                self.slot_prompts = 0;
            }
            SessionDelta::SetVariable { name, value } => {
                self.variables.insert(name, value);
            }
            SessionDelta::AppendVariable { name, value } => {
                let slot = self
                    .variables
                    .entry(name)
                    .or_insert_with(|| Value::Array(Vec::new()));
                match slot {
                    Value::Array(values) => values.push(value),
                    scalar => {
                        let previous = scalar.take();
                        *scalar = Value::Array(vec![previous, value]);
                    }
                }
            }
            SessionDelta::SetState { key, value } => {
                self.state.insert(key, value);
            }
            SessionDelta::RecordHistory { path, depth } => {
                if depth == 0 {
                    return;
                }
                self.history.push(path);
                if self.history.len() > depth {
                    let overflow = self.history.len() - depth;
                    self.history.drain(..overflow);
                }
            }
        }
    }

    /// Applies every delta in order on a copy; `self` is untouched.
    pub fn committed<I>(&self, deltas: I) -> Session
    where
        I: IntoIterator<Item = SessionDelta>,
    {
        let mut next = self.clone();
        for delta in deltas {
            next.reduce(delta);
        }
        next
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Empty input is a fresh conversation.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw)
    }
}
