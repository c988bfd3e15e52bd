use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::types::{Intent, IntentId, IntentSlot};
use crate::kernel::error::RegistrationError;

/// Declaration of a variable the dictionary way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub questions: Vec<String>,
}

/// Text intent (`matchers`) or server action intent (`action`), or both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDeclaration {
    pub name: String,
    #[serde(default)]
    pub matchers: Vec<String>,
    #[serde(default)]
    pub action: Option<String>,
    /// Declaration order is prompt order
    #[serde(default)]
    pub variables: Vec<VariableDeclaration>,
}

impl IntentDeclaration {
    pub fn text(name: impl Into<String>, matchers: &[&str]) -> Self {
        Self {
            name: name.into(),
            matchers: matchers.iter().map(|m| m.to_string()).collect(),
            action: None,
            variables: Vec::new(),
        }
    }

    pub fn action(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matchers: Vec::new(),
            action: Some(action.into()),
            variables: Vec::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, required: bool, questions: &[&str]) -> Self {
        self.variables.push(VariableDeclaration {
            name: name.into(),
            required,
            questions: questions.iter().map(|q| q.to_string()).collect(),
        });
        self
    }
}

/// Ordered intent dictionary, usually loaded from JSON at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentsDict {
    pub intents: Vec<IntentDeclaration>,
}

#[derive(Debug, Clone)]
pub struct RegisteredIntent {
    pub intent: Intent,
    pub matchers: Vec<String>,
    pub action: Option<String>,
}

/// Immutable intent table. Registration order breaks confidence ties.
#[derive(Debug, Clone, Default)]
pub struct IntentRegistry {
    entries: Vec<RegisteredIntent>,
}

impl IntentRegistry {
    pub fn new(intents: Vec<Intent>) -> Result<Self, RegistrationError> {
        let entries = intents
            .into_iter()
            .map(|intent| RegisteredIntent {
                intent,
                matchers: Vec::new(),
                action: None,
            })
            .collect();
        Self::validated(entries)
    }

    /// Ids follow declaration order, starting at 1.
    pub fn from_dict(dict: IntentsDict) -> Result<Self, RegistrationError> {
        let mut entries = Vec::with_capacity(dict.intents.len());

        for (index, decl) in dict.intents.into_iter().enumerate() {
            if decl.matchers.is_empty() && decl.action.is_none() {
                return Err(RegistrationError::EmptyIntent(decl.name));
            }

            let mut intent = Intent::new(index as IntentId + 1, decl.name);
            for var in decl.variables {
                let mut slot = IntentSlot::new(var.name, "string");
                slot.required = var.required;
                slot.prompts = var.questions;
                intent.slots.push(slot);
            }

            entries.push(RegisteredIntent {
                intent,
                matchers: decl.matchers,
                action: decl.action,
            });
        }

        Self::validated(entries)
    }

    fn validated(entries: Vec<RegisteredIntent>) -> Result<Self, RegistrationError> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();

        for entry in &entries {
            let intent = &entry.intent;
            if intent.name().is_empty() {
                return Err(RegistrationError::EmptyIntentPath(intent.id));
            }
            if !ids.insert(intent.id) {
                return Err(RegistrationError::DuplicateIntentId(intent.id));
            }
            if !names.insert(intent.name().to_string()) {
                return Err(RegistrationError::DuplicateIntentPath(intent.name().to_string()));
            }

            let mut slot_names = HashSet::new();
            for slot in &intent.slots {
                if !slot_names.insert(slot.name.as_str()) {
                    return Err(RegistrationError::DuplicateSlot {
                        intent: intent.name().to_string(),
                        slot: slot.name.clone(),
                    });
                }
            }
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RegisteredIntent] {
        &self.entries
    }

    pub fn intents(&self) -> impl Iterator<Item = &Intent> {
        self.entries.iter().map(|e| &e.intent)
    }

    pub fn get(&self, id: IntentId) -> Option<&Intent> {
        self.intents().find(|i| i.id == id)
    }

    /// Lookup by path, with or without the absolute marker.
    pub fn by_path(&self, path: &str) -> Option<&Intent> {
        let name = path.trim_start_matches('/');
        self.intents().find(|i| i.name() == name)
    }

    /// Position in registration order; unknown intents rank last.
    pub fn order_of(&self, intent: &Intent) -> usize {
        self.entries
            .iter()
            .position(|e| e.intent.id == intent.id && e.intent.path == intent.path)
            .unwrap_or(usize::MAX)
    }
}
