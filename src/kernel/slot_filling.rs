//! Multi-turn slot collection.
//!
//! All progress lives in the session (`slot_filling`, `current_intent`,
//! `variables`, `slot_prompts`). The coordinator only reads it and returns
//! deltas; the dispatcher decides whether they are committed.

use serde_json::Value;
use tracing::{debug, info};

use super::config::DispatcherConfig;
use super::session::{Session, SessionDelta};
use crate::intent::{FoundSlot, Inference, Intent, IntentRegistry, IntentSlot, Variables, Variant};

#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    /// Every required slot is present; dispatch the intent
    Ready {
        intent: Intent,
        deltas: Vec<SessionDelta>,
    },
    /// Ask for the next missing slot and end the turn there
    Prompt {
        intent: String,
        slot: String,
        text: String,
        deltas: Vec<SessionDelta>,
    },
    /// Collection dropped (override or unknown intent); select normally
    Abandoned { deltas: Vec<SessionDelta> },
    /// Prompt budget spent without an answer
    Exhausted {
        intent: String,
        slot: String,
        attempts: u32,
        deltas: Vec<SessionDelta>,
    },
}

pub struct SlotFiller<'a> {
    registry: &'a IntentRegistry,
    config: &'a DispatcherConfig,
}

impl<'a> SlotFiller<'a> {
    pub fn new(registry: &'a IntentRegistry, config: &'a DispatcherConfig) -> Self {
        Self { registry, config }
    }

    /// IDLE -> COLLECTING (or straight to ready when nothing is missing).
    /// `known` is the turn's view of the variables, session values included.
    pub fn begin(&self, variant: &Variant, known: &Variables) -> SlotOutcome {
        let intent = &variant.intent;
        let mut deltas = merge_deltas(intent, variant.declared_slots());
        let known = known_after(known, &deltas);

        let missing = intent.missing_slots(&[], &known);
        let Some(slot) = missing.first() else {
            return SlotOutcome::Ready {
                intent: intent.clone(),
                deltas,
            };
        };

        info!(intent = %intent.name(), slot = %slot.name, "Slot filling started");
        deltas.push(SessionDelta::BeginSlotFilling {
            intent: intent.name().to_string(),
        });
        self.prompt(intent, slot, 0, deltas)
    }

    /// COLLECTING -> COLLECTING | COMPLETE | IDLE.
    /// The inference is read as an answer to the pending slot, not as a new search.
    pub fn resume(&self, session: &Session, inference: Option<&Inference>) -> SlotOutcome {
        let Some(current) = session.current_intent.as_deref() else {
            return SlotOutcome::Abandoned {
                deltas: vec![SessionDelta::EndSlotFilling],
            };
        };
        let Some(intent) = self.registry.by_path(current) else {
            info!(intent = %current, "Pending intent no longer registered, dropping slot filling");
            return SlotOutcome::Abandoned {
                deltas: vec![SessionDelta::EndSlotFilling],
            };
        };

        let ranked = inference
            .map(|inf| inf.ranked(|i| self.registry.order_of(i)))
            .unwrap_or_default();

        // Escape hatch: a confident, different intent wins over the pending one
        if let Some(top) = ranked.first() {
            if top.intent.name() != intent.name() && top.confidence > self.config.slot_override_threshold {
                info!(
                    pending = %intent.name(),
                    overriding = %top.intent.name(),
                    confidence = top.confidence,
                    "Slot filling abandoned for a new intent"
                );
                return SlotOutcome::Abandoned {
                    deltas: vec![SessionDelta::EndSlotFilling],
                };
            }
        }

        // Answers come from the best variant that carries any slot we are waiting for
        let answers: Vec<&FoundSlot> = ranked
            .iter()
            .map(|v| v.slots.iter().filter(|f| intent.slot(&f.name).is_some()).collect::<Vec<_>>())
            .find(|found| !found.is_empty())
            .unwrap_or_default();

        let mut deltas = merge_deltas(intent, answers.iter().copied());
        let answered = !deltas.is_empty();
        let known = known_after(&session.variables, &deltas);

        let missing = intent.missing_slots(&[], &known);
        let Some(slot) = missing.first() else {
            info!(intent = %intent.name(), "Slot filling complete");
            deltas.push(SessionDelta::EndSlotFilling);
            return SlotOutcome::Ready {
                intent: intent.clone(),
                deltas,
            };
        };

        let attempts = if answered {
            deltas.push(SessionDelta::SlotAnswered);
            0
        } else {
            session.slot_prompts
        };

        debug!(intent = %intent.name(), slot = %slot.name, attempts, "Slot still missing");
        self.prompt(intent, slot, attempts, deltas)
    }

    fn prompt(&self, intent: &Intent, slot: &IntentSlot, attempts: u32, mut deltas: Vec<SessionDelta>) -> SlotOutcome {
        if attempts >= self.config.max_slot_prompts || slot.prompts.is_empty() {
            deltas.push(SessionDelta::EndSlotFilling);
            return SlotOutcome::Exhausted {
                intent: intent.name().to_string(),
                slot: slot.name.clone(),
                attempts,
                deltas,
            };
        }

        deltas.push(SessionDelta::SlotPrompted);
        SlotOutcome::Prompt {
            intent: intent.name().to_string(),
            slot: slot.name.clone(),
            text: prompt_text(slot, attempts),
            deltas,
        }
    }
}

/// Prompts rotate by attempt so a re-ask does not repeat itself verbatim.
pub fn prompt_text(slot: &IntentSlot, attempts: u32) -> String {
    if slot.prompts.is_empty() {
        return String::new();
    }
    slot.prompts[attempts as usize % slot.prompts.len()].clone()
}

fn merge_deltas<'s>(intent: &Intent, found: impl Iterator<Item = &'s FoundSlot>) -> Vec<SessionDelta> {
    found
        .filter_map(|f| {
            intent
                .slot(&f.name)
                .map(|decl| SessionDelta::from_found_slot(f, decl.array))
        })
        .collect()
}

/// Variables as they would look once `deltas` are applied.
fn known_after(variables: &Variables, deltas: &[SessionDelta]) -> Variables {
    let mut known = variables.clone();
    for delta in deltas {
        match delta {
            SessionDelta::SetVariable { name, value } => {
                known.insert(name.clone(), value.clone());
            }
            SessionDelta::AppendVariable { name, .. } => {
                known.entry(name.clone()).or_insert(Value::Array(Vec::new()));
            }
            _ => {}
        }
    }
    known
}
