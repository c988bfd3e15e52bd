use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::session::{Session, SessionDelta};
use crate::intent::{Inference, Intent, Variables};

/// What the user said or typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub original_text: String,
    #[serde(default)]
    pub normalized_text: String,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            normalized_text: text.to_lowercase(),
            original_text: text,
        }
    }

    /// Normalized form when the platform provided one.
    pub fn utterance(&self) -> &str {
        if self.normalized_text.is_empty() {
            &self.original_text
        } else {
            &self.normalized_text
        }
    }
}

/// Server-originated action, e.g. the `run_app` that opens a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAction {
    #[serde(rename = "type", default = "ServerAction::default_type")]
    pub action_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl ServerAction {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            payload: Value::Null,
        }
    }

    fn default_type() -> String {
        "run_app".to_string()
    }
}

/// One turn as delivered by the transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnInput {
    #[serde(default)]
    pub message: Message,
    #[serde(default)]
    pub server_action: Option<ServerAction>,
    #[serde(default)]
    pub voice_action: bool,
    /// Pre-attached NLU result; the recognizer runs only without one
    #[serde(default)]
    pub inference: Option<Inference>,
    /// Application state reported by the client
    #[serde(default)]
    pub state: Option<Value>,
    /// The untouched NLU request
    #[serde(skip)]
    pub raw: Value,
}

impl TurnInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            message: Message::text(text),
            ..Self::default()
        }
    }

    pub fn with_inference(mut self, inference: Inference) -> Self {
        self.inference = Some(inference);
        self
    }

    pub fn with_server_action(mut self, action: ServerAction) -> Self {
        self.server_action = Some(action);
        self
    }
}

/// Resolved position for this turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentState {
    pub path: Vec<String>,
    pub schema: String,
}

/// Per-turn request.
///
/// Mutators write into a turn-scoped buffer; the session is never touched.
/// The dispatcher promotes the buffer at the single commit point.
#[derive(Debug, Clone)]
pub struct Request {
    pub message: Message,
    pub server_action: Option<ServerAction>,
    pub voice_action: bool,
    pub raw: Value,
    pub state: Option<Value>,
    intent: String,
    selected: Option<Intent>,
    inference: Option<Inference>,
    variables: Variables,
    session_state: Map<String, Value>,
    current_state: Option<CurrentState>,
    buffer: Vec<SessionDelta>,
}

impl Request {
    /// Session variables and handler state are visible to the turn as a starting point.
    pub fn new(input: TurnInput, session: &Session) -> Self {
        Self {
            message: input.message,
            server_action: input.server_action,
            voice_action: input.voice_action,
            raw: input.raw,
            state: input.state,
            intent: String::new(),
            selected: None,
            inference: input.inference,
            variables: session.variables.clone(),
            session_state: session.state.clone(),
            current_state: None,
            buffer: Vec::new(),
        }
    }

    /// Request already pointed at `intent`, as the resolver would see it.
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = intent.into();
        self
    }

    /// Resolved intent name, or the fallback intent when nothing was recognized.
    pub fn intent(&self) -> &str {
        &self.intent
    }

    /// Registered intent chosen for this turn, if any.
    pub fn selected_intent(&self) -> Option<&Intent> {
        self.selected.as_ref()
    }

    pub fn inference(&self) -> Option<&Inference> {
        self.inference.as_ref()
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Handler-defined session state, including writes made earlier in this turn.
    pub fn session_state(&self, key: &str) -> Option<&Value> {
        self.session_state.get(key)
    }

    pub fn current_state(&self) -> Option<&CurrentState> {
        self.current_state.as_ref()
    }

    pub fn action_type(&self) -> Option<&str> {
        self.server_action.as_ref().map(|a| a.action_type.as_str())
    }

    pub fn set_inference(&mut self, inference: Inference) {
        self.inference = Some(inference);
    }

    /// Visible for the rest of the turn, persisted only if the turn commits.
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        self.variables.insert(name.clone(), value.clone());
        self.buffer.push(SessionDelta::SetVariable { name, value });
    }

    pub(crate) fn set_intent(&mut self, intent: impl Into<String>) {
        self.intent = intent.into();
    }

    pub(crate) fn select(&mut self, intent: Intent) {
        self.intent = intent.name().to_string();
        self.selected = Some(intent);
    }

    pub(crate) fn set_current_state(&mut self, state: CurrentState) {
        self.current_state = Some(state);
    }

    /// Records a delta and mirrors variable and state writes into the turn view.
    pub(crate) fn record(&mut self, delta: SessionDelta) {
        let mut view = Session {
            variables: std::mem::take(&mut self.variables),
            state: std::mem::take(&mut self.session_state),
            ..Session::default()
        };
        view.reduce(delta.clone());
        self.variables = view.variables;
        self.session_state = view.state;
        self.buffer.push(delta);
    }

    pub(crate) fn take_buffer(&mut self) -> Vec<SessionDelta> {
        std::mem::take(&mut self.buffer)
    }

    pub fn pending_writes(&self) -> &[SessionDelta] {
        &self.buffer
    }
}
