use thiserror::Error;

use crate::intent::IntentId;

/// Malformed application registration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("Duplicate intent id {0}")]
    DuplicateIntentId(IntentId),
    #[error("Duplicate intent path '{0}'")]
    DuplicateIntentPath(String),
    #[error("Intent {0} has an empty path")]
    EmptyIntentPath(IntentId),
    #[error("Intent '{0}' declares neither matchers nor an action")]
    EmptyIntent(String),
    #[error("Intent '{intent}' declares slot '{slot}' twice")]
    DuplicateSlot { intent: String, slot: String },
    #[error("Invalid scenario node name '{0}'")]
    InvalidNodeName(String),
    #[error("Duplicate scenario node '{name}' under '{parent}'")]
    DuplicateNode { parent: String, name: String },
    #[error("Scenario node '{0}' has neither a handler nor children")]
    DeadNode(String),
}

/// Per-turn failures. None of them leave a partially updated session behind.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("No scenario matches intent '{intent}' from path {path:?}")]
    NoMatchingScenario { intent: String, path: Vec<String> },

    #[error("Slot '{slot}' of intent '{intent}' still empty after {attempts} prompts")]
    SlotFillingExhausted {
        intent: String,
        slot: String,
        attempts: u32,
    },

    #[error("Dispatch loop detected after {hops} redirects (last target {target:?})")]
    DispatchLoopDetected { hops: u32, target: Vec<String> },

    #[error("Middleware '{name}' failed: {source}")]
    Middleware {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Handler for {path:?} failed: {source}")]
    Handler {
        path: Vec<String>,
        #[source]
        source: anyhow::Error,
    },

    #[error("Recognizer failed: {0}")]
    Recognizer(#[source] anyhow::Error),

    #[error("Response already finalized")]
    ResponseFinalized,

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("Turn cancelled before commit")]
    Cancelled,

    #[error("Malformed session: {0}")]
    Session(#[from] serde_json::Error),
}

impl KernelError {
    pub fn middleware(name: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Middleware {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Short machine code used when the error is surfaced to the transport.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoMatchingScenario { .. } => "no_matching_scenario",
            Self::SlotFillingExhausted { .. } => "slot_filling_exhausted",
            Self::DispatchLoopDetected { .. } => "dispatch_loop_detected",
            Self::Middleware { .. } => "middleware",
            Self::Handler { .. } => "handler",
            Self::Recognizer(_) => "recognizer",
            Self::ResponseFinalized => "response_finalized",
            Self::Registration(_) => "registration",
            Self::Cancelled => "cancelled",
            Self::Session(_) => "session",
        }
    }
}
