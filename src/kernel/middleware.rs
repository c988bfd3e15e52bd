use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::KernelError;
use super::request::Request;
use super::response::ResponseBuilder;
use super::scenario::Resolution;
use super::session::Session;

/// In-flight turn as seen by middleware.
pub struct Turn<'s> {
    pub turn_id: Uuid,
    pub req: Request,
    pub res: ResponseBuilder,
    /// Snapshot from before the turn; never mutated
    pub session: &'s Session,
    /// Set once a handler has run
    pub resolution: Option<Resolution>,
}

impl<'s> Turn<'s> {
    pub fn new(req: Request, session: &'s Session) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            req,
            res: ResponseBuilder::new(),
            session,
            resolution: None,
        }
    }
}

/// One pipeline stage.
///
/// Proceed by awaiting `next.run(turn)`. Returning without calling it
/// short-circuits the rest of the chain and the handler. Returning an
/// error aborts the turn with nothing committed.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, turn: &mut Turn<'_>, next: Next<'_>) -> Result<(), KernelError>;
}

/// Whatever runs after the last middleware.
#[async_trait]
pub(crate) trait Endpoint: Send + Sync {
    async fn run(&self, turn: &mut Turn<'_>) -> Result<(), KernelError>;
}

/// Continuation handed to a middleware.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Endpoint) -> Self {
        Self { chain, endpoint }
    }

    /// Middleware still waiting in the chain after this one.
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }

    pub async fn run(self, turn: &mut Turn<'_>) -> Result<(), KernelError> {
        match self.chain.split_first() {
            Some((head, rest)) => head.handle(turn, Next::new(rest, self.endpoint)).await,
            None => self.endpoint.run(turn).await,
        }
    }
}

/// Logs every turn with its duration and outcome.
#[derive(Debug, Default)]
pub struct TurnLogger;

#[async_trait]
impl Middleware for TurnLogger {
    fn name(&self) -> &str {
        "turn_logger"
    }

    async fn handle(&self, turn: &mut Turn<'_>, next: Next<'_>) -> Result<(), KernelError> {
        let started = Instant::now();
        info!(
            turn_id = %turn.turn_id,
            text = %turn.req.message.utterance(),
            voice = turn.req.voice_action,
            "Turn received"
        );

        let result = next.run(turn).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => info!(
                turn_id = %turn.turn_id,
                path = ?turn.resolution.as_ref().map(|r| &r.path),
                elapsed_ms,
                "Turn handled"
            ),
            Err(e) => warn!(turn_id = %turn.turn_id, code = e.code(), error = %e, elapsed_ms, "Turn failed"),
        }
        result
    }
}
