use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::request::Request;
use super::response::ResponseBuilder;
use super::session::{Session, SessionDelta};

/// Everything application logic may touch during a turn.
pub struct HandlerContext<'t> {
    pub req: &'t mut Request,
    pub res: &'t mut ResponseBuilder,
    /// Snapshot from the start of the turn; writes go through `req`
    pub session: &'t Session,
    /// Previously resolved paths, oldest first
    pub history: &'t [Vec<String>],
    redirect: Option<Vec<String>>,
}

impl<'t> HandlerContext<'t> {
    pub fn new(req: &'t mut Request, res: &'t mut ResponseBuilder, session: &'t Session) -> Self {
        Self {
            req,
            res,
            session,
            history: &session.history,
            redirect: None,
        }
    }

    /// Ask for an explicit transition to the node at `path` (absolute).
    /// The last call within a handler wins.
    pub fn dispatch<I, S>(&mut self, path: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.redirect = Some(path.into_iter().map(Into::into).collect());
    }

    /// Handler-defined session state, persisted on commit.
    pub fn set_state(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.req.record(SessionDelta::SetState {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Sees `set_state` writes from earlier in the turn.
    pub fn state(&self, key: &str) -> Option<&Value> {
        self.req.session_state(key)
    }

    pub(crate) fn take_redirect(&mut self) -> Option<Vec<String>> {
        self.redirect.take()
    }
}

/// Application logic attached to a scenario node.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &mut HandlerContext<'_>) -> anyhow::Result<()>;
}

/// Adapter for synchronous closures.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut HandlerContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, ctx: &mut HandlerContext<'_>) -> anyhow::Result<()> {
        (self.0)(ctx)
    }
}

pub fn handler<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(&mut HandlerContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Replies with the selected intent's canned answer, if it has one.
pub struct AnswerHandler;

#[async_trait]
impl Handler for AnswerHandler {
    async fn handle(&self, ctx: &mut HandlerContext<'_>) -> anyhow::Result<()> {
        let answer = ctx
            .req
            .selected_intent()
            .and_then(|intent| intent.answer.clone());
        if let Some(answer) = answer {
            ctx.res.append_bubble(answer)?;
        }
        Ok(())
    }
}

/// Handlers the dispatcher calls outside the scenario tree.
#[derive(Clone, Default)]
pub struct SystemScenario {
    /// Runs when nothing in the tree answers the turn
    pub default: Option<Arc<dyn Handler>>,
    /// Runs for the `run_app` server action
    pub run_app: Option<Arc<dyn Handler>>,
    /// Runs for the `close_app` server action
    pub close_app: Option<Arc<dyn Handler>>,
}

impl SystemScenario {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.default = Some(handler);
        self
    }

    pub fn run_app(mut self, handler: Arc<dyn Handler>) -> Self {
        self.run_app = Some(handler);
        self
    }

    pub fn close_app(mut self, handler: Arc<dyn Handler>) -> Self {
        self.close_app = Some(handler);
        self
    }

    /// System handler registered for a server action type, if any.
    pub fn for_action(&self, action_type: &str) -> Option<&Arc<dyn Handler>> {
        match action_type {
            RUN_APP => self.run_app.as_ref(),
            CLOSE_APP => self.close_app.as_ref(),
            _ => None,
        }
    }
}

pub const RUN_APP: &str = "run_app";
pub const CLOSE_APP: &str = "close_app";
