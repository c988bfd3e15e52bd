//! Turn orchestration.
//!
//! `handle_turn` is the only entry point. The session snapshot passed in is
//! never touched; the updated session is built from the turn buffer at the
//! single commit point, and only when the whole turn succeeded.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::DispatcherConfig;
use super::error::KernelError;
use super::handler::{Handler, HandlerContext, SystemScenario};
use super::middleware::{Endpoint, Middleware, Next, Turn};
use super::request::{CurrentState, Request, TurnInput};
use super::response::Reply;
use super::scenario::{Resolution, ScenarioTree};
use super::session::{Session, SessionDelta};
use super::slot_filling::{SlotFiller, SlotOutcome};
use crate::intent::IntentRegistry;
use crate::services::recognizer::Recognizer;

/// Result of a committed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub reply: Reply,
    /// Hand this back to the caller's session store
    pub session: Session,
    /// None when the turn ended in a prompt, a short-circuit or no match
    pub resolution: Option<Resolution>,
}

enum Selection {
    Dispatch { absolute: bool },
    Prompted,
}

pub struct Dispatcher {
    registry: IntentRegistry,
    tree: ScenarioTree,
    middlewares: Vec<Arc<dyn Middleware>>,
    recognizer: Option<Arc<dyn Recognizer>>,
    system: SystemScenario,
    config: DispatcherConfig,
}

pub struct DispatcherBuilder {
    registry: IntentRegistry,
    tree: ScenarioTree,
    middlewares: Vec<Arc<dyn Middleware>>,
    recognizer: Option<Arc<dyn Recognizer>>,
    system: SystemScenario,
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    /// Middleware runs in registration order.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Handlers for `run_app`, `close_app` and turns nothing in the tree answers.
    pub fn system(mut self, system: SystemScenario) -> Self {
        self.system = system;
        self
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Dispatcher {
        info!(
            intents = self.registry.len(),
            middlewares = self.middlewares.len(),
            recognizer = self.recognizer.is_some(),
            system_default = self.system.default.is_some(),
            "Dispatcher ready"
        );
        Dispatcher {
            registry: self.registry,
            tree: self.tree,
            middlewares: self.middlewares,
            recognizer: self.recognizer,
            system: self.system,
            config: self.config,
        }
    }
}

struct Core<'d> {
    dispatcher: &'d Dispatcher,
}

#[async_trait]
impl Endpoint for Core<'_> {
    async fn run(&self, turn: &mut Turn<'_>) -> Result<(), KernelError> {
        self.dispatcher.run_core(turn).await
    }
}

impl Dispatcher {
    pub fn builder(registry: IntentRegistry, tree: ScenarioTree) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            tree,
            middlewares: Vec::new(),
            recognizer: None,
            system: SystemScenario::default(),
            config: DispatcherConfig::default(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn registry(&self) -> &IntentRegistry {
        &self.registry
    }

    pub fn tree(&self) -> &ScenarioTree {
        &self.tree
    }

    /// (turn input, session snapshot) -> (reply, next session).
    pub async fn handle_turn(&self, input: TurnInput, session: &Session) -> Result<TurnOutcome, KernelError> {
        let mut turn = Turn::new(Request::new(input, session), session);
        let turn_id = turn.turn_id;

        let core = Core { dispatcher: self };
        Next::new(&self.middlewares, &core).run(&mut turn).await?;

        let Turn {
            mut req,
            mut res,
            resolution,
            ..
        } = turn;

        let reply = res.finalize()?;

        // Commit point
        let deltas = req.take_buffer();
        let writes = deltas.len();
        let next = session.committed(deltas);
        info!(%turn_id, path = ?next.path, writes, slot_filling = next.slot_filling, "Session committed");

        Ok(TurnOutcome {
            reply,
            session: next,
            resolution,
        })
    }

    /// Same as `handle_turn`, abandoned with nothing committed once `cancel` fires.
    pub async fn handle_turn_cancellable(
        &self,
        input: TurnInput,
        session: &Session,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, KernelError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(path = ?session.path, "Turn cancelled before commit");
                Err(KernelError::Cancelled)
            }
            outcome = self.handle_turn(input, session) => outcome,
        }
    }

    async fn run_core(&self, turn: &mut Turn<'_>) -> Result<(), KernelError> {
        if let Some(action_type) = turn.req.action_type().map(str::to_string) {
            if let Some(system) = self.system.for_action(&action_type).cloned() {
                return self.run_system(turn, system, action_type).await;
            }
        }

        self.recognize(turn).await?;

        let absolute = match self.select(turn)? {
            Selection::Dispatch { absolute } => absolute,
            Selection::Prompted => return Ok(()),
        };

        let resolution = match self.tree.resolve(&turn.session.path, &turn.req, absolute) {
            Ok(resolution) => resolution,
            Err(e @ KernelError::NoMatchingScenario { .. }) => {
                warn!(turn_id = %turn.turn_id, error = %e, "Nothing in the tree answers the turn");
                let redirect = self.no_match(turn).await?;
                return self.settle(turn, None, redirect).await;
            }
            Err(e) => return Err(e),
        };

        debug!(turn_id = %turn.turn_id, path = ?resolution.path, schema = %resolution.schema, "Resolved");
        self.execute(turn, resolution).await
    }

    /// `run_app` and `close_app` bypass recognition and the tree. The
    /// session lands back at the root.
    async fn run_system(&self, turn: &mut Turn<'_>, system: Arc<dyn Handler>, action_type: String) -> Result<(), KernelError> {
        info!(turn_id = %turn.turn_id, action = %action_type, "System scenario");
        if turn.session.slot_filling {
            turn.req.record(SessionDelta::EndSlotFilling);
        }
        let at = Resolution {
            path: Vec::new(),
            schema: action_type,
        };
        let redirect = self.invoke(turn, system, &at).await?;
        self.settle(turn, Some(at), redirect).await
    }

    async fn recognize(&self, turn: &mut Turn<'_>) -> Result<(), KernelError> {
        if turn.req.inference().is_some() {
            return Ok(());
        }
        let Some(recognizer) = &self.recognizer else {
            return Ok(());
        };

        debug!(turn_id = %turn.turn_id, "Invoking recognizer");
        let inference = recognizer
            .inference(&turn.req, &turn.res, turn.session)
            .await
            .map_err(KernelError::Recognizer)?;
        turn.req.set_inference(inference);
        Ok(())
    }

    fn select(&self, turn: &mut Turn<'_>) -> Result<Selection, KernelError> {
        let filler = SlotFiller::new(&self.registry, &self.config);
        let session = turn.session;

        if session.slot_filling {
            match filler.resume(session, turn.req.inference()) {
                SlotOutcome::Abandoned { deltas } => record_all(&mut turn.req, deltas),
                outcome => return self.apply(turn, outcome),
            }
        }

        let chosen = turn.req.inference().and_then(|inference| {
            inference
                .ranked(|i| self.registry.order_of(i))
                .into_iter()
                .filter(|v| v.confidence >= self.config.min_confidence)
                .find(|v| !v.is_blocked(turn.req.variables()))
                .cloned()
        });

        match chosen {
            Some(variant) => {
                info!(
                    turn_id = %turn.turn_id,
                    intent = %variant.intent.name(),
                    confidence = variant.confidence,
                    "Variant chosen"
                );
                let outcome = filler.begin(&variant, turn.req.variables());
                self.apply(turn, outcome)
            }
            None => {
                info!(turn_id = %turn.turn_id, fallback = %self.config.fallback_intent, "Nothing recognized");
                turn.req.set_intent(self.config.fallback_intent.clone());
                Ok(Selection::Dispatch { absolute: false })
            }
        }
    }

    fn apply(&self, turn: &mut Turn<'_>, outcome: SlotOutcome) -> Result<Selection, KernelError> {
        match outcome {
            SlotOutcome::Ready { intent, deltas } => {
                record_all(&mut turn.req, deltas);
                let absolute = intent.is_absolute();
                turn.res.set_intent(intent.name())?;
                turn.req.select(intent);
                Ok(Selection::Dispatch { absolute })
            }
            SlotOutcome::Prompt {
                intent,
                slot,
                text,
                deltas,
            } => {
                record_all(&mut turn.req, deltas);
                info!(turn_id = %turn.turn_id, %intent, %slot, "Prompting for slot");
                turn.res.set_intent(intent)?;
                turn.res.append_bubble(text)?;
                Ok(Selection::Prompted)
            }
            SlotOutcome::Exhausted {
                intent,
                slot,
                attempts,
                deltas,
            } => {
                record_all(&mut turn.req, deltas);
                let e = KernelError::SlotFillingExhausted { intent, slot, attempts };
                warn!(turn_id = %turn.turn_id, error = %e, fallback = %self.config.fallback_intent, "Slot filling gave up");
                turn.req.set_intent(self.config.fallback_intent.clone());
                Ok(Selection::Dispatch { absolute: true })
            }
            SlotOutcome::Abandoned { deltas } => {
                record_all(&mut turn.req, deltas);
                turn.req.set_intent(self.config.fallback_intent.clone());
                Ok(Selection::Dispatch { absolute: false })
            }
        }
    }

    async fn execute(&self, turn: &mut Turn<'_>, resolution: Resolution) -> Result<(), KernelError> {
        let handler = self.handler_at(&turn.req, &resolution.path)?;
        let redirect = self.invoke(turn, handler, &resolution).await?;
        self.settle(turn, Some(resolution), redirect).await
    }

    /// Follow redirects until a handler asks for none, then record where the
    /// turn ended. `resolution` is None when nothing has resolved yet.
    async fn settle(
        &self,
        turn: &mut Turn<'_>,
        mut resolution: Option<Resolution>,
        mut redirect: Option<Vec<String>>,
    ) -> Result<(), KernelError> {
        let mut hops = 0u32;

        while let Some(target) = redirect.take() {
            hops += 1;
            if hops > self.config.max_dispatch_hops {
                error!(turn_id = %turn.turn_id, hops, target = ?target, "Dispatch loop detected");
                return Err(KernelError::DispatchLoopDetected { hops, target });
            }

            let from = resolution.as_ref().map(|r| r.path.clone());
            info!(turn_id = %turn.turn_id, hops, from = ?from, to = ?target, "Re-dispatching");

            match self.tree.locate(&target, &turn.req) {
                Ok(next) => {
                    let handler = self.handler_at(&turn.req, &next.path)?;
                    redirect = self.invoke(turn, handler, &next).await?;
                    resolution = Some(next);
                }
                Err(e @ KernelError::NoMatchingScenario { .. }) => {
                    warn!(turn_id = %turn.turn_id, error = %e, "Redirect target answers nothing");
                    redirect = self.no_match(turn).await?;
                }
                Err(e) => return Err(e),
            }
        }

        let Some(resolution) = resolution else {
            return Ok(());
        };

        turn.req.record(SessionDelta::SetPath(resolution.path.clone()));
        if !resolution.path.is_empty() {
            turn.req.record(SessionDelta::RecordHistory {
                path: resolution.path.clone(),
                depth: self.config.history_depth,
            });
        }
        turn.resolution = Some(resolution);
        Ok(())
    }

    fn handler_at(&self, req: &Request, path: &[String]) -> Result<Arc<dyn Handler>, KernelError> {
        self.tree
            .node(path)
            .and_then(|node| node.handler_ref().cloned())
            .ok_or_else(|| KernelError::NoMatchingScenario {
                intent: req.intent().to_string(),
                path: path.to_vec(),
            })
    }

    /// The system default handler, or the configured no-match bubble.
    async fn no_match(&self, turn: &mut Turn<'_>) -> Result<Option<Vec<String>>, KernelError> {
        let Some(default) = self.system.default.clone() else {
            turn.res.append_bubble(self.config.no_match_text.clone())?;
            return Ok(None);
        };

        let at = Resolution {
            path: turn.session.path.clone(),
            schema: "default".to_string(),
        };
        self.invoke(turn, default, &at).await
    }

    async fn invoke(&self, turn: &mut Turn<'_>, handler: Arc<dyn Handler>, at: &Resolution) -> Result<Option<Vec<String>>, KernelError> {
        turn.req.set_current_state(CurrentState {
            path: at.path.clone(),
            schema: at.schema.clone(),
        });

        let mut ctx = HandlerContext::new(&mut turn.req, &mut turn.res, turn.session);
        handler.handle(&mut ctx).await.map_err(|source| KernelError::Handler {
            path: at.path.clone(),
            source,
        })?;
        Ok(ctx.take_redirect())
    }
}

fn record_all(req: &mut Request, deltas: Vec<SessionDelta>) {
    for delta in deltas {
        req.record(delta);
    }
}
