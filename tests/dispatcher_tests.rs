mod common;

use async_trait::async_trait;
use common::{book_table, dispatcher, greet, one, registry, tree, weather};
use scenario_kernel::intent::{Inference, Intent, IntentRegistry, Variant};
use scenario_kernel::kernel::config::DispatcherConfig;
use scenario_kernel::kernel::handler::{handler, AnswerHandler, SystemScenario};
use scenario_kernel::kernel::middleware::{Middleware, Next, Turn, TurnLogger};
use scenario_kernel::kernel::request::{ServerAction, TurnInput};
use scenario_kernel::kernel::response::ResponseBuilder;
use scenario_kernel::kernel::scenario::{Matcher, ScenarioNode, ScenarioTree};
use scenario_kernel::kernel::session::Session;
use scenario_kernel::services::recognizer::Recognizer;
use scenario_kernel::{Dispatcher, KernelError};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_scenario_a_greet_from_empty_session() {
    let dispatcher = dispatcher();
    let session = Session::new();

    let input = TurnInput::text("hello").with_inference(one(greet(), 0.9));
    let outcome = dispatcher.handle_turn(input, &session).await.unwrap();

    assert_eq!(outcome.reply.bubbles(), vec!["Hello!"]);
    assert_eq!(outcome.session.path, vec!["greet".to_string()]);
    assert_eq!(outcome.reply.intent.as_deref(), Some("greet"));
    // VERIFY: Snapshot untouched
    assert!(session.path.is_empty());

    println!("Scenario A Passed");
}

#[tokio::test]
async fn test_scenario_b_two_turn_slot_filling() {
    let dispatcher = dispatcher();
    let session = Session::new();

    let turn1 = TurnInput::text("book a table for 4")
        .with_inference(Inference::new(vec![Variant::new(book_table(), 0.9).with_slot("partySize", "4")]));
    let outcome = dispatcher.handle_turn(turn1, &session).await.unwrap();

    assert!(outcome.session.slot_filling);
    assert_eq!(outcome.session.current_intent.as_deref(), Some("book_table"));
    assert_eq!(outcome.session.variables.len(), 1);
    assert_eq!(outcome.session.variables["partySize"], json!("4"));
    assert_eq!(outcome.reply.bubbles(), vec!["What time?"]);
    assert!(outcome.resolution.is_none());

    let turn2 = TurnInput::text("at 7pm")
        .with_inference(Inference::new(vec![Variant::new(book_table(), 0.5).with_slot("time", "19:00")]));
    let outcome = dispatcher.handle_turn(turn2, &outcome.session).await.unwrap();

    assert!(!outcome.session.slot_filling);
    assert_eq!(outcome.session.current_intent, None);
    assert_eq!(outcome.reply.bubbles(), vec!["Table for 4 at 19:00"]);
    assert_eq!(outcome.session.path, vec!["book_table".to_string()]);
}

#[tokio::test]
async fn test_scenario_c_low_confidence_falls_back() {
    let dispatcher = dispatcher();

    let input = TurnInput::text("mumble").with_inference(one(weather(), 0.1));
    let outcome = dispatcher.handle_turn(input, &Session::new()).await.unwrap();

    assert_eq!(outcome.reply.bubbles(), vec!["Sorry?"]);
    assert_eq!(outcome.session.path, vec!["fallback".to_string()]);
}

#[tokio::test]
async fn test_slot_answer_from_unrelated_intent_variant() {
    let dispatcher = dispatcher();

    let turn1 = TurnInput::text("book a table").with_inference(one(book_table(), 0.9));
    let s1 = dispatcher.handle_turn(turn1, &Session::new()).await.unwrap().session;
    assert_eq!(s1.current_intent.as_deref(), Some("book_table"));

    // Answer arrives tagged with a low-confidence different intent
    let answer = Inference::new(vec![
        Variant::new(weather(), 0.4),
        Variant::new(greet(), 0.3).with_slot("partySize", "2"),
    ]);
    let outcome = dispatcher
        .handle_turn(TurnInput::text("two").with_inference(answer), &s1)
        .await
        .unwrap();

    assert!(outcome.session.slot_filling);
    assert_eq!(outcome.session.variables["partySize"], json!("2"));
    assert_eq!(outcome.reply.bubbles(), vec!["What time?"]);
}

#[tokio::test]
async fn test_confident_new_intent_abandons_slot_filling() {
    let dispatcher = dispatcher();

    let turn1 = TurnInput::text("book a table").with_inference(one(book_table(), 0.9));
    let s1 = dispatcher.handle_turn(turn1, &Session::new()).await.unwrap().session;
    assert!(s1.slot_filling);

    let turn2 = TurnInput::text("what's the weather").with_inference(one(weather(), 0.95));
    let outcome = dispatcher.handle_turn(turn2, &s1).await.unwrap();

    assert!(!outcome.session.slot_filling);
    assert_eq!(outcome.session.current_intent, None);
    assert_eq!(outcome.reply.bubbles(), vec!["Sunny"]);
}

#[tokio::test]
async fn test_exhausted_slot_routes_to_fallback() {
    let config = DispatcherConfig {
        max_slot_prompts: 2,
        ..DispatcherConfig::default()
    };
    let dispatcher = Dispatcher::builder(registry(), tree()).config(config).build();

    let mut session = dispatcher
        .handle_turn(TurnInput::text("book").with_inference(one(book_table(), 0.9)), &Session::new())
        .await
        .unwrap()
        .session;
    assert_eq!(session.slot_prompts, 1);

    // Second prompt for the same slot
    let outcome = dispatcher
        .handle_turn(TurnInput::text("uh").with_inference(Inference::default()), &session)
        .await
        .unwrap();
    assert_eq!(outcome.reply.bubbles(), vec!["For how many people?"]);
    session = outcome.session;
    assert_eq!(session.slot_prompts, 2);

    let outcome = dispatcher
        .handle_turn(TurnInput::text("uh").with_inference(Inference::default()), &session)
        .await
        .unwrap();

    // VERIFY: Back to IDLE, fallback handler answered
    assert!(!outcome.session.slot_filling);
    assert_eq!(outcome.session.current_intent, None);
    assert_eq!(outcome.session.slot_prompts, 0);
    assert_eq!(outcome.reply.bubbles(), vec!["Sorry?"]);
}

#[tokio::test]
async fn test_no_matching_scenario_is_user_visible() {
    let tree = ScenarioTree::new(vec![ScenarioNode::intent("greet").handler(handler(|ctx| {
        ctx.res.append_bubble("Hello!")?;
        Ok(())
    }))])
    .unwrap();
    let dispatcher = Dispatcher::builder(registry(), tree).build();
    let session = Session {
        path: vec!["greet".into()],
        ..Session::default()
    };

    let outcome = dispatcher
        .handle_turn(TurnInput::text("rain?").with_inference(one(weather(), 0.9)), &session)
        .await
        .unwrap();

    let no_match = DispatcherConfig::default().no_match_text;
    assert_eq!(outcome.reply.bubbles(), vec![no_match.as_str()]);
    assert_eq!(outcome.session.path, session.path);
    assert!(outcome.resolution.is_none());
}

#[tokio::test]
async fn test_dispatch_redirects_to_absolute_path() {
    let tree = ScenarioTree::new(vec![
        ScenarioNode::intent("greet").handler(handler(|ctx| {
            ctx.res.append_bubble("one moment")?;
            ctx.dispatch(["menu", "main"]);
            Ok(())
        })),
        ScenarioNode::new("menu", Matcher::predicate(|_| false)).child(ScenarioNode::fallback("main").schema("menu_screen").handler(
            handler(|ctx| {
                let schema = ctx.req.current_state().map(|s| s.schema.clone()).unwrap_or_default();
                ctx.res.append_bubble(format!("menu via {schema}"))?;
                Ok(())
            }),
        )),
    ])
    .unwrap();
    let dispatcher = Dispatcher::builder(registry(), tree).build();

    let outcome = dispatcher
        .handle_turn(TurnInput::text("hi").with_inference(one(greet(), 0.9)), &Session::new())
        .await
        .unwrap();

    assert_eq!(outcome.reply.bubbles(), vec!["one moment", "menu via menu_screen"]);
    assert_eq!(outcome.session.path, vec!["menu".to_string(), "main".to_string()]);
    assert_eq!(outcome.session.history, vec![vec!["menu".to_string(), "main".to_string()]]);
}

#[tokio::test]
async fn test_dispatch_to_group_node_lands_on_its_default_child() {
    let tree = ScenarioTree::new(vec![
        ScenarioNode::intent("greet").handler(handler(|ctx| {
            ctx.dispatch(["menu"]);
            Ok(())
        })),
        ScenarioNode::new("menu", Matcher::predicate(|_| false)).child(ScenarioNode::fallback("main").handler(handler(|ctx| {
            ctx.res.append_bubble("main menu")?;
            Ok(())
        }))),
    ])
    .unwrap();
    let dispatcher = Dispatcher::builder(registry(), tree).build();

    let outcome = dispatcher
        .handle_turn(TurnInput::text("hi").with_inference(one(greet(), 0.9)), &Session::new())
        .await
        .unwrap();

    assert_eq!(outcome.reply.bubbles(), vec!["main menu"]);
    assert_eq!(outcome.session.path, vec!["menu".to_string(), "main".to_string()]);
}

#[tokio::test]
async fn test_dispatch_to_missing_path_keeps_earlier_bubbles() {
    let tree = ScenarioTree::new(vec![ScenarioNode::intent("greet").handler(handler(|ctx| {
        ctx.res.append_bubble("one moment")?;
        ctx.dispatch(["nowhere"]);
        Ok(())
    }))])
    .unwrap();
    let dispatcher = Dispatcher::builder(registry(), tree).build();

    let outcome = dispatcher
        .handle_turn(TurnInput::text("hi").with_inference(one(greet(), 0.9)), &Session::new())
        .await
        .unwrap();

    let no_match = DispatcherConfig::default().no_match_text;
    assert_eq!(outcome.reply.bubbles(), vec!["one moment", no_match.as_str()]);
    // VERIFY: The handler that did run is where the session lands
    assert_eq!(outcome.session.path, vec!["greet".to_string()]);
}

#[tokio::test]
async fn test_dispatch_loop_detected_commits_nothing() {
    let tree = ScenarioTree::new(vec![
        ScenarioNode::intent("greet").handler(handler(|ctx| {
            ctx.req.set_variable("touched", true);
            ctx.dispatch(["ping"]);
            Ok(())
        })),
        ScenarioNode::new("ping", Matcher::predicate(|_| false)).handler(handler(|ctx| {
            ctx.dispatch(["pong"]);
            Ok(())
        })),
        ScenarioNode::new("pong", Matcher::predicate(|_| false)).handler(handler(|ctx| {
            ctx.dispatch(["ping"]);
            Ok(())
        })),
    ])
    .unwrap();
    let dispatcher = Dispatcher::builder(registry(), tree).build();
    let session = Session::new();

    let result = dispatcher
        .handle_turn(TurnInput::text("hi").with_inference(one(greet(), 0.9)), &session)
        .await;

    match result {
        Err(KernelError::DispatchLoopDetected { hops, .. }) => assert_eq!(hops, 4),
        other => panic!("expected DispatchLoopDetected, got {other:?}"),
    }
    assert_eq!(session, Session::new());
}

#[tokio::test]
async fn test_redirects_within_bound_succeed() {
    let tree = ScenarioTree::new(vec![
        ScenarioNode::intent("greet").handler(handler(|ctx| {
            ctx.dispatch(["a"]);
            Ok(())
        })),
        ScenarioNode::new("a", Matcher::predicate(|_| false)).handler(handler(|ctx| {
            ctx.dispatch(["b"]);
            Ok(())
        })),
        ScenarioNode::new("b", Matcher::predicate(|_| false)).handler(handler(|ctx| {
            ctx.dispatch(["c"]);
            Ok(())
        })),
        ScenarioNode::new("c", Matcher::predicate(|_| false)).handler(handler(|ctx| {
            ctx.res.append_bubble("landed")?;
            Ok(())
        })),
    ])
    .unwrap();
    let dispatcher = Dispatcher::builder(registry(), tree).build();

    let outcome = dispatcher
        .handle_turn(TurnInput::text("hi").with_inference(one(greet(), 0.9)), &Session::new())
        .await
        .unwrap();
    assert_eq!(outcome.reply.bubbles(), vec!["landed"]);
    assert_eq!(outcome.session.path, vec!["c".to_string()]);
}

#[tokio::test]
async fn test_handler_writes_are_committed_together() {
    let tree = ScenarioTree::new(vec![ScenarioNode::intent("greet").handler(handler(|ctx| {
        ctx.req.set_variable("name", "Ada");
        ctx.set_state("greeted", true);
        ctx.res.append_bubble(format!("visible now: {}", ctx.req.variable("name").is_some()))?;
        Ok(())
    }))])
    .unwrap();
    let dispatcher = Dispatcher::builder(registry(), tree).build();

    let outcome = dispatcher
        .handle_turn(TurnInput::text("hi").with_inference(one(greet(), 0.9)), &Session::new())
        .await
        .unwrap();

    assert_eq!(outcome.reply.bubbles(), vec!["visible now: true"]);
    assert_eq!(outcome.session.variables["name"], json!("Ada"));
    assert_eq!(outcome.session.state["greeted"], json!(true));
}

#[tokio::test]
async fn test_handler_error_leaves_session_unmodified() {
    let tree = ScenarioTree::new(vec![ScenarioNode::intent("greet").handler(handler(|ctx| {
        ctx.req.set_variable("half", "done");
        anyhow::bail!("backend down")
    }))])
    .unwrap();
    let dispatcher = Dispatcher::builder(registry(), tree).build();
    let session = Session {
        path: vec!["greet".into()],
        ..Session::default()
    };

    let result = dispatcher
        .handle_turn(TurnInput::text("hi").with_inference(one(greet(), 0.9)), &session)
        .await;

    assert!(matches!(result, Err(KernelError::Handler { .. })));
    assert!(session.variables.is_empty());
}

struct Recording {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Middleware for Recording {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, turn: &mut Turn<'_>, next: Next<'_>) -> Result<(), KernelError> {
        self.log.lock().unwrap().push(format!("{} in", self.name));
        let result = next.run(turn).await;
        self.log.lock().unwrap().push(format!("{} out", self.name));
        result
    }
}

struct ShortCircuit;

#[async_trait]
impl Middleware for ShortCircuit {
    fn name(&self) -> &str {
        "maintenance"
    }

    async fn handle(&self, turn: &mut Turn<'_>, _next: Next<'_>) -> Result<(), KernelError> {
        turn.req.set_variable("seen_maintenance", true);
        turn.res.append_bubble("Down for maintenance")?;
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl Middleware for Failing {
    fn name(&self) -> &str {
        "auth"
    }

    async fn handle(&self, turn: &mut Turn<'_>, _next: Next<'_>) -> Result<(), KernelError> {
        turn.req.set_variable("partial", true);
        Err(KernelError::middleware(self.name(), anyhow::anyhow!("token expired")))
    }
}

#[tokio::test]
async fn test_middleware_runs_in_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = Dispatcher::builder(registry(), tree())
        .middleware(Arc::new(Recording { name: "first", log: log.clone() }))
        .middleware(Arc::new(Recording { name: "second", log: log.clone() }))
        .build();

    dispatcher
        .handle_turn(TurnInput::text("hi").with_inference(one(greet(), 0.9)), &Session::new())
        .await
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["first in", "second in", "second out", "first out"]);
}

#[tokio::test]
async fn test_middleware_short_circuit_skips_handler() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = Dispatcher::builder(registry(), tree())
        .middleware(Arc::new(ShortCircuit))
        .middleware(Arc::new(Recording { name: "after", log: log.clone() }))
        .build();

    let outcome = dispatcher
        .handle_turn(TurnInput::text("hi").with_inference(one(greet(), 0.9)), &Session::new())
        .await
        .unwrap();

    assert_eq!(outcome.reply.bubbles(), vec!["Down for maintenance"]);
    assert!(log.lock().unwrap().is_empty());
    assert!(outcome.session.path.is_empty());
    assert!(outcome.resolution.is_none());
    // Middleware writes of a successful turn still commit
    assert_eq!(outcome.session.variables["seen_maintenance"], json!(true));
}

#[tokio::test]
async fn test_middleware_error_aborts_turn() {
    let dispatcher = Dispatcher::builder(registry(), tree()).middleware(Arc::new(Failing)).build();
    let session = Session::new();

    let result = dispatcher
        .handle_turn(TurnInput::text("hi").with_inference(one(greet(), 0.9)), &session)
        .await;

    match result {
        Err(e @ KernelError::Middleware { .. }) => assert_eq!(e.code(), "middleware"),
        other => panic!("expected middleware error, got {other:?}"),
    }
    assert!(session.variables.is_empty());
}

struct CountingRecognizer {
    calls: AtomicUsize,
}

#[async_trait]
impl Recognizer for CountingRecognizer {
    async fn inference(&self, _req: &scenario_kernel::kernel::request::Request, _res: &ResponseBuilder, _session: &Session) -> anyhow::Result<Inference> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(one(greet(), 0.8))
    }
}

#[tokio::test]
async fn test_recognizer_runs_only_without_attached_inference() {
    let recognizer = Arc::new(CountingRecognizer { calls: AtomicUsize::new(0) });
    let dispatcher = Dispatcher::builder(registry(), tree()).recognizer(recognizer.clone()).build();

    let outcome = dispatcher.handle_turn(TurnInput::text("hi"), &Session::new()).await.unwrap();
    assert_eq!(outcome.reply.bubbles(), vec!["Hello!"]);
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);

    let outcome = dispatcher
        .handle_turn(TurnInput::text("weather").with_inference(one(weather(), 0.9)), &Session::new())
        .await
        .unwrap();
    assert_eq!(outcome.reply.bubbles(), vec!["Sunny"]);
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_action_node() {
    let tree = ScenarioTree::new(vec![
        ScenarioNode::new("start", Matcher::action("run_app")).handler(handler(|ctx| {
            ctx.res.append_bubble("Welcome")?;
            Ok(())
        })),
        ScenarioNode::fallback("fallback").handler(handler(|ctx| {
            ctx.res.append_bubble("Sorry?")?;
            Ok(())
        })),
    ])
    .unwrap();
    let dispatcher = Dispatcher::builder(registry(), tree).build();

    let input = TurnInput::default().with_server_action(ServerAction::new("run_app"));
    let outcome = dispatcher.handle_turn(input, &Session::new()).await.unwrap();

    assert_eq!(outcome.reply.bubbles(), vec!["Welcome"]);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let config = DispatcherConfig {
        history_depth: 2,
        ..DispatcherConfig::default()
    };
    let dispatcher = Dispatcher::builder(registry(), tree()).config(config).build();

    let mut session = Session::new();
    for intent in [greet(), weather(), greet()] {
        session = dispatcher
            .handle_turn(TurnInput::text("x").with_inference(one(intent, 0.9)), &session)
            .await
            .unwrap()
            .session;
    }

    assert_eq!(session.history, vec![vec!["weather".to_string()], vec!["greet".to_string()]]);
}

#[tokio::test]
async fn test_cancelled_turn_commits_nothing() {
    let dispatcher = dispatcher();
    let token = CancellationToken::new();
    token.cancel();

    let result = dispatcher
        .handle_turn_cancellable(TurnInput::text("hi").with_inference(one(greet(), 0.9)), &Session::new(), token)
        .await;

    assert!(matches!(result, Err(KernelError::Cancelled)));
}

#[tokio::test]
async fn test_uncancelled_turn_completes() {
    let dispatcher = dispatcher();

    let outcome = dispatcher
        .handle_turn_cancellable(
            TurnInput::text("hi").with_inference(one(greet(), 0.9)),
            &Session::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.session.path, vec!["greet".to_string()]);
}

#[tokio::test]
async fn test_answer_handler_with_turn_logger() {
    let faq = Intent::new(1, "/faq/hours").with_answer("We open at nine.");
    let registry = IntentRegistry::new(vec![faq.clone()]).unwrap();
    let tree = ScenarioTree::new(vec![ScenarioNode::intent("faq/hours").handler(Arc::new(AnswerHandler))]);
    // Node names may not contain the separator
    assert!(tree.is_err());

    let tree = ScenarioTree::new(vec![ScenarioNode::new("hours", Matcher::intent("/faq/hours")).handler(Arc::new(AnswerHandler))]).unwrap();
    let dispatcher = Dispatcher::builder(registry, tree).middleware(Arc::new(TurnLogger)).build();
    let session = Session {
        path: vec!["stale".into()],
        ..Session::default()
    };

    let outcome = dispatcher
        .handle_turn(TurnInput::text("when do you open").with_inference(one(faq, 0.9)), &session)
        .await
        .unwrap();

    assert_eq!(outcome.reply.bubbles(), vec!["We open at nine."]);
    assert_eq!(outcome.reply.intent.as_deref(), Some("faq/hours"));
    assert_eq!(outcome.session.path, vec!["hours".to_string()]);
}

#[tokio::test]
async fn test_run_app_goes_to_system_handler() {
    let system = SystemScenario::new().run_app(handler(|ctx| {
        let schema = ctx.req.current_state().map(|s| s.schema.clone()).unwrap_or_default();
        ctx.res.append_bubble(format!("Welcome back ({schema})"))?;
        Ok(())
    }));
    let dispatcher = Dispatcher::builder(registry(), tree()).system(system).build();

    let pending = dispatcher
        .handle_turn(TurnInput::text("book").with_inference(one(book_table(), 0.9)), &Session::new())
        .await
        .unwrap()
        .session;
    assert!(pending.slot_filling);

    let input = TurnInput::default().with_server_action(ServerAction::new("run_app"));
    let outcome = dispatcher.handle_turn(input, &pending).await.unwrap();

    assert_eq!(outcome.reply.bubbles(), vec!["Welcome back (run_app)"]);
    assert!(!outcome.session.slot_filling);
    assert!(outcome.session.path.is_empty());
    assert!(outcome.session.history.is_empty());
}

#[tokio::test]
async fn test_close_app_without_run_app_handler() {
    let system = SystemScenario::new().close_app(handler(|ctx| {
        ctx.res.append_bubble("Bye")?;
        Ok(())
    }));
    let dispatcher = Dispatcher::builder(registry(), tree()).system(system).build();
    let session = Session {
        path: vec!["greet".into()],
        ..Session::default()
    };

    let close = TurnInput::default().with_server_action(ServerAction::new("close_app"));
    let outcome = dispatcher.handle_turn(close, &session).await.unwrap();
    assert_eq!(outcome.reply.bubbles(), vec!["Bye"]);
    assert!(outcome.session.path.is_empty());

    // No system handler for run_app, so the tree answers it
    let run = TurnInput::default().with_server_action(ServerAction::new("run_app"));
    let outcome = dispatcher.handle_turn(run, &Session::new()).await.unwrap();
    assert_eq!(outcome.reply.bubbles(), vec!["Sorry?"]);
}

#[tokio::test]
async fn test_system_default_replaces_no_match_text() {
    let tree = ScenarioTree::new(vec![ScenarioNode::intent("greet").handler(handler(|ctx| {
        ctx.res.append_bubble("Hello!")?;
        Ok(())
    }))])
    .unwrap();
    let system = SystemScenario::new().default_handler(handler(|ctx| {
        let schema = ctx.req.current_state().map(|s| s.schema.clone()).unwrap_or_default();
        ctx.res.append_bubble(format!("{schema}: try saying hello"))?;
        Ok(())
    }));
    let dispatcher = Dispatcher::builder(registry(), tree).system(system).build();
    let session = Session {
        path: vec!["greet".into()],
        ..Session::default()
    };

    let outcome = dispatcher
        .handle_turn(TurnInput::text("rain?").with_inference(one(weather(), 0.9)), &session)
        .await
        .unwrap();

    assert_eq!(outcome.reply.bubbles(), vec!["default: try saying hello"]);
    assert_eq!(outcome.session.path, session.path);
    assert!(outcome.resolution.is_none());
}

#[tokio::test]
async fn test_state_reads_see_same_turn_writes() {
    let tree = ScenarioTree::new(vec![ScenarioNode::intent("greet").handler(handler(|ctx| {
        assert!(ctx.state("visits").is_none());
        ctx.set_state("visits", 1);
        let seen = ctx.state("visits").cloned().unwrap_or_default();
        ctx.res.append_bubble(format!("visits={seen}"))?;
        Ok(())
    }))])
    .unwrap();
    let dispatcher = Dispatcher::builder(registry(), tree).build();

    let outcome = dispatcher
        .handle_turn(TurnInput::text("hi").with_inference(one(greet(), 0.9)), &Session::new())
        .await
        .unwrap();

    assert_eq!(outcome.reply.bubbles(), vec!["visits=1"]);
    assert_eq!(outcome.session.state["visits"], json!(1));
}

struct KnownPartySize;

#[async_trait]
impl Middleware for KnownPartySize {
    fn name(&self) -> &str {
        "known_party_size"
    }

    async fn handle(&self, turn: &mut Turn<'_>, next: Next<'_>) -> Result<(), KernelError> {
        turn.req.set_variable("partySize", "6");
        next.run(turn).await
    }
}

#[tokio::test]
async fn test_middleware_variables_satisfy_slots() {
    let dispatcher = Dispatcher::builder(registry(), tree()).middleware(Arc::new(KnownPartySize)).build();

    let outcome = dispatcher
        .handle_turn(TurnInput::text("book").with_inference(one(book_table(), 0.9)), &Session::new())
        .await
        .unwrap();

    assert_eq!(outcome.reply.bubbles(), vec!["What time?"]);
    assert_eq!(outcome.session.variables["partySize"], json!("6"));
}
