use anyhow::{Context, Result};
use scenario_kernel::intent::{IntentDeclaration, IntentRegistry, IntentsDict};
use scenario_kernel::kernel::config::DispatcherConfig;
use scenario_kernel::kernel::handler::{handler, SystemScenario};
use scenario_kernel::kernel::middleware::TurnLogger;
use scenario_kernel::kernel::response::{Emotion, SaluteCommand};
use scenario_kernel::kernel::scenario::{Matcher, ScenarioNode, ScenarioTree};
use scenario_kernel::kernel::session::Session;
use scenario_kernel::kernel::store::{InMemorySessionStore, SessionStore};
use scenario_kernel::services::recognizer::MatcherRecognizer;
use scenario_kernel::{transport, Dispatcher};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn demo_intents() -> IntentsDict {
    IntentsDict {
        intents: vec![
            IntentDeclaration::action("start", "run_app"),
            IntentDeclaration::text("greet", &["hello", "hi", "good morning"]),
            IntentDeclaration::text("book_table", &["book a table", "reserve a table"])
                .with_variable("partySize", true, &["For how many people?", "How many guests?"])
                .with_variable("time", true, &["What time?", "When should we expect you?"]),
        ],
    }
}

fn demo_tree() -> Result<ScenarioTree> {
    let tree = ScenarioTree::new(vec![
        ScenarioNode::new("start", Matcher::action("run_app")).handler(handler(|ctx| {
            ctx.res.append_bubble("Welcome! Say hello or book a table.")?;
            ctx.res.append_suggestions(["hello", "book a table"])?;
            Ok(())
        })),
        ScenarioNode::intent("greet").handler(handler(|ctx| {
            ctx.res.append_bubble("Hello there!")?;
            ctx.res.set_emotion(Emotion::Ulybka)?;
            Ok(())
        })),
        ScenarioNode::intent("book_table").handler(handler(|ctx| {
            let party = ctx.req.variable("partySize").cloned().unwrap_or(Value::Null);
            let time = ctx.req.variable("time").cloned().unwrap_or(Value::Null);
            ctx.res.append_bubble(format!("Booked a table for {party} at {time}."))?;
            ctx.res.append_command(
                SaluteCommand::new("booking")
                    .with("partySize", party)
                    .with("time", time),
            )?;
            let bookings = ctx.state("bookings").and_then(Value::as_u64).unwrap_or(0);
            ctx.set_state("bookings", bookings + 1);
            Ok(())
        })),
        ScenarioNode::fallback("fallback").handler(handler(|ctx| {
            ctx.res.append_bubble("I can greet you or book a table.")?;
            ctx.res.set_emotion(Emotion::Neznayu)?;
            Ok(())
        })),
    ])?;
    Ok(tree)
}

fn demo_system() -> SystemScenario {
    SystemScenario::new().close_app(handler(|ctx| {
        ctx.res.append_bubble("Goodbye!")?;
        Ok(())
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("Scenario kernel booting...");

    let config = match std::env::var("SCENARIO_CONFIG") {
        Ok(path) => DispatcherConfig::from_file(&path)?,
        Err(_) => DispatcherConfig::default(),
    };

    let registry = IntentRegistry::from_dict(demo_intents()).context("registering intents")?;
    let recognizer = Arc::new(MatcherRecognizer::new(&registry));
    let dispatcher = Dispatcher::builder(registry, demo_tree().context("building scenario tree")?)
        .middleware(Arc::new(TurnLogger))
        .recognizer(recognizer)
        .system(demo_system())
        .config(config)
        .build();

    let store = InMemorySessionStore::new();
    let default_session = Uuid::new_v4().to_string();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    tracing::info!("Reading one JSON turn per line from stdin");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let session_id = serde_json::from_str::<Value>(&line)
            .ok()
            .and_then(|v| v.get("sessionId").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| default_session.clone());

        let session_json = match store.load(&session_id).await? {
            Some(session) => session.to_json()?,
            None => String::new(),
        };

        match transport::handle_payload(&dispatcher, &line, &session_json).await {
            Ok((reply, next_session)) => {
                store.save(&session_id, &Session::from_json(&next_session)?).await?;
                stdout.write_all(reply.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            Err(e) => tracing::error!(%session_id, error = %e, "Rejected malformed turn"),
        }
    }

    tracing::info!(sessions = store.len().await, "Input closed, shutting down");
    Ok(())
}
