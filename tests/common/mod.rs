#![allow(dead_code)]

use scenario_kernel::intent::{Inference, Intent, IntentRegistry, IntentSlot, Variant};
use scenario_kernel::kernel::handler::handler;
use scenario_kernel::kernel::scenario::{ScenarioNode, ScenarioTree};
use scenario_kernel::Dispatcher;

pub fn greet() -> Intent {
    Intent::new(1, "greet")
}

pub fn book_table() -> Intent {
    Intent::new(2, "book_table")
        .with_slot(IntentSlot::new("partySize", "number").required().with_prompt("For how many people?"))
        .with_slot(
            IntentSlot::new("time", "time")
                .required()
                .with_prompt("What time?")
                .with_prompt("When should we expect you?"),
        )
}

pub fn weather() -> Intent {
    Intent::new(3, "weather")
}

pub fn registry() -> IntentRegistry {
    IntentRegistry::new(vec![greet(), book_table(), weather()]).unwrap()
}

/// greet, book_table, weather and an always-true fallback at the root.
pub fn tree() -> ScenarioTree {
    ScenarioTree::new(vec![
        ScenarioNode::intent("greet").handler(handler(|ctx| {
            ctx.res.append_bubble("Hello!")?;
            Ok(())
        })),
        ScenarioNode::intent("book_table").handler(handler(|ctx| {
            let party = ctx.req.variable("partySize").cloned().unwrap_or_default();
            let time = ctx.req.variable("time").cloned().unwrap_or_default();
            ctx.res.append_bubble(format!("Table for {} at {}", party.as_str().unwrap_or("?"), time.as_str().unwrap_or("?")))?;
            Ok(())
        })),
        ScenarioNode::intent("weather").handler(handler(|ctx| {
            ctx.res.append_bubble("Sunny")?;
            Ok(())
        })),
        ScenarioNode::fallback("fallback").handler(handler(|ctx| {
            ctx.res.append_bubble("Sorry?")?;
            Ok(())
        })),
    ])
    .unwrap()
}

pub fn dispatcher() -> Dispatcher {
    Dispatcher::builder(registry(), tree()).build()
}

pub fn one(intent: Intent, confidence: f32) -> Inference {
    Inference::new(vec![Variant::new(intent, confidence)])
}
