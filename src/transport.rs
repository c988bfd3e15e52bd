//! JSON boundary between a transport and the dispatcher.

use serde_json::Value;
use tracing::warn;

use crate::kernel::dispatcher::Dispatcher;
use crate::kernel::error::KernelError;
use crate::kernel::request::TurnInput;
use crate::kernel::response::Reply;
use crate::kernel::session::Session;

/// Parses one turn payload, keeping the untouched JSON as `raw`.
pub fn parse_payload(payload: &str) -> Result<TurnInput, KernelError> {
    let raw: Value = serde_json::from_str(payload)?;
    let mut input: TurnInput = serde_json::from_value(raw.clone())?;
    input.raw = raw;
    Ok(input)
}

/// Numeric error code surfaced in the reply's error field.
pub fn error_status(e: &KernelError) -> i32 {
    match e {
        KernelError::DispatchLoopDetected { .. } => 508,
        KernelError::Recognizer(_) => 502,
        KernelError::Cancelled => 499,
        KernelError::Session(_) => 400,
        _ => 500,
    }
}

/// (payload, session) -> (reply, session), all serialized.
///
/// An empty session string starts a fresh conversation. Malformed input is
/// an error; a failed turn is not: it yields an error reply and hands back
/// the caller's session exactly as it came in.
pub async fn handle_payload(
    dispatcher: &Dispatcher,
    payload: &str,
    session_json: &str,
) -> Result<(String, String), KernelError> {
    let input = parse_payload(payload)?;
    let session = Session::from_json(session_json)?;

    match dispatcher.handle_turn(input, &session).await {
        Ok(outcome) => Ok((serde_json::to_string(&outcome.reply)?, outcome.session.to_json()?)),
        Err(e) => {
            warn!(code = e.code(), error = %e, "Turn aborted, session left as is");
            let reply = Reply::failure(error_status(&e), format!("{}: {}", e.code(), e));
            Ok((serde_json::to_string(&reply)?, session_json.to_string()))
        }
    }
}
