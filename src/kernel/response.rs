use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::KernelError;

/// Assistant character emotion shown alongside the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Igrivost,
    Udovolstvie,
    Podavleniye,
    Smushchennaya,
    Ulybka,
    Zainteresovannost,
    Neznayu,
    Oups,
    Vinovatiy,
    Zhdu,
    Nedoumenie,
    #[serde(rename = "ok_prinyato")]
    Ok,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionTag {
    #[serde(rename = "emotionId")]
    pub emotion_id: Emotion,
}

/// Structured command for the client UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaluteCommand {
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl SaluteCommand {
    pub fn new(command_type: impl Into<String>) -> Self {
        Self {
            command_type: command_type.into(),
            payload: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartAppError {
    pub code: i32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bubble {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub title: String,
    pub action: ButtonAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestions {
    pub buttons: Vec<Button>,
}

/// Content in rendering order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseItem {
    Bubble(Bubble),
    Command(SaluteCommand),
    Suggestions(Suggestions),
}

/// Final, immutable reply for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub items: Vec<ResponseItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pronounce_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<EmotionTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SmartAppError>,
}

impl Reply {
    pub fn bubbles(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter_map(|item| match item {
                ResponseItem::Bubble(b) => Some(b.text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn commands(&self) -> Vec<&SaluteCommand> {
        self.items
            .iter()
            .filter_map(|item| match item {
                ResponseItem::Command(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Error-only reply for turns that failed before commit.
    pub fn failure(code: i32, description: impl Into<String>) -> Self {
        Self {
            error: Some(SmartAppError {
                code,
                description: description.into(),
            }),
            ..Self::default()
        }
    }
}

/// Append-only accumulator for one turn.
#[derive(Debug, Default)]
pub struct ResponseBuilder {
    items: Vec<ResponseItem>,
    error: Option<SmartAppError>,
    intent: Option<String>,
    pronounce_text: Option<String>,
    emotion: Option<Emotion>,
    finalized: bool,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> Result<(), KernelError> {
        if self.finalized {
            return Err(KernelError::ResponseFinalized);
        }
        Ok(())
    }

    pub fn append_bubble(&mut self, text: impl Into<String>) -> Result<(), KernelError> {
        self.guard()?;
        self.items.push(ResponseItem::Bubble(Bubble { text: text.into() }));
        Ok(())
    }

    pub fn append_command(&mut self, command: SaluteCommand) -> Result<(), KernelError> {
        self.guard()?;
        self.items.push(ResponseItem::Command(command));
        Ok(())
    }

    pub fn append_suggestions<I, S>(&mut self, suggestions: I) -> Result<(), KernelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.guard()?;
        let buttons = suggestions
            .into_iter()
            .map(|s| {
                let text = s.into();
                Button {
                    title: text.clone(),
                    action: ButtonAction {
                        action_type: "text".to_string(),
                        text,
                    },
                }
            })
            .collect();
        self.items.push(ResponseItem::Suggestions(Suggestions { buttons }));
        Ok(())
    }

    /// Terminal error. Content appended afterwards is still kept.
    pub fn append_error(&mut self, code: i32, description: impl Into<String>) -> Result<(), KernelError> {
        self.guard()?;
        self.error = Some(SmartAppError {
            code,
            description: description.into(),
        });
        Ok(())
    }

    pub fn set_intent(&mut self, intent: impl Into<String>) -> Result<(), KernelError> {
        self.guard()?;
        self.intent = Some(intent.into());
        Ok(())
    }

    pub fn set_pronounce_text(&mut self, text: impl Into<String>) -> Result<(), KernelError> {
        self.guard()?;
        self.pronounce_text = Some(text.into());
        Ok(())
    }

    pub fn set_emotion(&mut self, emotion: Emotion) -> Result<(), KernelError> {
        self.guard()?;
        self.emotion = Some(emotion);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.error.is_none()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn items(&self) -> &[ResponseItem] {
        &self.items
    }

    pub fn finalize(&mut self) -> Result<Reply, KernelError> {
        self.guard()?;
        self.finalized = true;
        Ok(Reply {
            items: self.items.clone(),
            pronounce_text: self.pronounce_text.clone(),
            emotion: self.emotion.map(|emotion_id| EmotionTag { emotion_id }),
            intent: self.intent.clone(),
            error: self.error.clone(),
        })
    }
}
