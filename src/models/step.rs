use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::channel::Channel;

/// One position of a sequence revision. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: Uuid,
    pub sequence_id: Uuid,
    pub order_index: i32,
    pub channel: Channel,
    pub content: StepContent,
    #[serde(default)]
    pub flags: StepFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFlags {
    /// Queue priority for voice jobs; lower runs sooner
    #[serde(default)]
    pub urgency_priority: Option<i32>,
    #[serde(default)]
    pub ai_personalization: bool,
}

/// Channel-shaped content payload of a step.
///
/// Stored as JSON by the sequence editor; the shape is recognised from its
/// keys. Anything unrecognised is kept verbatim as [`StepContent::Unstructured`]
/// so that it can still be rendered (as a JSON dump) rather than dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum StepContent {
    Sms {
        body: String,
    },
    Email {
        subject: Option<String>,
        body_html: Option<String>,
        body_text: Option<String>,
    },
    Voice {
        first_message: String,
        system_prompt: Option<String>,
    },
    Unstructured(Value),
}

impl StepContent {
    pub fn sms(body: impl Into<String>) -> Self {
        Self::Sms { body: body.into() }
    }

    pub fn voice(first_message: impl Into<String>) -> Self {
        Self::Voice {
            first_message: first_message.into(),
            system_prompt: None,
        }
    }

    /// Channel this content was authored for, if recognisable
    pub fn native_channel(&self) -> Option<Channel> {
        match self {
            Self::Sms { .. } => Some(Channel::Sms),
            Self::Email { .. } => Some(Channel::Email),
            Self::Voice { .. } => Some(Channel::Voice),
            Self::Unstructured(_) => None,
        }
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

impl From<Value> for StepContent {
    fn from(value: Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::Unstructured(value);
        };

        if let Some(first_message) = string_field(map, "first_message") {
            return Self::Voice {
                first_message,
                system_prompt: string_field(map, "system_prompt"),
            };
        }

        let body_text = string_field(map, "body_text");
        let body_html = string_field(map, "body_html");
        if body_text.is_some() || body_html.is_some() {
            return Self::Email {
                subject: string_field(map, "subject"),
                body_html,
                body_text,
            };
        }

        if let Some(body) = string_field(map, "body") {
            return Self::Sms { body };
        }

        Self::Unstructured(value)
    }
}

impl From<StepContent> for Value {
    fn from(content: StepContent) -> Self {
        match content {
            StepContent::Sms { body } => json!({ "body": body }),
            StepContent::Email {
                subject,
                body_html,
                body_text,
            } => {
                let mut map = Map::new();
                if let Some(subject) = subject {
                    map.insert("subject".to_string(), Value::String(subject));
                }
                if let Some(html) = body_html {
                    map.insert("body_html".to_string(), Value::String(html));
                }
                if let Some(text) = body_text {
                    map.insert("body_text".to_string(), Value::String(text));
                }
                Value::Object(map)
            }
            StepContent::Voice {
                first_message,
                system_prompt,
            } => {
                let mut map = Map::new();
                map.insert("first_message".to_string(), Value::String(first_message));
                if let Some(prompt) = system_prompt {
                    map.insert("system_prompt".to_string(), Value::String(prompt));
                }
                Value::Object(map)
            }
            StepContent::Unstructured(value) => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_shapes_are_recognised() {
        let sms: StepContent = serde_json::from_value(json!({"body": "hi"})).unwrap();
        assert_eq!(sms, StepContent::sms("hi"));

        let email: StepContent =
            serde_json::from_value(json!({"subject": "S", "body_html": "<p>x</p>"})).unwrap();
        assert_eq!(email.native_channel(), Some(Channel::Email));

        let voice: StepContent =
            serde_json::from_value(json!({"first_message": "Hello", "system_prompt": "Be brief"}))
                .unwrap();
        assert_eq!(voice.native_channel(), Some(Channel::Voice));

        let other: StepContent = serde_json::from_value(json!({"template_id": 7})).unwrap();
        assert_eq!(other, StepContent::Unstructured(json!({"template_id": 7})));
    }
}
