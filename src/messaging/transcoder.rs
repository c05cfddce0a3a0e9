//! Channel content transcoding
//!
//! Renders a step's channel-shaped content for whichever channel it is
//! actually sent on. Native content passes through; content crossing channels
//! is reduced to plain text first:
//!
//! | source  | plain text                                  |
//! |---------|---------------------------------------------|
//! | SMS     | `body`                                      |
//! | email   | `body_text`, else `body_html` without tags  |
//! | voice   | `first_message`                             |
//! | unknown | JSON dump of the payload                    |
//!
//! SMS output is capped at 1600 characters; email output from foreign content
//! is a single escaped paragraph.

use regex::Regex;
use std::sync::LazyLock;

use crate::constants::{
    SMS_MAX_CHARS, TRANSCODED_EMAIL_SUBJECT, TRANSCODED_VOICE_SYSTEM_PROMPT,
};
use crate::models::{Channel, Contact, StepContent};

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>")
        .expect("regex for script and style blocks")
});
static BREAK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</p\s*>|</div\s*>|</li\s*>").expect("regex for line breaks")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("regex for html tags"));
static SPACES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\r\f]+").expect("regex for horizontal whitespace"));
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("regex for blank lines"));
static FIRST_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*first_name\s*\}\}").expect("regex for first_name placeholder")
});

/// Content ready to be put into a send job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedContent {
    Sms {
        body: String,
    },
    Email {
        subject: String,
        body_html: String,
        body_text: String,
    },
    Voice {
        first_message: String,
        system_prompt: String,
    },
}

pub trait Transcoder: Send + Sync {
    /// Plain-text view of any step content
    fn extract_text(&self, content: &StepContent) -> String;

    fn render(&self, content: &StepContent, target: Channel) -> RenderedContent;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContentTranscoder;

impl ContentTranscoder {
    pub fn new() -> Self {
        Self
    }

    fn render_sms(&self, content: &StepContent) -> String {
        let text = match content {
            StepContent::Sms { body } => body.clone(),
            other => self.extract_text(other),
        };
        truncate_chars(&text, SMS_MAX_CHARS)
    }

    fn render_email(&self, content: &StepContent) -> RenderedContent {
        if let StepContent::Email {
            subject,
            body_html,
            body_text,
        } = content
        {
            let text = self.extract_text(content);
            let html = body_html
                .clone()
                .filter(|html| !html.trim().is_empty())
                .unwrap_or_else(|| paragraph(&text));
            return RenderedContent::Email {
                subject: subject
                    .clone()
                    .unwrap_or_else(|| TRANSCODED_EMAIL_SUBJECT.to_string()),
                body_html: html,
                body_text: body_text.clone().unwrap_or(text),
            };
        }

        let text = self.extract_text(content);
        RenderedContent::Email {
            subject: TRANSCODED_EMAIL_SUBJECT.to_string(),
            body_html: paragraph(&text),
            body_text: text,
        }
    }

    fn render_voice(&self, content: &StepContent) -> RenderedContent {
        match content {
            StepContent::Voice {
                first_message,
                system_prompt,
            } => RenderedContent::Voice {
                first_message: first_message.clone(),
                system_prompt: system_prompt
                    .clone()
                    .unwrap_or_else(|| TRANSCODED_VOICE_SYSTEM_PROMPT.to_string()),
            },
            other => RenderedContent::Voice {
                first_message: self.extract_text(other),
                system_prompt: TRANSCODED_VOICE_SYSTEM_PROMPT.to_string(),
            },
        }
    }
}

impl Transcoder for ContentTranscoder {
    fn extract_text(&self, content: &StepContent) -> String {
        match content {
            StepContent::Sms { body } => body.clone(),
            StepContent::Email {
                body_text: Some(text),
                ..
            } if !text.trim().is_empty() => text.clone(),
            StepContent::Email { body_html, .. } => {
                body_html.as_deref().map(strip_html).unwrap_or_default()
            }
            StepContent::Voice { first_message, .. } => first_message.clone(),
            // Visible rather than silently dropped
            StepContent::Unstructured(value) => value.to_string(),
        }
    }

    fn render(&self, content: &StepContent, target: Channel) -> RenderedContent {
        match target {
            Channel::Sms => RenderedContent::Sms {
                body: self.render_sms(content),
            },
            Channel::Email => self.render_email(content),
            Channel::Voice => self.render_voice(content),
        }
    }
}

/// Replace `{{first_name}}` with the contact's greeting name
pub fn personalize(template: &str, contact: &Contact) -> String {
    let name = contact.greeting_name();
    FIRST_NAME_RE
        .replace_all(template, regex::NoExpand(&name))
        .into_owned()
}

/// Strip markup and decode the common entities
pub fn strip_html(html: &str) -> String {
    let without_blocks = BLOCK_RE.replace_all(html, "");
    let with_breaks = BREAK_RE.replace_all(&without_blocks, "\n");
    let without_tags = TAG_RE.replace_all(&with_breaks, "");
    let decoded = decode_entities(&without_tags);
    let collapsed = SPACES_RE.replace_all(&decoded, " ");
    let lines: Vec<&str> = collapsed.lines().map(str::trim).collect();
    BLANK_LINES_RE
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn paragraph(text: &str) -> String {
    format!("<p>{}</p>", escape_html(text).replace('\n', "<br>"))
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_extract_text_per_shape() {
        let t = ContentTranscoder::new();
        assert_eq!(t.extract_text(&StepContent::sms("Hi there")), "Hi there");
        assert_eq!(t.extract_text(&StepContent::voice("Hello, it's Ana")), "Hello, it's Ana");

        let email = StepContent::Email {
            subject: Some("Quick question".to_string()),
            body_html: Some("<p>Hi <b>Sam</b>,</p><p>Got 5&nbsp;min?</p>".to_string()),
            body_text: None,
        };
        assert_eq!(t.extract_text(&email), "Hi Sam,\nGot 5 min?");

        let with_text = StepContent::Email {
            subject: None,
            body_html: Some("<p>ignored</p>".to_string()),
            body_text: Some("Plain version".to_string()),
        };
        assert_eq!(t.extract_text(&with_text), "Plain version");
    }

    #[test]
    fn test_unknown_shape_falls_back_to_json_dump() {
        let t = ContentTranscoder::new();
        let content = StepContent::from(json!({ "script": "call them" }));
        let text = t.extract_text(&content);
        assert!(text.contains("script"));
        assert!(text.contains("call them"));
    }

    #[test]
    fn test_sms_output_is_truncated() {
        let t = ContentTranscoder::new();
        let long = "é".repeat(SMS_MAX_CHARS + 50);
        let RenderedContent::Sms { body } = t.render(&StepContent::voice(long), Channel::Sms) else {
            panic!("expected sms rendering");
        };
        assert_eq!(body.chars().count(), SMS_MAX_CHARS);
    }

    #[test]
    fn test_foreign_content_to_email_is_escaped_paragraph() {
        let t = ContentTranscoder::new();
        let rendered = t.render(&StepContent::sms("Deals <today> & more"), Channel::Email);
        assert_eq!(
            rendered,
            RenderedContent::Email {
                subject: TRANSCODED_EMAIL_SUBJECT.to_string(),
                body_html: "<p>Deals &lt;today&gt; &amp; more</p>".to_string(),
                body_text: "Deals <today> & more".to_string(),
            }
        );
    }

    #[test]
    fn test_native_voice_content_passes_through() {
        let t = ContentTranscoder::new();
        let content = StepContent::Voice {
            first_message: "Hi!".to_string(),
            system_prompt: Some("Custom prompt".to_string()),
        };
        assert_eq!(
            t.render(&content, Channel::Voice),
            RenderedContent::Voice {
                first_message: "Hi!".to_string(),
                system_prompt: "Custom prompt".to_string(),
            }
        );
    }

    #[test]
    fn test_personalize_uses_first_token_of_full_name() {
        let mut contact = Contact::new(Uuid::new_v4()).with_full_name("Jordan Lee");
        assert_eq!(
            personalize("Hi {{first_name}}, sorry we missed you", &contact),
            "Hi Jordan, sorry we missed you"
        );

        contact.first_name = Some("Jo".to_string());
        assert_eq!(personalize("Hi {{ first_name }}", &contact), "Hi Jo");
    }
}
