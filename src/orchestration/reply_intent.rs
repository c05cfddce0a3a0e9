//! Reply intent classification
//!
//! Inbound SMS replies usually arrive with an intent already attached by the
//! upstream classifier. When they don't, the processor falls back to an
//! injected [`ReplyIntentClassifier`]; the keyword classifier here recognises
//! carrier opt-out keywords and common "not interested" phrasings, and treats
//! everything else as a reply a human should read.

use crate::constants::OPT_OUT_KEYWORDS;
use crate::messaging::ReplyIntent;

const NOT_INTERESTED_PHRASES: &[&str] = &[
    "not interested",
    "no thanks",
    "no thank you",
    "remove me",
    "take me off",
    "don't contact",
    "dont contact",
    "do not contact",
    "leave me alone",
    "wrong number",
];

pub trait ReplyIntentClassifier: Send + Sync {
    fn classify(&self, body: &str) -> ReplyIntent;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordIntentClassifier;

impl KeywordIntentClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl ReplyIntentClassifier for KeywordIntentClassifier {
    fn classify(&self, body: &str) -> ReplyIntent {
        let normalized = body
            .trim()
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .to_lowercase();

        // Carriers treat the keyword as the whole message, or its first word
        let first_word = normalized.split_whitespace().next().unwrap_or_default();
        if OPT_OUT_KEYWORDS.contains(&normalized.as_str()) || first_word == "stop" {
            return ReplyIntent::Stop;
        }

        if NOT_INTERESTED_PHRASES
            .iter()
            .any(|phrase| normalized.contains(phrase))
        {
            return ReplyIntent::NotInterested;
        }

        if body.contains('?') {
            ReplyIntent::Question
        } else {
            ReplyIntent::Other
        }
    }
}
