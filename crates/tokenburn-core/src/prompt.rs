use serde::{Deserialize, Serialize};

use crate::metrics::estimate_tokens;

/// One prompt of a run: its label in reports and the user-turn text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptCase {
    pub label: String,
    pub text: String,
}

impl PromptCase {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }

    /// Cases labelled by their 1-based position.
    pub fn numbered(texts: Vec<String>) -> Vec<Self> {
        texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Self::new((i + 1).to_string(), text))
            .collect()
    }

    pub fn word_count(&self) -> u32 {
        estimate_tokens(&self.text)
    }
}
