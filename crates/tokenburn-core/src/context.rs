use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TokenBurnError;

/// Group of large-context prompt sizes, sized for a class of VRAM budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextCategory {
    Small,
    Medium,
    Large,
    Extreme,
}

impl ContextCategory {
    pub fn all() -> &'static [ContextCategory] {
        &[
            ContextCategory::Small,
            ContextCategory::Medium,
            ContextCategory::Large,
            ContextCategory::Extreme,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            ContextCategory::Small => "small",
            ContextCategory::Medium => "medium",
            ContextCategory::Large => "large",
            ContextCategory::Extreme => "extreme",
        }
    }

    /// `(target_tokens, label)` pairs generated for this category.
    pub fn sizes(&self) -> &'static [(u64, &'static str)] {
        match self {
            ContextCategory::Small => &[(1024, "1k"), (2048, "2k"), (4096, "4k"), (8192, "8k")],
            ContextCategory::Medium => &[(16384, "16k"), (32768, "32k"), (49152, "48k"), (65536, "64k")],
            ContextCategory::Large => &[(98304, "96k"), (131072, "128k"), (196608, "192k"), (262144, "256k")],
            ContextCategory::Extreme => &[(393216, "384k"), (524288, "512k"), (786432, "768k"), (1048576, "1M")],
        }
    }

    /// Categories worth testing for a GPU with the given total memory.
    pub fn for_total_memory_mb(total_mb: Option<u64>) -> Vec<ContextCategory> {
        let Some(total_mb) = total_mb else {
            return vec![ContextCategory::Small, ContextCategory::Medium];
        };
        let total_gb = total_mb as f64 / 1024.0;
        let count = if total_gb >= 70.0 {
            4
        } else if total_gb >= 40.0 {
            3
        } else if total_gb >= 20.0 {
            2
        } else {
            1
        };
        Self::all()[..count].to_vec()
    }
}

impl fmt::Display for ContextCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ContextCategory {
    type Err = TokenBurnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|c| c.label() == s.to_ascii_lowercase())
            .ok_or_else(|| TokenBurnError::Config(format!("unknown context category: {}", s)))
    }
}
