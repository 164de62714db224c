//! Language model catalogue.
//!
//! Maps the user-selectable models onto provider model names and the default
//! sampling parameters each family accepts.

use serde::{Deserialize, Serialize};

/// Models a conversation can be pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum LanguageModel {
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[serde(rename = "gpt-4.1")]
    Gpt41,
    #[serde(rename = "gpt-4.1-mini")]
    Gpt41Mini,
    #[default]
    #[serde(rename = "gpt-5")]
    Gpt5,
    #[serde(rename = "gpt-5-mini")]
    Gpt5Mini,
    #[serde(rename = "gpt-5-nano")]
    Gpt5Nano,
}

/// Temperature for non-reasoning models.
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Output cap for non-reasoning models.
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4000;

impl LanguageModel {
    /// Provider model name.
    pub fn name(self) -> &'static str {
        match self {
            LanguageModel::Gpt4o => "gpt-4o",
            LanguageModel::Gpt41 => "gpt-4.1",
            LanguageModel::Gpt41Mini => "gpt-4.1-mini",
            LanguageModel::Gpt5 => "gpt-5",
            LanguageModel::Gpt5Mini => "gpt-5-mini",
            LanguageModel::Gpt5Nano => "gpt-5-nano",
        }
    }

    /// Parse a provider model name; unknown names resolve to [`LanguageModel::Gpt5`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "gpt-4o" => LanguageModel::Gpt4o,
            "gpt-4.1" => LanguageModel::Gpt41,
            "gpt-4.1-mini" => LanguageModel::Gpt41Mini,
            "gpt-5-mini" => LanguageModel::Gpt5Mini,
            "gpt-5-nano" => LanguageModel::Gpt5Nano,
            _ => LanguageModel::Gpt5,
        }
    }

    /// Reasoning models reject `temperature` and budget their own output.
    pub fn is_reasoning(self) -> bool {
        matches!(
            self,
            LanguageModel::Gpt5 | LanguageModel::Gpt5Mini | LanguageModel::Gpt5Nano
        )
    }

    /// `(temperature, max_output_tokens)` to send for this model.
    pub fn default_sampling(self) -> (Option<f32>, Option<u32>) {
        if self.is_reasoning() {
            (None, None)
        } else {
            (Some(DEFAULT_TEMPERATURE), Some(DEFAULT_MAX_OUTPUT_TOKENS))
        }
    }
}

impl From<String> for LanguageModel {
    fn from(name: String) -> Self {
        LanguageModel::from_name(&name)
    }
}

impl std::fmt::Display for LanguageModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
