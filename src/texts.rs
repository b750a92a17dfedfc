//! User-facing text: step prompts, option labels, button captions, notices.
//!
//! Loaded from a JSON file shaped like
//! `{"texts": {"step_1": "...", "back": "..."}, "labels": {"red": "Red frame"}}`.
//! Keys missing from the file fall back to the built-in English defaults,
//! and unknown keys render as the key itself.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::wizard::assets::AssetOption;

/// Well-known text keys.
pub mod keys {
    pub const GREETING: &str = "greeting";
    pub const BACK: &str = "back";
    pub const CONTINUE: &str = "continue";
    pub const ERROR_GENERIC: &str = "error_generic";
    pub const INVALID_SELECTION: &str = "invalid_selection";
    pub const FINAL_RESULT: &str = "final_result";
    pub const SHARE_PROMPT: &str = "share_prompt";
    pub const SHARE_BUTTON: &str = "share_button";
    pub const SHARE_QUERY: &str = "share_query";
}

const DEFAULT_TEXTS: &[(&str, &str)] = &[
    (keys::GREETING, "Hi! Let's put together a postcard, one layer at a time."),
    (keys::BACK, "⬅️ Back"),
    (keys::CONTINUE, "Continue"),
    (
        keys::ERROR_GENERIC,
        "Something went wrong on our side. Please try again or send /start.",
    ),
    (keys::INVALID_SELECTION, "That option is not available, please pick again."),
    (keys::FINAL_RESULT, "Your postcard is ready!"),
    (keys::SHARE_PROMPT, "Send it to your friends:"),
    (keys::SHARE_BUTTON, "Share"),
    (keys::SHARE_QUERY, "Look at my postcard!"),
    ("step_1", "Pick a background."),
    ("step_2", "Pick a shape."),
    ("step_3", "Nice! A few more touches left."),
    ("step_4", "Pick a pattern."),
    ("step_5", "Pick a greeting."),
    ("step_6", "Pick a sticker."),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextTable {
    /// Prompts, notices, and button captions by key.
    #[serde(default)]
    pub texts: HashMap<String, String>,
    /// Option labels by asset file stem.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl TextTable {
    /// Built-in defaults only.
    pub fn builtin() -> Self {
        Self {
            texts: DEFAULT_TEXTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            labels: HashMap::new(),
        }
    }

    /// Load overrides from `path` on top of the built-in defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let overrides: Self = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
        Ok(Self::builtin().merged(overrides))
    }

    fn merged(mut self, overrides: Self) -> Self {
        self.texts.extend(overrides.texts);
        self.labels.extend(overrides.labels);
        self
    }

    /// Text for `key`, or the key itself when nothing is configured.
    pub fn text<'a>(&'a self, key: &'a str) -> &'a str {
        self.texts.get(key).map(String::as_str).unwrap_or(key)
    }

    /// Button label for an option, defaulting to its file stem.
    pub fn label<'a>(&'a self, option: &'a AssetOption) -> &'a str {
        self.labels
            .get(&option.id)
            .map(String::as_str)
            .unwrap_or(&option.id)
    }
}
