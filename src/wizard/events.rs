//! Normalized wizard input and the button payload codec shared by adapters.

use serde::{Deserialize, Serialize};

/// What the user pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "index", rename_all = "snake_case")]
pub enum Selection {
    /// Pick option `index` of the rendered listing.
    Pick(usize),
    /// Undo the most recent asset selection.
    Back,
    /// Advance past a pass-through step.
    Continue,
}

/// A selection addressed to one user's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionEvent {
    pub user_id: String,
    pub chat_id: String,
    /// Step the user was looking at when pressing the button.
    pub step: u32,
    /// Render number carried by the button, when the adapter has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render: Option<u64>,
    pub selection: Selection,
}

/// Everything a channel can deliver to the wizard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardInput {
    /// `/start`: create or reset the session.
    Start { user_id: String, chat_id: String },
    Selection(SelectionEvent),
}

impl WizardInput {
    pub fn user_id(&self) -> &str {
        match self {
            Self::Start { user_id, .. } => user_id,
            Self::Selection(event) => &event.user_id,
        }
    }
}

/// Button payload: `w:<render>:<step>:<action>`, action is an index, `b` or `c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackData {
    pub render: u64,
    pub step: u32,
    pub selection: Selection,
}

const CALLBACK_PREFIX: &str = "w";

/// Telegram rejects callback data longer than this.
pub const MAX_CALLBACK_LEN: usize = 64;

impl CallbackData {
    pub fn new(render: u64, step: u32, selection: Selection) -> Self {
        Self {
            render,
            step,
            selection,
        }
    }

    pub fn encode(&self) -> String {
        let action = match self.selection {
            Selection::Pick(index) => index.to_string(),
            Selection::Back => "b".to_string(),
            Selection::Continue => "c".to_string(),
        };
        format!("{CALLBACK_PREFIX}:{}:{}:{action}", self.render, self.step)
    }

    pub fn decode(data: &str) -> Option<Self> {
        if data.len() > MAX_CALLBACK_LEN {
            return None;
        }
        let mut parts = data.split(':');
        if parts.next()? != CALLBACK_PREFIX {
            return None;
        }
        let render = parts.next()?.parse().ok()?;
        let step = parts.next()?.parse().ok()?;
        let selection = match parts.next()? {
            "b" => Selection::Back,
            "c" => Selection::Continue,
            index => Selection::Pick(index.parse().ok()?),
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            render,
            step,
            selection,
        })
    }

    pub fn into_event(self, user_id: &str, chat_id: &str) -> SelectionEvent {
        SelectionEvent {
            user_id: user_id.to_string(),
            chat_id: chat_id.to_string(),
            step: self.step,
            render: Some(self.render),
            selection: self.selection,
        }
    }
}
