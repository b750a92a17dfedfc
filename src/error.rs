//! Error types for the postcard bot.

use std::path::PathBuf;

/// Configuration-related errors. These are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid step table: {0}")]
    InvalidStepTable(String),

    #[error("Asset {} is {found:?}, expected canvas {expected:?}", .path.display())]
    CanvasMismatch {
        path: PathBuf,
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Completion store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The asset folder for a step could not be resolved to a usable option list.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("Step {0} is not defined")]
    UnknownStep(u32),

    #[error("Step {0} has no asset folder")]
    NoFolder(u32),

    #[error("Step {step} is keyed by {needed} prior choices, session has {have}")]
    MissingChoices { step: u32, needed: usize, have: usize },

    #[error("Asset folder {} is unreadable: {reason}", .path.display())]
    FolderUnavailable { path: PathBuf, reason: String },

    #[error("Asset folder {} has no selectable images", .path.display())]
    EmptyFolder { path: PathBuf },
}

/// Image decode/encode failures.
#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    #[error("Failed to decode {}: {reason}", .path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("Failed to encode composite: {0}")]
    Encode(String),

    #[error("Layer is {found:?}, canvas is {expected:?}")]
    CanvasMismatch {
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("Image worker failed: {0}")]
    Worker(String),
}

/// Failed wizard transition. The session is left untouched in every case.
#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("Invalid selection on step {step}: {reason}")]
    InvalidSelection { step: u32, reason: String },

    #[error("Stale selection for step {event_step}, session is at {current}")]
    StaleSelection { event_step: u32, current: String },

    #[error(transparent)]
    Composite(#[from] CompositeError),
}

/// Coarse classification used by the service to pick a recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardErrorKind {
    Resolution,
    InvalidSelection,
    StaleSelection,
    Composite,
}

impl WizardError {
    pub fn kind(&self) -> WizardErrorKind {
        match self {
            Self::Resolution(_) => WizardErrorKind::Resolution,
            Self::InvalidSelection { .. } => WizardErrorKind::InvalidSelection,
            Self::StaleSelection { .. } => WizardErrorKind::StaleSelection,
            Self::Composite(_) => WizardErrorKind::Composite,
        }
    }

    pub(crate) fn invalid(step: u32, reason: impl Into<String>) -> Self {
        Self::InvalidSelection {
            step,
            reason: reason.into(),
        }
    }
}
