//! Per-user wizard sessions and the in-memory store that owns them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Where a session is in the wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WizardPhase {
    /// Waiting for input on `step` (1-indexed).
    Awaiting { step: u32 },
    /// Final image delivered.
    Completed,
}

impl WizardPhase {
    pub fn step(&self) -> Option<u32> {
        match self {
            Self::Awaiting { step } => Some(*step),
            Self::Completed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for WizardPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Awaiting { step } => write!(f, "step {step}"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// The listing shown by the most recent rendering of the current step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedStep {
    pub step: u32,
    pub render: u64,
    /// Asset file names in rendered order; empty for pass-through steps.
    pub assets: Vec<String>,
}

/// One user's wizard progress.
///
/// Cloning is cheap: snapshots are shared, never mutated.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub chat_id: String,
    pub phase: WizardPhase,
    choices: Vec<String>,
    /// `snapshots[i]` is the composite after `choices[..=i]`.
    snapshots: Vec<Arc<RgbaImage>>,
    pub presented: Option<PresentedStep>,
    pub render_seq: u64,
    pub completion_recorded: bool,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: &str, chat_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            chat_id: chat_id.to_string(),
            phase: WizardPhase::Awaiting { step: 1 },
            choices: Vec::new(),
            snapshots: Vec::new(),
            presented: None,
            render_seq: 0,
            completion_recorded: false,
            created_at: now,
            last_active: now,
        }
    }

    pub fn current_step(&self) -> Option<u32> {
        self.phase.step()
    }

    pub fn choices(&self) -> &[String] {
        &self.choices
    }

    pub fn snapshots(&self) -> &[Arc<RgbaImage>] {
        &self.snapshots
    }

    /// Composite of every choice so far, absent before the first one.
    pub fn accumulated(&self) -> Option<&Arc<RgbaImage>> {
        self.snapshots.last()
    }

    pub(crate) fn push_layer(&mut self, choice: String, snapshot: Arc<RgbaImage>) {
        self.choices.push(choice);
        self.snapshots.push(snapshot);
    }

    /// Undo the most recent selection, returning the popped choice.
    pub(crate) fn pop_layer(&mut self) -> Option<String> {
        self.snapshots.pop();
        self.choices.pop()
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_active).to_std().unwrap_or_default()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id,
            user_id: self.user_id.clone(),
            phase: self.phase,
            choices: self.choices.clone(),
            render: self.render_seq,
            has_image: !self.snapshots.is_empty(),
            last_active: self.last_active,
        }
    }
}

/// Read-only session summary for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub user_id: String,
    pub phase: WizardPhase,
    pub choices: Vec<String>,
    pub render: u64,
    pub has_image: bool,
    pub last_active: DateTime<Utc>,
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// Sessions keyed by user id. Each session sits behind its own lock so one
/// user's transitions are sequential while different users run in parallel.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a fresh session for `user_id`, replacing any existing one.
    pub async fn reset(&self, user_id: &str, chat_id: &str) -> SessionHandle {
        let handle = Arc::new(Mutex::new(Session::new(user_id, chat_id)));
        let previous = self
            .sessions
            .write()
            .await
            .insert(user_id.to_string(), Arc::clone(&handle));
        if previous.is_some() {
            info!(user_id, "Session reset");
        } else {
            info!(user_id, "Session created");
        }
        handle
    }

    pub async fn get(&self, user_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(user_id).cloned()
    }

    pub async fn remove(&self, user_id: &str) -> bool {
        self.sessions.write().await.remove(user_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions idle for longer than `max_idle`. Sessions whose lock is
    /// held are mid-transition and are kept.
    pub async fn expire_idle(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|user_id, handle| match handle.try_lock() {
            Ok(session) => {
                let keep = session.idle_for(now) <= max_idle;
                if !keep {
                    debug!(user_id = %user_id, "Expiring idle session");
                }
                keep
            }
            Err(_) => true,
        });
        let expired = before - sessions.len();
        if expired > 0 {
            info!(expired, "Expired idle sessions");
        }
        expired
    }

    pub async fn status(&self, user_id: &str) -> Option<SessionStatus> {
        let handle = self.get(user_id).await?;
        let session = handle.lock().await;
        Some(session.status())
    }
}

/// Spawn a background task that sweeps idle sessions every `interval`.
pub fn spawn_expiry_task(
    store: Arc<SessionStore>,
    interval: Duration,
    max_idle: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            store.expire_idle(max_idle).await;
        }
    })
}
