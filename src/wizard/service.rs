//! `WizardService` runs engine transitions against the session store and
//! turns their results (and failures) into presenter calls.
//!
//! Every transition works on a clone of the session. The clone replaces the
//! stored session only after the presenter has accepted the output, so a
//! failed render or send leaves the user where they were.
//!
//! The preview image goes out before the next step's keyboard so it sits
//! above the buttons. When that render fails the preview has already been
//! delivered, and the user's retry sends it a second time.

use std::path::PathBuf;
use std::sync::Arc;

use image::RgbaImage;
use tracing::{debug, error, info, warn};

use crate::channels::Presenter;
use crate::error::{ChannelError, CompositeError, WizardError, WizardErrorKind};
use crate::store::CompletionStore;
use crate::texts::keys;

use super::compositor::encode_png;
use super::engine::{StepEngine, Transition};
use super::events::{SelectionEvent, WizardInput};
use super::session::{Session, SessionStatus, SessionStore};

pub struct WizardService {
    engine: StepEngine,
    sessions: Arc<SessionStore>,
    presenter: Arc<dyn Presenter>,
    completions: Arc<dyn CompletionStore>,
    scratch_dir: Option<PathBuf>,
}

impl WizardService {
    pub fn new(
        engine: StepEngine,
        sessions: Arc<SessionStore>,
        presenter: Arc<dyn Presenter>,
        completions: Arc<dyn CompletionStore>,
    ) -> Self {
        Self {
            engine,
            sessions,
            presenter,
            completions,
            scratch_dir: None,
        }
    }

    /// Also write each user's latest composite to `<dir>/<session id>.png`.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub async fn session_status(&self, user_id: &str) -> Option<SessionStatus> {
        self.sessions.status(user_id).await
    }

    /// Process one input. Wizard failures are recovered here; only channel
    /// failures are returned.
    pub async fn handle(&self, input: WizardInput) -> Result<(), ChannelError> {
        match input {
            WizardInput::Start { user_id, chat_id } => self.start(&user_id, &chat_id).await,
            WizardInput::Selection(event) => self.select(event).await,
        }
    }

    async fn start(&self, user_id: &str, chat_id: &str) -> Result<(), ChannelError> {
        let handle = self.sessions.reset(user_id, chat_id).await;
        let mut session = handle.lock().await;
        self.presenter.send_notice(chat_id, keys::GREETING).await?;
        self.show_current(&mut session).await
    }

    async fn select(&self, event: SelectionEvent) -> Result<(), ChannelError> {
        let Some(handle) = self.sessions.get(&event.user_id).await else {
            debug!(
                user_id = %event.user_id,
                step = event.step,
                "Dropping selection for unknown session"
            );
            return Ok(());
        };

        let mut session = handle.lock().await;
        let mut draft = session.clone();
        match self.engine.apply(&mut draft, &event).await {
            Ok(transition) => self.deliver(&mut session, draft, transition).await,
            Err(err) => self.recover(&mut session, err).await,
        }
    }

    async fn deliver(
        &self,
        session: &mut Session,
        mut draft: Session,
        transition: Transition,
    ) -> Result<(), ChannelError> {
        match transition {
            Transition::Advanced { preview, .. } => {
                let view = match self.engine.present(&mut draft).await {
                    Ok(view) => view,
                    Err(err) => return self.recover(session, err).await,
                };
                let png = match preview {
                    Some(image) => match encode(image).await {
                        Ok(png) => Some(png),
                        Err(err) => return self.recover(session, err.into()).await,
                    },
                    None => None,
                };

                if let Some(png) = &png {
                    self.presenter
                        .send_image(&draft.chat_id, png.clone(), None)
                        .await?;
                }
                self.presenter.render_step(&draft.chat_id, &view).await?;
                *session = draft;
                if let Some(png) = png {
                    self.write_scratch(session, &png).await;
                }
                Ok(())
            }
            Transition::SteppedBack { .. } => {
                let view = match self.engine.present(&mut draft).await {
                    Ok(view) => view,
                    Err(err) => return self.recover(session, err).await,
                };
                self.presenter.render_step(&draft.chat_id, &view).await?;
                *session = draft;
                Ok(())
            }
            Transition::Completed { image, choices } => {
                let png = match encode(image).await {
                    Ok(png) => png,
                    Err(err) => return self.recover(session, err.into()).await,
                };
                self.presenter
                    .send_image(&draft.chat_id, png.clone(), Some(keys::FINAL_RESULT))
                    .await?;

                let first_completion = !session.completion_recorded;
                draft.completion_recorded = true;
                *session = draft;
                self.write_scratch(session, &png).await;

                if first_completion {
                    self.record_completion(session, &choices).await;
                }
                if let Err(e) = self.presenter.offer_share(&session.chat_id).await {
                    warn!(user_id = %session.user_id, "Failed to offer share: {e}");
                }
                Ok(())
            }
        }
    }

    /// Present the current step on a clone and commit once it is rendered.
    async fn show_current(&self, session: &mut Session) -> Result<(), ChannelError> {
        let mut draft = session.clone();
        match self.engine.present(&mut draft).await {
            Ok(view) => {
                self.presenter.render_step(&draft.chat_id, &view).await?;
                *session = draft;
                Ok(())
            }
            Err(err) => self.report_failure(session, &err).await,
        }
    }

    async fn recover(&self, session: &mut Session, err: WizardError) -> Result<(), ChannelError> {
        match err.kind() {
            WizardErrorKind::StaleSelection => {
                debug!(user_id = %session.user_id, "Dropping stale selection: {err}");
                Ok(())
            }
            WizardErrorKind::InvalidSelection => {
                info!(user_id = %session.user_id, "Rejected selection: {err}");
                self.presenter
                    .send_notice(&session.chat_id, keys::INVALID_SELECTION)
                    .await?;
                self.show_current(session).await
            }
            WizardErrorKind::Resolution | WizardErrorKind::Composite => {
                self.report_failure(session, &err).await
            }
        }
    }

    async fn report_failure(&self, session: &Session, err: &WizardError) -> Result<(), ChannelError> {
        warn!(
            user_id = %session.user_id,
            phase = %session.phase,
            error = %err,
            "Wizard step failed"
        );
        self.presenter
            .send_notice(&session.chat_id, keys::ERROR_GENERIC)
            .await
    }

    async fn record_completion(&self, session: &Session, choices: &[String]) {
        match self
            .completions
            .record_completion(session.id, &session.user_id, choices)
            .await
        {
            Ok(id) => info!(user_id = %session.user_id, completion_id = %id, "Postcard completed"),
            Err(e) => error!(user_id = %session.user_id, "Failed to record completion: {e}"),
        }
    }

    async fn write_scratch(&self, session: &Session, png: &[u8]) {
        let Some(dir) = &self.scratch_dir else {
            return;
        };
        let path = dir.join(format!("{}.png", session.id));
        let written = match tokio::fs::create_dir_all(dir).await {
            Ok(()) => tokio::fs::write(&path, png).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(path = %path.display(), "Failed to write scratch image: {e}");
        }
    }
}

async fn encode(image: Arc<RgbaImage>) -> Result<Vec<u8>, CompositeError> {
    tokio::task::spawn_blocking(move || encode_png(&image))
        .await
        .map_err(|e| CompositeError::Worker(e.to_string()))?
}
