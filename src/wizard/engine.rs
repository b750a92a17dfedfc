//! Step engine, the wizard's transition function.
//!
//! `apply` validates an event against the session, does all fallible work
//! (folder listing, decoding, compositing) into locals, and only then writes
//! the session. An `Err` therefore always leaves the session exactly as it was.

use std::path::PathBuf;
use std::sync::Arc;

use image::RgbaImage;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{CompositeError, ResolutionError, WizardError};

use super::assets::{AssetOption, AssetResolver};
use super::compositor::{composite, load_layer};
use super::events::{CallbackData, Selection, SelectionEvent};
use super::session::{PresentedStep, Session, WizardPhase};
use super::steps::{LayerMode, StepKind, StepTable};

/// A rendered step: what the presenter should show.
#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    pub step: u32,
    pub total_steps: u32,
    pub prompt_key: String,
    pub render: u64,
    /// Canonically ordered options; empty on a pass-through step.
    pub options: Vec<AssetOption>,
    pub pass_through: bool,
    pub include_back: bool,
}

impl StepView {
    /// Button payload for `selection` on this rendering.
    pub fn callback(&self, selection: Selection) -> CallbackData {
        CallbackData::new(self.render, self.step, selection)
    }
}

/// Result of a successful transition.
#[derive(Debug, Clone)]
pub enum Transition {
    /// Moved forward to `step`. `preview` is the new composite when a layer
    /// was added.
    Advanced {
        step: u32,
        preview: Option<Arc<RgbaImage>>,
    },
    /// Undid one selection and returned to `step`.
    SteppedBack { step: u32 },
    /// The last step is done.
    Completed {
        image: Arc<RgbaImage>,
        choices: Vec<String>,
    },
}

/// Interprets a [`StepTable`] against the asset tree.
#[derive(Debug, Clone)]
pub struct StepEngine {
    table: Arc<StepTable>,
    resolver: AssetResolver,
}

impl StepEngine {
    pub fn new(table: Arc<StepTable>, resolver: AssetResolver) -> Self {
        Self { table, resolver }
    }

    pub fn table(&self) -> &StepTable {
        &self.table
    }

    /// List the current step's options and record them as presented.
    pub async fn present(&self, session: &mut Session) -> Result<StepView, WizardError> {
        let Some(step) = session.current_step() else {
            return Err(WizardError::StaleSelection {
                event_step: 0,
                current: session.phase.to_string(),
            });
        };
        let def = self
            .table
            .get(step)
            .ok_or(ResolutionError::UnknownStep(step))?;

        let options = if def.is_selecting() {
            let folder = self.resolver.resolve_folder(def, session.choices())?;
            self.resolver.list_options(&folder).await?
        } else {
            Vec::new()
        };

        session.render_seq += 1;
        session.presented = Some(PresentedStep {
            step,
            render: session.render_seq,
            assets: options.iter().map(|o| o.file_name.clone()).collect(),
        });

        debug!(
            user_id = %session.user_id,
            step,
            render = session.render_seq,
            options = options.len(),
            "Step presented"
        );

        Ok(StepView {
            step,
            total_steps: self.table.total_steps(),
            prompt_key: def.prompt_key.clone(),
            render: session.render_seq,
            options,
            pass_through: !def.is_selecting(),
            include_back: def.offers_back(),
        })
    }

    /// Apply one selection event.
    pub async fn apply(
        &self,
        session: &mut Session,
        event: &SelectionEvent,
    ) -> Result<Transition, WizardError> {
        let step = self.check_fresh(session, event)?;
        let def = self
            .table
            .get(step)
            .ok_or(ResolutionError::UnknownStep(step))?;

        match (&def.kind, event.selection) {
            (_, Selection::Back) => self.back(session, step),
            (StepKind::PassThrough, Selection::Continue | Selection::Pick(_)) => {
                self.advance(session, step, None)
            }
            (StepKind::Select { .. }, Selection::Continue) => Err(WizardError::invalid(
                step,
                "this step needs a choice",
            )),
            (StepKind::Select { layer, .. }, Selection::Pick(index)) => {
                let option = self.validated_option(session, step, index).await?;
                let base = session.accumulated().cloned();
                let image = compose_layer(option.path.clone(), base, *layer).await?;

                info!(
                    user_id = %session.user_id,
                    step,
                    index,
                    choice = %option.id,
                    "Choice applied"
                );
                self.advance(session, step, Some((option.id, image)))
            }
        }
    }

    /// Reject events that do not belong to the session's current rendering.
    fn check_fresh(&self, session: &Session, event: &SelectionEvent) -> Result<u32, WizardError> {
        let stale = || WizardError::StaleSelection {
            event_step: event.step,
            current: session.phase.to_string(),
        };

        let step = session.current_step().ok_or_else(stale)?;
        if event.step != step {
            return Err(stale());
        }
        if event.render.is_some_and(|render| render != session.render_seq) {
            return Err(stale());
        }
        Ok(step)
    }

    /// Re-list the folder and resolve `index` against the listing the user saw.
    async fn validated_option(
        &self,
        session: &Session,
        step: u32,
        index: usize,
    ) -> Result<AssetOption, WizardError> {
        let def = self
            .table
            .get(step)
            .ok_or(ResolutionError::UnknownStep(step))?;
        let folder = self.resolver.resolve_folder(def, session.choices())?;
        let mut options = self.resolver.list_options(&folder).await?;

        let Some(presented) = session.presented.as_ref().filter(|p| p.step == step) else {
            return Err(WizardError::invalid(step, "options were never shown"));
        };
        let unchanged = presented.assets.len() == options.len()
            && presented
                .assets
                .iter()
                .zip(&options)
                .all(|(shown, current)| *shown == current.file_name);
        if !unchanged {
            return Err(WizardError::invalid(
                step,
                "options changed since they were shown",
            ));
        }

        if index >= options.len() {
            return Err(WizardError::invalid(
                step,
                format!("index {index} out of range for {} options", options.len()),
            ));
        }
        Ok(options.swap_remove(index))
    }

    fn advance(
        &self,
        session: &mut Session,
        step: u32,
        layer: Option<(String, Arc<RgbaImage>)>,
    ) -> Result<Transition, WizardError> {
        let next = step + 1;
        let finishing = next > self.table.total_steps();
        if finishing && layer.is_none() && session.accumulated().is_none() {
            return Err(WizardError::invalid(step, "nothing was composed"));
        }

        let preview = layer.as_ref().map(|(_, image)| Arc::clone(image));
        if let Some((choice, image)) = layer {
            session.push_layer(choice, image);
        }
        session.presented = None;
        session.touch();

        if finishing {
            session.phase = WizardPhase::Completed;
            let image = session
                .accumulated()
                .cloned()
                .ok_or_else(|| WizardError::invalid(step, "nothing was composed"))?;
            info!(
                user_id = %session.user_id,
                choices = ?session.choices(),
                "Wizard completed"
            );
            return Ok(Transition::Completed {
                image,
                choices: session.choices().to_vec(),
            });
        }

        session.phase = WizardPhase::Awaiting { step: next };
        Ok(Transition::Advanced {
            step: next,
            preview,
        })
    }

    /// Undo the most recent asset-selecting step, skipping pass-through steps.
    fn back(&self, session: &mut Session, step: u32) -> Result<Transition, WizardError> {
        if step <= 1 {
            return Err(WizardError::invalid(step, "back is not available here"));
        }

        let target = match self.table.previous_selecting(step) {
            Some(target) => {
                let popped = session.pop_layer();
                debug_assert!(popped.is_some(), "selecting step {target} left no choice");
                info!(
                    user_id = %session.user_id,
                    from = step,
                    to = target,
                    undone = ?popped,
                    "Stepped back"
                );
                target
            }
            None => step - 1,
        };

        session.phase = WizardPhase::Awaiting { step: target };
        session.presented = None;
        session.touch();
        Ok(Transition::SteppedBack { step: target })
    }
}

/// Decode the asset and merge it into `base` off the async runtime.
async fn compose_layer(
    path: PathBuf,
    base: Option<Arc<RgbaImage>>,
    mode: LayerMode,
) -> Result<Arc<RgbaImage>, CompositeError> {
    tokio::task::spawn_blocking(move || {
        let layer = load_layer(&path)?;
        let image = match mode {
            LayerMode::Replace => layer,
            LayerMode::Overlay => composite(base.as_deref(), &layer)?,
        };
        Ok(Arc::new(image))
    })
    .await
    .map_err(|e| CompositeError::Worker(e.to_string()))?
}
