//! Postcard wizard: step table, asset resolution, compositing, the step
//! engine, and the service that drives it per user.

pub mod assets;
pub mod compositor;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod routes;
pub mod service;
pub mod session;
pub mod steps;

#[cfg(test)]
pub(crate) mod test_support;

pub use assets::{AssetOption, AssetResolver};
pub use dispatcher::WizardDispatcher;
pub use engine::{StepEngine, StepView, Transition};
pub use events::{CallbackData, Selection, SelectionEvent, WizardInput};
pub use routes::{WizardRouteState, wizard_routes};
pub use service::WizardService;
pub use session::{Session, SessionStore, WizardPhase, spawn_expiry_task};
pub use steps::{LayerMode, StepDefinition, StepTable};
