//! Channel traits: how wizard input arrives and how steps are shown.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ChannelError;
use crate::wizard::engine::StepView;
use crate::wizard::events::WizardInput;

/// Stream of normalized input from a channel.
pub type InputStream = Pin<Box<dyn Stream<Item = WizardInput> + Send>>;

/// Output side of a channel. Text is looked up by key in the channel's
/// [`TextTable`](crate::texts::TextTable).
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Show a step's prompt with one button per option (plus back/continue).
    async fn render_step(&self, chat_id: &str, view: &StepView) -> Result<(), ChannelError>;

    /// Send a PNG, optionally captioned.
    async fn send_image(
        &self,
        chat_id: &str,
        png: Vec<u8>,
        caption_key: Option<&str>,
    ) -> Result<(), ChannelError>;

    /// Send a plain text notice.
    async fn send_notice(&self, chat_id: &str, key: &str) -> Result<(), ChannelError>;

    /// Offer to share the finished image.
    async fn offer_share(&self, chat_id: &str) -> Result<(), ChannelError>;
}

/// A chat transport that both produces input and presents output.
#[async_trait]
pub trait Channel: Presenter {
    /// Channel name for logs.
    fn name(&self) -> &str;

    /// Start receiving input.
    async fn start(&self) -> Result<InputStream, ChannelError>;

    /// Check that the channel can reach its backend.
    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
