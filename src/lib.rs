//! Postcard bot: a chat wizard that layers picked images into one postcard.

pub mod channels;
pub mod config;
pub mod error;
pub mod logging;
pub mod store;
pub mod texts;
pub mod wizard;
