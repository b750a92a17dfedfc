//! Fixtures shared by the wizard unit tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use tempfile::TempDir;

use crate::channels::Presenter;
use crate::error::ChannelError;

use super::engine::StepView;

/// A throwaway asset tree of small solid-colour PNGs.
pub struct AssetTree {
    tmp: TempDir,
}

impl AssetTree {
    pub fn new() -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.tmp.path().to_path_buf()
    }

    pub fn dir(&self, rel: &str) -> PathBuf {
        let dir = self.tmp.path().join(rel);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Write a 2x2 PNG filled with `rgba`.
    pub fn png(&self, rel_dir: &str, name: &str, rgba: [u8; 4]) -> PathBuf {
        let path = self.dir(rel_dir).join(name);
        RgbaImage::from_pixel(2, 2, Rgba(rgba)).save(&path).unwrap();
        path
    }

    pub fn raw(&self, rel_dir: &str, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir(rel_dir).join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    pub fn load(&self, rel: &str) -> RgbaImage {
        image::open(self.tmp.path().join(rel)).unwrap().into_rgba8()
    }

    pub fn path(&self) -> &Path {
        self.tmp.path()
    }
}

/// Everything a presenter was asked to show.
#[derive(Debug, Clone)]
pub enum Shown {
    Step(StepView),
    Image { png: Vec<u8>, caption: Option<String> },
    Notice(String),
    Share,
}

/// Presenter that records calls, optionally failing the next render.
#[derive(Default)]
pub struct RecordingPresenter {
    shown: Mutex<Vec<Shown>>,
    fail_next_render: AtomicBool,
}

impl RecordingPresenter {
    pub fn shown(&self) -> Vec<Shown> {
        self.shown.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.shown.lock().unwrap().clear();
    }

    pub fn last_view(&self) -> Option<StepView> {
        self.shown().into_iter().rev().find_map(|s| match s {
            Shown::Step(view) => Some(view),
            _ => None,
        })
    }

    pub fn notices(&self) -> Vec<String> {
        self.shown()
            .into_iter()
            .filter_map(|s| match s {
                Shown::Notice(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn images(&self) -> Vec<(Vec<u8>, Option<String>)> {
        self.shown()
            .into_iter()
            .filter_map(|s| match s {
                Shown::Image { png, caption } => Some((png, caption)),
                _ => None,
            })
            .collect()
    }

    pub fn fail_next_render(&self) {
        self.fail_next_render.store(true, Ordering::SeqCst);
    }

    fn push(&self, shown: Shown) {
        self.shown.lock().unwrap().push(shown);
    }
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn render_step(&self, _chat_id: &str, view: &StepView) -> Result<(), ChannelError> {
        if self.fail_next_render.swap(false, Ordering::SeqCst) {
            return Err(ChannelError::SendFailed {
                name: "recording".into(),
                reason: "render refused".into(),
            });
        }
        self.push(Shown::Step(view.clone()));
        Ok(())
    }

    async fn send_image(
        &self,
        _chat_id: &str,
        png: Vec<u8>,
        caption_key: Option<&str>,
    ) -> Result<(), ChannelError> {
        self.push(Shown::Image {
            png,
            caption: caption_key.map(String::from),
        });
        Ok(())
    }

    async fn send_notice(&self, _chat_id: &str, key: &str) -> Result<(), ChannelError> {
        self.push(Shown::Notice(key.to_string()));
        Ok(())
    }

    async fn offer_share(&self, _chat_id: &str) -> Result<(), ChannelError> {
        self.push(Shown::Share);
        Ok(())
    }
}
