//! CLI channel: stdin/stdout wizard for local testing.
//!
//! Commands: `/start`, an option number (1-based), `back`, `next`.
//! Images are written as PNG files into the output directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{Channel, InputStream, Presenter};
use crate::error::ChannelError;
use crate::texts::{TextTable, keys};
use crate::wizard::engine::StepView;
use crate::wizard::events::{Selection, SelectionEvent, WizardInput};

const CLI_USER: &str = "local-user";
const CLI_CHAT: &str = "cli";

/// Step and render number of the last rendered view.
type LastView = Arc<Mutex<Option<(u32, u64)>>>;

/// A simple CLI channel that reads from stdin and writes to stdout.
pub struct CliChannel {
    texts: Arc<TextTable>,
    out_dir: PathBuf,
    last_view: LastView,
    images_written: AtomicUsize,
}

impl CliChannel {
    pub fn new(texts: Arc<TextTable>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            texts,
            out_dir: out_dir.into(),
            last_view: Arc::new(Mutex::new(None)),
            images_written: AtomicUsize::new(0),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn remember(&self, view: &StepView) {
        if let Ok(mut last) = self.last_view.lock() {
            *last = Some((view.step, view.render));
        }
    }

    async fn write_image(&self, png: &[u8], name: &str) -> Result<PathBuf, ChannelError> {
        tokio::fs::create_dir_all(&self.out_dir).await?;
        let path = self.out_dir.join(name);
        tokio::fs::write(&path, png).await?;
        Ok(path)
    }
}

#[async_trait]
impl Presenter for CliChannel {
    async fn render_step(&self, _chat_id: &str, view: &StepView) -> Result<(), ChannelError> {
        self.remember(view);
        println!("\n{}", render_text(view, &self.texts));
        eprint!("> ");
        Ok(())
    }

    async fn send_image(
        &self,
        _chat_id: &str,
        png: Vec<u8>,
        caption_key: Option<&str>,
    ) -> Result<(), ChannelError> {
        let n = self.images_written.fetch_add(1, Ordering::Relaxed) + 1;
        let name = match caption_key {
            Some(_) => format!("{n:03}-final.png"),
            None => format!("{n:03}-preview.png"),
        };
        let path = self.write_image(&png, &name).await?;
        match caption_key {
            Some(key) => println!("{} ({})", self.texts.text(key), path.display()),
            None => println!("🖼  {}", path.display()),
        }
        Ok(())
    }

    async fn send_notice(&self, _chat_id: &str, key: &str) -> Result<(), ChannelError> {
        println!("ℹ️  {}", self.texts.text(key));
        Ok(())
    }

    async fn offer_share(&self, _chat_id: &str) -> Result<(), ChannelError> {
        println!(
            "{} {}",
            self.texts.text(keys::SHARE_PROMPT),
            self.texts.text(keys::SHARE_QUERY)
        );
        println!("Type /start to make another one.");
        eprint!("> ");
        Ok(())
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<InputStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let last_view = Arc::clone(&self.last_view);

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprintln!("Type /start to begin.");
            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let last = last_view.lock().ok().and_then(|guard| *guard);
                        let Some(input) = parse_command(&line, last) else {
                            eprintln!("Commands: /start, <number>, back, next");
                            eprint!("> ");
                            continue;
                        };
                        if tx.send(input).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|input| (input, rx))
        });

        Ok(Box::pin(stream))
    }
}

/// Map a typed line to wizard input. Selections need a rendered step.
fn parse_command(line: &str, last: Option<(u32, u64)>) -> Option<WizardInput> {
    let line = line.trim();
    if line.eq_ignore_ascii_case("/start") || line.eq_ignore_ascii_case("start") {
        return Some(WizardInput::Start {
            user_id: CLI_USER.to_string(),
            chat_id: CLI_CHAT.to_string(),
        });
    }

    let (step, render) = last?;
    let selection = match line.to_ascii_lowercase().as_str() {
        "b" | "back" => Selection::Back,
        "n" | "next" | "c" | "continue" => Selection::Continue,
        other => {
            let number: usize = other.parse().ok()?;
            Selection::Pick(number.checked_sub(1)?)
        }
    };

    Some(WizardInput::Selection(SelectionEvent {
        user_id: CLI_USER.to_string(),
        chat_id: CLI_CHAT.to_string(),
        step,
        render: Some(render),
        selection,
    }))
}

fn render_text(view: &StepView, texts: &TextTable) -> String {
    let mut out = format!(
        "[{}/{}] {}",
        view.step,
        view.total_steps,
        texts.text(&view.prompt_key)
    );
    for option in &view.options {
        out.push_str(&format!("\n  {}. {}", option.index + 1, texts.label(option)));
    }
    if view.pass_through {
        out.push_str(&format!("\n  next: {}", texts.text(keys::CONTINUE)));
    }
    if view.include_back {
        out.push_str(&format!("\n  back: {}", texts.text(keys::BACK)));
    }
    out
}
