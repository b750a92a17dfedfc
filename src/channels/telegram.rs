//! Telegram channel. Long-polls the Bot API for updates.
//!
//! `/start` messages and inline-keyboard callbacks become [`WizardInput`];
//! steps are rendered as a prompt with one inline button per option.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::channels::{Channel, InputStream, Presenter};
use crate::error::ChannelError;
use crate::texts::{TextTable, keys};
use crate::wizard::engine::StepView;
use crate::wizard::events::{CallbackData, Selection, WizardInput};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout passed to `getUpdates`, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause before polling again after a failed `getUpdates`.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Telegram channel connected to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    allowed_users: Vec<String>,
    texts: Arc<TextTable>,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, allowed_users: Vec<String>, texts: Arc<TextTable>) -> Self {
        Self {
            bot_token,
            allowed_users,
            texts,
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the channel at a different Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.api_base, &self.bot_token, method)
    }

    /// POST a JSON body to a Bot API method and check the response.
    async fn call(&self, method: &str, body: &Value) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| send_failed(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(send_failed(format!("{method} returned {status}: {err}")));
        }
        Ok(())
    }

    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        reply_markup: Option<Value>,
    ) -> Result<(), ChannelError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(markup) = reply_markup {
            body["reply_markup"] = markup;
        }
        self.call("sendMessage", &body).await
    }

    /// Send a photo from bytes (in-memory).
    pub async fn send_photo_bytes(
        &self,
        chat_id: &str,
        file_bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        let part = Part::bytes(file_bytes)
            .file_name(file_name.to_string())
            .mime_str("image/png")
            .map_err(|e| send_failed(e.to_string()))?;

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", part);

        if let Some(cap) = caption {
            form = form.text("caption", cap.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| send_failed(format!("sendPhoto: {e}")))?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(send_failed(format!("sendPhoto failed: {err}")));
        }

        tracing::debug!(chat_id, file_name, "Telegram photo sent");
        Ok(())
    }
}

#[async_trait]
impl Presenter for TelegramChannel {
    async fn render_step(&self, chat_id: &str, view: &StepView) -> Result<(), ChannelError> {
        let keyboard = step_keyboard(view, &self.texts);
        self.send_message(chat_id, self.texts.text(&view.prompt_key), Some(keyboard))
            .await
    }

    async fn send_image(
        &self,
        chat_id: &str,
        png: Vec<u8>,
        caption_key: Option<&str>,
    ) -> Result<(), ChannelError> {
        let caption = caption_key.map(|key| self.texts.text(key));
        self.send_photo_bytes(chat_id, png, "postcard.png", caption)
            .await
    }

    async fn send_notice(&self, chat_id: &str, key: &str) -> Result<(), ChannelError> {
        self.send_message(chat_id, self.texts.text(key), None).await
    }

    async fn offer_share(&self, chat_id: &str) -> Result<(), ChannelError> {
        let keyboard = share_keyboard(&self.texts);
        self.send_message(chat_id, self.texts.text(keys::SHARE_PROMPT), Some(keyboard))
            .await
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<InputStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let updates_url = self.api_url("getUpdates");
        let answer_url = self.api_url("answerCallbackQuery");
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for updates...");

            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&updates_url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let results = match poll_results(&data) {
                    Ok(results) => results,
                    Err(reason) => {
                        tracing::warn!("Telegram getUpdates rejected: {reason}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(parsed) = parse_update(update) else {
                        continue;
                    };

                    // Stop the client's spinner whatever the payload was.
                    if let Some(callback_id) = &parsed.callback_id {
                        let answered = client
                            .post(&answer_url)
                            .json(&json!({ "callback_query_id": callback_id }))
                            .send()
                            .await;
                        if let Err(e) = answered {
                            tracing::debug!("answerCallbackQuery failed: {e}");
                        }
                    }

                    let identities = [Some(parsed.user_id.as_str()), parsed.username.as_deref()];
                    if !check_user_allowed(&allowed_users, identities.into_iter().flatten()) {
                        tracing::warn!(
                            user_id = %parsed.user_id,
                            username = parsed.username.as_deref().unwrap_or("unknown"),
                            "Telegram: ignoring update from unauthorized user"
                        );
                        continue;
                    }

                    let Some(input) = parsed.input else {
                        continue;
                    };

                    if tx.send(input).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|input| (input, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(base: &str, token: &SecretString, method: &str) -> String {
    format!("{base}/bot{}/{method}", token.expose_secret())
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: "telegram".into(),
        reason,
    }
}

/// Updates from a `getUpdates` response, or why the API refused the poll
/// (`{"ok": false, "error_code": 409, "description": ...}`).
fn poll_results(data: &Value) -> Result<&[Value], String> {
    if let Some(results) = data.get("result").and_then(Value::as_array) {
        return Ok(results);
    }
    let code = data
        .get("error_code")
        .and_then(Value::as_i64)
        .map_or_else(|| "no error code".to_string(), |c| c.to_string());
    let description = data
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("no description");
    Err(format!("{code}: {description}"))
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// A Bot API update reduced to what the wizard needs.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedUpdate {
    user_id: String,
    username: Option<String>,
    /// Set for callback queries, which must be answered even when ignored.
    callback_id: Option<String>,
    input: Option<WizardInput>,
}

/// Extract wizard input from a `message` or `callback_query` update.
fn parse_update(update: &Value) -> Option<ParsedUpdate> {
    if let Some(message) = update.get("message") {
        let (user_id, username) = sender(message.get("from")?)?;
        let chat_id = message.get("chat")?.get("id")?.as_i64()?.to_string();
        let text = message.get("text").and_then(Value::as_str).unwrap_or("");

        let input = is_start_command(text).then(|| WizardInput::Start {
            user_id: user_id.clone(),
            chat_id,
        });
        return Some(ParsedUpdate {
            user_id,
            username,
            callback_id: None,
            input,
        });
    }

    let query = update.get("callback_query")?;
    let (user_id, username) = sender(query.get("from")?)?;
    let callback_id = query.get("id")?.as_str()?.to_string();
    let chat_id = query
        .get("message")
        .and_then(|m| m.get("chat"))
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string());
    let data = query.get("data").and_then(Value::as_str);

    let input = match (chat_id, data.and_then(CallbackData::decode)) {
        (Some(chat_id), Some(callback)) => Some(WizardInput::Selection(
            callback.into_event(&user_id, &chat_id),
        )),
        _ => {
            tracing::debug!(user_id = %user_id, data = ?data, "Ignoring unrecognized callback");
            None
        }
    };

    Some(ParsedUpdate {
        user_id,
        username,
        callback_id: Some(callback_id),
        input,
    })
}

fn sender(from: &Value) -> Option<(String, Option<String>)> {
    let id = from.get("id")?.as_i64()?.to_string();
    let username = from
        .get("username")
        .and_then(Value::as_str)
        .map(String::from);
    Some((id, username))
}

/// `/start`, optionally addressed (`/start@bot`) or with a deep-link payload.
fn is_start_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or("");
    command == "/start" || command.starts_with("/start@")
}

/// Inline keyboard for a step: one option per row, then continue/back.
fn step_keyboard(view: &StepView, texts: &TextTable) -> Value {
    let mut rows: Vec<Value> = view
        .options
        .iter()
        .map(|option| {
            json!([{
                "text": texts.label(option),
                "callback_data": view.callback(Selection::Pick(option.index)).encode(),
            }])
        })
        .collect();

    if view.pass_through {
        rows.push(json!([{
            "text": texts.text(keys::CONTINUE),
            "callback_data": view.callback(Selection::Continue).encode(),
        }]));
    }
    if view.include_back {
        rows.push(json!([{
            "text": texts.text(keys::BACK),
            "callback_data": view.callback(Selection::Back).encode(),
        }]));
    }

    json!({ "inline_keyboard": rows })
}

fn share_keyboard(texts: &TextTable) -> Value {
    json!({
        "inline_keyboard": [[{
            "text": texts.text(keys::SHARE_BUTTON),
            "switch_inline_query": texts.text(keys::SHARE_QUERY),
        }]]
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wizard::assets::AssetOption;
    use crate::wizard::events::SelectionEvent;
    use std::path::PathBuf;

    fn channel(allowed: &[&str]) -> TelegramChannel {
        TelegramChannel::new(
            SecretString::from("123:ABC".to_string()),
            allowed.iter().map(|s| s.to_string()).collect(),
            Arc::new(TextTable::builtin()),
        )
    }

    fn view(options: &[&str], pass_through: bool, include_back: bool) -> StepView {
        StepView {
            step: 2,
            total_steps: 6,
            prompt_key: "step_2".into(),
            render: 7,
            options: options
                .iter()
                .enumerate()
                .map(|(index, id)| AssetOption {
                    index,
                    id: id.to_string(),
                    file_name: format!("{id}.png"),
                    path: PathBuf::from(format!("{id}.png")),
                })
                .collect(),
            pass_through,
            include_back,
        }
    }

    // ── Basic channel tests ─────────────────────────────────────────

    #[test]
    fn telegram_channel_name() {
        assert_eq!(channel(&["*"]).name(), "telegram");
    }

    #[test]
    fn telegram_api_url() {
        let ch = channel(&[]);
        assert_eq!(
            ch.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
        let local = channel(&[]).with_api_base("http://localhost:8081/");
        assert_eq!(
            local.api_url("sendPhoto"),
            "http://localhost:8081/bot123:ABC/sendPhoto"
        );
    }

    // ── User allowlist tests ────────────────────────────────────────

    fn allowed(list: &[&str], identities: &[&str]) -> bool {
        let list: Vec<String> = list.iter().map(|s| s.to_string()).collect();
        check_user_allowed(&list, identities.iter().copied())
    }

    #[test]
    fn telegram_user_allowed_wildcard() {
        assert!(allowed(&["*"], &["anyone"]));
    }

    #[test]
    fn telegram_user_allowed_specific() {
        assert!(allowed(&["alice", "bob"], &["alice"]));
        assert!(!allowed(&["alice", "bob"], &["eve"]));
    }

    #[test]
    fn telegram_user_denied_empty() {
        assert!(!allowed(&[], &["anyone"]));
    }

    #[test]
    fn telegram_user_exact_match_not_substring() {
        assert!(!allowed(&["alice"], &["alice_bot"]));
        assert!(!allowed(&["alice"], &["malice"]));
    }

    #[test]
    fn telegram_user_allowed_by_numeric_id_identity() {
        assert!(allowed(&["123456789"], &["unknown", "123456789"]));
        assert!(!allowed(&["123456789"], &["unknown", "42"]));
    }

    // ── Update parsing ──────────────────────────────────────────────

    #[test]
    fn start_message_becomes_start_input() {
        let update = json!({
            "update_id": 10,
            "message": {
                "from": {"id": 42, "username": "alice"},
                "chat": {"id": 100},
                "text": "/start"
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.user_id, "42");
        assert_eq!(parsed.username.as_deref(), Some("alice"));
        assert_eq!(
            parsed.input,
            Some(WizardInput::Start {
                user_id: "42".into(),
                chat_id: "100".into()
            })
        );
    }

    #[test]
    fn other_text_is_not_input() {
        let update = json!({
            "message": {"from": {"id": 42}, "chat": {"id": 100}, "text": "hello"}
        });
        let parsed = parse_update(&update).unwrap();
        assert!(parsed.input.is_none());
        assert!(parsed.callback_id.is_none());
    }

    #[test]
    fn start_command_variants() {
        assert!(is_start_command("/start"));
        assert!(is_start_command("/start@postcard_bot"));
        assert!(is_start_command("/start promo"));
        assert!(!is_start_command("/started"));
        assert!(!is_start_command("start"));
        assert!(!is_start_command(""));
    }

    #[test]
    fn callback_becomes_selection() {
        let update = json!({
            "update_id": 11,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": 42},
                "message": {"chat": {"id": 100}},
                "data": "w:3:2:1"
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.callback_id.as_deref(), Some("cb-1"));
        assert_eq!(
            parsed.input,
            Some(WizardInput::Selection(SelectionEvent {
                user_id: "42".into(),
                chat_id: "100".into(),
                step: 2,
                render: Some(3),
                selection: Selection::Pick(1),
            }))
        );
    }

    #[test]
    fn legacy_callback_is_answered_but_ignored() {
        let update = json!({
            "callback_query": {
                "id": "cb-2",
                "from": {"id": 42},
                "message": {"chat": {"id": 100}},
                "data": "choice_666"
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.callback_id.as_deref(), Some("cb-2"));
        assert!(parsed.input.is_none());
    }

    #[test]
    fn update_without_sender_is_skipped() {
        assert!(parse_update(&json!({"edited_message": {}})).is_none());
        assert!(parse_update(&json!({"message": {"chat": {"id": 1}}})).is_none());
    }

    // ── Keyboards ───────────────────────────────────────────────────

    #[test]
    fn step_keyboard_lists_options_then_back() {
        let mut texts = TextTable::builtin();
        texts.labels.insert("red".into(), "Red".into());
        let keyboard = step_keyboard(&view(&["red", "blue"], false, true), &texts);
        let rows = keyboard["inline_keyboard"].as_array().unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0]["text"], "Red");
        assert_eq!(rows[0][0]["callback_data"], "w:7:2:0");
        assert_eq!(rows[1][0]["text"], "blue");
        assert_eq!(rows[1][0]["callback_data"], "w:7:2:1");
        assert_eq!(rows[2][0]["text"], texts.text(keys::BACK));
        assert_eq!(rows[2][0]["callback_data"], "w:7:2:b");
    }

    #[test]
    fn pass_through_keyboard_has_continue() {
        let texts = TextTable::builtin();
        let keyboard = step_keyboard(&view(&[], true, false), &texts);
        let rows = keyboard["inline_keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0]["callback_data"], "w:7:2:c");
    }

    #[test]
    fn share_keyboard_uses_inline_query() {
        let texts = TextTable::builtin();
        let keyboard = share_keyboard(&texts);
        let button = &keyboard["inline_keyboard"][0][0];
        assert_eq!(button["text"], texts.text(keys::SHARE_BUTTON));
        assert_eq!(button["switch_inline_query"], texts.text(keys::SHARE_QUERY));
    }

    // ── Polling ─────────────────────────────────────────────────────

    #[test]
    fn poll_results_accepts_ok_response() {
        let data = json!({"ok": true, "result": [{"update_id": 1}, {"update_id": 2}]});
        assert_eq!(poll_results(&data).unwrap().len(), 2);
    }

    #[test]
    fn poll_results_reports_api_refusal() {
        let data = json!({
            "ok": false,
            "error_code": 409,
            "description": "Conflict: terminated by other getUpdates request"
        });
        let reason = poll_results(&data).unwrap_err();
        assert!(reason.starts_with("409: Conflict"));

        let bare = poll_results(&json!({"ok": false})).unwrap_err();
        assert_eq!(bare, "no error code: no description");
    }

    #[tokio::test]
    async fn refused_poll_backs_off() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let app = axum::Router::new().fallback(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                axum::Json(json!({"ok": false, "error_code": 409, "description": "Conflict"}))
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let ch = channel(&["*"]).with_api_base(format!("http://{addr}"));
        let _stream = ch.start().await.unwrap();

        for _ in 0..200 {
            if calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // ── Send failures ───────────────────────────────────────────────

    #[tokio::test]
    async fn send_photo_to_unreachable_api_is_send_failed() {
        let ch = channel(&["*"]).with_api_base("http://127.0.0.1:9");
        let err = ch
            .send_photo_bytes("100", vec![0x89, b'P', b'N', b'G'], "p.png", Some("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::SendFailed { .. }));
    }

    #[tokio::test]
    async fn notice_to_unreachable_api_is_send_failed() {
        let ch = channel(&["*"]).with_api_base("http://127.0.0.1:9");
        let err = ch.send_notice("100", keys::GREETING).await.unwrap_err();
        assert!(err.to_string().contains("sendMessage"));
    }
}
