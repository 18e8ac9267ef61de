//! Bot API client and long-polling loop.
//!
//! `BotClient` is cheap to clone (the underlying `reqwest::Client` is
//! reference counted), so the poller, the bot and the notifier can each
//! hold their own copy.
//!
//! ## Polling
//!
//! [`spawn_poller`] runs `getUpdates` in a background task and forwards each
//! update as an [`Event`]. Failures are reported as [`Event::PollFailed`] and
//! retried with exponential backoff (1→2→4→…→30s cap). The task stops when
//! the receiver is dropped.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::event::Event;
use crate::types::{ApiResponse, ChatId, ChatMember, Message, ReplyMarkup, Update, User};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),
    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("Malformed response from {0}")]
    Decode(String),
}

// Request URLs embed the bot token, so they are stripped before the error
// can reach a log line.
impl From<reqwest::Error> for TelegramError {
    fn from(err: reqwest::Error) -> Self {
        TelegramError::Http(err.without_url())
    }
}

/// Telegram Bot API client.
#[derive(Clone)]
pub struct BotClient {
    token: String,
    base_url: String,
    http: reqwest::Client,
}

// The token is a credential; keep it out of logs.
impl std::fmt::Debug for BotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: &'static [&'static str],
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a ChatId,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a ReplyMarkup>,
}

#[derive(Serialize)]
struct SendPhoto<'a> {
    chat_id: &'a ChatId,
    photo: &'a str,
    caption: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a ReplyMarkup>,
}

#[derive(Serialize)]
struct AnswerCallbackQuery<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    show_alert: bool,
}

#[derive(Serialize)]
struct DeleteMessage<'a> {
    chat_id: &'a ChatId,
    message_id: i64,
}

#[derive(Serialize)]
struct GetChatMember<'a> {
    chat_id: &'a ChatId,
    user_id: i64,
}

impl BotClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: DEFAULT_API_BASE.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Point the client at a different API host (local Bot API server, tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn call<P, R>(&self, method: &str, params: &P, timeout: Duration) -> Result<R, TelegramError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .json(params)
            .send()
            .await?;

        let body: ApiResponse<R> = resp.json().await?;
        if !body.ok {
            return Err(TelegramError::Api {
                code: body.error_code.unwrap_or_default(),
                description: body.description.unwrap_or_default(),
            });
        }
        body.result
            .ok_or_else(|| TelegramError::Decode(method.to_string()))
    }

    /// The bot's own account (used to learn its username for deep links).
    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", &serde_json::json!({}), REQUEST_TIMEOUT).await
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, TelegramError> {
        let params = GetUpdates {
            offset,
            timeout: timeout_secs,
            allowed_updates: &["message", "callback_query"],
        };
        // The HTTP timeout has to outlive the server-side long poll.
        let http_timeout = Duration::from_secs(timeout_secs) + Duration::from_secs(10);
        self.call("getUpdates", &params, http_timeout).await
    }

    /// Send an HTML-formatted text message.
    pub async fn send_message(
        &self,
        chat_id: impl Into<ChatId>,
        text: &str,
        markup: Option<&ReplyMarkup>,
    ) -> Result<Message, TelegramError> {
        let chat_id = chat_id.into();
        let params = SendMessage {
            chat_id: &chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
            reply_markup: markup,
        };
        self.call("sendMessage", &params, REQUEST_TIMEOUT).await
    }

    /// Send a photo (by file id or URL) with an HTML caption.
    pub async fn send_photo(
        &self,
        chat_id: impl Into<ChatId>,
        photo: &str,
        caption: &str,
        markup: Option<&ReplyMarkup>,
    ) -> Result<Message, TelegramError> {
        let chat_id = chat_id.into();
        let params = SendPhoto {
            chat_id: &chat_id,
            photo,
            caption,
            parse_mode: "HTML",
            reply_markup: markup,
        };
        self.call("sendPhoto", &params, REQUEST_TIMEOUT).await
    }

    /// Acknowledge a button press, optionally with a toast or alert.
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<bool, TelegramError> {
        let params = AnswerCallbackQuery {
            callback_query_id,
            text,
            show_alert,
        };
        self.call("answerCallbackQuery", &params, REQUEST_TIMEOUT).await
    }

    pub async fn delete_message(
        &self,
        chat_id: impl Into<ChatId>,
        message_id: i64,
    ) -> Result<bool, TelegramError> {
        let chat_id = chat_id.into();
        let params = DeleteMessage {
            chat_id: &chat_id,
            message_id,
        };
        self.call("deleteMessage", &params, REQUEST_TIMEOUT).await
    }

    pub async fn get_chat_member(
        &self,
        chat_id: impl Into<ChatId>,
        user_id: i64,
    ) -> Result<ChatMember, TelegramError> {
        let chat_id = chat_id.into();
        let params = GetChatMember {
            chat_id: &chat_id,
            user_id,
        };
        self.call("getChatMember", &params, REQUEST_TIMEOUT).await
    }
}

/// Long-polling settings.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Server-side long-poll timeout in seconds.
    pub timeout_secs: u64,
    /// Capacity of the event channel.
    pub buffer: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 50,
            buffer: 1024,
        }
    }
}

/// Start polling in a background task. Returns the event receiver.
pub fn spawn_poller(client: BotClient, config: PollConfig) -> mpsc::Receiver<Event> {
    let (event_tx, event_rx) = mpsc::channel(config.buffer);

    tokio::spawn(async move {
        let mut offset = 0i64;
        let mut backoff = Duration::from_secs(1);
        loop {
            match client.get_updates(offset, config.timeout_secs).await {
                Ok(updates) => {
                    backoff = Duration::from_secs(1);
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let Some(event) = Event::from_update(update) else {
                            continue;
                        };
                        if event_tx.send(event).await.is_err() {
                            tracing::debug!("Event receiver dropped, stopping poller");
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, backoff_secs = backoff.as_secs(), "getUpdates failed");
                    let failed = Event::PollFailed {
                        reason: e.to_string(),
                    };
                    if event_tx.send(failed).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    });

    event_rx
}
