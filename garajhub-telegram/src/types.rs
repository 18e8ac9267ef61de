//! Bot API wire types.
//!
//! Only the fields garajhub reads are modelled; serde ignores the rest.

use serde::{Deserialize, Serialize};

/// Envelope every Bot API method answers with.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    /// Telegram sends every resolution of a photo, smallest first.
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
}

impl Message {
    /// File id of the largest photo size, if the message carries a photo.
    pub fn largest_photo(&self) -> Option<&str> {
        self.photo
            .as_ref()
            .and_then(|sizes| sizes.iter().max_by_key(|p| p.width * p.height))
            .map(|p| p.file_id.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: String,
    pub user: User,
}

impl ChatMember {
    /// Whether the member currently belongs to the chat.
    pub fn is_subscribed(&self) -> bool {
        matches!(self.status.as_str(), "member" | "administrator" | "creator")
    }
}

/// Target chat: numeric id or `@channelusername`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ChatId {
    Id(i64),
    Username(String),
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        ChatId::Id(id)
    }
}

impl From<&str> for ChatId {
    fn from(name: &str) -> Self {
        ChatId::Username(name.to_string())
    }
}

impl From<String> for ChatId {
    fn from(name: String) -> Self {
        ChatId::Username(name)
    }
}

// ─── Keyboards ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InlineKeyboardButton {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: Some(data.into()),
            url: None,
        }
    }

    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: None,
            url: Some(url.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl InlineKeyboardMarkup {
    /// Append a row of buttons. Empty rows are dropped.
    pub fn row(mut self, buttons: Vec<InlineKeyboardButton>) -> Self {
        if !buttons.is_empty() {
            self.inline_keyboard.push(buttons);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.inline_keyboard.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KeyboardButton {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReplyKeyboardMarkup {
    pub keyboard: Vec<Vec<KeyboardButton>>,
    pub resize_keyboard: bool,
}

impl ReplyKeyboardMarkup {
    pub fn new(rows: Vec<Vec<&str>>) -> Self {
        Self {
            keyboard: rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|text| KeyboardButton { text: text.to_string() })
                        .collect()
                })
                .collect(),
            resize_keyboard: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ReplyMarkup {
    Inline(InlineKeyboardMarkup),
    Keyboard(ReplyKeyboardMarkup),
}

impl From<InlineKeyboardMarkup> for ReplyMarkup {
    fn from(markup: InlineKeyboardMarkup) -> Self {
        ReplyMarkup::Inline(markup)
    }
}

impl From<ReplyKeyboardMarkup> for ReplyMarkup {
    fn from(markup: ReplyKeyboardMarkup) -> Self {
        ReplyMarkup::Keyboard(markup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_text_update() {
        let raw = r#"{
            "update_id": 10,
            "message": {
                "message_id": 5,
                "from": {"id": 42, "is_bot": false, "first_name": "Ali", "username": "ali"},
                "chat": {"id": 42, "type": "private"},
                "date": 1700000000,
                "text": "/start join_7"
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        let msg = update.message.unwrap();
        assert_eq!(msg.chat.id, 42);
        assert_eq!(msg.text.as_deref(), Some("/start join_7"));
        assert_eq!(msg.from.unwrap().username.as_deref(), Some("ali"));
        assert!(update.callback_query.is_none());
    }

    #[test]
    fn largest_photo_wins() {
        let raw = r#"{
            "message_id": 1,
            "chat": {"id": 1, "type": "private"},
            "photo": [
                {"file_id": "small", "width": 90, "height": 90},
                {"file_id": "big", "width": 800, "height": 800},
                {"file_id": "mid", "width": 320, "height": 320}
            ]
        }"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.largest_photo(), Some("big"));
    }

    #[test]
    fn error_envelope_has_no_result() {
        let raw = r#"{"ok": false, "error_code": 403, "description": "Forbidden: bot was blocked by the user"}"#;
        let resp: ApiResponse<Message> = serde_json::from_str(raw).unwrap();
        assert!(!resp.ok);
        assert!(resp.result.is_none());
        assert_eq!(resp.error_code, Some(403));
    }

    #[test]
    fn chat_id_serializes_untagged() {
        assert_eq!(serde_json::to_value(ChatId::from(5)).unwrap(), serde_json::json!(5));
        assert_eq!(
            serde_json::to_value(ChatId::from("@chan")).unwrap(),
            serde_json::json!("@chan")
        );
    }

    #[test]
    fn inline_button_omits_unused_fields() {
        let markup = InlineKeyboardMarkup::default()
            .row(vec![InlineKeyboardButton::callback("Approve", "admin_approve:3")])
            .row(vec![])
            .row(vec![InlineKeyboardButton::url("Open", "https://t.me/x")]);
        let json = serde_json::to_value(ReplyMarkup::from(markup)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "inline_keyboard": [
                    [{"text": "Approve", "callback_data": "admin_approve:3"}],
                    [{"text": "Open", "url": "https://t.me/x"}]
                ]
            })
        );
    }

    #[test]
    fn chat_member_subscription() {
        let raw = r#"{"status": "left", "user": {"id": 1, "first_name": "A"}}"#;
        let member: ChatMember = serde_json::from_str(raw).unwrap();
        assert!(!member.is_subscribed());
        let raw = r#"{"status": "creator", "user": {"id": 1, "first_name": "A"}}"#;
        let member: ChatMember = serde_json::from_str(raw).unwrap();
        assert!(member.is_subscribed());
    }
}
