//! garajhub-telegram: a small client for the Telegram Bot HTTP API.
//!
//! Covers what the garajhub bot needs and nothing more:
//! - `types`: serde structures for updates, messages and keyboards
//! - `client`: `BotClient` for outbound calls and the long-polling task
//! - `event`: the flattened events the poller hands to consumers

pub mod client;
pub mod event;
pub mod types;

pub use client::{BotClient, PollConfig, TelegramError, spawn_poller};
pub use event::Event;
pub use types::{
    ChatId, ChatMember, InlineKeyboardButton, InlineKeyboardMarkup, ReplyKeyboardMarkup, ReplyMarkup,
    User,
};
