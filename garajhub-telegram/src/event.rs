//! Events emitted by the poller for the bot layer to consume.

use crate::types::{Update, User};

/// What the bot layer sees of an incoming update.
#[derive(Debug, Clone)]
pub enum Event {
    /// A message in a private chat (text, photo, or both).
    Message {
        from: User,
        chat_id: i64,
        message_id: i64,
        text: Option<String>,
        /// File id of the largest attached photo.
        photo: Option<String>,
    },

    /// An inline keyboard button was pressed.
    Callback {
        id: String,
        from: User,
        chat_id: Option<i64>,
        message_id: Option<i64>,
        data: String,
    },

    /// Polling failed; the poller keeps retrying with backoff.
    PollFailed { reason: String },
}

impl Event {
    /// Flatten an update. Updates of kinds the bot does not handle yield `None`.
    pub fn from_update(update: Update) -> Option<Event> {
        if let Some(msg) = update.message {
            let from = msg.from.clone()?;
            let photo = msg.largest_photo().map(str::to_string);
            let text = msg.text.or(msg.caption);
            return Some(Event::Message {
                from,
                chat_id: msg.chat.id,
                message_id: msg.message_id,
                text,
                photo,
            });
        }

        if let Some(cb) = update.callback_query {
            let data = cb.data?;
            return Some(Event::Callback {
                id: cb.id,
                from: cb.from,
                chat_id: cb.message.as_ref().map(|m| m.chat.id),
                message_id: cb.message.as_ref().map(|m| m.message_id),
                data,
            });
        }

        None
    }
}
