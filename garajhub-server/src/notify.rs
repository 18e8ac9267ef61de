//! Outbound notifications.
//!
//! The moderation core never talks to Telegram directly. It builds a
//! [`Notification`] and hands it to a [`Notifier`] together with a
//! [`Recipient`]. Delivery is best-effort: callers log failures and move on.
//!
//! Buttons attached to a notification are [`Action`]s. Callback actions
//! encode to short `kind:id` strings that come back verbatim when the
//! button is pressed, and [`Action::parse`] turns them back into actions.

use async_trait::async_trait;
use garajhub_telegram::{BotClient, InlineKeyboardButton, InlineKeyboardMarkup, ReplyMarkup};

use crate::moderation::types::{Startup, User};

/// Who a notification goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipient {
    User(i64),
    /// The public announcement channel.
    Channel,
}

/// A button the recipient can press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ApproveStartup(i64),
    RejectStartup(i64),
    JoinStartup(i64),
    AcceptJoin(i64),
    RejectJoin(i64),
    OpenUrl { label: String, url: String },
}

impl Action {
    pub fn label(&self) -> &str {
        match self {
            Action::ApproveStartup(_) => "✅ Approve",
            Action::RejectStartup(_) => "❌ Reject",
            Action::JoinStartup(_) => "🤝 Join",
            Action::AcceptJoin(_) => "✅ Accept",
            Action::RejectJoin(_) => "❌ Decline",
            Action::OpenUrl { label, .. } => label,
        }
    }

    /// Callback payload, or `None` for link buttons.
    pub fn callback_data(&self) -> Option<String> {
        let (kind, id) = match self {
            Action::ApproveStartup(id) => ("admin_approve", id),
            Action::RejectStartup(id) => ("admin_reject", id),
            Action::JoinStartup(id) => ("join", id),
            Action::AcceptJoin(id) => ("join_accept", id),
            Action::RejectJoin(id) => ("join_reject", id),
            Action::OpenUrl { .. } => return None,
        };
        Some(format!("{kind}:{id}"))
    }

    /// Inverse of [`Action::callback_data`].
    pub fn parse(data: &str) -> Option<Action> {
        let (kind, id) = data.split_once(':')?;
        let id: i64 = id.parse().ok()?;
        match kind {
            "admin_approve" => Some(Action::ApproveStartup(id)),
            "admin_reject" => Some(Action::RejectStartup(id)),
            "join" => Some(Action::JoinStartup(id)),
            "join_accept" => Some(Action::AcceptJoin(id)),
            "join_reject" => Some(Action::RejectJoin(id)),
            _ => None,
        }
    }

    pub fn to_button(&self) -> InlineKeyboardButton {
        match self {
            Action::OpenUrl { label, url } => InlineKeyboardButton::url(label, url),
            other => InlineKeyboardButton::callback(
                other.label(),
                other.callback_data().unwrap_or_default(),
            ),
        }
    }
}

/// An outbound message: HTML text, an optional photo, optional buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    pub text: String,
    pub photo: Option<String>,
    pub actions: Vec<Action>,
}

impl Notification {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_photo(mut self, photo: Option<String>) -> Self {
        self.photo = photo;
        self
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    /// Inline keyboard for the actions: callback buttons share a row,
    /// each link gets its own.
    pub fn keyboard(&self) -> Option<ReplyMarkup> {
        let (links, callbacks): (Vec<_>, Vec<_>) = self
            .actions
            .iter()
            .partition(|a| matches!(a, Action::OpenUrl { .. }));
        let mut markup =
            InlineKeyboardMarkup::default().row(callbacks.iter().map(|a| a.to_button()).collect());
        for link in links {
            markup = markup.row(vec![link.to_button()]);
        }
        (!markup.is_empty()).then(|| markup.into())
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: Recipient, notification: &Notification) -> anyhow::Result<()>;
}

/// Delivers notifications through the Telegram Bot API.
pub struct TelegramNotifier {
    client: BotClient,
    channel: String,
}

impl TelegramNotifier {
    pub fn new(client: BotClient, channel: impl Into<String>) -> Self {
        Self {
            client,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, recipient: Recipient, notification: &Notification) -> anyhow::Result<()> {
        let chat = match recipient {
            Recipient::User(id) => garajhub_telegram::ChatId::from(id),
            Recipient::Channel => garajhub_telegram::ChatId::from(self.channel.as_str()),
        };
        let markup = notification.keyboard();

        if let Some(photo) = notification.photo.as_deref() {
            match self
                .client
                .send_photo(chat.clone(), photo, &notification.text, markup.as_ref())
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    tracing::debug!(?recipient, error = %e, "sendPhoto failed, falling back to text");
                }
            }
        }
        self.client
            .send_message(chat, &notification.text, markup.as_ref())
            .await?;
        Ok(())
    }
}

/// Logs notifications instead of sending them. Used when no bot token is set.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: Recipient, notification: &Notification) -> anyhow::Result<()> {
        tracing::info!(
            ?recipient,
            actions = notification.actions.len(),
            "notification: {}",
            notification.text
        );
        Ok(())
    }
}

// ── Message texts ──────────────────────────────────────────────────────

/// Escape the three characters Telegram's HTML parse mode cares about.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

fn or_dash(value: &str) -> String {
    if value.trim().is_empty() {
        "-".to_string()
    } else {
        escape_html(value)
    }
}

/// Sent to the administrator when a new startup is submitted.
pub fn review_request(startup: &Startup, owner: Option<&User>) -> Notification {
    let owner_line = match owner {
        Some(u) if !u.username.is_empty() => {
            format!("{} (@{})", escape_html(&u.display_name()), escape_html(&u.username))
        }
        Some(u) => escape_html(&u.display_name()),
        None => startup.owner_id.to_string(),
    };
    let text = format!(
        "🆕 <b>New startup for review</b>\n\n\
         <b>{}</b>\n{}\n\n\
         👤 Owner: {owner_line}\n🔗 Group: {}\n🆔 {}",
        escape_html(&startup.name),
        escape_html(&startup.description),
        escape_html(&startup.group_link),
        startup.startup_id,
    );
    Notification::new(text)
        .with_photo(startup.logo.clone())
        .with_actions(vec![
            Action::ApproveStartup(startup.startup_id),
            Action::RejectStartup(startup.startup_id),
        ])
}

pub fn startup_approved(startup: &Startup) -> Notification {
    Notification::new(format!(
        "🎉 Your startup <b>{}</b> was approved and published in the channel.",
        escape_html(&startup.name)
    ))
}

pub fn startup_rejected(startup: &Startup) -> Notification {
    Notification::new(format!(
        "😔 Your startup <b>{}</b> was not approved.",
        escape_html(&startup.name)
    ))
}

/// The public announcement, ending in a join call-to-action.
pub fn channel_post(startup: &Startup, join: Action) -> Notification {
    let text = format!(
        "🚀 <b>{}</b>\n\n{}\n\n👤 Founder: {}",
        escape_html(&startup.name),
        escape_html(&startup.description),
        or_dash(&startup.owner_name),
    );
    Notification::new(text)
        .with_photo(startup.logo.clone())
        .with_actions(vec![join])
}

/// Sent to the owner when someone asks to join.
pub fn join_request(startup: &Startup, applicant: &User, request_id: i64) -> Notification {
    let username = if applicant.username.is_empty() {
        "-".to_string()
    } else {
        format!("@{}", escape_html(&applicant.username))
    };
    let text = format!(
        "📥 <b>New join request</b> for <b>{}</b>\n\n\
         👤 {}\n📱 {username}\n📞 {}\n⚧ {}\n🎂 {}\n📝 {}",
        escape_html(&startup.name),
        or_dash(&applicant.display_name()),
        or_dash(&applicant.phone),
        or_dash(&applicant.gender),
        or_dash(&applicant.birth_date),
        or_dash(&applicant.bio),
    );
    Notification::new(text).with_actions(vec![
        Action::AcceptJoin(request_id),
        Action::RejectJoin(request_id),
    ])
}

pub fn join_accepted(startup: &Startup) -> Notification {
    Notification::new(format!(
        "✅ Your request to join <b>{}</b> was accepted.\n\nGroup: {}",
        escape_html(&startup.name),
        escape_html(&startup.group_link)
    ))
    .with_actions(vec![Action::OpenUrl {
        label: "👥 Open group".to_string(),
        url: startup.group_link.clone(),
    }])
}

pub fn join_rejected(startup: &Startup) -> Notification {
    Notification::new(format!(
        "❌ Your request to join <b>{}</b> was declined.",
        escape_html(&startup.name)
    ))
}

pub fn startup_completed(startup: &Startup) -> Notification {
    let results = startup
        .results
        .as_deref()
        .map(|r| format!("\n\n📊 Results: {}", escape_html(r)))
        .unwrap_or_default();
    Notification::new(format!(
        "🏁 <b>{}</b> has been completed.{results}",
        escape_html(&startup.name)
    ))
}
