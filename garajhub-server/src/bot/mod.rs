//! Telegram chat surface.
//!
//! Consumes [`Event`]s from the poller and maps them onto [`Coordinator`]
//! operations. The bot keeps no moderation state of its own: the only
//! thing it remembers between messages is the per-user [`Conversations`].

pub mod callbacks;
pub mod commands;
pub mod conversation;
pub mod views;

use std::sync::Arc;

use anyhow::Result;
use garajhub_telegram::{BotClient, Event, ReplyMarkup, User};
use tokio::sync::mpsc;

use self::callbacks::Callback;
use self::commands::Command;
use self::conversation::{Conversations, Flow, Input, Step};
use self::views::View;
use crate::moderation::types::{JoinDecision, ProfileField, StartupStatus, StatusFilter};
use crate::moderation::{Coordinator, ModerationError};
use crate::notify::{Action, escape_html};

const PENDING_PER_PAGE: i64 = 10;

/// Chat-surface settings that the coordinator does not need.
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub channel: String,
    pub public_url: String,
    pub require_subscription: bool,
}

pub struct Bot {
    client: BotClient,
    coordinator: Arc<Coordinator>,
    conversations: Conversations,
    settings: BotSettings,
}

impl Bot {
    pub fn new(client: BotClient, coordinator: Arc<Coordinator>, settings: BotSettings) -> Self {
        Self {
            client,
            coordinator,
            conversations: Conversations::new(),
            settings,
        }
    }

    /// Handle events until the poller goes away.
    pub async fn run(&self, mut events: mpsc::Receiver<Event>) {
        tracing::info!("Bot running");
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle_event(event).await {
                tracing::error!(error = %e, "Event handler error");
            }
        }
        tracing::warn!("Event channel closed, bot stopping");
    }

    async fn handle_event(&self, event: Event) -> Result<()> {
        match event {
            Event::PollFailed { reason } => {
                tracing::debug!(%reason, "Poll failed");
                Ok(())
            }
            Event::Message {
                from,
                chat_id,
                text,
                photo,
                ..
            } => {
                // Private chats only.
                if chat_id != from.id {
                    return Ok(());
                }
                self.register(&from);
                if !self.passes_gate(from.id).await {
                    return self.show(chat_id, views::subscription_required(&self.settings.channel)).await;
                }
                self.handle_message(&from, text.as_deref(), photo.as_deref()).await
            }
            Event::Callback {
                id,
                from,
                chat_id,
                message_id,
                data,
            } => {
                let chat = chat_id.unwrap_or(from.id);
                let Some(callback) = Callback::parse(&data) else {
                    tracing::debug!(%data, "Unknown callback");
                    self.client.answer_callback_query(&id, None, false).await?;
                    return Ok(());
                };
                self.register(&from);
                if callback != Callback::CheckSubscription && !self.passes_gate(from.id).await {
                    self.client
                        .answer_callback_query(&id, Some("Please subscribe to the channel first."), true)
                        .await?;
                    return Ok(());
                }
                let resolves_buttons = matches!(
                    callback,
                    Callback::Moderation(
                        Action::ApproveStartup(_)
                            | Action::RejectStartup(_)
                            | Action::AcceptJoin(_)
                            | Action::RejectJoin(_)
                    )
                );
                let handled = self.handle_callback(&id, &from, chat, callback).await?;
                // A decided review or join request should not offer its buttons again.
                if handled && resolves_buttons {
                    if let Some(message_id) = message_id {
                        if let Err(e) = self.client.delete_message(chat, message_id).await {
                            tracing::debug!(error = %e, "Failed to delete decided message");
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn register(&self, from: &User) {
        let username = from.username.as_deref().unwrap_or("");
        if let Err(e) = self.coordinator.register_user(from.id, username, &from.first_name) {
            tracing::error!(user_id = from.id, error = %e, "Failed to register user");
        }
    }

    async fn passes_gate(&self, user_id: i64) -> bool {
        if !self.settings.require_subscription || self.coordinator.is_admin(user_id).unwrap_or(false) {
            return true;
        }
        self.is_subscribed(user_id).await
    }

    async fn is_subscribed(&self, user_id: i64) -> bool {
        match self
            .client
            .get_chat_member(self.settings.channel.as_str(), user_id)
            .await
        {
            Ok(member) => member.is_subscribed(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Subscription check failed");
                false
            }
        }
    }

    // ─── Messages ────────────────────────────────────────────────────────

    async fn handle_message(&self, from: &User, text: Option<&str>, photo: Option<&str>) -> Result<()> {
        let chat = from.id;

        if let Some(cmd) = text.and_then(Command::parse) {
            // Any command abandons a half-filled flow.
            let abandoned = self.conversations.cancel(chat);
            return self.handle_command(from, cmd, abandoned).await;
        }

        match self.conversations.advance(chat, Input { text, photo }) {
            Some(step) => self.handle_step(from, step).await,
            None => {
                let is_admin = self.coordinator.is_admin(chat).unwrap_or(false);
                self.say(chat, "Use the menu below 👇", Some(views::main_menu(is_admin)))
                    .await
            }
        }
    }

    async fn handle_command(&self, from: &User, cmd: Command, abandoned: bool) -> Result<()> {
        let chat = from.id;
        let is_admin = self.coordinator.is_admin(chat).unwrap_or(false);

        match cmd {
            Command::Start { join } => {
                self.show(chat, views::welcome(&from.first_name, is_admin)).await?;
                if let Some(startup_id) = join {
                    match self.coordinator.request_join(startup_id, chat).await {
                        Ok(_) => self.say(chat, "📨 Your request was sent to the founder.", None).await?,
                        Err(e) => self.report(chat, &e).await?,
                    }
                }
                Ok(())
            }
            Command::Help => self.show(chat, views::help()).await,
            Command::Cancel => {
                let text = if abandoned { "❌ Cancelled." } else { "Nothing to cancel." };
                self.say(chat, text, Some(views::main_menu(is_admin))).await
            }
            Command::AdminLink => {
                if is_admin {
                    self.show(chat, views::admin_link(&self.settings.public_url)).await
                } else {
                    self.report(chat, &not_admin()).await
                }
            }
            Command::Profile => match self.coordinator.user(chat) {
                Ok(user) => self.show(chat, views::profile(&user)).await,
                Err(e) => self.report(chat, &e).await,
            },
            Command::Startups => self.browse(chat, 1).await,
            Command::MyStartups => match self.coordinator.my_startups(chat) {
                Ok(list) => self.show(chat, views::my_startups(&list)).await,
                Err(e) => self.report(chat, &e).await,
            },
            Command::CreateStartup => self.start_flow(chat, Flow::create_startup(chat)).await,
            Command::AdminPanel => {
                if is_admin {
                    self.show(chat, views::admin_panel()).await
                } else {
                    self.report(chat, &not_admin()).await
                }
            }
        }
    }

    async fn handle_step(&self, from: &User, step: Step) -> Result<()> {
        let chat = from.id;
        match step {
            Step::Prompt(text) | Step::Retry(text) => self.say(chat, text, None).await,
            Step::SubmitStartup(draft) => match self.coordinator.submit_for_review(draft).await {
                Ok(startup) => {
                    let text = format!(
                        "✅ <b>{}</b> was submitted for review. You will be notified once the administrator decides.",
                        escape_html(&startup.name)
                    );
                    self.say(chat, &text, None).await
                }
                Err(e) => self.report(chat, &e).await,
            },
            Step::SaveProfile(field, value) => self.save_profile(chat, field, &value).await,
            Step::Broadcast(text) => {
                self.say(chat, "📤 Sending...", None).await?;
                // A broadcast can take a while; do not stall the event loop.
                let coordinator = self.coordinator.clone();
                let client = self.client.clone();
                tokio::spawn(async move {
                    let reply = match coordinator.broadcast(&text, chat).await {
                        Ok(report) => format!(
                            "✅ <b>Broadcast finished</b>\n\nSent: {}\nFailed: {}",
                            report.sent, report.failed
                        ),
                        Err(e) => format!("⚠️ {}", escape_html(&e.user_message())),
                    };
                    if let Err(e) = client.send_message(chat, &reply, None).await {
                        tracing::warn!(user_id = chat, error = %e, "Failed to report broadcast result");
                    }
                });
                Ok(())
            }
            Step::Complete {
                startup_id,
                results,
            } => match self
                .coordinator
                .complete_startup(startup_id, chat, results.as_deref())
                .await
            {
                Ok(startup) => {
                    let text = format!("🏁 <b>{}</b> is now completed.", escape_html(&startup.name));
                    self.say(chat, &text, None).await
                }
                Err(e) => self.report(chat, &e).await,
            },
        }
    }

    // ─── Callbacks ───────────────────────────────────────────────────────

    /// Returns whether the callback's operation succeeded.
    async fn handle_callback(&self, id: &str, from: &User, chat: i64, callback: Callback) -> Result<bool> {
        let user_id = from.id;
        let outcome: Result<Option<String>, ModerationError> = match callback {
            Callback::Moderation(action) => self.moderate(user_id, action).await,
            Callback::Browse(page) => {
                self.browse(chat, page).await?;
                Ok(None)
            }
            Callback::MyStartup(startup_id) => match self.coordinator.startup(startup_id) {
                Ok(s) if s.owner_id != user_id => Err(ModerationError::Unauthorized(
                    "this is not your startup".into(),
                )),
                Ok(s) => match self.coordinator.member_count(startup_id) {
                    Ok(count) => {
                        self.show(chat, views::my_startup_detail(&s, count)).await?;
                        Ok(None)
                    }
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            },
            Callback::Complete(startup_id) => match self.coordinator.startup(startup_id) {
                Ok(s) if s.owner_id != user_id => Err(ModerationError::Unauthorized(
                    "only the owner can complete this startup".into(),
                )),
                Ok(s) if s.status != StartupStatus::Active => Err(ModerationError::InvalidState(
                    format!("\"{}\" is {} and cannot be completed", s.name, s.status),
                )),
                Ok(_) => {
                    self.start_flow(chat, Flow::CompleteResults(startup_id)).await?;
                    Ok(None)
                }
                Err(e) => Err(e),
            },
            Callback::Members(startup_id) => {
                match (
                    self.coordinator.startup(startup_id),
                    self.coordinator.list_members(startup_id, user_id),
                ) {
                    (Ok(s), Ok(members)) => {
                        self.show(chat, views::members(&s, &members)).await?;
                        Ok(None)
                    }
                    (Err(e), _) | (_, Err(e)) => Err(e),
                }
            }
            Callback::PendingPage(page) => {
                if self.coordinator.is_admin(user_id).unwrap_or(false) {
                    match self.coordinator.list_startups(
                        StatusFilter::Only(StartupStatus::Pending),
                        page,
                        PENDING_PER_PAGE,
                    ) {
                        Ok(p) => {
                            self.show(chat, views::pending_queue(&p)).await?;
                            Ok(None)
                        }
                        Err(e) => Err(e),
                    }
                } else {
                    Err(not_admin())
                }
            }
            Callback::AdminStats => {
                if self.coordinator.is_admin(user_id).unwrap_or(false) {
                    match self.coordinator.statistics() {
                        Ok(stats) => {
                            self.client
                                .answer_callback_query(id, Some(&views::stats(&stats)), true)
                                .await?;
                            return Ok(true);
                        }
                        Err(e) => Err(e),
                    }
                } else {
                    Err(not_admin())
                }
            }
            Callback::AdminBroadcast => {
                if self.coordinator.is_admin(user_id).unwrap_or(false) {
                    self.start_flow(chat, Flow::Broadcast).await?;
                    Ok(None)
                } else {
                    Err(not_admin())
                }
            }
            Callback::EditProfile(ProfileField::Gender) => {
                self.show(chat, views::gender_choice()).await?;
                Ok(None)
            }
            Callback::EditProfile(field) => {
                self.start_flow(chat, Flow::EditProfile(field)).await?;
                Ok(None)
            }
            Callback::Gender(gender) => {
                self.save_profile(chat, ProfileField::Gender, gender).await?;
                Ok(None)
            }
            Callback::CheckSubscription => {
                if self.is_subscribed(user_id).await {
                    let is_admin = self.coordinator.is_admin(user_id).unwrap_or(false);
                    self.show(chat, views::welcome(&from.first_name, is_admin)).await?;
                    Ok(Some("✅ Subscription confirmed!".to_string()))
                } else {
                    self.client
                        .answer_callback_query(id, Some("Please subscribe to the channel first."), true)
                        .await?;
                    return Ok(false);
                }
            }
            Callback::MainMenu => {
                let is_admin = self.coordinator.is_admin(user_id).unwrap_or(false);
                self.show(chat, views::welcome(&from.first_name, is_admin)).await?;
                Ok(None)
            }
        };

        match outcome {
            Ok(toast) => {
                self.client
                    .answer_callback_query(id, toast.as_deref(), false)
                    .await?;
                Ok(true)
            }
            Err(e) => {
                if let ModerationError::Store(err) = &e {
                    tracing::error!(user_id, error = %err, "Callback failed in store");
                }
                self.client
                    .answer_callback_query(id, Some(&e.user_message()), true)
                    .await?;
                Ok(false)
            }
        }
    }

    /// Approve/reject/join buttons. Returns the toast to show on success.
    async fn moderate(&self, user_id: i64, action: Action) -> Result<Option<String>, ModerationError> {
        let toast = match action {
            Action::ApproveStartup(startup_id) => {
                let s = self.coordinator.approve(startup_id, user_id).await?;
                format!("✅ \"{}\" approved and published", s.name)
            }
            Action::RejectStartup(startup_id) => {
                let s = self.coordinator.reject(startup_id, user_id).await?;
                format!("❌ \"{}\" rejected", s.name)
            }
            Action::JoinStartup(startup_id) => {
                self.coordinator.request_join(startup_id, user_id).await?;
                "📨 Your request was sent to the founder".to_string()
            }
            Action::AcceptJoin(request_id) => {
                self.coordinator
                    .decide_join(request_id, user_id, JoinDecision::Accept)
                    .await?;
                "✅ Accepted, the group link was sent".to_string()
            }
            Action::RejectJoin(request_id) => {
                self.coordinator
                    .decide_join(request_id, user_id, JoinDecision::Reject)
                    .await?;
                "❌ Request declined".to_string()
            }
            Action::OpenUrl { .. } => return Ok(None),
        };
        Ok(Some(toast))
    }

    // ─── Helpers ─────────────────────────────────────────────────────────

    async fn browse(&self, chat: i64, page: i64) -> Result<()> {
        match self
            .coordinator
            .list_startups(StatusFilter::Only(StartupStatus::Active), page, 1)
        {
            Ok(p) => {
                let join = match p.data.first() {
                    Some(s) => {
                        self.coordinator.record_view(s.startup_id);
                        Action::JoinStartup(s.startup_id)
                    }
                    None => Action::JoinStartup(0),
                };
                self.show(chat, views::startup_card(&p, join)).await
            }
            Err(e) => self.report(chat, &e).await,
        }
    }

    async fn save_profile(&self, chat: i64, field: ProfileField, value: &str) -> Result<()> {
        match self.coordinator.update_profile(chat, field, value) {
            Ok(user) => {
                self.say(chat, "✅ Saved.", None).await?;
                self.show(chat, views::profile(&user)).await
            }
            Err(e) => self.report(chat, &e).await,
        }
    }

    async fn start_flow(&self, chat: i64, flow: Flow) -> Result<()> {
        let prompt = flow.first_prompt();
        self.conversations.start(chat, flow);
        self.say(chat, prompt, None).await
    }

    async fn say(&self, chat: i64, text: &str, markup: Option<ReplyMarkup>) -> Result<()> {
        self.client.send_message(chat, text, markup.as_ref()).await?;
        Ok(())
    }

    async fn show(&self, chat: i64, view: View) -> Result<()> {
        if let Some(photo) = view.photo.as_deref() {
            match self
                .client
                .send_photo(chat, photo, &view.text, view.markup.as_ref())
                .await
            {
                Ok(_) => return Ok(()),
                // Captions are capped at 1024 characters; fall back to text.
                Err(e) => tracing::debug!(error = %e, "sendPhoto failed, sending text"),
            }
        }
        self.say(chat, &view.text, view.markup).await
    }

    /// Tell the user why an operation was refused.
    async fn report(&self, chat: i64, err: &ModerationError) -> Result<()> {
        if let ModerationError::Store(e) = err {
            tracing::error!(user_id = chat, error = %e, "Chat request failed in store");
        }
        let text = format!("⚠️ {}", escape_html(&err.user_message()));
        self.say(chat, &text, None).await
    }
}

fn not_admin() -> ModerationError {
    ModerationError::Unauthorized("only the administrator can do that".into())
}
