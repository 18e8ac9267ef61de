//! The one entry point both surfaces (chat and dashboard) call into.
//!
//! Every operation authorizes the actor, commits its state change to the
//! store, and only then sends notifications. A failed or slow send is
//! logged and dropped; it never undoes or fails the operation.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use super::error::{ModerationError, Result};
use super::lifecycle::StartupLifecycle;
use super::membership::{MembershipManager, RejoinPolicy};
use super::types::{
    BroadcastReport, JoinDecision, MembershipRequest, Page, ProfileField, RecentActivity, Startup,
    StartupDraft, StartupStatus, Stats, StatusFilter, User,
};
use crate::config::ServerConfig;
use crate::db::Db;
use crate::notify::{self, Action, Notification, Notifier, Recipient};

const MAX_PER_PAGE: i64 = 100;
const MAX_PROFILE_VALUE: usize = 500;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// The configured administrator. Anyone flagged `is_admin` also counts.
    pub admin_id: i64,
    pub send_timeout: Duration,
    pub broadcast_concurrency: usize,
    pub rejoin_policy: RejoinPolicy,
    pub session_ttl: Duration,
    pub admin_login_token: Option<String>,
    /// Bot username, for `t.me/<bot>?start=join_<id>` deep links.
    pub bot_username: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for CoordinatorConfig {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            admin_id: cfg.admin_id,
            send_timeout: cfg.send_timeout(),
            broadcast_concurrency: cfg.broadcast_concurrency,
            rejoin_policy: cfg.rejoin_policy,
            session_ttl: cfg.session_ttl(),
            admin_login_token: cfg.admin_login_token.clone(),
            bot_username: None,
        }
    }
}

pub struct Coordinator {
    db: Arc<Db>,
    lifecycle: StartupLifecycle,
    membership: MembershipManager,
    outbox: Outbox,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(db: Arc<Db>, notifier: Arc<dyn Notifier>, config: CoordinatorConfig) -> Self {
        Self {
            lifecycle: StartupLifecycle::new(db.clone()),
            membership: MembershipManager::new(db.clone(), config.rejoin_policy),
            db,
            outbox: Outbox {
                notifier,
                send_timeout: config.send_timeout,
                concurrency: config.broadcast_concurrency.max(1),
            },
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Flag the configured administrator in the store.
    pub fn seed_admin(&self) -> Result<()> {
        if self.config.admin_id != 0 {
            self.db.set_admin(self.config.admin_id, true)?;
            tracing::info!(user_id = self.config.admin_id, "Administrator seeded");
        }
        Ok(())
    }

    // ─── Users ───────────────────────────────────────────────────────────

    /// Record a user on first contact. Returns true if they are new.
    pub fn register_user(&self, user_id: i64, username: &str, first_name: &str) -> Result<bool> {
        let created = self.db.ensure_user(user_id, username, first_name)?;
        if created {
            tracing::info!(user_id, "New user registered");
        }
        Ok(created)
    }

    pub fn user(&self, user_id: i64) -> Result<User> {
        self.db
            .get_user(user_id)?
            .ok_or_else(|| ModerationError::NotFound(format!("user {user_id}")))
    }

    pub fn update_profile(&self, user_id: i64, field: ProfileField, value: &str) -> Result<User> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ModerationError::Validation("value cannot be empty".into()));
        }
        if value.chars().count() > MAX_PROFILE_VALUE {
            return Err(ModerationError::Validation(format!(
                "value is longer than {MAX_PROFILE_VALUE} characters"
            )));
        }
        if !self.db.update_user_field(user_id, field, value)? {
            return Err(ModerationError::NotFound(format!("user {user_id}")));
        }
        self.user(user_id)
    }

    pub fn is_admin(&self, user_id: i64) -> Result<bool> {
        if user_id != 0 && user_id == self.config.admin_id {
            return Ok(true);
        }
        Ok(self.db.get_user(user_id)?.is_some_and(|u| u.is_admin))
    }

    fn require_admin(&self, actor: i64, what: &str) -> Result<()> {
        if self.is_admin(actor)? {
            Ok(())
        } else {
            Err(ModerationError::Unauthorized(format!(
                "only the administrator can {what}"
            )))
        }
    }

    // ─── Startup lifecycle ───────────────────────────────────────────────

    /// Store a new proposal as `pending` and ask the administrator to review it.
    pub async fn submit_for_review(&self, draft: StartupDraft) -> Result<Startup> {
        let startup = self.lifecycle.create(&draft)?;
        if self.config.admin_id != 0 {
            let owner = self.db.get_user(startup.owner_id)?;
            self.outbox.deliver(
                Recipient::User(self.config.admin_id),
                &notify::review_request(&startup, owner.as_ref()),
            )
            .await;
        } else {
            tracing::warn!(startup_id = startup.startup_id, "No administrator configured to review startup");
        }
        Ok(startup)
    }

    /// `pending → active`, then tell the owner and publish to the channel.
    pub async fn approve(&self, startup_id: i64, actor: i64) -> Result<Startup> {
        self.require_admin(actor, "approve startups")?;
        let startup = self
            .lifecycle
            .transition(startup_id, StartupStatus::Active, None)?;

        self.outbox.deliver(Recipient::User(startup.owner_id), &notify::startup_approved(&startup))
            .await;
        self.outbox.deliver(
            Recipient::Channel,
            &notify::channel_post(&startup, self.join_action(startup_id)),
        )
        .await;
        Ok(startup)
    }

    /// `pending → rejected`, then tell the owner.
    pub async fn reject(&self, startup_id: i64, actor: i64) -> Result<Startup> {
        self.require_admin(actor, "reject startups")?;
        let startup = self
            .lifecycle
            .transition(startup_id, StartupStatus::Rejected, None)?;
        self.outbox.deliver(Recipient::User(startup.owner_id), &notify::startup_rejected(&startup))
            .await;
        Ok(startup)
    }

    /// `active → completed`, by the owner. Members hear about it.
    pub async fn complete_startup(
        &self,
        startup_id: i64,
        actor: i64,
        results: Option<&str>,
    ) -> Result<Startup> {
        let startup = self.lifecycle.get(startup_id)?;
        if startup.owner_id != actor {
            return Err(ModerationError::Unauthorized(
                "only the owner can complete this startup".into(),
            ));
        }
        let results = results.map(str::trim).filter(|r| !r.is_empty());
        let done = self
            .lifecycle
            .transition(startup_id, StartupStatus::Completed, results)?;

        let members: Vec<i64> = self
            .membership
            .members(startup_id)?
            .into_iter()
            .map(|u| u.user_id)
            .collect();
        // Members may be many and slow to reach; the owner does not wait.
        let outbox = self.outbox.clone();
        let notice = notify::startup_completed(&done);
        tokio::spawn(async move {
            let report = outbox.fan_out(members, &notice).await;
            tracing::info!(startup_id, sent = report.sent, failed = report.failed, "Completion notices sent");
        });
        Ok(done)
    }

    /// Join call-to-action for a channel post.
    fn join_action(&self, startup_id: i64) -> Action {
        match self.config.bot_username.as_deref() {
            Some(bot) => Action::OpenUrl {
                label: "🤝 Join".to_string(),
                url: format!("https://t.me/{bot}?start=join_{startup_id}"),
            },
            None => Action::JoinStartup(startup_id),
        }
    }

    // ─── Join requests ───────────────────────────────────────────────────

    /// Open a join request and ask the owner to decide.
    pub async fn request_join(&self, startup_id: i64, user_id: i64) -> Result<MembershipRequest> {
        let startup = self.lifecycle.get(startup_id)?;
        let applicant = self.user(user_id)?;
        let request = self.membership.request(&startup, user_id)?;
        self.outbox.deliver(
            Recipient::User(startup.owner_id),
            &notify::join_request(&startup, &applicant, request.request_id),
        )
        .await;
        Ok(request)
    }

    /// The owner accepts or rejects; the applicant is told either way.
    pub async fn decide_join(
        &self,
        request_id: i64,
        actor: i64,
        decision: JoinDecision,
    ) -> Result<MembershipRequest> {
        let request = self.membership.get(request_id)?;
        let startup = self.lifecycle.get(request.startup_id)?;
        if startup.owner_id != actor {
            return Err(ModerationError::Unauthorized(
                "only the startup owner can decide join requests".into(),
            ));
        }
        let resolved = self.membership.decide(&request, decision)?;
        let message = match decision {
            JoinDecision::Accept => notify::join_accepted(&startup),
            JoinDecision::Reject => notify::join_rejected(&startup),
        };
        self.outbox.deliver(Recipient::User(resolved.user_id), &message).await;
        Ok(resolved)
    }

    /// Accepted members; visible to the owner and administrators.
    pub fn list_members(&self, startup_id: i64, actor: i64) -> Result<Vec<User>> {
        let startup = self.lifecycle.get(startup_id)?;
        if startup.owner_id != actor && !self.is_admin(actor)? {
            return Err(ModerationError::Unauthorized(
                "only the owner can see the member list".into(),
            ));
        }
        self.membership.members(startup_id)
    }

    pub fn member_count(&self, startup_id: i64) -> Result<i64> {
        self.membership.member_count(startup_id)
    }

    // ─── Reads ───────────────────────────────────────────────────────────

    pub fn startup(&self, startup_id: i64) -> Result<Startup> {
        self.lifecycle.get(startup_id)
    }

    pub fn my_startups(&self, owner_id: i64) -> Result<Vec<Startup>> {
        self.lifecycle.by_owner(owner_id)
    }

    pub fn record_view(&self, startup_id: i64) {
        self.lifecycle.record_view(startup_id);
    }

    pub fn list_startups(&self, filter: StatusFilter, page: i64, per_page: i64) -> Result<Page<Startup>> {
        let (page, per_page) = clamp_page(page, per_page);
        self.lifecycle.list(filter, page, per_page)
    }

    pub fn list_users(&self, page: i64, per_page: i64) -> Result<Page<User>> {
        let (page, per_page) = clamp_page(page, per_page);
        let (items, total) = self.db.list_users(page, per_page)?;
        Ok(Page::new(items, total, page, per_page))
    }

    pub fn statistics(&self) -> Result<Stats> {
        Ok(self.db.statistics()?)
    }

    pub fn recent_activity(&self, limit: i64) -> Result<RecentActivity> {
        let limit = limit.clamp(1, MAX_PER_PAGE);
        Ok(RecentActivity {
            users: self.db.recent_users(limit)?,
            startups: self.db.recent_startups(limit)?,
        })
    }

    // ─── Broadcast ───────────────────────────────────────────────────────

    /// Send `message` to every known user. Individual failures are counted,
    /// never fatal.
    pub async fn broadcast(&self, message: &str, actor: i64) -> Result<BroadcastReport> {
        self.require_admin(actor, "broadcast")?;
        let message = message.trim();
        if message.is_empty() {
            return Err(ModerationError::Validation("broadcast message is empty".into()));
        }
        let recipients = self.db.list_all_user_ids()?;
        let notification = Notification::new(format!(
            "📢 <b>GarajHub</b>\n\n{}",
            notify::escape_html(message)
        ));
        let report = self.outbox.fan_out(recipients, &notification).await;
        tracing::info!(sent = report.sent, failed = report.failed, total = report.total, "Broadcast finished");
        Ok(report)
    }

    // ─── Admin sessions ──────────────────────────────────────────────────

    /// Start a dashboard session for an administrator.
    pub fn login(&self, user_id: i64, token: Option<&str>) -> Result<String> {
        if let Some(expected) = self.config.admin_login_token.as_deref() {
            if token != Some(expected) {
                tracing::warn!(user_id, "Dashboard login with bad token");
                return Err(ModerationError::Unauthorized("invalid login token".into()));
            }
        }
        self.require_admin(user_id, "use the dashboard")?;
        let session = self.db.create_session(user_id, self.config.session_ttl)?;
        tracing::info!(user_id, "Dashboard session started");
        Ok(session)
    }

    /// Resolve a session token to an administrator. Checked on every request.
    pub fn authenticate(&self, token: &str) -> Result<i64> {
        let user_id = self
            .db
            .validate_session(token)?
            .ok_or_else(|| ModerationError::Unauthorized("session expired or invalid".into()))?;
        self.require_admin(user_id, "use the dashboard")?;
        Ok(user_id)
    }

    pub fn logout(&self, token: &str) -> Result<()> {
        self.db.delete_session(token)?;
        Ok(())
    }

    pub fn purge_sessions(&self) -> Result<usize> {
        Ok(self.db.purge_expired_sessions()?)
    }
}

/// Best-effort delivery: every send is bounded by `send_timeout` and a
/// failure is logged, never returned.
#[derive(Clone)]
struct Outbox {
    notifier: Arc<dyn Notifier>,
    send_timeout: Duration,
    concurrency: usize,
}

impl Outbox {
    async fn fan_out(&self, recipients: Vec<i64>, notification: &Notification) -> BroadcastReport {
        let total = recipients.len();
        let sent = futures::stream::iter(recipients)
            .map(|id| self.deliver(Recipient::User(id), notification))
            .buffer_unordered(self.concurrency)
            .filter(|ok| futures::future::ready(*ok))
            .count()
            .await;
        BroadcastReport {
            sent,
            failed: total - sent,
            total,
        }
    }

    /// One bounded, best-effort send. Returns whether it was delivered.
    async fn deliver(&self, recipient: Recipient, notification: &Notification) -> bool {
        match tokio::time::timeout(
            self.send_timeout,
            self.notifier.notify(recipient, notification),
        )
        .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(?recipient, error = %e, "Notification failed");
                false
            }
            Err(_) => {
                tracing::warn!(?recipient, "Notification timed out");
                false
            }
        }
    }
}

fn clamp_page(page: i64, per_page: i64) -> (i64, i64) {
    (page.max(1), per_page.clamp(1, MAX_PER_PAGE))
}
