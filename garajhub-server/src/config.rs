//! Server configuration.

use std::time::Duration;

use clap::Parser;

use crate::moderation::RejoinPolicy;

#[derive(Parser, Debug, Clone)]
#[command(name = "garajhub-server", about = "GarajHub startup moderation bot and admin dashboard")]
pub struct ServerConfig {
    /// Telegram bot token. The chat surface is disabled when empty.
    #[arg(long, env = "BOT_TOKEN", default_value = "", hide_env_values = true)]
    pub bot_token: String,

    /// Public channel where approved startups are announced.
    #[arg(long, env = "CHANNEL_USERNAME", default_value = "@GarajHub_uz")]
    pub channel: String,

    /// Telegram user id of the administrator.
    #[arg(long, env = "ADMIN_ID", default_value_t = 0)]
    pub admin_id: i64,

    /// Path to the SQLite database file.
    #[arg(long, env = "GARAJHUB_DB", default_value = "garajhub.db")]
    pub db_path: String,

    /// Listen address for the admin dashboard.
    #[arg(long, env = "WEB_ADDR", default_value = "0.0.0.0:5000")]
    pub web_addr: String,

    /// External URL of the dashboard, sent to the admin by `/admin_link`.
    #[arg(long, env = "PUBLIC_URL", default_value = "http://localhost:5000")]
    pub public_url: String,

    /// Lifetime of a dashboard session in seconds.
    #[arg(long, env = "SESSION_TTL_SECS", default_value_t = 3600)]
    pub session_ttl_secs: u64,

    /// Shared secret the dashboard login must present, if set.
    #[arg(long, env = "ADMIN_LOGIN_TOKEN", hide_env_values = true)]
    pub admin_login_token: Option<String>,

    /// Per-recipient timeout for outbound notifications, in milliseconds.
    #[arg(long, env = "SEND_TIMEOUT_MS", default_value_t = 5000)]
    pub send_timeout_ms: u64,

    /// How many broadcast sends may be in flight at once.
    #[arg(long, env = "BROADCAST_CONCURRENCY", default_value_t = 8)]
    pub broadcast_concurrency: usize,

    /// What a repeat join attempt on a resolved request does.
    #[arg(long, env = "REJOIN_POLICY", value_enum, default_value_t = RejoinPolicy::Reopen)]
    pub rejoin_policy: RejoinPolicy,

    /// Require users to be subscribed to the channel before using the bot.
    #[arg(long, env = "REQUIRE_SUBSCRIPTION", default_value_t = false)]
    pub require_subscription: bool,

    /// Long-poll timeout for getUpdates, in seconds.
    #[arg(long, env = "POLL_TIMEOUT_SECS", default_value_t = 50)]
    pub poll_timeout_secs: u64,
}

impl ServerConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn bot_enabled(&self) -> bool {
        !self.bot_token.trim().is_empty()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            channel: "@GarajHub_uz".to_string(),
            admin_id: 0,
            db_path: "garajhub.db".to_string(),
            web_addr: "0.0.0.0:5000".to_string(),
            public_url: "http://localhost:5000".to_string(),
            session_ttl_secs: 3600,
            admin_login_token: None,
            send_timeout_ms: 5000,
            broadcast_concurrency: 8,
            rejoin_policy: RejoinPolicy::Reopen,
            require_subscription: false,
            poll_timeout_secs: 50,
        }
    }
}
