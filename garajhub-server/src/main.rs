use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use garajhub_server::bot::{Bot, BotSettings};
use garajhub_server::config::ServerConfig;
use garajhub_server::db::Db;
use garajhub_server::moderation::{Coordinator, CoordinatorConfig};
use garajhub_server::notify::{LogNotifier, Notifier, TelegramNotifier};
use garajhub_server::web::{self, AppState};
use garajhub_telegram::{BotClient, PollConfig, spawn_poller};
use tracing_subscriber::EnvFilter;

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs in production (GARAJHUB_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("GARAJHUB_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env()
        .add_directive("garajhub_server=info".parse()?)
        .add_directive("garajhub_telegram=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    let config = ServerConfig::parse();
    tracing::info!("Opening database {}", config.db_path);
    let db = Arc::new(
        Db::open(&config.db_path).with_context(|| format!("opening {}", config.db_path))?,
    );

    let mut coordinator_config = CoordinatorConfig::from(&config);
    let client = if config.bot_enabled() {
        let client = BotClient::new(config.bot_token.trim());
        match client.get_me().await {
            Ok(me) => {
                tracing::info!(username = ?me.username, "Bot authenticated");
                coordinator_config.bot_username = me.username;
            }
            Err(e) => tracing::warn!(error = %e, "getMe failed, channel posts will use callback buttons"),
        }
        Some(client)
    } else {
        tracing::warn!("BOT_TOKEN not set, running the dashboard only");
        None
    };
    if config.admin_id == 0 {
        tracing::warn!("ADMIN_ID not set, nobody can approve startups");
    }

    let notifier: Arc<dyn Notifier> = match &client {
        Some(client) => Arc::new(TelegramNotifier::new(client.clone(), config.channel.clone())),
        None => Arc::new(LogNotifier),
    };
    let coordinator = Arc::new(Coordinator::new(db, notifier, coordinator_config));
    coordinator.seed_admin()?;

    // Expired dashboard sessions are refused on lookup; this only reclaims rows.
    {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
            loop {
                interval.tick().await;
                match coordinator.purge_sessions() {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(purged = n, "Expired sessions removed"),
                    Err(e) => tracing::error!(error = %e, "Session purge failed"),
                }
            }
        });
    }

    if let Some(client) = client {
        let events = spawn_poller(
            client.clone(),
            PollConfig {
                timeout_secs: config.poll_timeout_secs,
                ..PollConfig::default()
            },
        );
        let bot = Bot::new(
            client,
            Arc::clone(&coordinator),
            BotSettings {
                channel: config.channel.clone(),
                public_url: config.public_url.clone(),
                require_subscription: config.require_subscription,
            },
        );
        tokio::spawn(async move { bot.run(events).await });
    }

    let state = Arc::new(AppState::new(coordinator));
    web::serve(&config.web_addr, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down");
    })
    .await
}
