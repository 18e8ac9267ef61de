//! GarajHub: startup moderation over Telegram, plus an admin dashboard.
//!
//! - `moderation`: the startup lifecycle, join requests and the
//!   [`moderation::Coordinator`] both surfaces call into
//! - `db`: SQLite persistence
//! - `notify`: outbound messages and the [`notify::Notifier`] seam
//! - `bot`: the Telegram chat surface
//! - `web`: the dashboard JSON API
//! - `config`: command line and environment settings

pub mod bot;
pub mod config;
pub mod db;
pub mod moderation;
pub mod notify;
pub mod web;
