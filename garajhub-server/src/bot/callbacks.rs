//! Inline-button payloads.
//!
//! Moderation buttons are [`Action`]s and share their encoding with the
//! notifications that carry them. The rest are navigation.

use crate::moderation::types::ProfileField;
use crate::notify::Action;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Moderation(Action),
    /// Public browsing of active startups, one per page.
    Browse(i64),
    MyStartup(i64),
    Complete(i64),
    Members(i64),
    /// Admin review queue.
    PendingPage(i64),
    AdminStats,
    AdminBroadcast,
    EditProfile(ProfileField),
    Gender(&'static str),
    CheckSubscription,
    MainMenu,
}

pub const GENDERS: [&str; 2] = ["Male", "Female"];

impl Callback {
    pub fn parse(data: &str) -> Option<Callback> {
        if let Some(action) = Action::parse(data) {
            return Some(Callback::Moderation(action));
        }
        match data {
            "admin_stats" => return Some(Callback::AdminStats),
            "admin_broadcast" => return Some(Callback::AdminBroadcast),
            "check_sub" => return Some(Callback::CheckSubscription),
            "menu" => return Some(Callback::MainMenu),
            _ => {}
        }

        let (kind, arg) = data.split_once(':')?;
        let id = || arg.parse::<i64>().ok();
        match kind {
            "browse" => id().map(Callback::Browse),
            "my" => id().map(Callback::MyStartup),
            "complete" => id().map(Callback::Complete),
            "members" => id().map(Callback::Members),
            "pending" => id().map(Callback::PendingPage),
            "edit" => arg.parse().ok().map(Callback::EditProfile),
            "gender" => GENDERS
                .into_iter()
                .find(|g| g.eq_ignore_ascii_case(arg))
                .map(Callback::Gender),
            _ => None,
        }
    }

    pub fn data(&self) -> String {
        match self {
            Callback::Moderation(action) => action.callback_data().unwrap_or_default(),
            Callback::Browse(page) => format!("browse:{page}"),
            Callback::MyStartup(id) => format!("my:{id}"),
            Callback::Complete(id) => format!("complete:{id}"),
            Callback::Members(id) => format!("members:{id}"),
            Callback::PendingPage(page) => format!("pending:{page}"),
            Callback::AdminStats => "admin_stats".to_string(),
            Callback::AdminBroadcast => "admin_broadcast".to_string(),
            Callback::EditProfile(field) => format!("edit:{}", field.column()),
            Callback::Gender(g) => format!("gender:{}", g.to_lowercase()),
            Callback::CheckSubscription => "check_sub".to_string(),
            Callback::MainMenu => "menu".to_string(),
        }
    }
}
