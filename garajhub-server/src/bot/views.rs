//! Message texts and keyboards for the chat surface.

use garajhub_telegram::{InlineKeyboardButton, InlineKeyboardMarkup, ReplyKeyboardMarkup, ReplyMarkup};

use super::callbacks::{Callback, GENDERS};
use super::commands::{MENU_ADMIN, MENU_CREATE, MENU_MY_STARTUPS, MENU_PROFILE, MENU_STARTUPS};
use crate::moderation::types::{Page, ProfileField, Startup, StartupStatus, Stats, User};
use crate::notify::{Action, escape_html};

/// A rendered screen: HTML text, optional photo, optional keyboard.
#[derive(Debug, Clone, Default)]
pub struct View {
    pub text: String,
    pub photo: Option<String>,
    pub markup: Option<ReplyMarkup>,
}

impl View {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    fn with_inline(mut self, markup: InlineKeyboardMarkup) -> Self {
        if !markup.is_empty() {
            self.markup = Some(markup.into());
        }
        self
    }
}

fn button(text: &str, callback: Callback) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text, callback.data())
}

fn or_dash(value: &str) -> String {
    if value.trim().is_empty() {
        "-".to_string()
    } else {
        escape_html(value)
    }
}

fn status_label(status: StartupStatus) -> &'static str {
    match status {
        StartupStatus::Pending => "⏳ Awaiting review",
        StartupStatus::Active => "▶️ Active",
        StartupStatus::Completed => "✅ Completed",
        StartupStatus::Rejected => "❌ Rejected",
    }
}

pub fn main_menu(is_admin: bool) -> ReplyMarkup {
    let mut rows = vec![
        vec![MENU_PROFILE, MENU_STARTUPS],
        vec![MENU_MY_STARTUPS, MENU_CREATE],
    ];
    if is_admin {
        rows.push(vec![MENU_ADMIN]);
    }
    ReplyKeyboardMarkup::new(rows).into()
}

pub fn welcome(first_name: &str, is_admin: bool) -> View {
    View {
        text: format!(
            "👋 Welcome to <b>GarajHub</b>, {}!\n\n\
             Share your startup idea, find a team, or join someone else's project.",
            escape_html(first_name)
        ),
        photo: None,
        markup: Some(main_menu(is_admin)),
    }
}

pub fn help() -> View {
    View::text(
        "ℹ️ <b>GarajHub</b>\n\n\
         👤 Profile: view and edit your details\n\
         🌐 Startups: browse active startups and ask to join\n\
         📌 My startups: track your submissions and members\n\
         ➕ Create startup: submit a new startup for review\n\n\
         /cancel stops whatever you are filling in.",
    )
}

pub fn subscription_required(channel: &str) -> View {
    let channel_url = format!("https://t.me/{}", channel.trim_start_matches('@'));
    View::text("🤖 <b>GarajHub Bot</b>\n\nPlease subscribe to our channel first 👇").with_inline(
        InlineKeyboardMarkup::default().row(vec![
            InlineKeyboardButton::url("🔗 Open channel", channel_url),
            button("✅ I've subscribed", Callback::CheckSubscription),
        ]),
    )
}

pub fn profile(user: &User) -> View {
    let text = format!(
        "👤 <b>Your profile</b>\n\n\
         <b>First name:</b> {}\n<b>Last name:</b> {}\n<b>Phone:</b> {}\n\
         <b>Gender:</b> {}\n<b>Birth date:</b> {}\n<b>Bio:</b> {}",
        or_dash(&user.first_name),
        or_dash(&user.last_name),
        or_dash(&user.phone),
        or_dash(&user.gender),
        or_dash(&user.birth_date),
        or_dash(&user.bio),
    );
    let edit = |label: &str, field| button(label, Callback::EditProfile(field));
    View::text(text).with_inline(
        InlineKeyboardMarkup::default()
            .row(vec![
                edit("✏️ First name", ProfileField::FirstName),
                edit("✏️ Last name", ProfileField::LastName),
            ])
            .row(vec![
                edit("📞 Phone", ProfileField::Phone),
                edit("⚧ Gender", ProfileField::Gender),
            ])
            .row(vec![
                edit("🎂 Birth date", ProfileField::BirthDate),
                edit("📝 Bio", ProfileField::Bio),
            ])
            .row(vec![button("🏠 Main menu", Callback::MainMenu)]),
    )
}

pub fn gender_choice() -> View {
    View::text("⚧ Choose your gender:").with_inline(
        InlineKeyboardMarkup::default().row(
            GENDERS
                .into_iter()
                .map(|g| button(g, Callback::Gender(g)))
                .collect(),
        ),
    )
}

/// One active startup in public browsing, with join and paging buttons.
pub fn startup_card(page: &Page<Startup>, join: Action) -> View {
    let Some(startup) = page.data.first() else {
        return View::text("📭 There are no active startups yet.")
            .with_inline(InlineKeyboardMarkup::default().row(vec![button("🏠 Main menu", Callback::MainMenu)]));
    };
    let text = format!(
        "🚀 <b>{}</b>\n\n{}\n\n👤 Founder: {}\n👁 {} views\n\n{}/{}",
        escape_html(&startup.name),
        escape_html(&startup.description),
        or_dash(&startup.owner_name),
        startup.views,
        page.page,
        page.total_pages,
    );
    let mut nav = Vec::new();
    if page.page > 1 {
        nav.push(button("⬅️", Callback::Browse(page.page - 1)));
    }
    if page.page < page.total_pages {
        nav.push(button("➡️", Callback::Browse(page.page + 1)));
    }
    View {
        text,
        photo: startup.logo.clone(),
        markup: None,
    }
    .with_inline(
        InlineKeyboardMarkup::default()
            .row(vec![join.to_button()])
            .row(nav)
            .row(vec![button("🏠 Main menu", Callback::MainMenu)]),
    )
}

pub fn my_startups(startups: &[Startup]) -> View {
    if startups.is_empty() {
        return View::text("📭 You have not created any startups yet.");
    }
    let mut markup = InlineKeyboardMarkup::default();
    for s in startups {
        let label = format!("{} {}", status_label(s.status).split(' ').next().unwrap_or(""), s.name);
        markup = markup.row(vec![button(&label, Callback::MyStartup(s.startup_id))]);
    }
    View::text(format!("📌 <b>Your startups</b> ({})", startups.len())).with_inline(markup)
}

pub fn my_startup_detail(startup: &Startup, member_count: i64) -> View {
    let started = startup
        .started_at
        .map(|t| t.format("%d.%m.%Y").to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut text = format!(
        "🎯 <b>{}</b>\n\n📊 Status: {}\n📅 Started: {started}\n👥 Members: {member_count}\n📌 {}",
        escape_html(&startup.name),
        status_label(startup.status),
        escape_html(&startup.description),
    );
    if let Some(results) = startup.results.as_deref() {
        text.push_str(&format!("\n\n📈 Results: {}", escape_html(results)));
    }

    let mut markup = InlineKeyboardMarkup::default();
    if matches!(startup.status, StartupStatus::Active | StartupStatus::Completed) {
        markup = markup.row(vec![button("👥 Members", Callback::Members(startup.startup_id))]);
    }
    if startup.status == StartupStatus::Active {
        markup = markup.row(vec![button("⏹ Complete", Callback::Complete(startup.startup_id))]);
    }
    View {
        text,
        photo: startup.logo.clone(),
        markup: None,
    }
    .with_inline(markup.row(vec![button("🏠 Main menu", Callback::MainMenu)]))
}

pub fn members(startup: &Startup, members: &[User]) -> View {
    if members.is_empty() {
        return View::text(format!(
            "👥 <b>{}</b> has no members yet.",
            escape_html(&startup.name)
        ));
    }
    let mut text = format!("👥 <b>Members of {}</b>\n", escape_html(&startup.name));
    for (i, m) in members.iter().enumerate() {
        let handle = if m.username.is_empty() {
            String::new()
        } else {
            format!(" (@{})", escape_html(&m.username))
        };
        text.push_str(&format!("\n{}. {}{handle}", i + 1, or_dash(&m.display_name())));
    }
    View::text(text)
}

pub fn admin_panel() -> View {
    View::text("🛠 <b>Admin panel</b>").with_inline(
        InlineKeyboardMarkup::default()
            .row(vec![button("⏳ Pending startups", Callback::PendingPage(1))])
            .row(vec![
                button("📊 Statistics", Callback::AdminStats),
                button("📢 Broadcast", Callback::AdminBroadcast),
            ]),
    )
}

/// The review queue, with approve/reject buttons per startup.
pub fn pending_queue(page: &Page<Startup>) -> View {
    if page.data.is_empty() {
        return View::text("✅ No startups are waiting for review.");
    }
    let mut text = format!("⏳ <b>Pending startups</b> ({} total)\n", page.total);
    let mut markup = InlineKeyboardMarkup::default();
    for s in &page.data {
        text.push_str(&format!(
            "\n<b>#{}</b> {} by {}",
            s.startup_id,
            escape_html(&s.name),
            or_dash(&s.owner_name)
        ));
        markup = markup.row(vec![
            Action::ApproveStartup(s.startup_id).to_button(),
            Action::RejectStartup(s.startup_id).to_button(),
        ]);
    }
    let mut nav = Vec::new();
    if page.page > 1 {
        nav.push(button("⬅️", Callback::PendingPage(page.page - 1)));
    }
    if page.page < page.total_pages {
        nav.push(button("➡️", Callback::PendingPage(page.page + 1)));
    }
    View::text(text).with_inline(markup.row(nav))
}

pub fn stats(stats: &Stats) -> String {
    format!(
        "📊 Statistics\n\n\
         👥 Users: {}\n🚀 Startups: {}\n⏳ Pending: {}\n▶️ Active: {}\n\
         ✅ Completed: {}\n📨 Open requests: {}",
        stats.total_users,
        stats.total_startups,
        stats.pending_startups,
        stats.active_startups,
        stats.completed_startups,
        stats.pending_requests,
    )
}

pub fn admin_link(url: &str) -> View {
    View::text(format!(
        "🔐 <b>Admin dashboard</b>\n\n{}\n\nLog in with your Telegram user id.",
        escape_html(url)
    ))
}
