//! Text commands and main-menu buttons.

pub const MENU_PROFILE: &str = "👤 Profile";
pub const MENU_STARTUPS: &str = "🌐 Startups";
pub const MENU_MY_STARTUPS: &str = "📌 My startups";
pub const MENU_CREATE: &str = "➕ Create startup";
pub const MENU_ADMIN: &str = "🛠 Admin panel";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start`, optionally from a channel deep link (`/start join_<id>`).
    Start { join: Option<i64> },
    Help,
    Cancel,
    AdminLink,
    Profile,
    Startups,
    MyStartups,
    CreateStartup,
    AdminPanel,
}

impl Command {
    /// Parse a message text. Returns `None` for anything that is not a
    /// command, so the text can go to an active conversation instead.
    pub fn parse(text: &str) -> Option<Command> {
        let text = text.trim();
        match text {
            MENU_PROFILE => return Some(Command::Profile),
            MENU_STARTUPS => return Some(Command::Startups),
            MENU_MY_STARTUPS => return Some(Command::MyStartups),
            MENU_CREATE => return Some(Command::CreateStartup),
            MENU_ADMIN => return Some(Command::AdminPanel),
            _ => {}
        }

        let cmd_text = text.strip_prefix('/')?;
        let (cmd, payload) = match cmd_text.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (cmd_text, ""),
        };
        // Group chats address commands as `/start@botname`.
        let cmd = cmd.split('@').next().unwrap_or(cmd).to_lowercase();

        match cmd.as_str() {
            "start" => Some(Command::Start {
                join: payload
                    .strip_prefix("join_")
                    .and_then(|id| id.parse().ok()),
            }),
            "help" => Some(Command::Help),
            "cancel" => Some(Command::Cancel),
            "admin_link" => Some(Command::AdminLink),
            _ => None,
        }
    }
}
