//! Multi-message flows: the startup wizard, profile edits, broadcast text,
//! completion results.
//!
//! Each user has at most one flow, held in memory. Every incoming message
//! advances it by one step; the flow is dropped once it yields a final
//! [`Step`] or the user cancels.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::moderation::lifecycle::normalize_group_link;
use crate::moderation::types::{ProfileField, StartupDraft};

const MAX_NAME: usize = 100;
const MAX_DESCRIPTION: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStep {
    Name,
    Description,
    Logo,
    GroupLink,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    CreateStartup { step: CreateStep, draft: StartupDraft },
    EditProfile(ProfileField),
    Broadcast,
    CompleteResults(i64),
}

impl Flow {
    pub fn create_startup(owner_id: i64) -> Self {
        Flow::CreateStartup {
            step: CreateStep::Name,
            draft: StartupDraft {
                owner_id,
                ..Default::default()
            },
        }
    }

    /// The question that opens this flow.
    pub fn first_prompt(&self) -> &'static str {
        match self {
            Flow::CreateStartup { .. } => "🚀 <b>New startup</b>\n\nWhat is the startup's name?",
            Flow::EditProfile(field) => prompt_for(*field),
            Flow::Broadcast => "📢 Send the message to broadcast to every user.",
            Flow::CompleteResults(_) => {
                "🏁 Describe the results of your startup, or send <code>-</code> to skip."
            }
        }
    }

    /// Consume one message. Returns the next flow state (if the flow goes
    /// on) and what the bot should do now.
    fn advance(self, input: Input<'_>) -> (Option<Flow>, Step) {
        let text = input.text.map(str::trim).filter(|t| !t.is_empty());
        match self {
            Flow::CreateStartup { step, mut draft } => match step {
                CreateStep::Name => match text {
                    Some(t) if t.chars().count() <= MAX_NAME => {
                        draft.name = t.to_string();
                        (
                            Some(Flow::CreateStartup { step: CreateStep::Description, draft }),
                            Step::Prompt("📝 Send a short description."),
                        )
                    }
                    Some(_) => (
                        Some(Flow::CreateStartup { step, draft }),
                        Step::Retry("⚠️ The name is too long, keep it under 100 characters."),
                    ),
                    None => (
                        Some(Flow::CreateStartup { step, draft }),
                        Step::Retry("⚠️ Please send the name as text."),
                    ),
                },
                CreateStep::Description => match text {
                    Some(t) if t.chars().count() <= MAX_DESCRIPTION => {
                        draft.description = t.to_string();
                        (
                            Some(Flow::CreateStartup { step: CreateStep::Logo, draft }),
                            Step::Prompt("🖼 Send the logo as a photo."),
                        )
                    }
                    _ => (
                        Some(Flow::CreateStartup { step, draft }),
                        Step::Retry("⚠️ Please send a description of up to 2000 characters."),
                    ),
                },
                CreateStep::Logo => match input.photo {
                    Some(photo) => {
                        draft.logo = Some(photo.to_string());
                        (
                            Some(Flow::CreateStartup { step: CreateStep::GroupLink, draft }),
                            Step::Prompt("🔗 Send the link to the startup's group (https://t.me/...)."),
                        )
                    }
                    None => (
                        Some(Flow::CreateStartup { step, draft }),
                        Step::Retry("⚠️ Please send the logo as a photo."),
                    ),
                },
                CreateStep::GroupLink => match text.and_then(normalize_group_link) {
                    Some(link) => {
                        draft.group_link = link;
                        (None, Step::SubmitStartup(draft))
                    }
                    _ => (
                        Some(Flow::CreateStartup { step, draft }),
                        Step::Retry("⚠️ That does not look like a link. Send an http(s):// or t.me/ link."),
                    ),
                },
            },
            Flow::EditProfile(field) => match text {
                Some(t) => (None, Step::SaveProfile(field, t.to_string())),
                None => (
                    Some(Flow::EditProfile(field)),
                    Step::Retry("⚠️ Please send the new value as text."),
                ),
            },
            Flow::Broadcast => match text {
                Some(t) => (None, Step::Broadcast(t.to_string())),
                None => (
                    Some(Flow::Broadcast),
                    Step::Retry("⚠️ Please send the broadcast as text."),
                ),
            },
            Flow::CompleteResults(startup_id) => {
                let results = text.filter(|t| *t != "-").map(str::to_string);
                (None, Step::Complete { startup_id, results })
            }
        }
    }
}

fn prompt_for(field: ProfileField) -> &'static str {
    match field {
        ProfileField::FirstName => "✏️ Send your first name.",
        ProfileField::LastName => "✏️ Send your last name.",
        ProfileField::Phone => "📞 Send your phone number.",
        ProfileField::Gender => "⚧ Choose your gender.",
        ProfileField::BirthDate => "🎂 Send your birth date (DD.MM.YYYY).",
        ProfileField::Bio => "📝 Tell us about yourself.",
    }
}

/// What the user sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Input<'a> {
    pub text: Option<&'a str>,
    pub photo: Option<&'a str>,
}

/// What the bot should do after a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Ask the next question.
    Prompt(&'static str),
    /// The input was not acceptable; ask again.
    Retry(&'static str),
    SubmitStartup(StartupDraft),
    SaveProfile(ProfileField, String),
    Broadcast(String),
    Complete { startup_id: i64, results: Option<String> },
}

/// Active flows keyed by user id.
#[derive(Default)]
pub struct Conversations {
    flows: Mutex<HashMap<i64, Flow>>,
}

impl Conversations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or replace) the user's flow.
    pub fn start(&self, user_id: i64, flow: Flow) {
        self.flows.lock().insert(user_id, flow);
    }

    /// Drop the user's flow. Returns whether there was one.
    pub fn cancel(&self, user_id: i64) -> bool {
        self.flows.lock().remove(&user_id).is_some()
    }

    pub fn is_active(&self, user_id: i64) -> bool {
        self.flows.lock().contains_key(&user_id)
    }

    /// Feed a message to the user's flow. `None` if they have no flow.
    pub fn advance(&self, user_id: i64, input: Input<'_>) -> Option<Step> {
        let mut flows = self.flows.lock();
        let flow = flows.remove(&user_id)?;
        let (next, step) = flow.advance(input);
        if let Some(next) = next {
            flows.insert(user_id, next);
        }
        Some(step)
    }
}
