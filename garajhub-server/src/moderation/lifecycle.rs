//! Startup lifecycle: the status state machine and its queries.
//!
//! ```text
//! pending ──approve──▶ active ──complete──▶ completed
//!    │
//!    └─────reject────▶ rejected
//! ```
//!
//! `completed` and `rejected` are terminal. Transitions are applied with a
//! conditional update on the current status, so of two racing transitions
//! out of the same state exactly one wins and the other gets `InvalidState`.

use std::sync::Arc;

use super::error::{ModerationError, Result};
use super::types::{Page, Startup, StartupDraft, StartupStatus, StatusFilter};
use crate::db::Db;

/// Whether `from → to` is an edge of the lifecycle.
pub fn can_transition(from: StartupStatus, to: StartupStatus) -> bool {
    use StartupStatus::*;
    matches!(
        (from, to),
        (Pending, Active) | (Pending, Rejected) | (Active, Completed)
    )
}

/// Canonical form of a group link: an `http(s)://` URL, with bare `t.me/`
/// links given an `https://` scheme. `None` if it is not a link.
pub fn normalize_group_link(raw: &str) -> Option<String> {
    let link = raw.trim();
    if link.is_empty() || link.chars().any(char::is_whitespace) {
        return None;
    }
    if let Some(rest) = link
        .strip_prefix("https://")
        .or_else(|| link.strip_prefix("http://"))
    {
        return (rest.contains('.') && !rest.starts_with('.')).then(|| link.to_string());
    }
    // Inline URL buttons only take http(s) and tg links.
    let path = link.strip_prefix("t.me/")?;
    (!path.is_empty()).then(|| format!("https://{link}"))
}

pub struct StartupLifecycle {
    db: Arc<Db>,
}

impl StartupLifecycle {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Validate a draft and store it as a `pending` startup.
    pub fn create(&self, draft: &StartupDraft) -> Result<Startup> {
        let missing = draft.missing_fields();
        if !missing.is_empty() {
            return Err(ModerationError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }
        let group_link = normalize_group_link(&draft.group_link).ok_or_else(|| {
            ModerationError::Validation(
                "the group link must be an http(s):// or t.me/ link".to_string(),
            )
        })?;
        let draft = StartupDraft {
            group_link,
            ..draft.clone()
        };
        let id = self.db.create_startup(&draft)?;
        tracing::info!(startup_id = id, owner_id = draft.owner_id, "Startup submitted");
        self.get(id)
    }

    pub fn find(&self, startup_id: i64) -> Result<Option<Startup>> {
        Ok(self.db.get_startup(startup_id)?)
    }

    pub fn get(&self, startup_id: i64) -> Result<Startup> {
        self.find(startup_id)?
            .ok_or_else(|| ModerationError::NotFound(format!("startup {startup_id}")))
    }

    pub fn by_owner(&self, owner_id: i64) -> Result<Vec<Startup>> {
        Ok(self.db.list_startups_by_owner(owner_id)?)
    }

    pub fn list(&self, filter: StatusFilter, page: i64, per_page: i64) -> Result<Page<Startup>> {
        let (items, total) = self.db.list_startups(filter, page, per_page)?;
        Ok(Page::new(items, total, page, per_page))
    }

    /// Move the startup to `to`, stamping timestamps and storing `results`.
    ///
    /// Fails with `NotFound` for an unknown id and `InvalidState` when `to`
    /// is not reachable from the current status, including when a
    /// concurrent transition got there first. Status is never changed on error.
    pub fn transition(
        &self,
        startup_id: i64,
        to: StartupStatus,
        results: Option<&str>,
    ) -> Result<Startup> {
        let current = self.get(startup_id)?;
        if !can_transition(current.status, to) {
            return Err(invalid_transition(&current, to));
        }
        if !self
            .db
            .transition_startup(startup_id, current.status, to, results)?
        {
            // Lost a race: report against whatever state won.
            let now = self.get(startup_id)?;
            return Err(invalid_transition(&now, to));
        }
        tracing::info!(startup_id, from = %current.status, to = %to, "Startup transitioned");
        self.get(startup_id)
    }

    /// Advisory view counter; failures are not interesting to callers.
    pub fn record_view(&self, startup_id: i64) {
        if let Err(e) = self.db.increment_views(startup_id) {
            tracing::debug!(startup_id, error = %e, "Failed to bump views");
        }
    }
}

fn invalid_transition(startup: &Startup, to: StartupStatus) -> ModerationError {
    let verb = match to {
        StartupStatus::Active => "approved",
        StartupStatus::Rejected => "rejected",
        StartupStatus::Completed => "completed",
        StartupStatus::Pending => "reset to pending",
    };
    ModerationError::InvalidState(format!(
        "startup \"{}\" is {} and cannot be {verb}",
        startup.name, startup.status
    ))
}
