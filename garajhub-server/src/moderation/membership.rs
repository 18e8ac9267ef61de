//! Join requests: one record per (startup, user), `pending` until the
//! startup's owner accepts or rejects it.

use std::sync::Arc;

use super::error::{ModerationError, Result};
use super::types::{
    JoinDecision, MembershipRequest, RequestStatus, Startup, StartupStatus, UpsertOutcome, User,
};
use crate::db::Db;

/// What a repeat join attempt does once the earlier request was resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RejoinPolicy {
    /// Put the existing record back to `pending`.
    #[default]
    Reopen,
    /// Refuse; the earlier decision stands.
    Refuse,
}

pub struct MembershipManager {
    db: Arc<Db>,
    policy: RejoinPolicy,
}

impl MembershipManager {
    pub fn new(db: Arc<Db>, policy: RejoinPolicy) -> Self {
        Self { db, policy }
    }

    /// Open a join request for `user_id` on an active startup.
    pub fn request(&self, startup: &Startup, user_id: i64) -> Result<MembershipRequest> {
        if startup.status != StartupStatus::Active {
            return Err(ModerationError::InvalidState(format!(
                "\"{}\" is {} and does not accept join requests",
                startup.name, startup.status
            )));
        }
        if startup.owner_id == user_id {
            return Err(ModerationError::Validation(
                "you cannot join your own startup".to_string(),
            ));
        }

        let reopen = self.policy == RejoinPolicy::Reopen;
        match self
            .db
            .upsert_membership_request(startup.startup_id, user_id, reopen)?
        {
            UpsertOutcome::Created(req) => {
                tracing::info!(request_id = req.request_id, startup_id = req.startup_id, user_id, "Join requested");
                Ok(req)
            }
            UpsertOutcome::Reopened(req) => {
                tracing::info!(request_id = req.request_id, startup_id = req.startup_id, user_id, "Join request reopened");
                Ok(req)
            }
            UpsertOutcome::AlreadyPending(_) => Err(ModerationError::AlreadyPending),
            UpsertOutcome::Resolved(req) => Err(ModerationError::InvalidState(format!(
                "your request to join \"{}\" was already {}",
                startup.name, req.status
            ))),
        }
    }

    pub fn get(&self, request_id: i64) -> Result<MembershipRequest> {
        self.db
            .get_membership_request(request_id)?
            .ok_or_else(|| ModerationError::NotFound(format!("join request {request_id}")))
    }

    /// Resolve a pending request. Authorization is the caller's job.
    pub fn decide(
        &self,
        request: &MembershipRequest,
        decision: JoinDecision,
    ) -> Result<MembershipRequest> {
        let status = decision.resulting_status();
        if request.status != RequestStatus::Pending
            || !self.db.resolve_membership_request(request.request_id, status)?
        {
            return Err(ModerationError::InvalidState(
                "this join request was already resolved".to_string(),
            ));
        }
        tracing::info!(
            request_id = request.request_id,
            startup_id = request.startup_id,
            user_id = request.user_id,
            %status,
            "Join request resolved"
        );
        Ok(MembershipRequest {
            status,
            ..request.clone()
        })
    }

    /// Members are derived: the count of accepted requests.
    pub fn member_count(&self, startup_id: i64) -> Result<i64> {
        Ok(self.db.count_accepted(startup_id)?)
    }

    pub fn members(&self, startup_id: i64) -> Result<Vec<User>> {
        Ok(self.db.list_members(startup_id)?)
    }
}
