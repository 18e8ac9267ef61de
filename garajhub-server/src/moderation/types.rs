//! Core records of the moderation workflow.
//!
//! Status values are closed enums; the database stores their `as_str()`
//! form and parses it back with `FromStr`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Users ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub gender: String,
    pub birth_date: String,
    pub bio: String,
    pub joined_at: DateTime<Utc>,
    pub is_admin: bool,
}

impl User {
    /// "First Last", trimmed; falls back to the username.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.username.clone()
        } else {
            name.to_string()
        }
    }
}

/// Profile fields a user may edit. Each maps to exactly one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    FirstName,
    LastName,
    Phone,
    Gender,
    BirthDate,
    Bio,
}

impl ProfileField {
    pub const ALL: [ProfileField; 6] = [
        ProfileField::FirstName,
        ProfileField::LastName,
        ProfileField::Phone,
        ProfileField::Gender,
        ProfileField::BirthDate,
        ProfileField::Bio,
    ];

    pub fn column(self) -> &'static str {
        match self {
            ProfileField::FirstName => "first_name",
            ProfileField::LastName => "last_name",
            ProfileField::Phone => "phone",
            ProfileField::Gender => "gender",
            ProfileField::BirthDate => "birth_date",
            ProfileField::Bio => "bio",
        }
    }
}

impl FromStr for ProfileField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProfileField::ALL
            .into_iter()
            .find(|f| f.column() == s)
            .ok_or_else(|| format!("unknown profile field: {s}"))
    }
}

// ─── Startups ────────────────────────────────────────────────────────────────

/// Lifecycle of a startup: pending → active → completed, or pending → rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupStatus {
    Pending,
    Active,
    Completed,
    Rejected,
}

impl StartupStatus {
    pub const ALL: [StartupStatus; 4] = [
        StartupStatus::Pending,
        StartupStatus::Active,
        StartupStatus::Completed,
        StartupStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StartupStatus::Pending => "pending",
            StartupStatus::Active => "active",
            StartupStatus::Completed => "completed",
            StartupStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StartupStatus::Completed | StartupStatus::Rejected)
    }
}

impl fmt::Display for StartupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StartupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StartupStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown startup status: {s}"))
    }
}

/// Which startups a listing should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Only(StartupStatus),
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "all" {
            Ok(StatusFilter::All)
        } else {
            s.parse().map(StatusFilter::Only)
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Startup {
    pub startup_id: i64,
    pub name: String,
    pub description: String,
    pub logo: Option<String>,
    pub group_link: String,
    pub owner_id: i64,
    /// Owner's display name at read time.
    pub owner_name: String,
    pub status: StartupStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub results: Option<String>,
    pub views: i64,
}

/// A startup proposal as collected from its owner, before review.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StartupDraft {
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub logo: Option<String>,
    pub group_link: String,
}

impl StartupDraft {
    /// Every field is mandatory; whitespace-only counts as missing.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.description.trim().is_empty() {
            missing.push("description");
        }
        if self.logo.as_deref().is_none_or(|l| l.trim().is_empty()) {
            missing.push("logo");
        }
        if self.group_link.trim().is_empty() {
            missing.push("group_link");
        }
        missing
    }
}

// ─── Membership requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// The owner's answer to a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinDecision {
    Accept,
    Reject,
}

impl JoinDecision {
    pub fn resulting_status(self) -> RequestStatus {
        match self {
            JoinDecision::Accept => RequestStatus::Accepted,
            JoinDecision::Reject => RequestStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MembershipRequest {
    pub request_id: i64,
    pub startup_id: i64,
    pub user_id: i64,
    pub status: RequestStatus,
    pub joined_at: DateTime<Utc>,
}

/// Result of the store's atomic join upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// No prior request; a pending one was inserted.
    Created(MembershipRequest),
    /// A resolved request was put back to pending.
    Reopened(MembershipRequest),
    /// A pending request already exists; nothing was written.
    AlreadyPending(MembershipRequest),
    /// A resolved request exists and reopening was not allowed.
    Resolved(MembershipRequest),
}

// ─── Dashboard ───────────────────────────────────────────────────────────────

/// One page of a listing plus the total match count.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: i64, page: i64, per_page: i64) -> Self {
        let total_pages = if per_page > 0 {
            (total + per_page - 1) / per_page
        } else {
            0
        };
        Self {
            data,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Stats {
    pub total_users: i64,
    pub total_startups: i64,
    pub pending_startups: i64,
    pub active_startups: i64,
    pub completed_startups: i64,
    pub rejected_startups: i64,
    pub total_requests: i64,
    pub pending_requests: i64,
    pub accepted_members: i64,
}

/// Latest sign-ups and submissions, for the dashboard front page.
#[derive(Debug, Clone, Serialize)]
pub struct RecentActivity {
    pub users: Vec<User>,
    pub startups: Vec<Startup>,
}

/// Outcome of a broadcast fan-out.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
}
