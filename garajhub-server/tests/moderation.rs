//! Moderation flows end to end: coordinator + SQLite + a recording notifier.
//!
//! Tests cover:
//! - The startup lifecycle (submit, approve, reject, complete) and its guards
//! - Join requests: uniqueness, eligibility, owner decisions, re-join policy
//! - Notification ordering and failure isolation
//! - Broadcast partial failure
//! - Concurrent approve/join on the same record

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use garajhub_server::db::Db;
use garajhub_server::moderation::types::{
    JoinDecision, ProfileField, RequestStatus, StartupDraft, StartupStatus, StatusFilter,
};
use garajhub_server::moderation::{Coordinator, CoordinatorConfig, ModerationError, RejoinPolicy};
use garajhub_server::notify::{Action, Notification, Notifier, Recipient};

const ADMIN: i64 = 1;
const OWNER: i64 = 10;
const APPLICANT: i64 = 20;
const OUTSIDER: i64 = 30;

/// Records every delivery. Sends to users in `failing` return an error;
/// sends to users in `stalling` never finish.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(Recipient, Notification)>>,
    failing: Mutex<HashSet<i64>>,
    stalling: Mutex<HashSet<i64>>,
}

impl RecordingNotifier {
    fn fail_for(&self, user_id: i64) {
        self.failing.lock().insert(user_id);
    }

    fn stall_for(&self, user_id: i64) {
        self.stalling.lock().insert(user_id);
    }

    fn to(&self, recipient: Recipient) -> Vec<Notification> {
        self.sent
            .lock()
            .iter()
            .filter(|(r, _)| *r == recipient)
            .map(|(_, n)| n.clone())
            .collect()
    }

    fn clear(&self) {
        self.sent.lock().clear();
    }

    /// Wait (up to two seconds) for background sends to `recipient`.
    async fn wait_for(&self, recipient: Recipient, count: usize) -> Vec<Notification> {
        for _ in 0..200 {
            let got = self.to(recipient);
            if got.len() >= count {
                return got;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.to(recipient)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: Recipient, notification: &Notification) -> anyhow::Result<()> {
        if let Recipient::User(id) = recipient {
            let stalled = self.stalling.lock().contains(&id);
            if stalled {
                std::future::pending::<()>().await;
            }
            let failed = self.failing.lock().contains(&id);
            if failed {
                anyhow::bail!("bot was blocked by the user");
            }
        }
        self.sent.lock().push((recipient, notification.clone()));
        Ok(())
    }
}

struct Harness {
    db: Arc<Db>,
    coordinator: Arc<Coordinator>,
    notifier: Arc<RecordingNotifier>,
}

fn harness_with(policy: RejoinPolicy) -> Harness {
    let db = Arc::new(Db::open_memory().unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let config = CoordinatorConfig {
        admin_id: ADMIN,
        send_timeout: Duration::from_millis(200),
        rejoin_policy: policy,
        ..CoordinatorConfig::default()
    };
    let coordinator = Arc::new(Coordinator::new(db.clone(), notifier.clone(), config));
    coordinator.seed_admin().unwrap();
    for (id, name) in [(OWNER, "Owner"), (APPLICANT, "Applicant"), (OUTSIDER, "Outsider")] {
        coordinator
            .register_user(id, &name.to_lowercase(), name)
            .unwrap();
    }
    Harness {
        db,
        coordinator,
        notifier,
    }
}

fn harness() -> Harness {
    harness_with(RejoinPolicy::Reopen)
}

fn acme() -> StartupDraft {
    StartupDraft {
        owner_id: OWNER,
        name: "Acme".into(),
        description: "d".into(),
        logo: Some("l".into()),
        group_link: "https://t.me/acme".into(),
    }
}

async fn active_startup(h: &Harness) -> i64 {
    let s = h.coordinator.submit_for_review(acme()).await.unwrap();
    h.coordinator.approve(s.startup_id, ADMIN).await.unwrap();
    h.notifier.clear();
    s.startup_id
}

// ── Scenarios ──────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_submit_and_approve() {
    let h = harness();
    let s = h.coordinator.submit_for_review(acme()).await.unwrap();
    assert_eq!(s.status, StartupStatus::Pending);
    assert!(s.started_at.is_none());

    let review = h.notifier.to(Recipient::User(ADMIN));
    assert_eq!(review.len(), 1);
    assert_eq!(
        review[0].actions,
        vec![
            Action::ApproveStartup(s.startup_id),
            Action::RejectStartup(s.startup_id)
        ]
    );

    let approved = h.coordinator.approve(s.startup_id, ADMIN).await.unwrap();
    assert_eq!(approved.status, StartupStatus::Active);
    assert!(approved.started_at.is_some());
    assert_eq!(h.notifier.to(Recipient::User(OWNER)).len(), 1);

    let posts = h.notifier.to(Recipient::Channel);
    assert_eq!(posts.len(), 1);
    assert!(posts[0].text.contains("Acme"));
    assert_eq!(posts[0].actions, vec![Action::JoinStartup(s.startup_id)]);
}

#[tokio::test]
async fn scenario_b_join_and_accept() {
    let h = harness();
    let sid = active_startup(&h).await;

    let req = h.coordinator.request_join(sid, APPLICANT).await.unwrap();
    assert_eq!(req.status, RequestStatus::Pending);

    let asks = h.notifier.to(Recipient::User(OWNER));
    assert_eq!(asks.len(), 1);
    assert_eq!(
        asks[0].actions,
        vec![Action::AcceptJoin(req.request_id), Action::RejectJoin(req.request_id)]
    );
    assert!(asks[0].text.contains("Applicant"));

    let decided = h
        .coordinator
        .decide_join(req.request_id, OWNER, JoinDecision::Accept)
        .await
        .unwrap();
    assert_eq!(decided.status, RequestStatus::Accepted);

    let welcome = h.notifier.to(Recipient::User(APPLICANT));
    assert_eq!(welcome.len(), 1);
    assert!(welcome[0].text.contains("https://t.me/acme"));
    assert_eq!(h.coordinator.member_count(sid).unwrap(), 1);
}

#[tokio::test]
async fn scenario_c_duplicate_pending_join() {
    let h = harness();
    let sid = active_startup(&h).await;

    h.coordinator.request_join(sid, APPLICANT).await.unwrap();
    let again = h.coordinator.request_join(sid, APPLICANT).await;
    assert!(matches!(again, Err(ModerationError::AlreadyPending)));
    assert_eq!(h.db.statistics().unwrap().total_requests, 1);
    // The owner is only asked once.
    assert_eq!(h.notifier.to(Recipient::User(OWNER)).len(), 1);
}

#[tokio::test]
async fn scenario_d_non_admin_cannot_approve() {
    let h = harness();
    let s = h.coordinator.submit_for_review(acme()).await.unwrap();

    let err = h.coordinator.approve(s.startup_id, OUTSIDER).await.unwrap_err();
    assert!(matches!(err, ModerationError::Unauthorized(_)));
    let err = h.coordinator.reject(s.startup_id, OWNER).await.unwrap_err();
    assert!(matches!(err, ModerationError::Unauthorized(_)));

    assert_eq!(h.coordinator.startup(s.startup_id).unwrap().status, StartupStatus::Pending);
    assert!(h.notifier.to(Recipient::Channel).is_empty());
}

#[tokio::test]
async fn scenario_e_complete_once() {
    let h = harness();
    let sid = active_startup(&h).await;

    let done = h
        .coordinator
        .complete_startup(sid, OWNER, Some("grew 10%"))
        .await
        .unwrap();
    assert_eq!(done.status, StartupStatus::Completed);
    assert!(done.ended_at.is_some());
    assert_eq!(done.results.as_deref(), Some("grew 10%"));

    let again = h.coordinator.complete_startup(sid, OWNER, None).await;
    assert!(matches!(again, Err(ModerationError::InvalidState(_))));
    assert_eq!(
        h.coordinator.startup(sid).unwrap().results.as_deref(),
        Some("grew 10%")
    );
}

// ── Lifecycle guards ───────────────────────────────────────────────────

#[tokio::test]
async fn terminal_startups_stay_put() {
    let h = harness();
    let s = h.coordinator.submit_for_review(acme()).await.unwrap();
    h.coordinator.reject(s.startup_id, ADMIN).await.unwrap();

    assert!(matches!(
        h.coordinator.approve(s.startup_id, ADMIN).await,
        Err(ModerationError::InvalidState(_))
    ));
    assert!(matches!(
        h.coordinator.reject(s.startup_id, ADMIN).await,
        Err(ModerationError::InvalidState(_))
    ));
    assert!(matches!(
        h.coordinator.complete_startup(s.startup_id, OWNER, None).await,
        Err(ModerationError::InvalidState(_))
    ));
    assert_eq!(h.coordinator.startup(s.startup_id).unwrap().status, StartupStatus::Rejected);
}

#[tokio::test]
async fn pending_startup_cannot_be_completed() {
    let h = harness();
    let s = h.coordinator.submit_for_review(acme()).await.unwrap();
    assert!(matches!(
        h.coordinator.complete_startup(s.startup_id, OWNER, None).await,
        Err(ModerationError::InvalidState(_))
    ));
}

#[tokio::test]
async fn only_the_owner_completes() {
    let h = harness();
    let sid = active_startup(&h).await;
    for actor in [ADMIN, APPLICANT] {
        assert!(matches!(
            h.coordinator.complete_startup(sid, actor, None).await,
            Err(ModerationError::Unauthorized(_))
        ));
    }
    assert_eq!(h.coordinator.startup(sid).unwrap().status, StartupStatus::Active);
}

#[tokio::test]
async fn incomplete_draft_is_refused() {
    let h = harness();
    let draft = StartupDraft {
        logo: None,
        ..acme()
    };
    let err = h.coordinator.submit_for_review(draft).await.unwrap_err();
    assert!(matches!(err, ModerationError::Validation(_)));
    assert!(h.notifier.to(Recipient::User(ADMIN)).is_empty());
    assert_eq!(h.db.statistics().unwrap().total_startups, 0);
}

#[tokio::test]
async fn unknown_startup_is_not_found() {
    let h = harness();
    assert!(matches!(
        h.coordinator.approve(999, ADMIN).await,
        Err(ModerationError::NotFound(_))
    ));
    assert!(matches!(
        h.coordinator.request_join(999, APPLICANT).await,
        Err(ModerationError::NotFound(_))
    ));
}

#[tokio::test]
async fn completion_notifies_members() {
    let h = harness();
    let sid = active_startup(&h).await;
    let req = h.coordinator.request_join(sid, APPLICANT).await.unwrap();
    h.coordinator
        .decide_join(req.request_id, OWNER, JoinDecision::Accept)
        .await
        .unwrap();
    h.notifier.clear();

    h.coordinator.complete_startup(sid, OWNER, None).await.unwrap();
    let notes = h.notifier.wait_for(Recipient::User(APPLICANT), 1).await;
    assert_eq!(notes.len(), 1);
    assert!(notes[0].text.contains("completed"));
}

#[tokio::test]
async fn completion_does_not_wait_for_members() {
    let h = harness();
    let sid = active_startup(&h).await;
    for member in [APPLICANT, OUTSIDER] {
        let req = h.coordinator.request_join(sid, member).await.unwrap();
        h.coordinator
            .decide_join(req.request_id, OWNER, JoinDecision::Accept)
            .await
            .unwrap();
    }
    h.notifier.clear();
    h.notifier.stall_for(APPLICANT);

    // The 200ms send timeout would be hit inline; the call must return first.
    let done = tokio::time::timeout(
        Duration::from_millis(100),
        h.coordinator.complete_startup(sid, OWNER, None),
    )
    .await
    .expect("completion should not wait on member notices")
    .unwrap();
    assert_eq!(done.status, StartupStatus::Completed);

    // The reachable member still hears about it.
    assert_eq!(h.notifier.wait_for(Recipient::User(OUTSIDER), 1).await.len(), 1);
    assert!(h.notifier.to(Recipient::User(APPLICANT)).is_empty());
}

// ── Join requests ──────────────────────────────────────────────────────

#[tokio::test]
async fn only_active_startups_accept_joins() {
    let h = harness();
    let pending = h.coordinator.submit_for_review(acme()).await.unwrap();
    let rejected = h.coordinator.submit_for_review(acme()).await.unwrap();
    h.coordinator.reject(rejected.startup_id, ADMIN).await.unwrap();
    let completed = active_startup(&h).await;
    h.coordinator.complete_startup(completed, OWNER, None).await.unwrap();

    for sid in [pending.startup_id, rejected.startup_id, completed] {
        for user in [APPLICANT, ADMIN] {
            assert!(matches!(
                h.coordinator.request_join(sid, user).await,
                Err(ModerationError::InvalidState(_))
            ));
        }
    }
    assert_eq!(h.db.statistics().unwrap().total_requests, 0);
}

#[tokio::test]
async fn owner_cannot_join_own_startup() {
    let h = harness();
    let sid = active_startup(&h).await;
    assert!(matches!(
        h.coordinator.request_join(sid, OWNER).await,
        Err(ModerationError::Validation(_))
    ));
}

#[tokio::test]
async fn only_the_owner_decides() {
    let h = harness();
    let sid = active_startup(&h).await;
    let req = h.coordinator.request_join(sid, APPLICANT).await.unwrap();

    for actor in [ADMIN, APPLICANT, OUTSIDER] {
        assert!(matches!(
            h.coordinator
                .decide_join(req.request_id, actor, JoinDecision::Accept)
                .await,
            Err(ModerationError::Unauthorized(_))
        ));
    }
    let stored = h.db.get_membership_request(req.request_id).unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);
}

#[tokio::test]
async fn resolved_request_cannot_be_decided_again() {
    let h = harness();
    let sid = active_startup(&h).await;
    let req = h.coordinator.request_join(sid, APPLICANT).await.unwrap();
    h.coordinator
        .decide_join(req.request_id, OWNER, JoinDecision::Reject)
        .await
        .unwrap();
    assert!(h.notifier.to(Recipient::User(APPLICANT))[0].text.contains("declined"));

    let again = h
        .coordinator
        .decide_join(req.request_id, OWNER, JoinDecision::Accept)
        .await;
    assert!(matches!(again, Err(ModerationError::InvalidState(_))));
    assert_eq!(h.coordinator.member_count(sid).unwrap(), 0);
}

#[tokio::test]
async fn rejoin_reopens_the_same_record() {
    let h = harness();
    let sid = active_startup(&h).await;
    let first = h.coordinator.request_join(sid, APPLICANT).await.unwrap();
    h.coordinator
        .decide_join(first.request_id, OWNER, JoinDecision::Reject)
        .await
        .unwrap();

    let second = h.coordinator.request_join(sid, APPLICANT).await.unwrap();
    assert_eq!(second.request_id, first.request_id);
    assert_eq!(second.status, RequestStatus::Pending);
    assert_eq!(h.db.statistics().unwrap().total_requests, 1);
}

#[tokio::test]
async fn refuse_policy_keeps_the_decision() {
    let h = harness_with(RejoinPolicy::Refuse);
    let sid = active_startup(&h).await;
    let first = h.coordinator.request_join(sid, APPLICANT).await.unwrap();
    h.coordinator
        .decide_join(first.request_id, OWNER, JoinDecision::Accept)
        .await
        .unwrap();

    assert!(matches!(
        h.coordinator.request_join(sid, APPLICANT).await,
        Err(ModerationError::InvalidState(_))
    ));
    let stored = h.db.find_membership_request(sid, APPLICANT).unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Accepted);
}

#[tokio::test]
async fn member_list_is_owner_or_admin_only() {
    let h = harness();
    let sid = active_startup(&h).await;
    let req = h.coordinator.request_join(sid, APPLICANT).await.unwrap();
    h.coordinator
        .decide_join(req.request_id, OWNER, JoinDecision::Accept)
        .await
        .unwrap();

    let members = h.coordinator.list_members(sid, OWNER).unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, APPLICANT);
    assert_eq!(h.coordinator.list_members(sid, ADMIN).unwrap().len(), 1);
    assert!(matches!(
        h.coordinator.list_members(sid, OUTSIDER),
        Err(ModerationError::Unauthorized(_))
    ));
}

// ── Notifications ──────────────────────────────────────────────────────

#[tokio::test]
async fn failed_notification_does_not_undo_approval() {
    let h = harness();
    h.notifier.fail_for(OWNER);
    let s = h.coordinator.submit_for_review(acme()).await.unwrap();

    let approved = h.coordinator.approve(s.startup_id, ADMIN).await.unwrap();
    assert_eq!(approved.status, StartupStatus::Active);
    assert_eq!(h.coordinator.startup(s.startup_id).unwrap().status, StartupStatus::Active);
    // The channel post still went out.
    assert_eq!(h.notifier.to(Recipient::Channel).len(), 1);
}

#[tokio::test]
async fn stalled_notification_times_out() {
    let h = harness();
    let sid = active_startup(&h).await;
    h.notifier.stall_for(OWNER);

    let req = tokio::time::timeout(
        Duration::from_secs(5),
        h.coordinator.request_join(sid, APPLICANT),
    )
    .await
    .expect("send timeout should bound the call")
    .unwrap();
    assert_eq!(req.status, RequestStatus::Pending);
}

// ── Broadcast ──────────────────────────────────────────────────────────

#[tokio::test]
async fn broadcast_survives_partial_failure() {
    let h = harness();
    for id in 100..110 {
        h.coordinator.register_user(id, "", "User").unwrap();
    }
    h.notifier.fail_for(101);
    h.notifier.fail_for(105);
    h.notifier.stall_for(107);

    // Admin, owner, applicant, outsider and ten more.
    let report = h.coordinator.broadcast("Demo day <friday>", ADMIN).await.unwrap();
    assert_eq!(report.total, 14);
    assert_eq!(report.failed, 3);
    assert_eq!(report.sent, 11);

    let got = h.notifier.to(Recipient::User(108));
    assert_eq!(got.len(), 1);
    assert!(got[0].text.contains("Demo day &lt;friday&gt;"));
    assert!(h.notifier.to(Recipient::User(101)).is_empty());
}

#[tokio::test]
async fn broadcast_is_admin_only_and_non_empty() {
    let h = harness();
    assert!(matches!(
        h.coordinator.broadcast("hi", OWNER).await,
        Err(ModerationError::Unauthorized(_))
    ));
    assert!(matches!(
        h.coordinator.broadcast("   ", ADMIN).await,
        Err(ModerationError::Validation(_))
    ));
    assert!(h.notifier.sent.lock().is_empty());
}

// ── Users, listing, sessions ───────────────────────────────────────────

#[tokio::test]
async fn profile_updates_are_validated() {
    let h = harness();
    let user = h
        .coordinator
        .update_profile(APPLICANT, ProfileField::Phone, " +998901234567 ")
        .unwrap();
    assert_eq!(user.phone, "+998901234567");

    assert!(matches!(
        h.coordinator.update_profile(APPLICANT, ProfileField::Bio, "  "),
        Err(ModerationError::Validation(_))
    ));
    assert!(matches!(
        h.coordinator
            .update_profile(APPLICANT, ProfileField::Bio, &"x".repeat(501)),
        Err(ModerationError::Validation(_))
    ));
    assert!(matches!(
        h.coordinator.update_profile(999, ProfileField::Bio, "hi"),
        Err(ModerationError::NotFound(_))
    ));
}

#[tokio::test]
async fn listing_filters_and_pages() {
    let h = harness();
    for _ in 0..3 {
        h.coordinator.submit_for_review(acme()).await.unwrap();
    }
    let sid = active_startup(&h).await;

    let pending = h
        .coordinator
        .list_startups(StatusFilter::Only(StartupStatus::Pending), 1, 2)
        .unwrap();
    assert_eq!(pending.total, 3);
    assert_eq!(pending.data.len(), 2);
    assert_eq!(pending.total_pages, 2);

    let active = h
        .coordinator
        .list_startups(StatusFilter::Only(StartupStatus::Active), 0, 0)
        .unwrap();
    assert_eq!(active.page, 1);
    assert_eq!(active.per_page, 1);
    assert_eq!(active.data[0].startup_id, sid);

    assert_eq!(h.coordinator.list_startups(StatusFilter::All, 1, 10).unwrap().total, 4);
    assert_eq!(h.coordinator.my_startups(OWNER).unwrap().len(), 4);
}

#[tokio::test]
async fn dashboard_sessions() {
    let h = harness();
    assert!(matches!(
        h.coordinator.login(OWNER, None),
        Err(ModerationError::Unauthorized(_))
    ));

    let token = h.coordinator.login(ADMIN, None).unwrap();
    assert_eq!(h.coordinator.authenticate(&token).unwrap(), ADMIN);

    h.coordinator.logout(&token).unwrap();
    assert!(matches!(
        h.coordinator.authenticate(&token),
        Err(ModerationError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn login_token_is_checked_when_configured() {
    let db = Arc::new(Db::open_memory().unwrap());
    let config = CoordinatorConfig {
        admin_id: ADMIN,
        admin_login_token: Some("s3cret".into()),
        ..CoordinatorConfig::default()
    };
    let coordinator = Coordinator::new(db, Arc::new(RecordingNotifier::default()), config);
    coordinator.seed_admin().unwrap();

    assert!(coordinator.login(ADMIN, None).is_err());
    assert!(coordinator.login(ADMIN, Some("wrong")).is_err());
    assert!(coordinator.login(ADMIN, Some("s3cret")).is_ok());
}

#[tokio::test]
async fn expired_session_is_refused() {
    let db = Arc::new(Db::open_memory().unwrap());
    let config = CoordinatorConfig {
        admin_id: ADMIN,
        session_ttl: Duration::ZERO,
        ..CoordinatorConfig::default()
    };
    let coordinator = Coordinator::new(db, Arc::new(RecordingNotifier::default()), config);
    coordinator.seed_admin().unwrap();

    let token = coordinator.login(ADMIN, None).unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(matches!(
        coordinator.authenticate(&token),
        Err(ModerationError::Unauthorized(_))
    ));
    assert_eq!(coordinator.purge_sessions().unwrap(), 1);
}

// ── Concurrency ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decisions_have_one_winner() {
    let h = harness();
    let s = h.coordinator.submit_for_review(acme()).await.unwrap();
    let sid = s.startup_id;

    let mut handles = Vec::new();
    for i in 0..8 {
        let coordinator = h.coordinator.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                coordinator.approve(sid, ADMIN).await.map(|s| s.status)
            } else {
                coordinator.reject(sid, ADMIN).await.map(|s| s.status)
            }
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(status) => winners.push(status),
            Err(e) => assert!(matches!(e, ModerationError::InvalidState(_)), "{e}"),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(h.coordinator.startup(sid).unwrap().status, winners[0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_create_one_request() {
    let h = harness();
    let sid = active_startup(&h).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let coordinator = h.coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.request_join(sid, APPLICANT).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert!(matches!(e, ModerationError::AlreadyPending), "{e}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(h.db.statistics().unwrap().total_requests, 1);
    assert_eq!(h.notifier.to(Recipient::User(OWNER)).len(), 1);
}
