//! End-to-end engine behavior over an in-memory store.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use maildrip_core::config::MaildripConfig;
use maildrip_core::error::{MaildripError, Result};
use maildrip_core::traits::{Directory, Transport};
use maildrip_core::types::{
    BroadcastKind, BroadcastRecipient, DeliveryStatus, SubscriptionStatus, TemplateRef,
};
use maildrip_engine::{
    BatchDispatcher, Campaign, CampaignMessage, CampaignRegistry, DripEngine, NextTickRetry,
    RateLimiter,
};
use maildrip_store::SubscriptionStore;

/// Records every send; addresses in `fail` bounce with a transport error.
#[derive(Default)]
struct FakeTransport {
    sent: Mutex<Vec<(String, String)>>, // (address, template)
    fail: Mutex<HashSet<String>>,
}

impl FakeTransport {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn fail_for(&self, address: &str) {
        self.fail.lock().unwrap().insert(address.to_string());
    }

    fn heal(&self, address: &str) {
        self.fail.lock().unwrap().remove(address);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(
        &self,
        to: &str,
        template: &TemplateRef,
        _payload: &serde_json::Value,
    ) -> Result<()> {
        if self.fail.lock().unwrap().contains(to) {
            return Err(MaildripError::Transport("smtp 451 try later".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), template.name.clone()));
        Ok(())
    }
}

struct NoDirectory;

impl Directory for NoDirectory {
    fn display_name(&self, _subscriber_id: i64) -> Option<String> {
        None
    }
    fn broadcast_eligible(&self, _kind: BroadcastKind) -> Result<Vec<BroadcastRecipient>> {
        Ok(vec![])
    }
}

fn msg(number: u32, template: &str, send_day_offset: u32) -> CampaignMessage {
    CampaignMessage {
        number,
        subject: format!("Message {number}"),
        title: String::new(),
        template: template.into(),
        send_day_offset,
    }
}

/// Three-message course on a 0/1/3-day timetable.
fn course_registry() -> Arc<CampaignRegistry> {
    Arc::new(
        CampaignRegistry::new(vec![Campaign {
            id: "course".into(),
            name: "Course".into(),
            description: String::new(),
            emoji: String::new(),
            auto_subscribe: false,
            messages: vec![msg(1, "course/1", 0), msg(2, "course/2", 1), msg(3, "course/3", 3)],
        }])
        .unwrap(),
    )
}

struct Rig {
    store: Arc<SubscriptionStore>,
    transport: Arc<FakeTransport>,
    dispatcher: BatchDispatcher,
}

fn rig(registry: Arc<CampaignRegistry>) -> Rig {
    let store = Arc::new(SubscriptionStore::open_in_memory().unwrap());
    let transport = Arc::new(FakeTransport::default());
    let dispatcher = BatchDispatcher::new(
        store.clone(),
        registry,
        transport.clone(),
        Arc::new(NoDirectory),
        Arc::new(RateLimiter::unlimited()),
        Arc::new(NextTickRetry),
        "http://localhost:8080",
    );
    Rig {
        store,
        transport,
        dispatcher,
    }
}

fn backdate(store: &SubscriptionStore, id: i64, t0: DateTime<Utc>) {
    store.set_subscribed_at(id, t0).unwrap();
}

#[tokio::test]
async fn course_plays_out_on_its_day_offsets() {
    let r = rig(course_registry());
    let t0 = Utc::now();
    r.store.subscribe("a@example.com", "course", None).unwrap();

    // Right after enrollment only message 1 (day 0) is due.
    let s = r.dispatcher.run_at(20, t0).await.unwrap();
    assert_eq!(s.sent, 1);
    // Immediately running again sends nothing: message 2 needs a day.
    let s = r.dispatcher.run_at(20, t0).await.unwrap();
    assert_eq!(s.sent, 0);

    // 26 hours in: one elapsed day, message 2 goes out.
    let s = r.dispatcher.run_at(20, t0 + Duration::hours(26)).await.unwrap();
    assert_eq!(s.sent, 1);

    // Day 4: message 3. A further pass finds the sequence exhausted.
    let s = r.dispatcher.run_at(20, t0 + Duration::days(4)).await.unwrap();
    assert_eq!(s.sent, 1);
    let s = r.dispatcher.run_at(20, t0 + Duration::days(4)).await.unwrap();
    assert_eq!(s.sent, 0);

    assert_eq!(
        r.transport.sent(),
        vec![
            ("a@example.com".to_string(), "course/1".to_string()),
            ("a@example.com".to_string(), "course/2".to_string()),
            ("a@example.com".to_string(), "course/3".to_string()),
        ]
    );
    let cur = r.store.find("a@example.com", "course").unwrap().unwrap();
    assert_eq!(cur.last_sent, 3);
}

#[tokio::test]
async fn backlog_drains_one_message_per_pass() {
    let r = rig(course_registry());
    let sub = r.store.subscribe("a@example.com", "course", None).unwrap();
    // Enrolled ten days ago: the whole sequence is overdue.
    backdate(&r.store, sub.id, Utc::now() - Duration::days(10));

    for expected in 1..=3u32 {
        let s = r.dispatcher.run_at(20, Utc::now()).await.unwrap();
        assert_eq!(s.sent, 1);
        let cur = r.store.find("a@example.com", "course").unwrap().unwrap();
        assert_eq!(cur.last_sent, expected);
    }
    let s = r.dispatcher.run_at(20, Utc::now()).await.unwrap();
    assert_eq!(s.sent, 0);
}

#[tokio::test]
async fn failed_delivery_keeps_cursor_and_retries_next_pass() {
    let r = rig(course_registry());
    let sub = r.store.subscribe("a@example.com", "course", None).unwrap();
    r.transport.fail_for("a@example.com");

    let s = r.dispatcher.run_at(20, Utc::now()).await.unwrap();
    assert_eq!(s.failed, 1);
    assert_eq!(s.sent, 0);
    let cur = r.store.find("a@example.com", "course").unwrap().unwrap();
    assert_eq!(cur.last_sent, 0);

    // Transport recovers: the same message goes out, nothing was skipped.
    r.transport.heal("a@example.com");
    let s = r.dispatcher.run_at(20, Utc::now()).await.unwrap();
    assert_eq!(s.sent, 1);
    assert_eq!(r.transport.sent()[0].1, "course/1");

    // Both attempts are in the audit log.
    let log = r.store.deliveries_for(sub.id).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].status, DeliveryStatus::Failed);
    assert_eq!(log[1].status, DeliveryStatus::Success);
}

#[tokio::test]
async fn unsubscribed_and_paused_rows_receive_nothing() {
    let r = rig(course_registry());
    r.store.subscribe("gone@example.com", "course", None).unwrap();
    r.store.subscribe("paused@example.com", "course", Some(5)).unwrap();
    r.store.unsubscribe("gone@example.com", "course").unwrap();
    r.store
        .set_status(5, "course", SubscriptionStatus::Paused)
        .unwrap();

    let s = r.dispatcher.run_at(20, Utc::now()).await.unwrap();
    assert_eq!(s.sent, 0);
    assert!(r.transport.sent().is_empty());
}

#[tokio::test]
async fn resumed_subscription_picks_up_where_it_left_off() {
    let r = rig(course_registry());
    let sub = r.store.subscribe("a@example.com", "course", Some(9)).unwrap();
    backdate(&r.store, sub.id, Utc::now() - Duration::days(10));

    let s = r.dispatcher.run_at(20, Utc::now()).await.unwrap();
    assert_eq!(s.sent, 1);

    r.store
        .set_status(9, "course", SubscriptionStatus::Paused)
        .unwrap();
    let s = r.dispatcher.run_at(20, Utc::now()).await.unwrap();
    assert_eq!(s.sent, 0);

    r.store
        .set_status(9, "course", SubscriptionStatus::Active)
        .unwrap();
    let s = r.dispatcher.run_at(20, Utc::now()).await.unwrap();
    assert_eq!(s.sent, 1);
    assert_eq!(r.transport.sent()[1].1, "course/2");
}

#[tokio::test]
async fn reactivated_subscription_restarts_the_sequence() {
    let r = rig(course_registry());
    let sub = r.store.subscribe("a@example.com", "course", None).unwrap();
    backdate(&r.store, sub.id, Utc::now() - Duration::days(10));
    r.dispatcher.run_at(20, Utc::now()).await.unwrap();
    r.dispatcher.run_at(20, Utc::now()).await.unwrap();
    r.store.unsubscribe("a@example.com", "course").unwrap();

    // Re-subscribing resets the cursor and the enrollment clock: only the
    // day-0 message is due again.
    let re = r.store.subscribe("a@example.com", "course", None).unwrap();
    assert_eq!(re.last_sent, 0);
    let s = r.dispatcher.run_at(20, Utc::now()).await.unwrap();
    assert_eq!(s.sent, 1);
    assert_eq!(r.transport.sent().last().unwrap().1, "course/1");
    let s = r.dispatcher.run_at(20, Utc::now()).await.unwrap();
    assert_eq!(s.sent, 0);
}

#[tokio::test]
async fn batch_cap_counts_attempts_and_defers_the_rest() {
    let r = rig(course_registry());
    for i in 0..5 {
        let sub = r
            .store
            .subscribe(&format!("u{i}@example.com"), "course", None)
            .unwrap();
        backdate(&r.store, sub.id, Utc::now() - Duration::days(1));
    }
    // u1 bounces; failures count against the cap just like successes.
    r.transport.fail_for("u1@example.com");

    let s = r.dispatcher.run_at(3, Utc::now()).await.unwrap();
    assert_eq!(s.attempted, 3);
    assert_eq!(s.sent, 2);
    assert_eq!(s.failed, 1);

    // Next pass picks up the deferred rows (and retries the bounced one).
    let s = r.dispatcher.run_at(3, Utc::now()).await.unwrap();
    assert_eq!(s.attempted, 3);
    assert_eq!(s.sent, 2);
    assert_eq!(s.failed, 1);
}

#[tokio::test]
async fn rate_limit_defers_without_consuming_the_sequence() {
    let store = Arc::new(SubscriptionStore::open_in_memory().unwrap());
    let transport = Arc::new(FakeTransport::default());
    let dispatcher = BatchDispatcher::new(
        store.clone(),
        course_registry(),
        transport.clone(),
        Arc::new(NoDirectory),
        Arc::new(RateLimiter::per_minute(2)),
        Arc::new(NextTickRetry),
        "http://localhost:8080",
    );
    for i in 0..4 {
        store
            .subscribe(&format!("u{i}@example.com"), "course", None)
            .unwrap();
    }

    let now = Utc::now();
    let s = dispatcher.run_at(20, now).await.unwrap();
    assert_eq!(s.sent, 2);

    // Same window: nothing more goes out, nothing is lost.
    let s = dispatcher.run_at(20, now).await.unwrap();
    assert_eq!(s.sent, 0);

    // Next window drains the remainder.
    let s = dispatcher.run_at(20, now + Duration::seconds(61)).await.unwrap();
    assert_eq!(s.sent, 2);
    assert_eq!(transport.sent().len(), 4);
}

// ─── Facade ──────────────────────────────────────────────────────────

fn engine() -> (DripEngine, Arc<FakeTransport>) {
    let store = Arc::new(SubscriptionStore::open_in_memory().unwrap());
    let transport = Arc::new(FakeTransport::default());
    let engine = DripEngine::new(
        store,
        Arc::new(CampaignRegistry::builtin()),
        transport.clone(),
        Arc::new(NoDirectory),
        &MaildripConfig::default(),
    )
    .unwrap();
    (engine, transport)
}

#[tokio::test]
async fn unknown_campaign_is_rejected_before_any_row_exists() {
    let (engine, _) = engine();
    let err = engine.subscribe("a@example.com", "no-such", None).unwrap_err();
    assert!(matches!(err, MaildripError::CampaignNotFound(_)));
    assert!(engine.find_subscription("a@example.com", "no-such").unwrap().is_none());
}

#[tokio::test]
async fn auto_subscribe_enrolls_the_flagged_campaigns_only() {
    let (engine, _) = engine();
    let subs = engine.auto_subscribe("new@example.com", Some(1)).unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].campaign_id, "onboarding");
    assert_eq!(engine.subscriptions_for(1).unwrap().len(), 1);
}

#[tokio::test]
async fn token_unsubscribe_requires_the_issued_token() {
    let (engine, _) = engine();
    engine.subscribe("a@example.com", "onboarding", None).unwrap();
    let token = engine
        .store()
        .unsubscribe_token("a@example.com", "onboarding")
        .unwrap()
        .unwrap();

    let err = engine
        .unsubscribe_with_token("a@example.com", "onboarding", "forged")
        .unwrap_err();
    assert!(matches!(err, MaildripError::InvalidToken { .. }));

    engine
        .unsubscribe_with_token("a@example.com", "onboarding", &token)
        .unwrap();
    let sub = engine
        .find_subscription("a@example.com", "onboarding")
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Unsubscribed);
}

#[tokio::test]
async fn on_demand_drip_runs_through_the_facade() {
    let (engine, transport) = engine();
    engine.subscribe("a@example.com", "onboarding", None).unwrap();

    let summary = engine.run_drip_now(None).await.unwrap().unwrap();
    assert_eq!(summary.sent, 1);
    assert_eq!(transport.sent()[0].1, "courses/onboarding/1-welcome");
}

#[tokio::test]
async fn scheduler_start_stop_via_facade_is_idempotent() {
    let (engine, _) = engine();
    engine.start_scheduler();
    engine.start_scheduler();
    assert!(engine.scheduler_started());
    engine.stop_scheduler();
    assert!(!engine.scheduler_started());
    engine.stop_scheduler();
}
