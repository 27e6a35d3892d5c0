//! # Maildrip Engine
//!
//! The drip-campaign engine proper: campaign registry, eligibility
//! evaluation, batch dispatch, broadcasts, and the scheduler that drives
//! them. [`DripEngine`] wires the pieces together behind one handle; the
//! individual collaborators stay public for embedders that want to
//! assemble their own.

pub mod broadcast;
pub mod cron;
pub mod dispatcher;
pub mod evaluator;
pub mod ratelimit;
pub mod registry;
pub mod retry;
pub mod scheduler;

pub use broadcast::{BroadcastSummary, Broadcaster};
pub use dispatcher::{BatchDispatcher, DispatchSummary};
pub use ratelimit::RateLimiter;
pub use registry::{Campaign, CampaignMessage, CampaignRegistry};
pub use retry::{NextTickRetry, RetryAction, RetryPolicy};
pub use scheduler::Scheduler;

use std::sync::Arc;
use std::time::Duration;

use maildrip_core::config::MaildripConfig;
use maildrip_core::error::{MaildripError, Result};
use maildrip_core::traits::{Directory, Transport};
use maildrip_core::types::{Subscription, SubscriptionStatus};
use maildrip_store::SubscriptionStore;

/// The fully assembled engine.
///
/// Lifecycle operations validate against the campaign registry before
/// touching the store, so a typo'd campaign id can never create a row.
pub struct DripEngine {
    store: Arc<SubscriptionStore>,
    registry: Arc<CampaignRegistry>,
    scheduler: Scheduler,
}

impl DripEngine {
    /// Wire up dispatcher, broadcaster, and scheduler from configuration.
    /// Fails fast on invalid cron expressions.
    pub fn new(
        store: Arc<SubscriptionStore>,
        registry: Arc<CampaignRegistry>,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn Directory>,
        config: &MaildripConfig,
    ) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::per_minute(config.scheduler.sends_per_minute));
        let dispatcher = Arc::new(BatchDispatcher::new(
            store.clone(),
            registry.clone(),
            transport.clone(),
            directory.clone(),
            limiter,
            Arc::new(NextTickRetry),
            config.base_url.clone(),
        ));
        let broadcaster = Arc::new(Broadcaster::new(
            directory,
            transport,
            config.scheduler.broadcast_batch_size,
            Duration::from_millis(config.scheduler.broadcast_delay_ms),
        ));
        let scheduler = Scheduler::new(dispatcher, broadcaster, config.scheduler.clone())?;
        Ok(Self {
            store,
            registry,
            scheduler,
        })
    }

    // ─── Subscription lifecycle ──────────────────────────────────────

    /// Enroll an address in a campaign. Idempotent; see
    /// [`SubscriptionStore::subscribe`] for reactivation semantics.
    pub fn subscribe(
        &self,
        address: &str,
        campaign_id: &str,
        subscriber_id: Option<i64>,
    ) -> Result<Subscription> {
        self.registry.get(campaign_id)?;
        self.store.subscribe(address, campaign_id, subscriber_id)
    }

    /// Enroll a newly registered subscriber in every auto-subscribe
    /// campaign.
    pub fn auto_subscribe(
        &self,
        address: &str,
        subscriber_id: Option<i64>,
    ) -> Result<Vec<Subscription>> {
        let mut subs = Vec::new();
        for campaign in self.registry.auto_subscribe_campaigns() {
            subs.push(self.store.subscribe(address, &campaign.id, subscriber_id)?);
        }
        Ok(subs)
    }

    /// Unsubscribe an active subscription.
    pub fn unsubscribe(&self, address: &str, campaign_id: &str) -> Result<()> {
        self.store.unsubscribe(address, campaign_id)
    }

    /// Unsubscribe via an emailed link: the token must match the one the
    /// subscription was issued at enrollment.
    pub fn unsubscribe_with_token(
        &self,
        address: &str,
        campaign_id: &str,
        token: &str,
    ) -> Result<()> {
        if !self.store.validate_token(address, campaign_id, token)? {
            return Err(MaildripError::InvalidToken {
                address: address.to_string(),
                campaign: campaign_id.to_string(),
            });
        }
        self.store.unsubscribe(address, campaign_id)
    }

    /// Pause or resume a registered subscriber's enrollment.
    pub fn set_status(
        &self,
        subscriber_id: i64,
        campaign_id: &str,
        status: SubscriptionStatus,
    ) -> Result<()> {
        self.registry.get(campaign_id)?;
        self.store.set_status(subscriber_id, campaign_id, status)
    }

    /// Active subscriptions of one registered subscriber.
    pub fn subscriptions_for(&self, subscriber_id: i64) -> Result<Vec<Subscription>> {
        self.store.subscriptions_for(subscriber_id)
    }

    /// Look up one subscription regardless of status.
    pub fn find_subscription(
        &self,
        address: &str,
        campaign_id: &str,
    ) -> Result<Option<Subscription>> {
        self.store.find(address, campaign_id)
    }

    pub fn registry(&self) -> &CampaignRegistry {
        &self.registry
    }

    pub fn store(&self) -> &SubscriptionStore {
        &self.store
    }

    // ─── Scheduler control ───────────────────────────────────────────

    /// Start the periodic triggers. Idempotent.
    pub fn start_scheduler(&self) {
        self.scheduler.start();
    }

    /// Stop the periodic triggers. Idempotent; in-flight runs complete.
    pub fn stop_scheduler(&self) {
        self.scheduler.stop();
    }

    pub fn scheduler_started(&self) -> bool {
        self.scheduler.is_started()
    }

    /// On-demand drip dispatch pass. `None` means a pass was already in
    /// flight and this one was skipped.
    pub async fn run_drip_now(
        &self,
        batch_size: Option<usize>,
    ) -> Result<Option<DispatchSummary>> {
        self.scheduler.run_drip_now(batch_size).await
    }

    /// On-demand daily broadcast.
    pub async fn run_daily_now(&self) -> Result<Option<BroadcastSummary>> {
        self.scheduler.run_daily_now().await
    }

    /// On-demand weekly broadcast.
    pub async fn run_weekly_now(&self) -> Result<Option<BroadcastSummary>> {
        self.scheduler.run_weekly_now().await
    }
}
