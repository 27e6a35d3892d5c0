//! Batch Dispatcher — one evaluation-and-send pass over active subscriptions.
//!
//! Each run takes a single consistent read of the active subscriptions,
//! evaluates them in stable store order, and stops after `batch_size`
//! dispatch attempts (successes and failures both count; rows with nothing
//! due do not). Per-subscription failures are logged and recorded, never
//! propagated — one bad address cannot sink the batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use maildrip_core::error::Result;
use maildrip_core::traits::{Directory, Transport};
use maildrip_core::types::{DeliveryRecord, DeliveryStatus, Subscription, TemplateRef};
use maildrip_store::SubscriptionStore;

use crate::evaluator;
use crate::ratelimit::RateLimiter;
use crate::registry::{Campaign, CampaignMessage, CampaignRegistry};
use crate::retry::{RetryAction, RetryPolicy};

/// Outcome counts for one dispatcher run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Active subscriptions examined.
    pub evaluated: usize,
    /// Dispatch attempts made (counted against the batch cap).
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Iterates active subscriptions, applies the evaluator, sends via the
/// transport, and updates store + delivery log.
pub struct BatchDispatcher {
    store: Arc<SubscriptionStore>,
    registry: Arc<CampaignRegistry>,
    transport: Arc<dyn Transport>,
    directory: Arc<dyn Directory>,
    limiter: Arc<RateLimiter>,
    retry: Arc<dyn RetryPolicy>,
    base_url: String,
}

impl BatchDispatcher {
    pub fn new(
        store: Arc<SubscriptionStore>,
        registry: Arc<CampaignRegistry>,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn Directory>,
        limiter: Arc<RateLimiter>,
        retry: Arc<dyn RetryPolicy>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            transport,
            directory,
            limiter,
            retry,
            base_url: base_url.into(),
        }
    }

    /// Run one dispatch pass against the current clock.
    pub async fn run(&self, batch_size: usize) -> Result<DispatchSummary> {
        self.run_at(batch_size, Utc::now()).await
    }

    /// Run one dispatch pass evaluating eligibility at `now`. Exposed so
    /// operational tooling and tests can replay a point in time.
    pub async fn run_at(&self, batch_size: usize, now: DateTime<Utc>) -> Result<DispatchSummary> {
        // A store failure here aborts the run and surfaces to the caller;
        // everything past this point is per-item and isolated.
        let subscriptions = self.store.active_subscriptions()?;
        tracing::debug!("Dispatching over {} active subscription(s)", subscriptions.len());

        let mut summary = DispatchSummary::default();
        for sub in &subscriptions {
            if summary.attempted >= batch_size {
                tracing::info!("Reached batch limit of {batch_size}, deferring the rest");
                break;
            }
            summary.evaluated += 1;

            let campaign = match self.registry.get(&sub.campaign_id) {
                Ok(c) => c,
                Err(e) => {
                    // Orphaned row (campaign removed from the registry);
                    // skip it rather than abort the batch.
                    tracing::warn!("⚠️ Skipping subscription #{}: {e}", sub.id);
                    continue;
                }
            };

            let Some(message) = evaluator::next_due(sub, campaign, now) else {
                continue;
            };

            if !self.limiter.try_acquire_at(now) {
                tracing::debug!("Rate limit reached, deferring remaining subscriptions");
                break;
            }

            summary.attempted += 1;
            match self.deliver(sub, campaign, message.number).await {
                Ok(()) => {
                    summary.sent += 1;
                    self.record(sub, message, DeliveryStatus::Success, None, now);
                    if let Err(e) = self.store.advance_cursor(sub.id, message.number) {
                        tracing::error!("Cursor advance failed for subscription #{}: {e}", sub.id);
                    }
                    tracing::info!(
                        "✅ Sent '{}' #{} to {}",
                        sub.campaign_id,
                        message.number,
                        sub.address
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    self.record(sub, message, DeliveryStatus::Failed, Some(e.to_string()), now);
                    match self.retry.on_failure(sub, message) {
                        RetryAction::RetryNextTick => {
                            // Cursor unmoved: the message stays due and is
                            // retried on the next run.
                        }
                        RetryAction::Skip => {
                            if let Err(e) = self.store.advance_cursor(sub.id, message.number) {
                                tracing::error!(
                                    "Cursor advance failed for subscription #{}: {e}",
                                    sub.id
                                );
                            }
                        }
                    }
                    tracing::warn!(
                        "❌ Failed '{}' #{} to {}: {e}",
                        sub.campaign_id,
                        message.number,
                        sub.address
                    );
                }
            }
        }

        tracing::info!(
            "Dispatch pass done: {} sent, {} failed, {} evaluated",
            summary.sent,
            summary.failed,
            summary.evaluated
        );
        Ok(summary)
    }

    async fn deliver(&self, sub: &Subscription, campaign: &Campaign, number: u32) -> Result<()> {
        let message = campaign.message(number)?;
        let template = TemplateRef::new(message.template.clone(), message.subject.clone());
        let payload = self.payload(sub, campaign, message)?;
        self.transport.send(&sub.address, &template, &payload).await
    }

    /// Assemble the opaque template payload from subscriber, campaign, and
    /// message metadata.
    fn payload(
        &self,
        sub: &Subscription,
        campaign: &Campaign,
        message: &CampaignMessage,
    ) -> Result<serde_json::Value> {
        let first_name = sub
            .subscriber_id
            .and_then(|id| self.directory.display_name(id))
            .unwrap_or_else(|| "there".to_string());
        let token = self
            .store
            .unsubscribe_token(&sub.address, &sub.campaign_id)?
            .unwrap_or_default();
        Ok(serde_json::json!({
            "first_name": first_name,
            "email": sub.address,
            "subject": message.subject,
            "title": message.title,
            "message_number": message.number,
            "campaign_id": campaign.id,
            "campaign_name": campaign.name,
            "campaign_emoji": campaign.emoji,
            "unsubscribe_link": self.unsubscribe_link(&sub.address, &campaign.id, &token),
        }))
    }

    fn unsubscribe_link(&self, address: &str, campaign_id: &str, token: &str) -> String {
        unsubscribe_link(&self.base_url, address, campaign_id, token)
    }

    /// A failure writing the audit record is logged and swallowed — the
    /// record is for diagnosis, not control flow.
    fn record(
        &self,
        sub: &Subscription,
        message: &CampaignMessage,
        status: DeliveryStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) {
        let rec = DeliveryRecord {
            subscription_id: sub.id,
            message_number: message.number,
            template: message.template.clone(),
            subject: message.subject.clone(),
            status,
            sent_at: now,
            error,
        };
        if let Err(e) = self.store.record_delivery(&rec) {
            tracing::error!("Delivery log write failed for subscription #{}: {e}", sub.id);
        }
    }
}

fn unsubscribe_link(base_url: &str, address: &str, campaign_id: &str, token: &str) -> String {
    format!(
        "{}/unsubscribe?email={}&campaign={}&token={}",
        base_url,
        urlencoding::encode(address),
        urlencoding::encode(campaign_id),
        urlencoding::encode(token)
    )
}
