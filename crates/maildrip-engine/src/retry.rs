//! Retry policy for failed deliveries.
//!
//! The engine's retry mechanism is the unmoved cursor: a failed message
//! stays "due" and is picked up again on the next dispatcher run. Making
//! that an explicit policy keeps the dispatcher open to backoff strategies
//! without touching its batch loop.

use maildrip_core::types::Subscription;

use crate::registry::CampaignMessage;

/// What to do with the cursor after a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Leave the cursor unmoved; the same message is re-selected on the
    /// next run.
    RetryNextTick,
    /// Advance past the message anyway, dropping it from the sequence.
    Skip,
}

/// Policy consulted once per failed attempt.
pub trait RetryPolicy: Send + Sync {
    fn on_failure(&self, subscription: &Subscription, message: &CampaignMessage) -> RetryAction;
}

/// Default policy: retry on the next tick, indefinitely, no backoff.
pub struct NextTickRetry;

impl RetryPolicy for NextTickRetry {
    fn on_failure(&self, _subscription: &Subscription, _message: &CampaignMessage) -> RetryAction {
        RetryAction::RetryNextTick
    }
}
