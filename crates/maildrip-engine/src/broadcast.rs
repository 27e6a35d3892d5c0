//! Broadcast jobs — recurring sends to computed audiences.
//!
//! Unlike drip dispatch these ignore any per-subscriber cursor: the
//! directory decides who is eligible each time. Recipients are processed
//! in sub-batches with a sleep in between to smooth load on the transport.

use std::sync::Arc;
use std::time::Duration;

use maildrip_core::error::Result;
use maildrip_core::traits::{Directory, Transport};
use maildrip_core::types::{BroadcastKind, TemplateRef};

const DAILY_TEMPLATE: &str = "broadcast/daily-reminder";
const DAILY_SUBJECT: &str = "Your daily reminder";
const WEEKLY_TEMPLATE: &str = "broadcast/weekly-nudge";
const WEEKLY_SUBJECT: &str = "A nudge to get started";

/// Outcome counts for one broadcast run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub audience: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Runs the daily and weekly broadcast jobs.
pub struct Broadcaster {
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
    batch_size: usize,
    batch_delay: Duration,
}

impl Broadcaster {
    pub fn new(
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
        batch_size: usize,
        batch_delay: Duration,
    ) -> Self {
        Self {
            directory,
            transport,
            batch_size: batch_size.max(1),
            batch_delay,
        }
    }

    /// Daily reminder to the engaged audience.
    pub async fn run_daily(&self) -> Result<BroadcastSummary> {
        self.run(
            BroadcastKind::Daily,
            TemplateRef::new(DAILY_TEMPLATE, DAILY_SUBJECT),
        )
        .await
    }

    /// Weekly re-engagement nudge to the not-yet-engaged audience.
    pub async fn run_weekly(&self) -> Result<BroadcastSummary> {
        self.run(
            BroadcastKind::Weekly,
            TemplateRef::new(WEEKLY_TEMPLATE, WEEKLY_SUBJECT),
        )
        .await
    }

    async fn run(&self, kind: BroadcastKind, template: TemplateRef) -> Result<BroadcastSummary> {
        let recipients = self.directory.broadcast_eligible(kind)?;
        tracing::info!("📣 {kind} broadcast to {} recipient(s)", recipients.len());

        let mut summary = BroadcastSummary {
            audience: recipients.len(),
            ..Default::default()
        };
        for (i, chunk) in recipients.chunks(self.batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.batch_delay).await;
            }
            for recipient in chunk {
                let payload = serde_json::json!({
                    "first_name": recipient.display_name.as_deref().unwrap_or("there"),
                    "email": recipient.address,
                });
                match self
                    .transport
                    .send(&recipient.address, &template, &payload)
                    .await
                {
                    Ok(()) => summary.sent += 1,
                    Err(e) => {
                        // One bad recipient never stops the broadcast.
                        summary.failed += 1;
                        tracing::warn!("❌ {kind} broadcast to {} failed: {e}", recipient.address);
                    }
                }
            }
        }

        tracing::info!(
            "📣 {kind} broadcast done: {} sent, {} failed",
            summary.sent,
            summary.failed
        );
        Ok(summary)
    }
}
