//! Log-only transport for non-production environments.
//!
//! Every send is reported through tracing and counted, nothing leaves the
//! process. Wired in whenever `production = false` in the config.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use maildrip_core::error::Result;
use maildrip_core::traits::Transport;
use maildrip_core::types::TemplateRef;

/// Transport that logs instead of sending.
#[derive(Default)]
pub struct LogTransport {
    sent: AtomicUsize,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sends logged so far.
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for LogTransport {
    async fn send(
        &self,
        to: &str,
        template: &TemplateRef,
        _payload: &serde_json::Value,
    ) -> Result<()> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "[dry-run] Would send '{}' ({}) to {to}",
            template.subject,
            template.name
        );
        Ok(())
    }
}
