//! Collaborator traits — the seams where the engine talks to the outside.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BroadcastKind, BroadcastRecipient, TemplateRef};

/// Message transport: renders a named template with a data payload and
/// delivers it to an address. The engine never looks inside the payload;
/// rendering and wire protocol are entirely the transport's business.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        to: &str,
        template: &TemplateRef,
        payload: &serde_json::Value,
    ) -> Result<()>;
}

/// Identity / subscriber directory: resolves display names for registered
/// subscribers and enumerates the audiences for recurring broadcasts.
pub trait Directory: Send + Sync {
    /// Display name for a registered subscriber, if known.
    fn display_name(&self, subscriber_id: i64) -> Option<String>;

    /// Subscribers eligible for the given recurring broadcast, independent
    /// of any drip-campaign cursor.
    fn broadcast_eligible(&self, kind: BroadcastKind) -> Result<Vec<BroadcastRecipient>>;
}
