//! Maildrip error taxonomy.
//!
//! Recoverable failures (`Transport`) drive the retry-on-next-tick policy;
//! `Config` and `InvalidCampaign` are startup-fatal and never produced at
//! dispatch time.

use thiserror::Error;

/// Convenience result alias used across all Maildrip crates.
pub type Result<T> = std::result::Result<T, MaildripError>;

/// All errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum MaildripError {
    /// No campaign registered under the given id.
    #[error("campaign not found: {0}")]
    CampaignNotFound(String),

    /// The requested message number is absent from the campaign definition.
    #[error("message #{number} not found in campaign '{campaign}'")]
    MessageNotFound { campaign: String, number: u32 },

    /// Unsubscribe or status change on a row that is missing or not active.
    #[error("no active subscription for {address} in campaign '{campaign}'")]
    NoActiveSubscription { address: String, campaign: String },

    /// Unsubscribe-link token does not match the stored one.
    #[error("invalid unsubscribe token for {address} in campaign '{campaign}'")]
    InvalidToken { address: String, campaign: String },

    /// Delivery attempt failed. Recoverable: the cursor stays put and the
    /// same message is retried on the next dispatcher run.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Persistence layer error.
    #[error("store failure: {0}")]
    Store(String),

    /// Bad configuration or invalid operation arguments.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed campaign definition rejected at registry construction.
    #[error("invalid campaign definition: {0}")]
    InvalidCampaign(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MaildripError {
    /// True for errors that the dispatcher retries by leaving the
    /// subscription cursor unmoved.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MaildripError::Transport(_))
    }
}
