//! # Maildrip Core
//!
//! Shared foundation for the drip-campaign engine: the error taxonomy,
//! TOML configuration, data model types, and the traits that external
//! collaborators (message transport, subscriber directory) implement.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{MaildripConfig, SchedulerConfig, SmtpConfig, StoreConfig};
pub use error::{MaildripError, Result};
pub use traits::{Directory, Transport};
pub use types::{
    BroadcastKind, BroadcastRecipient, DeliveryRecord, DeliveryStatus, Subscription,
    SubscriptionStatus, TemplateRef,
};
