//! Data model — subscriptions, delivery records, broadcast audiences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription lifecycle state.
///
/// Only `Active` subscriptions are evaluated for delivery; `Paused` and
/// `Unsubscribed` rows are skipped by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Unsubscribed,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Unsubscribed => "unsubscribed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "paused" => Some(SubscriptionStatus::Paused),
            "unsubscribed" => Some(SubscriptionStatus::Unsubscribed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subscriber's enrollment and progress record for one campaign.
///
/// At most one row exists per (address, campaign) pair; re-subscription
/// mutates the existing row. `last_sent` is the progress cursor: the number
/// of the last successfully delivered message, 0 before any delivery. It
/// only ever advances on a confirmed successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    /// Optional link to a registered identity. None for anonymous
    /// subscribers who signed up by address only.
    pub subscriber_id: Option<i64>,
    pub address: String,
    pub campaign_id: String,
    pub status: SubscriptionStatus,
    /// Reset whenever an unsubscribed row is reactivated.
    pub subscribed_at: DateTime<Utc>,
    pub last_sent: u32,
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// Append-only audit record of a single send attempt. Created once per
/// attempt, never mutated, never consulted for control flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub subscription_id: i64,
    pub message_number: u32,
    pub template: String,
    pub subject: String,
    pub status: DeliveryStatus,
    pub sent_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Which recurring broadcast audience to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastKind {
    Daily,
    Weekly,
}

impl std::fmt::Display for BroadcastKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BroadcastKind::Daily => f.write_str("daily"),
            BroadcastKind::Weekly => f.write_str("weekly"),
        }
    }
}

/// A broadcast target resolved by the subscriber directory.
#[derive(Debug, Clone)]
pub struct BroadcastRecipient {
    pub address: String,
    pub display_name: Option<String>,
}

/// Named template reference handed to the transport together with an opaque
/// data payload. Rendering is the transport's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRef {
    pub name: String,
    pub subject: String,
}

impl TemplateRef {
    pub fn new(name: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
        }
    }
}
