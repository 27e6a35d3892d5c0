//! Campaign Registry — immutable, validated campaign definitions.
//!
//! The registry is an explicitly constructed value handed to the evaluator
//! and dispatcher at startup; there is no global campaign map. Construction
//! validates every sequence and fails fast, so malformed definitions never
//! reach dispatch time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use maildrip_core::error::{MaildripError, Result};

/// A single message in a campaign sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignMessage {
    /// Position in the sequence, starting at 1. Strictly increasing and
    /// unique within a campaign.
    pub number: u32,
    pub subject: String,
    #[serde(default)]
    pub title: String,
    /// Template reference handed to the transport,
    /// e.g. "courses/onboarding/1-welcome".
    pub template: String,
    /// Days after subscription at which this message becomes eligible
    /// (0 = immediately). Non-decreasing with `number`.
    pub send_day_offset: u32,
}

/// A named, ordered sequence of timed messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub emoji: String,
    /// Whether newly registered subscribers are enrolled automatically.
    #[serde(default)]
    pub auto_subscribe: bool,
    pub messages: Vec<CampaignMessage>,
}

impl Campaign {
    /// Look up a message by sequence number.
    pub fn message(&self, number: u32) -> Result<&CampaignMessage> {
        self.messages
            .iter()
            .find(|m| m.number == number)
            .ok_or_else(|| MaildripError::MessageNotFound {
                campaign: self.id.clone(),
                number,
            })
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(MaildripError::InvalidCampaign("empty campaign id".into()));
        }
        if self.messages.is_empty() {
            return Err(MaildripError::InvalidCampaign(format!(
                "campaign '{}' has no messages",
                self.id
            )));
        }
        let mut prev: Option<&CampaignMessage> = None;
        for msg in &self.messages {
            if msg.number == 0 {
                return Err(MaildripError::InvalidCampaign(format!(
                    "campaign '{}': message numbers start at 1",
                    self.id
                )));
            }
            if let Some(p) = prev {
                if msg.number <= p.number {
                    return Err(MaildripError::InvalidCampaign(format!(
                        "campaign '{}': message numbers must be strictly increasing \
                         (#{} after #{})",
                        self.id, msg.number, p.number
                    )));
                }
                if msg.send_day_offset < p.send_day_offset {
                    return Err(MaildripError::InvalidCampaign(format!(
                        "campaign '{}': send-day offsets must be non-decreasing \
                         (#{} at day {} after #{} at day {})",
                        self.id, msg.number, msg.send_day_offset, p.number, p.send_day_offset
                    )));
                }
            }
            prev = Some(msg);
        }
        Ok(())
    }
}

/// Immutable set of campaign definitions, keyed by id.
pub struct CampaignRegistry {
    campaigns: BTreeMap<String, Campaign>,
}

impl CampaignRegistry {
    /// Build a registry, validating every campaign. Errors here are
    /// startup-fatal by design.
    pub fn new(campaigns: Vec<Campaign>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for campaign in campaigns {
            campaign.validate()?;
            if map.insert(campaign.id.clone(), campaign.clone()).is_some() {
                return Err(MaildripError::InvalidCampaign(format!(
                    "duplicate campaign id '{}'",
                    campaign.id
                )));
            }
        }
        Ok(Self { campaigns: map })
    }

    /// The stock campaign set shipped with the engine.
    pub fn builtin() -> Self {
        Self::new(builtin_campaigns()).expect("builtin campaign definitions are valid")
    }

    pub fn get(&self, id: &str) -> Result<&Campaign> {
        self.campaigns
            .get(id)
            .ok_or_else(|| MaildripError::CampaignNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.campaigns.contains_key(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Campaign> {
        self.campaigns.values()
    }

    /// Campaigns that newly registered subscribers are enrolled in.
    pub fn auto_subscribe_campaigns(&self) -> Vec<&Campaign> {
        self.campaigns.values().filter(|c| c.auto_subscribe).collect()
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}

fn msg(number: u32, subject: &str, template: &str, send_day_offset: u32) -> CampaignMessage {
    CampaignMessage {
        number,
        subject: subject.into(),
        title: subject.into(),
        template: template.into(),
        send_day_offset,
    }
}

fn builtin_campaigns() -> Vec<Campaign> {
    vec![
        Campaign {
            id: "onboarding".into(),
            name: "Getting Started".into(),
            description: "Learn the basics and build a consistent routine.".into(),
            emoji: "🚀".into(),
            auto_subscribe: true,
            messages: vec![
                msg(1, "Welcome!", "courses/onboarding/1-welcome", 0),
                msg(2, "Your First Week", "courses/onboarding/2-first-week", 1),
                msg(3, "Setting Effective Goals", "courses/onboarding/3-goals", 3),
                msg(4, "Building a Routine", "courses/onboarding/4-routine", 7),
            ],
        },
        Campaign {
            id: "digital-detox".into(),
            name: "Digital Detox".into(),
            description: "Break free from digital dependence and reclaim your focus.".into(),
            emoji: "📱".into(),
            auto_subscribe: false,
            messages: vec![msg(
                1,
                "Day 1: The Phone Addiction Pandemic",
                "courses/digital-detox/1-phone-addiction",
                0,
            )],
        },
        Campaign {
            id: "phone-addiction".into(),
            name: "Breaking Phone Addiction".into(),
            description: "Break the cycle and regain control of your attention.".into(),
            emoji: "📵".into(),
            auto_subscribe: false,
            messages: vec![
                msg(
                    1,
                    "Day 1: The Phone Addiction Pandemic",
                    "courses/phone-addiction/1-phone-addiction",
                    0,
                ),
                msg(
                    2,
                    "Day 2: How Social Media Exploits Your Caveman Brain",
                    "courses/phone-addiction/2-caveman-brain",
                    1,
                ),
                msg(
                    3,
                    "Day 3: 3 Ways to Break Free",
                    "courses/phone-addiction/3-break-free",
                    2,
                ),
                msg(4, "Day 4: Remix Your Routine", "courses/phone-addiction/4-routine", 3),
                msg(
                    5,
                    "Day 5: Do a 24-Hour Digital Detox",
                    "courses/phone-addiction/5-detox",
                    4,
                ),
            ],
        },
    ]
}
