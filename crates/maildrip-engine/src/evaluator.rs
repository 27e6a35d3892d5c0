//! Eligibility Evaluator — pure computation of the one due message.
//!
//! Scans the sequence in increasing number order and returns the *first*
//! message past the cursor whose send-day offset has elapsed. If the
//! scheduler was down and several messages became eligible, each pass
//! advances by exactly one — catch-up happens one tick at a time instead
//! of bursting the backlog.

use chrono::{DateTime, Utc};

use maildrip_core::types::{Subscription, SubscriptionStatus};

use crate::registry::{Campaign, CampaignMessage};

/// Whole days elapsed since enrollment at evaluation time.
pub fn elapsed_days(sub: &Subscription, now: DateTime<Utc>) -> i64 {
    (now - sub.subscribed_at).num_days()
}

/// The message due for this subscription at `now`, if any.
///
/// Only active subscriptions are ever due. Returns the lowest-numbered
/// message with `number > cursor` and `send_day_offset <= elapsed_days`.
pub fn next_due<'a>(
    sub: &Subscription,
    campaign: &'a Campaign,
    now: DateTime<Utc>,
) -> Option<&'a CampaignMessage> {
    if sub.status != SubscriptionStatus::Active {
        return None;
    }
    let elapsed = elapsed_days(sub, now);
    if elapsed < 0 {
        return None;
    }
    campaign
        .messages
        .iter()
        .find(|m| m.number > sub.last_sent && i64::from(m.send_day_offset) <= elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CampaignMessage;
    use chrono::Duration;

    fn campaign() -> Campaign {
        Campaign {
            id: "fixture".into(),
            name: "Fixture".into(),
            description: String::new(),
            emoji: String::new(),
            auto_subscribe: false,
            messages: vec![
                CampaignMessage {
                    number: 1,
                    subject: "One".into(),
                    title: String::new(),
                    template: "f/1".into(),
                    send_day_offset: 0,
                },
                CampaignMessage {
                    number: 2,
                    subject: "Two".into(),
                    title: String::new(),
                    template: "f/2".into(),
                    send_day_offset: 1,
                },
                CampaignMessage {
                    number: 3,
                    subject: "Three".into(),
                    title: String::new(),
                    template: "f/3".into(),
                    send_day_offset: 3,
                },
            ],
        }
    }

    fn sub(last_sent: u32, status: SubscriptionStatus, subscribed_at: DateTime<Utc>) -> Subscription {
        Subscription {
            id: 1,
            subscriber_id: None,
            address: "a@example.com".into(),
            campaign_id: "fixture".into(),
            status,
            subscribed_at,
            last_sent,
            unsubscribed_at: None,
        }
    }

    #[test]
    fn first_message_due_immediately() {
        let t0 = Utc::now();
        let campaign = campaign();
        let due = next_due(&sub(0, SubscriptionStatus::Active, t0), &campaign, t0).unwrap();
        assert_eq!(due.number, 1);
    }

    #[test]
    fn catch_up_returns_lowest_eligible_not_latest() {
        // Cursor 0 at day 3: messages 1, 2, and 3 are all eligible, but a
        // single evaluation only yields #1.
        let t0 = Utc::now() - Duration::days(3);
        let campaign = campaign();
        let due = next_due(&sub(0, SubscriptionStatus::Active, t0), &campaign, Utc::now()).unwrap();
        assert_eq!(due.number, 1);
    }

    #[test]
    fn offset_gates_delivery() {
        let t0 = Utc::now() - Duration::hours(20); // elapsed = 0 days
        let s = sub(1, SubscriptionStatus::Active, t0);
        assert!(next_due(&s, &campaign(), Utc::now()).is_none());

        let t0 = Utc::now() - Duration::hours(26); // elapsed = 1 day
        let s = sub(1, SubscriptionStatus::Active, t0);
        assert_eq!(next_due(&s, &campaign(), Utc::now()).unwrap().number, 2);
    }

    #[test]
    fn exhausted_sequence_is_never_due() {
        let t0 = Utc::now() - Duration::days(30);
        let s = sub(3, SubscriptionStatus::Active, t0);
        assert!(next_due(&s, &campaign(), Utc::now()).is_none());
    }

    #[test]
    fn non_active_subscriptions_are_never_due() {
        let t0 = Utc::now() - Duration::days(3);
        for status in [SubscriptionStatus::Paused, SubscriptionStatus::Unsubscribed] {
            assert!(next_due(&sub(0, status, t0), &campaign(), Utc::now()).is_none());
        }
    }

    #[test]
    fn clock_skew_before_enrollment_is_not_due() {
        let t0 = Utc::now() + Duration::hours(2);
        assert!(next_due(&sub(0, SubscriptionStatus::Active, t0), &campaign(), Utc::now()).is_none());
    }
}
