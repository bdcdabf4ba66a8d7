//! Notification feed synthesised from orders, subscriptions and referral
//! invites. Nothing here is stored; the feed is rebuilt on every request.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::billing::plans::Tier;
use crate::models::order::OrderRow;
use crate::models::referral::{ReferralInviteRow, INVITE_REGISTERED, INVITE_REWARDED};
use crate::models::subscription::{SubscriptionRow, STATUS_CANCELED};

pub const FEED_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderCreated,
    OrderDelivered,
    SubscriptionActivated,
    SubscriptionCanceled,
    ReferralRegistered,
    ReferralRewarded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

fn order_label(order: &OrderRow) -> String {
    order
        .property_address
        .as_deref()
        .or(order.client_name.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Order {}", order.id))
}

fn order_events(order: &OrderRow) -> Vec<Notification> {
    let label = order_label(order);
    let mut events = vec![Notification {
        id: format!("order-{}-created", order.id),
        kind: NotificationKind::OrderCreated,
        title: "Order received".to_string(),
        message: format!("{label} was submitted."),
        created_at: order.created_at,
    }];
    if let Some(delivered_at) = order.delivered_at {
        events.push(Notification {
            id: format!("order-{}-delivered", order.id),
            kind: NotificationKind::OrderDelivered,
            title: "Media delivered".to_string(),
            message: format!("{label} is ready to download."),
            created_at: delivered_at,
        });
    }
    events
}

fn subscription_events(sub: &SubscriptionRow) -> Vec<Notification> {
    let tier = Tier::from_plan_string(&sub.plan);
    let mut events = vec![Notification {
        id: format!("subscription-{}-activated", sub.id),
        kind: NotificationKind::SubscriptionActivated,
        title: "Subscription started".to_string(),
        message: format!("Your {} plan ({}) is active.", tier.as_str(), sub.plan),
        created_at: sub.started_at,
    }];
    if sub.status == STATUS_CANCELED {
        events.push(Notification {
            id: format!("subscription-{}-canceled", sub.id),
            kind: NotificationKind::SubscriptionCanceled,
            title: "Subscription canceled".to_string(),
            message: format!("Your {} subscription was canceled.", sub.plan),
            created_at: sub.updated_at,
        });
    }
    events
}

fn invite_event(invite: &ReferralInviteRow) -> Option<Notification> {
    match invite.status.as_str() {
        INVITE_REGISTERED => Some(Notification {
            id: format!("referral-{}-registered", invite.id),
            kind: NotificationKind::ReferralRegistered,
            title: "Referral joined".to_string(),
            message: format!("{} signed up from your invite.", invite.invitee_email),
            created_at: invite.updated_at,
        }),
        INVITE_REWARDED => Some(Notification {
            id: format!("referral-{}-rewarded", invite.id),
            kind: NotificationKind::ReferralRewarded,
            title: "Referral bonus earned".to_string(),
            message: format!(
                "{} subscribed. You both received a free month of Personal.",
                invite.invitee_email
            ),
            created_at: invite.rewarded_at.unwrap_or(invite.updated_at),
        }),
        _ => None,
    }
}

/// Merges every source into one list, newest first, capped at `FEED_LIMIT`.
pub fn build_feed(
    orders: &[OrderRow],
    subscriptions: &[SubscriptionRow],
    invites: &[ReferralInviteRow],
) -> Vec<Notification> {
    let mut feed: Vec<Notification> = orders
        .iter()
        .flat_map(order_events)
        .chain(subscriptions.iter().flat_map(subscription_events))
        .chain(invites.iter().filter_map(invite_event))
        .collect();
    feed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    feed.truncate(FEED_LIMIT);
    feed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    use crate::billing::resolver::tests::row;
    use crate::models::referral::INVITE_PENDING;

    fn order(created_at: DateTime<Utc>, delivered_at: Option<DateTime<Utc>>) -> OrderRow {
        OrderRow {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            property_address: Some("12 Harbour St".to_string()),
            client_name: None,
            status: "pending".to_string(),
            created_at,
            delivered_at,
        }
    }

    fn invite(status: &str, updated_at: DateTime<Utc>) -> ReferralInviteRow {
        ReferralInviteRow {
            id: Uuid::new_v4(),
            referrer_id: Uuid::nil(),
            invitee_email: "friend@x.com".to_string(),
            code: "ABCDEF123456".to_string(),
            status: status.to_string(),
            invitee_user_id: None,
            rewarded_at: None,
            created_at: updated_at,
            updated_at,
        }
    }

    #[test]
    fn test_feed_is_sorted_newest_first() {
        let now = Utc::now();
        let orders = vec![
            order(now - Duration::hours(5), Some(now - Duration::hours(1))),
            order(now - Duration::hours(3), None),
        ];
        let mut sub = row("business_monthly", None);
        sub.started_at = now - Duration::hours(4);
        let invites = vec![invite(INVITE_REGISTERED, now - Duration::hours(2))];

        let feed = build_feed(&orders, &[sub], &invites);
        let kinds: Vec<NotificationKind> = feed.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NotificationKind::OrderDelivered,
                NotificationKind::ReferralRegistered,
                NotificationKind::OrderCreated,
                NotificationKind::SubscriptionActivated,
                NotificationKind::OrderCreated,
            ]
        );
    }

    #[test]
    fn test_canceled_subscription_adds_event() {
        let mut sub = row("personal_annual", None);
        sub.status = STATUS_CANCELED.to_string();
        let feed = build_feed(&[], &[sub], &[]);
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].kind, NotificationKind::SubscriptionCanceled);
    }

    #[test]
    fn test_pending_invites_are_silent() {
        let feed = build_feed(&[], &[], &[invite(INVITE_PENDING, Utc::now())]);
        assert!(feed.is_empty());
    }

    #[test]
    fn test_feed_is_capped() {
        let now = Utc::now();
        let orders: Vec<OrderRow> = (0..80)
            .map(|i| order(now - Duration::minutes(i), Some(now)))
            .collect();
        let feed = build_feed(&orders, &[], &[]);
        assert_eq!(feed.len(), FEED_LIMIT);
        assert!(feed.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }

    #[test]
    fn test_serialized_shape() {
        let feed = build_feed(&[order(Utc::now(), None)], &[], &[]);
        let value = serde_json::to_value(&feed[0]).unwrap();
        assert_eq!(value["type"], "order_created");
        assert!(value.get("createdAt").is_some());
    }
}
