//! Subscription list filtering and sorting.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

use league_events::EventKind;

use crate::error::WebhookError;
use crate::subscription::Subscription;

/// Filter applied when listing subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    /// Only subscriptions scoped to this team.
    pub team_id: Option<i64>,
    /// Only subscriptions scoped to this player.
    pub player_id: Option<i64>,
    /// Only subscriptions listening to this event kind.
    pub event: Option<EventKind>,
    /// Only active (or inactive) subscriptions.
    pub active: Option<bool>,
}

impl SubscriptionFilter {
    /// Checks whether a subscription passes the filter.
    pub fn accepts(&self, subscription: &Subscription) -> bool {
        self.team_id.is_none_or(|id| subscription.team_id == Some(id))
            && self.player_id.is_none_or(|id| subscription.player_id == Some(id))
            && self.event.is_none_or(|kind| subscription.events.contains(&kind))
            && self.active.is_none_or(|active| subscription.active == active)
    }
}

/// Fields a subscription list can be sorted by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    Url,
    RateLimit,
    RetryCount,
}

impl SubscriptionSort {
    /// Compares two subscriptions on this field.
    pub fn compare(&self, a: &Subscription, b: &Subscription) -> Ordering {
        match self {
            Self::CreatedAt => a.created_at.cmp(&b.created_at),
            Self::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            Self::Url => a.url.cmp(&b.url),
            Self::RateLimit => a.rate_limit.cmp(&b.rate_limit),
            Self::RetryCount => a.retry_count.cmp(&b.retry_count),
        }
    }
}

impl FromStr for SubscriptionSort {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at" => Ok(Self::CreatedAt),
            "updated_at" => Ok(Self::UpdatedAt),
            "url" => Ok(Self::Url),
            "rate_limit" => Ok(Self::RateLimit),
            "retry_count" => Ok(Self::RetryCount),
            other => Err(WebhookError::validation(format!(
                "cannot sort by '{}'; expected one of created_at, updated_at, url, rate_limit, retry_count",
                other
            ))),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(WebhookError::validation(format!(
                "invalid sort order '{}'; expected asc or desc",
                other
            ))),
        }
    }
}

/// A complete list request: filter, ordering and paging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub filter: SubscriptionFilter,
    pub sort: SubscriptionSort,
    pub order: SortOrder,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl ListQuery {
    /// Sorts and pages an already filtered list.
    pub(crate) fn arrange(&self, mut subscriptions: Vec<Subscription>) -> Vec<Subscription> {
        subscriptions.sort_by(|a, b| {
            let ordering = self.sort.compare(a, b).then_with(|| a.id.cmp(&b.id));
            match self.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let paged = subscriptions.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => paged.take(limit).collect(),
            None => paged.collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::NewSubscription;

    fn sub(url: &str, rate_limit: u32) -> Subscription {
        Subscription::from_request(
            NewSubscription::new(url, "secret", [EventKind::GameResult]).rate_limit(rate_limit),
        )
        .unwrap()
    }

    #[test]
    fn test_sort_field_parsing() {
        assert_eq!("rate_limit".parse::<SubscriptionSort>().unwrap(), SubscriptionSort::RateLimit);
        let err = "secret".parse::<SubscriptionSort>().unwrap_err();
        assert!(matches!(err, WebhookError::Validation(_)));
    }

    #[test]
    fn test_filter() {
        let mut scoped = sub("https://a.example.com", 10);
        scoped.team_id = Some(5);
        let plain = sub("https://b.example.com", 10);

        let filter = SubscriptionFilter {
            team_id: Some(5),
            ..Default::default()
        };
        assert!(filter.accepts(&scoped));
        assert!(!filter.accepts(&plain));

        let by_event = SubscriptionFilter {
            event: Some(EventKind::TeamUpdate),
            ..Default::default()
        };
        assert!(!by_event.accepts(&plain));
    }

    #[test]
    fn test_arrange_sorts_and_pages() {
        let subs = vec![
            sub("https://c.example.com", 30),
            sub("https://a.example.com", 10),
            sub("https://b.example.com", 20),
        ];

        let query = ListQuery {
            sort: SubscriptionSort::RateLimit,
            order: SortOrder::Desc,
            offset: 1,
            limit: Some(1),
            ..Default::default()
        };
        let page = query.arrange(subs.clone());
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].rate_limit, 20);

        let by_url = ListQuery {
            sort: SubscriptionSort::Url,
            ..Default::default()
        };
        let urls: Vec<_> = by_url.arrange(subs).into_iter().map(|s| s.url).collect();
        assert_eq!(
            urls,
            vec!["https://a.example.com", "https://b.example.com", "https://c.example.com"]
        );
    }
}
