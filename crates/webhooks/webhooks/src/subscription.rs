//! Webhook subscription model and validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

use league_events::{Event, EventKind};

use crate::error::{WebhookError, WebhookResult};

/// Default maximum delivery attempts per event.
pub const DEFAULT_RETRY_COUNT: u32 = 3;
/// Default base backoff in seconds.
pub const DEFAULT_RETRY_DELAY: u32 = 60;
/// Default deliveries admitted per 60 second window.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

/// A registered webhook target with its event filter and delivery policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique identifier.
    pub id: String,
    /// Target URL.
    pub url: String,
    /// Secret for signing payloads.
    pub secret: String,
    /// Subscribed event kinds, never empty.
    pub events: BTreeSet<EventKind>,
    /// Only deliver events for this team (`None` = all teams).
    pub team_id: Option<i64>,
    /// Only deliver events for this player (`None` = all players).
    pub player_id: Option<i64>,
    /// Whether this subscription receives deliveries.
    pub active: bool,
    /// Maximum delivery attempts per event.
    pub retry_count: u32,
    /// Base backoff between attempts, in seconds.
    pub retry_delay: u32,
    /// Maximum deliveries per rolling 60 second window.
    pub rate_limit: u32,
    /// When a retry was last attempted.
    pub last_retry: Option<DateTime<Utc>>,
    /// Most recent delivery error.
    pub last_error: Option<String>,
    /// When the subscriber last completed the verification handshake.
    pub verified_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, bumped on every write.
    pub version: u64,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
    /// When the subscription was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Builds a validated subscription from a registration request.
    pub fn from_request(request: NewSubscription) -> WebhookResult<Self> {
        validate_url(&request.url)?;
        validate_secret(&request.secret)?;
        validate_events(&request.events)?;
        validate_policy(request.retry_count, request.retry_delay, request.rate_limit)?;

        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: request.url,
            secret: request.secret,
            events: request.events,
            team_id: request.team_id,
            player_id: request.player_id,
            active: request.active,
            retry_count: request.retry_count,
            retry_delay: request.retry_delay,
            rate_limit: request.rate_limit,
            last_retry: None,
            last_error: None,
            verified_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies a partial update, validating the resulting subscription.
    ///
    /// On error the subscription is left untouched.
    pub fn apply(&mut self, patch: SubscriptionPatch) -> WebhookResult<()> {
        let mut next = self.clone();

        if let Some(url) = patch.url {
            next.url = url;
        }
        if let Some(secret) = patch.secret {
            next.secret = secret;
        }
        if let Some(events) = patch.events {
            next.events = events;
        }
        if let Some(team_id) = patch.team_id {
            next.team_id = team_id;
        }
        if let Some(player_id) = patch.player_id {
            next.player_id = player_id;
        }
        if let Some(active) = patch.active {
            next.active = active;
        }
        if let Some(retry_count) = patch.retry_count {
            next.retry_count = retry_count;
        }
        if let Some(retry_delay) = patch.retry_delay {
            next.retry_delay = retry_delay;
        }
        if let Some(rate_limit) = patch.rate_limit {
            next.rate_limit = rate_limit;
        }

        validate_url(&next.url)?;
        validate_secret(&next.secret)?;
        validate_events(&next.events)?;
        validate_policy(next.retry_count, next.retry_delay, next.rate_limit)?;

        // A new target has not proven control yet.
        if next.url != self.url {
            next.verified_at = None;
        }

        *self = next;
        Ok(())
    }

    /// Checks whether this subscription should receive an event.
    pub fn matches(&self, event: &Event) -> bool {
        self.active
            && self.events.contains(&event.kind)
            && scope_matches(self.team_id, event.team_id)
            && scope_matches(self.player_id, event.player_id)
    }

    /// Marks the record as written, bumping version and timestamp.
    pub(crate) fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

fn scope_matches(filter: Option<i64>, actual: Option<i64>) -> bool {
    match filter {
        None => true,
        Some(id) => actual == Some(id),
    }
}

/// Registration request for a new subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    pub url: String,
    pub secret: String,
    pub events: BTreeSet<EventKind>,
    #[serde(default)]
    pub team_id: Option<i64>,
    #[serde(default)]
    pub player_id: Option<i64>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u32,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
}

impl NewSubscription {
    /// Creates a request with default delivery policy.
    pub fn new(
        url: impl Into<String>,
        secret: impl Into<String>,
        events: impl IntoIterator<Item = EventKind>,
    ) -> Self {
        Self {
            url: url.into(),
            secret: secret.into(),
            events: events.into_iter().collect(),
            team_id: None,
            player_id: None,
            active: true,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
            rate_limit: DEFAULT_RATE_LIMIT,
        }
    }

    /// Limits deliveries to one team.
    pub fn team(mut self, team_id: i64) -> Self {
        self.team_id = Some(team_id);
        self
    }

    /// Limits deliveries to one player.
    pub fn player(mut self, player_id: i64) -> Self {
        self.player_id = Some(player_id);
        self
    }

    /// Sets the maximum delivery attempts.
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Sets the base backoff in seconds.
    pub fn retry_delay(mut self, retry_delay: u32) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Sets the deliveries admitted per 60 second window.
    pub fn rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Registers the subscription disabled.
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

fn default_active() -> bool {
    true
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

fn default_retry_delay() -> u32 {
    DEFAULT_RETRY_DELAY
}

fn default_rate_limit() -> u32 {
    DEFAULT_RATE_LIMIT
}

/// Partial update. Absent fields are left unchanged; for the scope fields an
/// explicit `null` clears the filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionPatch {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub events: Option<BTreeSet<EventKind>>,
    #[serde(default, deserialize_with = "present")]
    pub team_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "present")]
    pub player_id: Option<Option<i64>>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub retry_delay: Option<u32>,
    #[serde(default)]
    pub rate_limit: Option<u32>,
}

/// Distinguishes a field sent as `null` from a missing one.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn validate_url(raw: &str) -> WebhookResult<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| WebhookError::validation(format!("invalid url '{}': {}", raw, e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(WebhookError::validation(format!(
                "unsupported url scheme '{}', expected http or https",
                other
            )));
        }
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(WebhookError::validation(format!("url '{}' has no host", raw)));
    }

    Ok(())
}

fn validate_secret(secret: &str) -> WebhookResult<()> {
    if secret.trim().is_empty() {
        return Err(WebhookError::validation("secret must not be empty"));
    }
    Ok(())
}

fn validate_events(events: &BTreeSet<EventKind>) -> WebhookResult<()> {
    if events.is_empty() {
        return Err(WebhookError::validation("at least one event type is required"));
    }
    Ok(())
}

fn validate_policy(retry_count: u32, retry_delay: u32, rate_limit: u32) -> WebhookResult<()> {
    if retry_count == 0 {
        return Err(WebhookError::validation("retry_count must be positive"));
    }
    if retry_delay == 0 {
        return Err(WebhookError::validation("retry_delay must be positive"));
    }
    if rate_limit == 0 {
        return Err(WebhookError::validation("rate_limit must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> NewSubscription {
        NewSubscription::new(
            "https://hooks.example.com/league",
            "s3cret",
            [EventKind::TeamUpdate, EventKind::GameResult],
        )
    }

    fn validation_message(result: WebhookResult<Subscription>) -> String {
        match result {
            Err(WebhookError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_create_applies_defaults() {
        let sub = Subscription::from_request(request()).unwrap();
        assert!(sub.active);
        assert_eq!(sub.retry_count, DEFAULT_RETRY_COUNT);
        assert_eq!(sub.retry_delay, DEFAULT_RETRY_DELAY);
        assert_eq!(sub.rate_limit, DEFAULT_RATE_LIMIT);
        assert_eq!(sub.version, 0);
        assert!(sub.last_error.is_none());
    }

    #[test]
    fn test_rejects_bad_scheme() {
        let mut req = request();
        req.url = "ftp://hooks.example.com".into();
        assert!(validation_message(Subscription::from_request(req)).contains("scheme"));

        let mut req = request();
        req.url = "not a url".into();
        assert!(validation_message(Subscription::from_request(req)).contains("invalid url"));
    }

    #[test]
    fn test_rejects_empty_events_and_secret() {
        let mut req = request();
        req.events.clear();
        assert!(validation_message(Subscription::from_request(req)).contains("event"));

        let mut req = request();
        req.secret = "  ".into();
        assert!(validation_message(Subscription::from_request(req)).contains("secret"));
    }

    #[test]
    fn test_rejects_non_positive_policy() {
        for req in [
            request().retry_count(0),
            request().retry_delay(0),
            request().rate_limit(0),
        ] {
            assert!(validation_message(Subscription::from_request(req)).contains("must be positive"));
        }
    }

    #[test]
    fn test_matches_kind_and_scope() {
        let sub = Subscription::from_request(request().team(5)).unwrap();

        let team5 = Event::new(EventKind::TeamUpdate, ()).with_team(5);
        let team7 = Event::new(EventKind::TeamUpdate, ()).with_team(7);
        let unscoped = Event::new(EventKind::TeamUpdate, ());
        let other_kind = Event::new(EventKind::PlayerStats, ()).with_team(5);

        assert!(sub.matches(&team5));
        assert!(!sub.matches(&team7));
        assert!(!sub.matches(&unscoped));
        assert!(!sub.matches(&other_kind));
    }

    #[test]
    fn test_unscoped_subscription_matches_everything_of_its_kinds() {
        let sub = Subscription::from_request(request()).unwrap();
        let event = Event::new(EventKind::GameResult, ()).with_team(7).with_player(3);
        assert!(sub.matches(&event));
    }

    #[test]
    fn test_inactive_never_matches() {
        let sub = Subscription::from_request(request().inactive()).unwrap();
        assert!(!sub.matches(&Event::new(EventKind::TeamUpdate, ())));
    }

    #[test]
    fn test_apply_patch_is_atomic() {
        let mut sub = Subscription::from_request(request()).unwrap();
        let before = sub.clone();

        let bad = SubscriptionPatch {
            url: Some("https://new.example.com".into()),
            rate_limit: Some(0),
            ..Default::default()
        };
        assert!(sub.apply(bad).is_err());
        assert_eq!(sub, before);

        let good = SubscriptionPatch {
            rate_limit: Some(10),
            team_id: Some(Some(9)),
            ..Default::default()
        };
        sub.apply(good).unwrap();
        assert_eq!(sub.rate_limit, 10);
        assert_eq!(sub.team_id, Some(9));
    }

    #[test]
    fn test_patch_null_clears_scope() {
        let patch: SubscriptionPatch = serde_json::from_str(r#"{"team_id": null}"#).unwrap();
        assert_eq!(patch.team_id, Some(None));
        assert_eq!(patch.player_id, None);

        let mut sub = Subscription::from_request(request().team(5)).unwrap();
        sub.apply(patch).unwrap();
        assert_eq!(sub.team_id, None);
    }

    #[test]
    fn test_url_change_resets_verification() {
        let mut sub = Subscription::from_request(request()).unwrap();
        sub.verified_at = Some(Utc::now());

        sub.apply(SubscriptionPatch {
            url: Some("https://elsewhere.example.com/hook".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(sub.verified_at.is_none());
    }

    #[test]
    fn test_registration_request_defaults_from_json() {
        let req: NewSubscription = serde_json::from_str(
            r#"{"url": "https://example.com/h", "secret": "k", "events": ["game_result"]}"#,
        )
        .unwrap();
        assert!(req.active);
        assert_eq!(req.retry_count, 3);
        assert_eq!(req.retry_delay, 60);
        assert_eq!(req.rate_limit, 100);
    }
}
