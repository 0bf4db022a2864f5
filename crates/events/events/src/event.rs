//! Event types and structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::error::EventError;

/// Every kind of domain occurrence the platform announces.
///
/// This is the one canonical list; subscriptions, dispatch and analytics all
/// key on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TeamUpdate,
    TeamMemberUpdate,
    RosterUpdate,
    TeamRanking,
    PlayerUpdate,
    PlayerStats,
    PlayerRanking,
    GameSchedule,
    GameResult,
    GameStats,
    LeagueUpdate,
    SeasonUpdate,
    AdminNotification,
    SystemAlert,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [EventKind; 14] = [
        Self::TeamUpdate,
        Self::TeamMemberUpdate,
        Self::RosterUpdate,
        Self::TeamRanking,
        Self::PlayerUpdate,
        Self::PlayerStats,
        Self::PlayerRanking,
        Self::GameSchedule,
        Self::GameResult,
        Self::GameStats,
        Self::LeagueUpdate,
        Self::SeasonUpdate,
        Self::AdminNotification,
        Self::SystemAlert,
    ];

    /// Returns the wire name (e.g. `"game_result"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TeamUpdate => "team_update",
            Self::TeamMemberUpdate => "team_member_update",
            Self::RosterUpdate => "roster_update",
            Self::TeamRanking => "team_ranking",
            Self::PlayerUpdate => "player_update",
            Self::PlayerStats => "player_stats",
            Self::PlayerRanking => "player_ranking",
            Self::GameSchedule => "game_schedule",
            Self::GameResult => "game_result",
            Self::GameStats => "game_stats",
            Self::LeagueUpdate => "league_update",
            Self::SeasonUpdate => "season_update",
            Self::AdminNotification => "admin_notification",
            Self::SystemAlert => "system_alert",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EventError::UnknownEventKind(s.to_string()))
    }
}

/// A domain occurrence raised after a mutation commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event instance.
    pub id: String,
    /// What happened.
    pub kind: EventKind,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Event data, always a JSON object.
    pub payload: Map<String, Value>,
    /// Team the event concerns, if any.
    pub team_id: Option<i64>,
    /// Player the event concerns, if any.
    pub player_id: Option<i64>,
}

impl Event {
    /// Creates a new event with the given kind and payload.
    ///
    /// Payloads that do not serialize to a JSON object are stored under a
    /// `"value"` key.
    pub fn new(kind: EventKind, payload: impl Serialize) -> Self {
        let payload = match serde_json::to_value(payload).unwrap_or(Value::Null) {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            timestamp: Utc::now(),
            payload,
            team_id: None,
            player_id: None,
        }
    }

    /// Scopes the event to a team.
    pub fn with_team(mut self, team_id: i64) -> Self {
        self.team_id = Some(team_id);
        self
    }

    /// Scopes the event to a player.
    pub fn with_player(mut self, player_id: i64) -> Self {
        self.player_id = Some(player_id);
        self
    }

    /// Overrides the event timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Deserializes the payload to a specific type.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        serde_json::from_value(Value::Object(self.payload.clone())).ok()
    }
}
