//! Domain types shared by every gatekeeper subsystem: the whitelist
//! `Request` record, its lifecycle and on-server status, and the
//! derived `Stats`/`AggregateStats` view the cache engine maintains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod logging;

// ============================================================================
// Request
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenderTag {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecycleStatus {
    Pending,
    Approved,
    Denied,
    Banned,
    Deactivated,
}

impl LifecycleStatus {
    /// The on-server status this lifecycle status implies, used to
    /// detect divergence between the store and the actual server state.
    pub fn expected_on_server(&self) -> OnServerStatus {
        match self {
            LifecycleStatus::Approved => OnServerStatus::Whitelisted,
            LifecycleStatus::Banned => OnServerStatus::Banned,
            LifecycleStatus::Denied | LifecycleStatus::Deactivated => OnServerStatus::None,
            LifecycleStatus::Pending => OnServerStatus::None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LifecycleStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OnServerStatus {
    None,
    Whitelisted,
    Banned,
}

/// A whitelist request, the unit of work the whole system tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: String,
    pub username: String,
    pub contact: String,
    pub age: i64,
    pub gender: GenderTag,
    pub application_text: String,
    pub status: LifecycleStatus,
    pub on_server_status: OnServerStatus,
    pub created_at: DateTime<Utc>,
    pub decision_at: Option<DateTime<Utc>>,
    pub last_update_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub assignees: Vec<String>,
}

impl Request {
    pub fn age_bucket(&self) -> AgeBucket {
        AgeBucket::from_age(self.age)
    }

    /// Whether the record's actual on-server status diverges from what
    /// its lifecycle status implies.
    pub fn diverges(&self) -> bool {
        self.on_server_status != self.status.expected_on_server()
    }

    pub fn response_time_minutes(&self) -> Option<i64> {
        let decided = self.decision_at?;
        Some((decided - self.created_at).num_minutes())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AgeBucket {
    Under15,
    From15To30,
    From30To45,
    From45AndUp,
}

impl AgeBucket {
    pub fn from_age(age: i64) -> Self {
        match age {
            a if a < 15 => AgeBucket::Under15,
            a if a < 30 => AgeBucket::From15To30,
            a if a < 45 => AgeBucket::From30To45,
            _ => AgeBucket::From45AndUp,
        }
    }
}

/// Partial update applied to a stored request (dispatcher/store only
/// ever set a subset of fields at a time).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestUpdate {
    pub status: Option<LifecycleStatus>,
    pub on_server_status: Option<OnServerStatus>,
    pub decision_at: Option<DateTime<Utc>>,
    pub last_update_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub note: Option<String>,
    pub assignees: Option<Vec<String>>,
}

/// Filter predicates the store's `list` operation accepts: the two
/// the cache engine and dispatcher actually need.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<LifecycleStatus>,
    pub username: Option<String>,
}

// ============================================================================
// Stats
// ============================================================================

/// Real-time counters, recomputed incrementally on every dispatcher
/// delivery and from scratch on startup sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub pending: i64,
    pub approved: i64,
    pub denied: i64,
    pub banned: i64,
    pub deactivated: i64,
    pub total_response_minutes: f64,
    pub average_response_minutes: f64,
    pub male: i64,
    pub female: i64,
    pub other: i64,
    pub age_under15: i64,
    pub age_15_to_30: i64,
    pub age_30_to_45: i64,
    pub age_45_and_up: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorPerformance {
    pub total_handled: i64,
    pub average_response_minutes: f64,
}

/// Periodically recomputed fields, stored as a serialized blob
/// alongside the real-time fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub overtime_count: i64,
    pub per_operator: std::collections::HashMap<String, OperatorPerformance>,
    pub divergent_count: i64,
    pub divergent_usernames: Vec<String>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum GatekeeperError {
    #[error("store error: {0}")]
    Store(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("remote-console error: {0}")]
    Rcon(String),

    #[error("mailer error: {0}")]
    Mailer(String),

    #[error("token codec error: {0}")]
    Token(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("shutdown in progress")]
    ShutdownInProgress,
}

pub type Result<T> = std::result::Result<T, GatekeeperError>;
