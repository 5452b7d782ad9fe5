//! Stats cache engine: maintains a derived `Stats`/`AggregateStats`
//! view in Redis under optimistic concurrency (WATCH/MULTI/EXEC),
//! and republishes the combined snapshot to the fan-out hub after
//! every successful write so SSE subscribers stay current.

mod delta;
mod error;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use gk_common::{AggregateStats, OperatorPerformance, Request, RequestFilter, Stats};
use gk_fanout::{FanoutHub, OnJoin};
use gk_store::RequestStore;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info, warn};

pub use error::{CacheError, Result};

use delta::{apply_delta, compute_stats_from_scratch, parse_stats, stats_fields};
pub use delta::{ALL_REQUESTS_KEY, STATS_KEY};
use delta::AGGREGATE_FIELD;

const MAX_RETRY: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const OVERTIME_THRESHOLD_HOURS: i64 = 24;

/// The combined view published to every SSE subscriber: the
/// real-time counters plus the last computed aggregate, under the
/// field name the Redis hash stores it as.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    #[serde(flatten)]
    pub stats: Stats,
    #[serde(rename = "AggregateStats")]
    pub aggregate: AggregateStats,
}

#[derive(Clone)]
pub struct StatsCacheEngine {
    conn: ConnectionManager,
    store: Arc<RequestStore>,
    hub: FanoutHub,
    last_snapshot: Arc<Mutex<Option<Bytes>>>,
    divergence_grace_minutes: i64,
}

impl StatsCacheEngine {
    /// Connect to Redis and wire a fan-out hub whose `onJoin`
    /// callback serves the last published snapshot (or nothing, if
    /// `syncAll` has not run yet).
    pub async fn connect(
        redis_conn: &str,
        store: Arc<RequestStore>,
        divergence_grace_minutes: i64,
    ) -> Result<(Self, FanoutHub)> {
        let client = redis::Client::open(redis_conn)?;
        let conn = ConnectionManager::new(client).await?;

        let last_snapshot: Arc<Mutex<Option<Bytes>>> = Arc::new(Mutex::new(None));
        let hub = FanoutHub::spawn(on_join_from_snapshot(last_snapshot.clone()));

        Ok((
            Self {
                conn,
                store,
                hub: hub.clone(),
                last_snapshot,
                divergence_grace_minutes,
            },
            hub,
        ))
    }

    /// Idempotent bootstrap: overwrite `AllRequests`, recompute every
    /// real-time counter from scratch, then recompute the aggregate.
    pub async fn sync_all(&mut self) -> Result<()> {
        let requests = self.store.list(&RequestFilter::default()).await?;

        let serialized = serde_json::to_string(&requests)?;
        self.conn.set::<_, _, ()>(ALL_REQUESTS_KEY, serialized).await?;

        let stats = compute_stats_from_scratch(&requests);
        self.write_stats_unconditionally(&stats).await?;

        self.update_aggregate_inner(&requests, stats).await?;
        info!(count = requests.len(), "stats cache synced from store");
        Ok(())
    }

    /// Overwrite the `AllRequests` snapshot only, without touching
    /// real-time counters. Called by the dispatcher before every
    /// `updateRealTime` so list queries stay current.
    pub async fn refresh_all_requests(&mut self) -> Result<()> {
        let requests = self.store.list(&RequestFilter::default()).await?;
        let serialized = serde_json::to_string(&requests)?;
        self.conn.set::<_, _, ()>(ALL_REQUESTS_KEY, serialized).await?;
        Ok(())
    }

    /// Apply the delta implied by `request`'s current status under
    /// optimistic concurrency. Retries up to `MAX_RETRY` times, 2s
    /// apart, on a concurrent writer winning the race.
    pub async fn update_real_time(&mut self, request: &Request) -> Result<()> {
        for attempt in 1..=MAX_RETRY {
            let _: () = redis::cmd("WATCH").arg(STATS_KEY).query_async(&mut self.conn).await?;
            let fields: HashMap<String, String> = self.conn.hgetall(STATS_KEY).await?;
            let mut stats = parse_stats(&fields);
            apply_delta(&mut stats, request);

            let mut pipe = redis::pipe();
            pipe.atomic();
            for (field, value) in stats_fields(&stats) {
                pipe.hset(STATS_KEY, field, value);
            }
            let applied: Option<Vec<i64>> = pipe.query_async(&mut self.conn).await?;

            if applied.is_some() {
                self.publish_snapshot_with_stats(stats).await;
                return Ok(());
            }

            warn!(attempt, "stats transaction lost the race, retrying");
            if attempt < MAX_RETRY {
                sleep(RETRY_DELAY).await;
            }
        }
        Err(CacheError::ContentionExhausted)
    }

    /// Recompute the aggregate fields (overtime count, per-operator
    /// performance, divergence) and write them as a single field.
    /// Single writer (the periodic ticker), so no WATCH loop needed.
    pub async fn update_aggregate(&mut self) -> Result<()> {
        let requests = self.store.list(&RequestFilter::default()).await?;
        let stats = self.read_stats().await?;
        self.update_aggregate_inner(&requests, stats).await
    }

    async fn update_aggregate_inner(&mut self, requests: &[Request], stats: Stats) -> Result<()> {
        let aggregate = compute_aggregate(requests, self.divergence_grace_minutes);
        let serialized = serde_json::to_string(&aggregate)?;
        let _: () = self.conn.hset(STATS_KEY, AGGREGATE_FIELD, serialized).await?;
        self.publish_snapshot(StatsSnapshot { stats, aggregate }).await;
        Ok(())
    }

    async fn read_stats(&mut self) -> Result<Stats> {
        let fields: HashMap<String, String> = self.conn.hgetall(STATS_KEY).await?;
        Ok(parse_stats(&fields))
    }

    async fn write_stats_unconditionally(&mut self, stats: &Stats) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (field, value) in stats_fields(stats) {
            pipe.hset(STATS_KEY, field, value);
        }
        let _: Vec<i64> = pipe.query_async(&mut self.conn).await?;
        Ok(())
    }

    async fn publish_snapshot_with_stats(&mut self, stats: Stats) {
        let aggregate = self.read_aggregate().await.unwrap_or_default();
        self.publish_snapshot(StatsSnapshot { stats, aggregate }).await;
    }

    async fn read_aggregate(&mut self) -> Result<AggregateStats> {
        let raw: Option<String> = self.conn.hget(STATS_KEY, AGGREGATE_FIELD).await?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(AggregateStats::default()),
        }
    }

    async fn publish_snapshot(&mut self, snapshot: StatsSnapshot) {
        let payload = match serde_json::to_vec(&snapshot) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                error!(error = %e, "failed to serialize stats snapshot, not publishing");
                return;
            }
        };

        *self
            .last_snapshot
            .lock()
            .expect("snapshot mutex is never held across an await point") = Some(payload.clone());

        self.hub.publish(payload).await;
    }
}

/// Builds the hub's `onJoin` callback: a synchronous read of the
/// last published snapshot, since `gk_fanout::OnJoin` cannot await.
fn on_join_from_snapshot(shared: Arc<Mutex<Option<Bytes>>>) -> OnJoin {
    Box::new(move || {
        let guard = shared.lock().map_err(|_| "snapshot mutex poisoned".to_string())?;
        Ok(guard.clone())
    })
}

fn compute_aggregate(requests: &[Request], divergence_grace_minutes: i64) -> AggregateStats {
    let now = Utc::now();

    let overtime_count = requests
        .iter()
        .filter(|r| matches!(r.status, gk_common::LifecycleStatus::Pending))
        .filter(|r| now.signed_duration_since(r.created_at).num_hours() >= OVERTIME_THRESHOLD_HOURS)
        .count() as i64;

    let mut per_operator: HashMap<String, (i64, f64)> = HashMap::new();
    for r in requests.iter().filter(|r| r.status.is_terminal()) {
        let Some(operator) = &r.decided_by else { continue };
        let Some(minutes) = r.response_time_minutes() else { continue };
        let entry = per_operator.entry(operator.clone()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += minutes as f64;
    }
    let per_operator = per_operator
        .into_iter()
        .map(|(operator, (total_handled, total_minutes))| {
            let average_response_minutes = if total_handled > 0 {
                total_minutes / total_handled as f64
            } else {
                0.0
            };
            (
                operator,
                OperatorPerformance {
                    total_handled,
                    average_response_minutes,
                },
            )
        })
        .collect();

    let divergent_usernames: Vec<String> = requests
        .iter()
        .filter(|r| r.status.is_terminal() && r.diverges())
        .filter(|r| {
            let reference = r.last_update_at.or(r.decision_at).unwrap_or(r.created_at);
            now.signed_duration_since(reference).num_minutes() >= divergence_grace_minutes
        })
        .map(|r| r.username.clone())
        .collect();

    AggregateStats {
        overtime_count,
        per_operator,
        divergent_count: divergent_usernames.len() as i64,
        divergent_usernames,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use gk_common::{GenderTag, LifecycleStatus, OnServerStatus};

    fn request(
        status: LifecycleStatus,
        decided_by: Option<&str>,
        on_server_status: OnServerStatus,
        created_hours_ago: i64,
        decision_minutes_after_creation: Option<i64>,
    ) -> Request {
        let created_at = Utc::now() - ChronoDuration::hours(created_hours_ago);
        let decision_at = decision_minutes_after_creation.map(|m| created_at + ChronoDuration::minutes(m));
        Request {
            id: "r1".to_string(),
            username: "bob".to_string(),
            contact: "bob@example.test".to_string(),
            age: 22,
            gender: GenderTag::Male,
            application_text: String::new(),
            status,
            on_server_status,
            created_at,
            decision_at,
            last_update_at: decision_at,
            decided_by: decided_by.map(|s| s.to_string()),
            note: String::new(),
            assignees: vec![],
        }
    }

    #[test]
    fn overtime_counts_only_pending_past_24_hours() {
        let requests = vec![
            request(LifecycleStatus::Pending, None, OnServerStatus::None, 25, None),
            request(LifecycleStatus::Pending, None, OnServerStatus::None, 1, None),
        ];
        let aggregate = compute_aggregate(&requests, 2);
        assert_eq!(aggregate.overtime_count, 1);
    }

    #[test]
    fn per_operator_performance_averages_across_their_terminal_requests() {
        let requests = vec![
            request(LifecycleStatus::Approved, Some("op1"), OnServerStatus::Whitelisted, 10, Some(10)),
            request(LifecycleStatus::Denied, Some("op1"), OnServerStatus::None, 10, Some(30)),
        ];
        let aggregate = compute_aggregate(&requests, 2);
        let perf = aggregate.per_operator.get("op1").unwrap();
        assert_eq!(perf.total_handled, 2);
        assert_eq!(perf.average_response_minutes, 20.0);
    }

    #[test]
    fn divergence_requires_both_mismatch_and_grace_window_elapsed() {
        let requests = vec![
            // approved but never actually whitelisted on the server, decided long ago
            request(LifecycleStatus::Approved, Some("op1"), OnServerStatus::None, 10, Some(5)),
        ];
        let aggregate = compute_aggregate(&requests, 2);
        assert_eq!(aggregate.divergent_count, 1);
        assert_eq!(aggregate.divergent_usernames, vec!["bob".to_string()]);
    }

    #[test]
    fn non_divergent_requests_are_excluded() {
        let requests = vec![request(
            LifecycleStatus::Approved,
            Some("op1"),
            OnServerStatus::Whitelisted,
            10,
            Some(5),
        )];
        let aggregate = compute_aggregate(&requests, 2);
        assert_eq!(aggregate.divergent_count, 0);
    }
}
