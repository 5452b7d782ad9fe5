//! Pure, I/O-free pieces of the stats engine: parsing the Redis hash
//! into a `Stats` value, turning a `Stats` value back into HSET
//! fields, applying a single request's delta, and recomputing from
//! scratch over a full request list. Kept separate from `lib.rs` so
//! the arithmetic can be tested without a Redis instance.

use std::collections::HashMap;

use gk_common::{AgeBucket, GenderTag, LifecycleStatus, Request, Stats};

pub const STATS_KEY: &str = "Stats";
pub const ALL_REQUESTS_KEY: &str = "AllRequests";
pub const AGGREGATE_FIELD: &str = "AggregateStats";

/// Parse a Redis `HGETALL Stats` reply into a `Stats` value. Missing
/// fields default to zero so an empty hash (pre-`syncAll`) parses
/// cleanly instead of erroring.
pub fn parse_stats(fields: &HashMap<String, String>) -> Stats {
    let i64_field = |key: &str| fields.get(key).and_then(|v| v.parse().ok()).unwrap_or(0);
    let f64_field = |key: &str| fields.get(key).and_then(|v| v.parse().ok()).unwrap_or(0.0);

    Stats {
        pending: i64_field("pending"),
        approved: i64_field("approved"),
        denied: i64_field("denied"),
        banned: i64_field("banned"),
        deactivated: i64_field("deactivated"),
        total_response_minutes: f64_field("totalResponseMinutes"),
        average_response_minutes: f64_field("averageResponseMinutes"),
        male: i64_field("male"),
        female: i64_field("female"),
        other: i64_field("other"),
        age_under15: i64_field("ageUnder15"),
        age_15_to_30: i64_field("age15To30"),
        age_30_to_45: i64_field("age30To45"),
        age_45_and_up: i64_field("age45AndUp"),
    }
}

/// Render a `Stats` value as the flat `field, value, field, value...`
/// argument list `HSET` expects.
pub fn stats_fields(stats: &Stats) -> Vec<(&'static str, String)> {
    vec![
        ("pending", stats.pending.to_string()),
        ("approved", stats.approved.to_string()),
        ("denied", stats.denied.to_string()),
        ("banned", stats.banned.to_string()),
        ("deactivated", stats.deactivated.to_string()),
        ("totalResponseMinutes", stats.total_response_minutes.to_string()),
        ("averageResponseMinutes", stats.average_response_minutes.to_string()),
        ("male", stats.male.to_string()),
        ("female", stats.female.to_string()),
        ("other", stats.other.to_string()),
        ("ageUnder15", stats.age_under15.to_string()),
        ("age15To30", stats.age_15_to_30.to_string()),
        ("age30To45", stats.age_30_to_45.to_string()),
        ("age45AndUp", stats.age_45_and_up.to_string()),
    ]
}

fn bump_gender_age(stats: &mut Stats, request: &Request, delta: i64) {
    match request.gender {
        GenderTag::Male => stats.male += delta,
        GenderTag::Female => stats.female += delta,
        GenderTag::Other => stats.other += delta,
    }
    match request.age_bucket() {
        AgeBucket::Under15 => stats.age_under15 += delta,
        AgeBucket::From15To30 => stats.age_15_to_30 += delta,
        AgeBucket::From30To45 => stats.age_30_to_45 += delta,
        AgeBucket::From45AndUp => stats.age_45_and_up += delta,
    }
}

fn recompute_average(stats: &mut Stats) {
    let terminal = stats.approved + stats.denied + stats.banned + stats.deactivated;
    stats.average_response_minutes = if terminal > 0 {
        stats.total_response_minutes / terminal as f64
    } else {
        0.0
    };
}

/// Apply the delta table from the spec for `request`'s current
/// status onto `stats` in place, then recompute the average.
pub fn apply_delta(stats: &mut Stats, request: &Request) {
    match request.status {
        LifecycleStatus::Pending => {
            stats.pending += 1;
        }
        LifecycleStatus::Approved => {
            stats.pending -= 1;
            stats.approved += 1;
            if let Some(minutes) = request.response_time_minutes() {
                stats.total_response_minutes += minutes as f64;
            }
            bump_gender_age(stats, request, 1);
        }
        LifecycleStatus::Denied => {
            stats.pending -= 1;
            stats.denied += 1;
            if let Some(minutes) = request.response_time_minutes() {
                stats.total_response_minutes += minutes as f64;
            }
        }
        LifecycleStatus::Banned => {
            stats.approved -= 1;
            stats.banned += 1;
            bump_gender_age(stats, request, -1);
        }
        LifecycleStatus::Deactivated => {
            stats.approved -= 1;
            stats.deactivated += 1;
            bump_gender_age(stats, request, -1);
        }
    }
    recompute_average(stats);
}

/// Recompute every real-time field from the full request list, as
/// `syncAll` does. Gender/age buckets only count requests currently
/// `Approved` (the whitelisted set), matching the Stats invariant
/// that those counters equal approvals minus bans minus
/// deactivations of that bucket.
pub fn compute_stats_from_scratch(requests: &[Request]) -> Stats {
    let mut stats = Stats::default();
    for request in requests {
        match request.status {
            LifecycleStatus::Pending => stats.pending += 1,
            LifecycleStatus::Approved => {
                stats.approved += 1;
                if let Some(minutes) = request.response_time_minutes() {
                    stats.total_response_minutes += minutes as f64;
                }
                bump_gender_age(&mut stats, request, 1);
            }
            LifecycleStatus::Denied => {
                stats.denied += 1;
                if let Some(minutes) = request.response_time_minutes() {
                    stats.total_response_minutes += minutes as f64;
                }
            }
            LifecycleStatus::Banned => {
                stats.banned += 1;
                if let Some(minutes) = request.response_time_minutes() {
                    stats.total_response_minutes += minutes as f64;
                }
            }
            LifecycleStatus::Deactivated => {
                stats.deactivated += 1;
                if let Some(minutes) = request.response_time_minutes() {
                    stats.total_response_minutes += minutes as f64;
                }
            }
        }
    }
    recompute_average(&mut stats);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use gk_common::OnServerStatus;

    fn base_request(status: LifecycleStatus, gender: GenderTag, age: i64) -> Request {
        let now = Utc::now();
        Request {
            id: "A".to_string(),
            username: "alice".to_string(),
            contact: "alice@example.test".to_string(),
            age,
            gender,
            application_text: String::new(),
            status,
            on_server_status: OnServerStatus::None,
            created_at: now,
            decision_at: Some(now + Duration::minutes(10)),
            last_update_at: Some(now + Duration::minutes(10)),
            decided_by: Some("op1".to_string()),
            note: String::new(),
            assignees: vec![],
        }
    }

    #[test]
    fn parses_missing_fields_as_zero() {
        let stats = parse_stats(&HashMap::new());
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.average_response_minutes, 0.0);
    }

    #[test]
    fn stats_fields_round_trips_through_parse() {
        let mut stats = Stats::default();
        stats.pending = 3;
        stats.total_response_minutes = 12.5;
        let fields: HashMap<String, String> = stats_fields(&stats)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let parsed = parse_stats(&fields);
        assert_eq!(parsed.pending, 3);
        assert_eq!(parsed.total_response_minutes, 12.5);
    }

    #[test]
    fn approved_delta_increments_approved_and_gender_age_buckets() {
        let mut stats = Stats::default();
        stats.pending = 1;
        let request = base_request(LifecycleStatus::Approved, GenderTag::Female, 20);
        apply_delta(&mut stats, &request);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.approved, 1);
        assert_eq!(stats.female, 1);
        assert_eq!(stats.age_15_to_30, 1);
        assert_eq!(stats.total_response_minutes, 10.0);
        assert_eq!(stats.average_response_minutes, 10.0);
    }

    #[test]
    fn banned_delta_reverses_gender_age_but_not_total_response() {
        let mut stats = Stats::default();
        stats.approved = 1;
        stats.female = 1;
        stats.age_15_to_30 = 1;
        stats.total_response_minutes = 10.0;
        let request = base_request(LifecycleStatus::Banned, GenderTag::Female, 20);
        apply_delta(&mut stats, &request);
        assert_eq!(stats.approved, 0);
        assert_eq!(stats.banned, 1);
        assert_eq!(stats.female, 0);
        assert_eq!(stats.age_15_to_30, 0);
        assert_eq!(stats.total_response_minutes, 10.0);
    }

    #[test]
    fn deactivated_delta_mirrors_banned() {
        let mut stats = Stats::default();
        stats.approved = 1;
        stats.male = 1;
        stats.age_under15 = 1;
        let request = base_request(LifecycleStatus::Deactivated, GenderTag::Male, 5);
        apply_delta(&mut stats, &request);
        assert_eq!(stats.approved, 0);
        assert_eq!(stats.deactivated, 1);
        assert_eq!(stats.male, 0);
        assert_eq!(stats.age_under15, 0);
    }

    #[test]
    fn from_scratch_matches_incremental_after_equivalent_transitions() {
        let approved = base_request(LifecycleStatus::Approved, GenderTag::Other, 50);
        let denied = base_request(LifecycleStatus::Denied, GenderTag::Male, 16);
        let pending = base_request(LifecycleStatus::Pending, GenderTag::Female, 16);

        let mut incremental = Stats::default();
        apply_delta(&mut incremental, &pending);
        apply_delta(&mut incremental, &approved);
        apply_delta(&mut incremental, &denied);
        // pending never left Pending in this test, so undo the spurious +1
        // from replaying it through apply_delta (apply_delta always models
        // a *transition into* the given status).
        incremental.pending -= 1;

        let from_scratch = compute_stats_from_scratch(&[approved, denied]);

        assert_eq!(incremental.approved, from_scratch.approved);
        assert_eq!(incremental.denied, from_scratch.denied);
        assert_eq!(incremental.other, from_scratch.other);
        assert_eq!(incremental.age_45_and_up, from_scratch.age_45_and_up);
        assert_eq!(
            incremental.total_response_minutes,
            from_scratch.total_response_minutes
        );
    }

    #[test]
    fn age_bucket_boundaries() {
        for (age, expected) in [
            (0, AgeBucket::Under15),
            (14, AgeBucket::Under15),
            (15, AgeBucket::From15To30),
            (29, AgeBucket::From15To30),
            (30, AgeBucket::From30To45),
            (44, AgeBucket::From30To45),
            (45, AgeBucket::From45AndUp),
            (120, AgeBucket::From45AndUp),
        ] {
            assert_eq!(AgeBucket::from_age(age), expected, "age {age}");
        }
    }
}
