//! Pure operator-selection logic, kept free of any I/O so the
//! `Broadcast`/`Random` strategies can be tested without a broker or
//! mailer in the loop.

use gk_config::DispatchingStrategy;
use rand::seq::SliceRandom;

/// Selects the operators a new request's action mail should be sent
/// to. `Broadcast` targets every configured operator; `Random` draws
/// a uniformly random subset of size `threshold` (already validated
/// at config load time to not exceed `ops.len()`).
pub fn select_operators(ops: &[String], strategy: DispatchingStrategy, threshold: usize) -> Vec<String> {
    match strategy {
        DispatchingStrategy::Broadcast => ops.to_vec(),
        DispatchingStrategy::Random => {
            let mut shuffled = ops.to_vec();
            shuffled.shuffle(&mut rand::thread_rng());
            shuffled.truncate(threshold);
            shuffled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_targets_every_operator_in_order() {
        let ops = vec!["op1".to_string(), "op2".to_string(), "op3".to_string()];
        let selected = select_operators(&ops, DispatchingStrategy::Broadcast, 0);
        assert_eq!(selected, ops);
    }

    #[test]
    fn random_selects_exactly_the_threshold_count_from_the_configured_set() {
        let ops = vec!["op1".to_string(), "op2".to_string(), "op3".to_string(), "op4".to_string()];
        let selected = select_operators(&ops, DispatchingStrategy::Random, 2);
        assert_eq!(selected.len(), 2);
        for op in &selected {
            assert!(ops.contains(op));
        }
        // no duplicates
        let mut dedup = selected.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), selected.len());
    }

    #[test]
    fn random_with_zero_threshold_selects_nobody() {
        let ops = vec!["op1".to_string()];
        let selected = select_operators(&ops, DispatchingStrategy::Random, 0);
        assert!(selected.is_empty());
    }
}
