//! Scheduling policy abstraction: a tagged sum over the three orderings,
//! composition over an inheritance hierarchy of per-policy comparators.
//!
//! All three variants sort by a key, ascending, with ties kept in the input
//! slice's order (`sort_by_key` is stable), so ordering is always a genuine
//! total order with a well-defined tie-break rather than depending on
//! insertion-loop details.

use std::sync::Arc;

use crate::task::TaskState;

/// A scheduling policy: given the current task set, returns a priority
/// order (highest priority first) as task ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Rate Monotonic — lower period, higher priority. Static.
    Rma,
    /// Earliest Deadline First — earlier absolute deadline, higher priority.
    /// Recomputed every scheduling event since deadlines advance.
    Edf,
    /// Shortest Completion Time — less remaining compute this period, higher
    /// priority. Dynamic within a period.
    Sct,
}

impl Policy {
    /// Parse a policy from the `0`/`1`/`2` integer encoding used by the
    /// interactive stdin protocol.
    pub fn from_index(v: i64) -> Option<Self> {
        match v {
            0 => Some(Policy::Rma),
            1 => Some(Policy::Edf),
            2 => Some(Policy::Sct),
            _ => None,
        }
    }

    /// Parse a policy from its name (used by the `--algorithm` CLI flag).
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rma" => Some(Policy::Rma),
            "edf" => Some(Policy::Edf),
            "sct" => Some(Policy::Sct),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Policy::Rma => "RMA",
            Policy::Edf => "EDF",
            Policy::Sct => "SCT",
        }
    }

    /// Compute the priority order for the given task snapshot: a permutation
    /// of `tasks`' ids, highest priority first. Pure — does not mutate any
    /// task. Ties keep the tasks' relative order in `tasks` (insertion
    /// order), since `sort_by_key` is a stable sort.
    pub fn order(self, tasks: &[Arc<TaskState>]) -> Vec<u32> {
        let mut indexed: Vec<&Arc<TaskState>> = tasks.iter().collect();
        match self {
            Policy::Rma => indexed.sort_by_key(|t| t.period_ms()),
            Policy::Edf => indexed.sort_by_key(|t| t.deadline_ms()),
            Policy::Sct => indexed.sort_by_key(|t| t.remaining_ns()),
        }
        indexed.iter().map(|t| t.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;

    fn task(id: u32, compute_ms: u64, period_ms: u64) -> Arc<TaskState> {
        let t = Arc::new(TaskState::new(id, compute_ms, period_ms));
        t.deadline_ms_set(period_ms);
        t
    }

    #[test]
    fn rma_orders_by_period_ascending() {
        let tasks = vec![task(0, 20, 100), task(1, 40, 150), task(2, 10, 50)];
        assert_eq!(Policy::Rma.order(&tasks), vec![2, 0, 1]);
    }

    #[test]
    fn rma_ties_keep_insertion_order() {
        let tasks = vec![task(0, 10, 100), task(1, 10, 100), task(2, 5, 50)];
        assert_eq!(Policy::Rma.order(&tasks), vec![2, 0, 1]);
    }

    #[test]
    fn edf_orders_by_deadline_ascending() {
        let tasks = vec![task(0, 10, 100), task(1, 10, 50)];
        tasks[0].deadline_ms_set(300);
        tasks[1].deadline_ms_set(150);
        assert_eq!(Policy::Edf.order(&tasks), vec![1, 0]);
    }

    #[test]
    fn sct_orders_by_remaining_time_ascending() {
        let tasks = vec![task(0, 50, 100), task(1, 50, 100)];
        tasks[0].add_current_compute_ns(10_000_000); // 10ms burnt -> 40ms left
        tasks[1].add_current_compute_ns(30_000_000); // 30ms burnt -> 20ms left
        assert_eq!(Policy::Sct.order(&tasks), vec![1, 0]);
    }

    #[test]
    fn empty_task_set_returns_empty_order() {
        let tasks: Vec<Arc<TaskState>> = Vec::new();
        assert!(Policy::Rma.order(&tasks).is_empty());
        assert!(Policy::Edf.order(&tasks).is_empty());
        assert!(Policy::Sct.order(&tasks).is_empty());
    }

    #[test]
    fn order_is_deterministic_across_repeated_calls() {
        let tasks = vec![task(0, 20, 100), task(1, 40, 150), task(2, 10, 50)];
        let first = Policy::Rma.order(&tasks);
        let second = Policy::Rma.order(&tasks);
        assert_eq!(first, second);
    }

    #[test]
    fn from_index_round_trips_known_values() {
        assert_eq!(Policy::from_index(0), Some(Policy::Rma));
        assert_eq!(Policy::from_index(1), Some(Policy::Edf));
        assert_eq!(Policy::from_index(2), Some(Policy::Sct));
        assert_eq!(Policy::from_index(3), None);
        assert_eq!(Policy::from_index(-1), None);
    }

    #[test]
    fn from_name_is_case_insensitive() {
        assert_eq!(Policy::from_name("rma"), Some(Policy::Rma));
        assert_eq!(Policy::from_name("EDF"), Some(Policy::Edf));
        assert_eq!(Policy::from_name("Sct"), Some(Policy::Sct));
        assert_eq!(Policy::from_name("bogus"), None);
    }
}
