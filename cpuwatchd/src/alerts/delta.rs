//! Rate estimation from monotonically increasing counters.
//!
//! Hypervisors report cumulative CPU time per domain. A percentage is
//! derived from the difference between two consecutive readings divided by
//! the wall-clock time between them. Readings that cannot produce a rate
//! (first sight, counter reset, no elapsed time) yield `None`; this is a
//! normal outcome and never an error.

use std::collections::{HashMap, HashSet};

const NANOS_PER_SEC: f64 = 1e9;

#[derive(Debug, Clone, Copy)]
struct Baseline {
    value_ns: u64,
    missed_cycles: u32,
}

#[derive(Debug, Default)]
pub struct DeltaEstimator {
    baselines: HashMap<String, Baseline>,
}

impl DeltaEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the CPU percentage consumed by `name` since its previous
    /// reading, or `None` when no rate can be computed.
    ///
    /// The stored baseline always advances to `cumulative_ns`. The result is
    /// not clamped: a domain with several vCPUs can exceed 100%.
    pub fn estimate(
        &mut self,
        name: &str,
        cumulative_ns: u64,
        interval_seconds: Option<f64>,
    ) -> Option<f64> {
        let previous = self.replace_baseline(name, cumulative_ns);

        let interval = interval_seconds.filter(|secs| secs.is_finite() && *secs > 0.0)?;
        let previous = previous?;
        if cumulative_ns <= previous {
            return None;
        }

        let delta_secs = (cumulative_ns - previous) as f64 / NANOS_PER_SEC;
        Some(delta_secs / interval * 100.0)
    }

    pub fn baseline(&self, name: &str) -> Option<u64> {
        self.baselines.get(name).map(|b| b.value_ns)
    }

    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }

    /// Ages every baseline not in `observed` by one cycle and drops those
    /// unseen for `retention_cycles` cycles. Zero retention keeps everything.
    pub fn end_cycle(&mut self, observed: &HashSet<&str>, retention_cycles: u32) {
        for (name, baseline) in self.baselines.iter_mut() {
            if observed.contains(name.as_str()) {
                baseline.missed_cycles = 0;
            } else {
                baseline.missed_cycles = baseline.missed_cycles.saturating_add(1);
            }
        }
        if retention_cycles > 0 {
            self.baselines
                .retain(|_, baseline| baseline.missed_cycles < retention_cycles);
        }
    }

    fn replace_baseline(&mut self, name: &str, value_ns: u64) -> Option<u64> {
        let fresh = Baseline {
            value_ns,
            missed_cycles: 0,
        };
        match self.baselines.get_mut(name) {
            Some(slot) => Some(std::mem::replace(slot, fresh).value_ns),
            None => {
                self.baselines.insert(name.to_string(), fresh);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_only_sets_baseline() {
        let mut est = DeltaEstimator::new();
        assert_eq!(est.estimate("vmA", 1_000_000_000, Some(2.0)), None);
        assert_eq!(est.baseline("vmA"), Some(1_000_000_000));
    }

    #[test]
    fn second_sample_yields_percent() {
        let mut est = DeltaEstimator::new();
        est.estimate("vmA", 1_000_000_000, Some(2.0));
        assert_eq!(est.estimate("vmA", 3_000_000_000, Some(2.0)), Some(100.0));
    }

    #[test]
    fn counter_reset_is_unavailable_and_rebases() {
        let mut est = DeltaEstimator::new();
        est.estimate("vmA", 1_000_000_000, Some(2.0));
        est.estimate("vmA", 3_000_000_000, Some(2.0));
        assert_eq!(est.estimate("vmA", 500_000_000, Some(2.0)), None);
        assert_eq!(est.baseline("vmA"), Some(500_000_000));
    }

    #[test]
    fn no_progress_is_unavailable() {
        let mut est = DeltaEstimator::new();
        est.estimate("vmA", 7, Some(1.0));
        assert_eq!(est.estimate("vmA", 7, Some(1.0)), None);
    }

    #[test]
    fn multi_vcpu_rate_is_not_clamped() {
        let mut est = DeltaEstimator::new();
        est.estimate("vmA", 0, Some(1.0));
        // 4 vCPUs busy for the whole second
        assert_eq!(est.estimate("vmA", 4_000_000_000, Some(1.0)), Some(400.0));
    }

    #[test]
    fn zero_or_missing_interval_keeps_forward_progress() {
        let mut est = DeltaEstimator::new();
        est.estimate("vmA", 1_000_000_000, Some(2.0));

        assert_eq!(est.estimate("vmA", 2_000_000_000, Some(0.0)), None);
        assert_eq!(est.baseline("vmA"), Some(2_000_000_000));

        assert_eq!(est.estimate("vmA", 2_500_000_000, None), None);
        assert_eq!(est.baseline("vmA"), Some(2_500_000_000));

        assert_eq!(est.estimate("vmA", 2_600_000_000, Some(-1.0)), None);

        // next valid sample only measures its own interval
        let pct = est.estimate("vmA", 3_600_000_000, Some(2.0)).unwrap();
        assert!((pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn baselines_are_per_name() {
        let mut est = DeltaEstimator::new();
        est.estimate("a", 0, Some(1.0));
        est.estimate("b", 0, Some(1.0));
        assert_eq!(est.estimate("a", 500_000_000, Some(1.0)), Some(50.0));
        assert_eq!(est.estimate("b", 250_000_000, Some(1.0)), Some(25.0));
    }

    #[test]
    fn stale_baselines_are_evicted_after_retention() {
        let mut est = DeltaEstimator::new();
        est.estimate("gone", 10, Some(1.0));
        est.estimate("here", 10, Some(1.0));

        let observed: HashSet<&str> = ["here"].into_iter().collect();
        est.end_cycle(&observed, 2);
        assert_eq!(est.len(), 2);
        est.end_cycle(&observed, 2);
        assert_eq!(est.len(), 1);
        assert_eq!(est.baseline("gone"), None);
        assert_eq!(est.baseline("here"), Some(10));
    }

    #[test]
    fn zero_retention_never_evicts() {
        let mut est = DeltaEstimator::new();
        est.estimate("gone", 10, Some(1.0));
        let observed = HashSet::new();
        for _ in 0..100 {
            est.end_cycle(&observed, 0);
        }
        assert_eq!(est.baseline("gone"), Some(10));
    }
}
