//! Saga counters
//!
//! Lock-free counters shared by the saga handler and the recovery worker.
//! A compensation that itself fails is only visible here and in the logs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SagaStats {
    pub started: AtomicU64,
    pub completed: AtomicU64,
    pub compensated: AtomicU64,
    /// Forward credits explicitly rejected
    pub credit_failures: AtomicU64,
    /// Compensating credits explicitly rejected (saga left in COMPENSATING)
    pub compensation_failures: AtomicU64,
    /// Recovery scans that found a saga still COMPENSATING
    pub stuck_compensations: AtomicU64,
    /// Credits re-sent by recovery
    pub redispatches: AtomicU64,
}

impl SagaStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SagaStatsSnapshot {
        SagaStatsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            compensated: self.compensated.load(Ordering::Relaxed),
            credit_failures: self.credit_failures.load(Ordering::Relaxed),
            compensation_failures: self.compensation_failures.load(Ordering::Relaxed),
            stuck_compensations: self.stuck_compensations.load(Ordering::Relaxed),
            redispatches: self.redispatches.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SagaStatsSnapshot {
    pub started: u64,
    pub completed: u64,
    pub compensated: u64,
    pub credit_failures: u64,
    pub compensation_failures: u64,
    pub stuck_compensations: u64,
    pub redispatches: u64,
}

impl fmt::Display for SagaStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Saga Stats: started={}, completed={}, compensated={}, credit_failures={}, compensation_failures={}, stuck_compensations={}, redispatches={}",
            self.started,
            self.completed,
            self.compensated,
            self.credit_failures,
            self.compensation_failures,
            self.stuck_compensations,
            self.redispatches
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = SagaStats::new();
        SagaStats::incr(&stats.started);
        SagaStats::incr(&stats.started);
        SagaStats::incr(&stats.compensation_failures);

        let snap = stats.snapshot();
        assert_eq!(snap.started, 2);
        assert_eq!(snap.compensation_failures, 1);
        assert_eq!(snap.completed, 0);
        assert!(snap.to_string().contains("compensation_failures=1"));
    }
}
