//! Backoff and retry-policy primitives shared between the scheduler and
//! the supervisor.
//!
//! This crate only defines the *data*: how long to wait between attempts,
//! and how many attempts to allow. The actual retry loops are async
//! (perceiving, deciding, and acting all cross an I/O boundary) and live
//! in `taskwright-runtime`, built on top of these types.

use std::time::Duration;

/// How the delay between retry attempts grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// No delay between attempts.
    None,
    /// Same delay every attempt.
    Fixed(Duration),
    /// Delay grows linearly: `base * attempt`.
    Linear(Duration),
    /// Delay doubles each attempt, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay to wait before the given attempt number (1-indexed: the
    /// delay before the *second* attempt is `delay_for(1)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(d) => *d,
            Backoff::Linear(base) => *base * attempt,
            Backoff::Exponential { base, max } => {
                let scaled = base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
                scaled.min(*max)
            }
        }
    }
}

/// How many times, and with what spacing, to retry a recoverable
/// operation before giving up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A policy that never retries: used for non-recoverable categories.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }

    /// Bounded retry with exponential backoff, the default used for
    /// action-level failures (§4.5): up to 3 attempts, 200ms doubling to
    /// 5s.
    pub fn bounded_exponential() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(200),
                max: Duration::from_secs(5),
            },
        }
    }

    pub fn is_exhausted(&self, attempts_made: u32) -> bool {
        attempts_made >= self.max_attempts
    }
}

/// Budget that scales with the size of a DAG, used to cap the number of
/// supervisor-initiated recovery tasks (retry/bridge/replan insertions)
/// so a pathological run can't grow the DAG without bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryBudget {
    /// Multiplier applied to the DAG's original task count.
    pub factor: f64,
    original_task_count: u32,
    spent: u32,
}

impl RecoveryBudget {
    pub fn new(original_task_count: u32, factor: f64) -> Self {
        Self {
            factor,
            original_task_count,
            spent: 0,
        }
    }

    /// Total recovery tasks allowed for this run.
    pub fn limit(&self) -> u32 {
        ((self.original_task_count as f64) * self.factor).ceil() as u32
    }

    pub fn remaining(&self) -> u32 {
        self.limit().saturating_sub(self.spent)
    }

    pub fn has_budget(&self) -> bool {
        self.remaining() > 0
    }

    /// Records one recovery task spent; returns `false` if the budget was
    /// already exhausted (caller should treat this as an escalation to
    /// abort rather than insert another task).
    pub fn spend(&mut self) -> bool {
        if self.has_budget() {
            self.spent += 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_is_constant() {
        let b = Backoff::Fixed(Duration::from_millis(50));
        assert_eq!(b.delay_for(1), Duration::from_millis(50));
        assert_eq!(b.delay_for(10), Duration::from_millis(50));
    }

    #[test]
    fn exponential_backoff_caps_at_max() {
        let b = Backoff::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert!(b.delay_for(20) <= Duration::from_secs(1));
        assert!(b.delay_for(1) >= Duration::from_millis(100));
    }

    #[test]
    fn retry_policy_exhaustion() {
        let p = RetryPolicy::new(3, Backoff::None);
        assert!(!p.is_exhausted(2));
        assert!(p.is_exhausted(3));
    }

    #[test]
    fn recovery_budget_scales_with_dag_size_and_is_spendable() {
        let mut budget = RecoveryBudget::new(10, 2.0);
        assert_eq!(budget.limit(), 20);
        for _ in 0..20 {
            assert!(budget.spend());
        }
        assert!(!budget.has_budget());
        assert!(!budget.spend());
    }
}
