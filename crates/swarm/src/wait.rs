//! Wait-time policies applied between task executions.

use crate::error::{SwarmError, SwarmResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long a virtual user pauses after each task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitTime {
    /// Always wait the same amount of time.
    Constant { secs: f64 },
    /// Wait a uniformly sampled time in `[min_secs, max_secs]`.
    Between { min_secs: f64, max_secs: f64 },
    /// Start tasks at a fixed cadence: wait `secs` minus the time the last task took.
    ConstantPacing { secs: f64 },
    /// Pacing expressed as tasks per second for one user.
    ConstantThroughput { tasks_per_sec: f64 },
}

impl WaitTime {
    pub fn constant(secs: f64) -> Self {
        WaitTime::Constant { secs }
    }

    pub fn between(min_secs: f64, max_secs: f64) -> Self {
        WaitTime::Between { min_secs, max_secs }
    }

    pub fn constant_pacing(secs: f64) -> Self {
        WaitTime::ConstantPacing { secs }
    }

    pub fn constant_throughput(tasks_per_sec: f64) -> Self {
        WaitTime::ConstantThroughput { tasks_per_sec }
    }

    /// Check the policy describes a usable, finite wait.
    pub fn validate(&self) -> SwarmResult<()> {
        let ok = |v: f64| Duration::try_from_secs_f64(v).is_ok();
        match *self {
            WaitTime::Constant { secs } | WaitTime::ConstantPacing { secs } => {
                if !ok(secs) {
                    return Err(SwarmError::config(format!(
                        "wait time must be a non-negative number of seconds, got {}",
                        secs
                    )));
                }
            }
            WaitTime::Between { min_secs, max_secs } => {
                if !ok(min_secs) || !ok(max_secs) {
                    return Err(SwarmError::config(
                        "wait time bounds must be non-negative numbers of seconds",
                    ));
                }
                if min_secs > max_secs {
                    return Err(SwarmError::config(format!(
                        "wait time min ({}) must not exceed max ({})",
                        min_secs, max_secs
                    )));
                }
            }
            WaitTime::ConstantThroughput { tasks_per_sec } => {
                if !(tasks_per_sec > 0.0 && ok(1.0 / tasks_per_sec)) {
                    return Err(SwarmError::config(format!(
                        "tasks_per_sec must be > 0 with a representable interval, got {}",
                        tasks_per_sec
                    )));
                }
            }
        }
        Ok(())
    }

    /// Compute the next wait, given how long the task that just ran took.
    pub fn next<R: Rng + ?Sized>(&self, rng: &mut R, last_task: Duration) -> Duration {
        match *self {
            WaitTime::Constant { secs } => seconds(secs),
            WaitTime::Between { min_secs, max_secs } => {
                if min_secs >= max_secs {
                    return seconds(min_secs);
                }
                seconds(rng.gen_range(min_secs..=max_secs))
            }
            WaitTime::ConstantPacing { secs } => seconds(secs).saturating_sub(last_task),
            WaitTime::ConstantThroughput { tasks_per_sec } => {
                seconds(1.0 / tasks_per_sec).saturating_sub(last_task)
            }
        }
    }
}

/// Unvalidated input clamps instead of panicking: NaN and negatives become
/// zero, oversized values become `Duration::MAX`.
fn seconds(v: f64) -> Duration {
    match Duration::try_from_secs_f64(v) {
        Ok(d) => d,
        Err(_) if v > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}

impl Default for WaitTime {
    fn default() -> Self {
        WaitTime::Constant { secs: 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_between_stays_in_bounds() {
        let wait = WaitTime::between(1.0, 5.0);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..10_000 {
            let d = wait.next(&mut rng, Duration::ZERO);
            assert!(d >= Duration::from_secs(1), "{:?} below 1s", d);
            assert!(d <= Duration::from_secs(5), "{:?} above 5s", d);
        }
    }

    #[test]
    fn test_between_spreads_samples() {
        let wait = WaitTime::between(1.0, 5.0);
        let mut rng = StdRng::seed_from_u64(42);
        let samples: Vec<f64> = (0..2_000)
            .map(|_| wait.next(&mut rng, Duration::ZERO).as_secs_f64())
            .collect();

        assert!(samples.iter().any(|&s| s < 2.0));
        assert!(samples.iter().any(|&s| s > 4.0));
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!((mean - 3.0).abs() < 0.2, "mean was {}", mean);
    }

    #[test]
    fn test_between_equal_bounds() {
        let wait = WaitTime::between(2.0, 2.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(wait.next(&mut rng, Duration::ZERO), Duration::from_secs(2));
    }

    #[test]
    fn test_constant_ignores_task_time() {
        let wait = WaitTime::constant(0.5);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            wait.next(&mut rng, Duration::from_secs(3)),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_constant_pacing_subtracts_task_time() {
        let wait = WaitTime::constant_pacing(2.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            wait.next(&mut rng, Duration::from_millis(500)),
            Duration::from_millis(1500)
        );
        // A slow task means no wait at all
        assert_eq!(wait.next(&mut rng, Duration::from_secs(5)), Duration::ZERO);
    }

    #[test]
    fn test_constant_throughput() {
        let wait = WaitTime::constant_throughput(4.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            wait.next(&mut rng, Duration::from_millis(50)),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn test_validate() {
        assert!(WaitTime::between(1.0, 5.0).validate().is_ok());
        assert!(WaitTime::between(5.0, 1.0).validate().is_err());
        assert!(WaitTime::constant(-1.0).validate().is_err());
        assert!(WaitTime::constant(f64::NAN).validate().is_err());
        assert!(WaitTime::constant_throughput(0.0).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unrepresentable_waits() {
        assert!(WaitTime::constant(1e30).validate().is_err());
        assert!(WaitTime::between(1.0, 1e30).validate().is_err());
        assert!(WaitTime::constant_pacing(f64::INFINITY).validate().is_err());
        assert!(WaitTime::constant_throughput(1e-30).validate().is_err());
        assert!(WaitTime::constant(86_400.0).validate().is_ok());
    }

    #[test]
    fn test_next_clamps_unvalidated_values() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(WaitTime::constant(1e30).next(&mut rng, Duration::ZERO), Duration::MAX);
        assert!(WaitTime::between(1.0, 1e30).next(&mut rng, Duration::ZERO) >= Duration::from_secs(1));
        assert_eq!(WaitTime::constant(f64::NAN).next(&mut rng, Duration::ZERO), Duration::ZERO);
        assert_eq!(
            WaitTime::constant_throughput(1e-30).next(&mut rng, Duration::from_secs(1)),
            Duration::MAX - Duration::from_secs(1)
        );
    }

    #[test]
    fn test_yaml_shape() {
        let wait: WaitTime =
            serde_json::from_str(r#"{"type":"between","min_secs":1,"max_secs":5}"#).unwrap();
        assert_eq!(wait, WaitTime::between(1.0, 5.0));
    }
}
