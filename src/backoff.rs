//! Exponential backoff with symmetric jitter.
//!
//! Pure delay computation shared by the connection pool and the per-task
//! retry loop. The only nondeterminism is the jitter draw; callers that
//! need reproducible delays pass `jitter = 0.0`.

use rand::Rng;

use crate::core::task::RetryPolicy;

/// Apply symmetric jitter to a base delay, flooring at zero.
pub fn apply_jitter(delay: f64, jitter: f64) -> f64 {
    if jitter <= 0.0 {
        return delay.max(0.0);
    }
    let offset = delay * rand::thread_rng().gen_range(-jitter..=jitter);
    (delay + offset).max(0.0)
}

/// Delay in seconds before retrying `attempt` (0-indexed).
///
/// `base = min(initial_delay * backoff_factor^attempt, max_delay)`, then
/// symmetric jitter in `[-jitter, +jitter]` of the base is applied.
pub fn delay_for_attempt(attempt: u32, policy: &RetryPolicy) -> f64 {
    let base = (policy.initial_delay * policy.backoff_factor.powi(attempt as i32))
        .min(policy.max_delay);
    apply_jitter(base, policy.jitter)
}
