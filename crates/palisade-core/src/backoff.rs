//! Delay arithmetic shared by the rate limiter and the retry manager.

use std::time::Duration;

use rand::Rng;

/// Upper bound on any server-supplied wait hint.
pub const MAX_SERVER_HINT: Duration = Duration::from_secs(24 * 60 * 60);

/// A server-supplied retry-after, clamped to [`MAX_SERVER_HINT`].
pub fn server_hint(retry_after: Option<Duration>) -> Duration {
    retry_after.unwrap_or(Duration::ZERO).min(MAX_SERVER_HINT)
}

/// `base * factor^exponent`, capped at `max`.
pub fn exponential(base: Duration, factor: f64, exponent: u32, max: Duration) -> Duration {
    let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
    let scaled = base.as_secs_f64() * factor.powi(exponent);
    if !scaled.is_finite() || scaled >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

/// Perturb `delay` uniformly within `±factor` of its value.
///
/// `factor` is clamped to `[0, 1]` so the result is never negative.
pub fn apply_jitter(delay: Duration, factor: f64) -> Duration {
    if delay.is_zero() || !(factor > 0.0) {
        return delay;
    }
    let factor = factor.min(1.0);
    let offset = rand::thread_rng().gen_range(-factor..=factor);
    delay.mul_f64(1.0 + offset)
}
