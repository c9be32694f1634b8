//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Upper bound on the exponential part of any retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_millis(30_000);

/// Calculate the delay before retrying after the `failed_attempt`-th failure
/// (0-based): `min(base * 2^n, max) + jitter`, jitter uniform in `[0, 30%)`.
pub fn calculate_backoff(failed_attempt: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;

    let exponential_base = 2u64.saturating_pow(failed_attempt);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    let jitter_range = capped_delay * 3 / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}
