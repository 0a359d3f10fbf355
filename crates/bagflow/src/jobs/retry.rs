use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base: Duration,
    pub max: Duration,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(15 * 60),
            jitter_pct: 0.20,
        }
    }
}

/// Delay before the attempt that follows `failed_attempt`.
/// Attempt 2 waits `base`, attempt 3 waits `2 * base`, and so on, capped at `max`.
pub fn next_delay(failed_attempt: u32, cfg: &RetryConfig, rng: &mut impl Rng) -> Duration {
    let attempt_no = failed_attempt.max(1);

    // exponent = attempt_no - 1
    let exp = attempt_no.saturating_sub(1);

    // 2^exp, saturating; the cap below handles anything huge.
    let pow2 = 1_u64.checked_shl(exp).unwrap_or(u64::MAX);

    let base_ms = cfg.base.as_millis().min(u64::MAX as u128) as u64;
    let max_ms = cfg.max.as_millis().min(u64::MAX as u128) as u64;

    let delay_ms = base_ms.saturating_mul(pow2).min(max_ms);

    // jitter in range [-jitter_pct, +jitter_pct]
    let jitter_range = (delay_ms as f64) * cfg.jitter_pct.clamp(0.0, 1.0);
    let jitter = if jitter_range > 0.0 {
        rng.gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    let jittered = (delay_ms as f64 + jitter).round().max(0.0) as u64;
    Duration::from_millis(jittered.min(max_ms))
}
