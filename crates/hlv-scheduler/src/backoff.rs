//! Exponential retry delays.

use std::time::Duration;

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`,
/// capped at `max`.
pub fn delay_for(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32);
    let delay = base_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay.min(max_ms))
}

/// [`delay_for`] as a chrono duration, for schedules read off a `Clock`.
pub fn chrono_delay_for(attempt: u32, base_ms: u64, max_ms: u64) -> chrono::Duration {
    let ms = delay_for(attempt, base_ms, max_ms).as_millis();
    chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}
