//! Reconnect delay policy.

use std::time::Duration;

/// Capped exponential backoff with additive jitter.
///
/// The delay for attempt `n` is `base * 2^n`, capped at `max`, plus a random
/// amount up to `jitter_factor` of that delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on the exponential part.
    pub max: Duration,
    /// Fraction of the delay added as jitter (0.0 disables jitter).
    pub jitter_factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

impl Backoff {
    /// Backoff without jitter.
    #[must_use]
    pub fn fixed(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter_factor: 0.0,
        }
    }

    /// Delay before retry number `attempt` (zero based).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);

        let exp_ms = base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        let capped_ms = exp_ms.min(max_ms);

        let jitter_range = (capped_ms as f64 * self.jitter_factor) as u64;
        let jitter = if jitter_range > 0 {
            // Sub-second clock noise is enough to decorrelate clients.
            let seed = u64::from(
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .subsec_nanos(),
            );
            seed % (jitter_range + 1)
        } else {
            0
        };

        Duration::from_millis(capped_ms.saturating_add(jitter))
    }
}
