use std::time::Duration;

/// Returns `base` plus a uniformly random fraction of `jitter`.
pub fn jittered(base: Duration, jitter: Duration) -> Duration {
    base.saturating_add(jitter.mul_f64(rand::random::<f64>()))
}
