//! Exponential backoff between resolutions.

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{sync::LazyLock, time::Duration};

/// Delay before the first retry, and the steady cadence between successful
/// resolutions.
pub const BASE_DELAY: Duration = Duration::from_secs(10);
/// Growth applied to the delay on each retry.
pub const FACTOR: f64 = 1.6;
/// Relative spread of the randomized delay.
pub const JITTER: f64 = 0.2;

// Shared by every resolver session in the process.
static RNG: LazyLock<Mutex<StdRng>> = LazyLock::new(|| Mutex::new(StdRng::from_os_rng()));

fn random_unit() -> f64 {
    RNG.lock().random::<f64>()
}

/// Where the cap is applied relative to jitter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Clamp {
    /// Clamp to `max_delay`, then jitter. The result may exceed `max_delay`
    /// by up to [`JITTER`]. This matches the delay distribution of existing
    /// deployments and is the default.
    #[default]
    BeforeJitter,
    /// Jitter, then clamp, so `max_delay` is a hard ceiling.
    AfterJitter,
}

/// Exponential backoff strategy, as described by gRPC's
/// [connection backoff](https://github.com/grpc/grpc/blob/master/doc/connection-backoff.md)
/// but with a much larger base delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exponential {
    /// Upper bound of the (unjittered) delay.
    pub max_delay: Duration,
    /// Whether jitter may push the delay past `max_delay`.
    pub clamp: Clamp,
}

impl Exponential {
    /// Creates a strategy capped at `max_delay` with the default clamping.
    pub fn new(max_delay: Duration) -> Self {
        Self {
            max_delay,
            clamp: Clamp::default(),
        }
    }

    /// Sets the clamping behavior.
    pub fn clamp(self, clamp: Clamp) -> Self {
        Self { clamp, ..self }
    }

    /// Amount of time to wait before the next attempt after `retries`
    /// consecutive unsuccessful ones.
    pub fn backoff(&self, retries: u32) -> Duration {
        if retries == 0 {
            return BASE_DELAY;
        }
        let max = self.max_delay.as_secs_f64();
        let mut backoff = self.unjittered(retries);
        // Randomize so sessions that started together don't stay in lockstep.
        backoff *= 1.0 + JITTER * (random_unit() * 2.0 - 1.0);
        if self.clamp == Clamp::AfterJitter && backoff > max {
            backoff = max;
        }
        if backoff <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(backoff).unwrap_or(Duration::MAX)
    }

    /// Capped exponential delay in seconds, before jitter.
    fn unjittered(&self, mut retries: u32) -> f64 {
        let max = self.max_delay.as_secs_f64();
        let mut backoff = BASE_DELAY.as_secs_f64();
        while backoff < max && retries > 0 {
            backoff *= FACTOR;
            retries -= 1;
        }
        backoff.min(max)
    }
}
