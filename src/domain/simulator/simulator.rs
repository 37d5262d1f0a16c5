use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// Source of simulated time for every actor in the engine.
///
/// Actors only ever block on a message or on `sleep`, so a paused tokio
/// clock turns the whole simulation into a discrete-event run: the runtime
/// jumps straight to the next pending timer whenever all actors are idle.
#[async_trait]
pub trait Simulator: std::fmt::Debug + Send + Sync {
    /// Current simulated date in seconds since the simulation started.
    fn now(&self) -> f64;

    /// Suspends the calling actor for `seconds` of simulated time.
    async fn sleep(&self, seconds: f64);
}

pub type SharedSimulator = Arc<dyn Simulator>;

/// The tokio duration of a delay of `seconds`.
///
/// # Returns
/// `None` if the delay is negative, not a number, or too long for a
/// `Duration`.
pub fn simulated_duration(seconds: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(seconds).ok()
}

/// Simulator backed by the tokio timer.
///
/// Run it on a runtime started with `start_paused(true)` (or inside
/// `#[tokio::test(start_paused = true)]`) to get virtual time. On a normal
/// runtime it degrades to wall-clock time, which is only useful for demos.
#[derive(Debug, Clone)]
pub struct TokioSimulator {
    origin: Instant,
}

impl TokioSimulator {
    pub fn new() -> Self {
        TokioSimulator { origin: Instant::now() }
    }

    pub fn shared() -> SharedSimulator {
        Arc::new(Self::new())
    }
}

impl Default for TokioSimulator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Simulator for TokioSimulator {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    async fn sleep(&self, seconds: f64) {
        if !(seconds.is_finite() && seconds > 0.0) {
            return;
        }
        // Finite but unrepresentable delays wait until the end of time.
        let duration = simulated_duration(seconds).unwrap_or(Duration::MAX);
        tokio::time::sleep(duration).await;
    }
}
