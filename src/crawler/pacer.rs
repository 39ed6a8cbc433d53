//! Artificial delays
//!
//! Every politeness jitter, backoff sleep, and cooldown goes through a
//! `Pacer`, so a shutdown signal can cut long waits short and tests can
//! observe the delays without sleeping.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why the crawler is pausing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PauseKind {
    /// Jitter before every physical request
    Politeness,
    /// Exponential backoff after a transient failure
    Backoff,
    /// Long wait after a block or challenge page
    Cooldown,
    /// Long wait before retrying an unexpected status
    StatusSleep,
    /// Delay before re-trying an empty detail page
    EmptyRetry,
    /// Between listing pages
    Page,
    /// Between classes
    Class,
    /// Simulated reading time after a detail page
    Reading,
}

#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, kind: PauseKind, delay: Duration);
}

/// Sleeps on the tokio timer, waking early on shutdown
#[derive(Debug, Clone)]
pub struct TokioPacer {
    shutdown: CancellationToken,
}

impl TokioPacer {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }
}

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, kind: PauseKind, delay: Duration) {
        if delay.is_zero() || self.shutdown.is_cancelled() {
            return;
        }

        if delay >= Duration::from_secs(60) {
            tracing::info!("Pausing {:.0}s ({:?})", delay.as_secs_f64(), kind);
        } else {
            tracing::trace!("Pausing {:.2}s ({:?})", delay.as_secs_f64(), kind);
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.shutdown.cancelled() => {
                tracing::debug!("{:?} pause cut short by shutdown", kind);
            }
        }
    }
}

/// Records requested pauses without sleeping
#[derive(Debug, Default)]
pub struct RecordingPacer {
    pauses: Mutex<Vec<(PauseKind, Duration)>>,
}

impl RecordingPacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// All pauses requested so far, in order
    pub fn pauses(&self) -> Vec<(PauseKind, Duration)> {
        self.pauses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Delays of one kind, in order
    pub fn delays(&self, kind: PauseKind) -> Vec<Duration> {
        self.pauses()
            .into_iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, d)| d)
            .collect()
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn pause(&self, kind: PauseKind, delay: Duration) {
        self.pauses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((kind, delay));
    }
}

/// Uniformly random duration in `[min_ms, max_ms]`
pub fn random_between(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

/// Exponential backoff for the given 1-based attempt
///
/// The base delay doubles each attempt and is stretched by a random
/// fraction of up to `jitter`. With `jitter <= 1.0` consecutive delays never
/// decrease: each stays below the next un-jittered step, and everything is
/// clamped to `cap`.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration, jitter: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let step = base.saturating_mul(1u32 << exponent).min(cap);
    let stretch = 1.0 + jitter.clamp(0.0, 1.0) * rand::thread_rng().gen::<f64>();
    step.mul_f64(stretch).min(cap)
}
