use std::future::Future;
use std::time::Duration;

use crate::settings::Settings;

/// What a poller should do after an unproductive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    /// Give other tasks a turn and poll again.
    Yield,
    /// Wait for readiness, but no longer than the given delay.
    Wait(Duration),
}

/// Adaptive polling backoff.
///
/// The first `threshold` unproductive polls only yield. After that the delay grows
/// quadratically with the excess count, `step * (k - threshold)^2`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    threshold: u32,
    step: Duration,
    max: Duration,
    unproductive: u32,
}

impl Backoff {
    pub fn new(threshold: u32, step: Duration, max: Duration) -> Self {
        Self {
            threshold,
            step,
            max,
            unproductive: 0,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.poll_backoff_threshold,
            settings.poll_backoff_step(),
            settings.poll_backoff_max(),
        )
    }

    pub fn unproductive(&self) -> u32 {
        self.unproductive
    }

    pub fn reset(&mut self) {
        self.unproductive = 0;
    }

    /// Delay for the `k`th consecutive unproductive poll; zero at or below the threshold.
    pub fn delay_for(&self, k: u32) -> Duration {
        let excess = k.saturating_sub(self.threshold);
        if excess == 0 {
            return Duration::ZERO;
        }
        self.step
            .saturating_mul(excess.saturating_mul(excess))
            .min(self.max)
    }

    /// Records an unproductive poll and returns how to pause before the next one.
    pub fn next_pause(&mut self) -> Pause {
        self.unproductive = self.unproductive.saturating_add(1);
        let delay = self.delay_for(self.unproductive);
        if delay.is_zero() {
            Pause::Yield
        } else {
            Pause::Wait(delay)
        }
    }

    /// Records an unproductive poll and pauses: yields, or waits until `ready` resolves or the
    /// current delay elapses, whichever comes first.
    pub async fn wait<F>(&mut self, ready: F)
    where
        F: Future,
    {
        match self.next_pause() {
            Pause::Yield => tokio::task::yield_now().await,
            Pause::Wait(delay) => {
                let _ = tokio::time::timeout(delay, ready).await;
            }
        }
    }
}
