//! Process-wide circuit breaker guarding every domain of a throttle
//!
//! ```text
//! Closed   -> Open:     failure_count >= failure_threshold
//! Open     -> HalfOpen: recovery_timeout elapsed (checked lazily)
//! HalfOpen -> Closed:   one success, failure_count reset
//! HalfOpen -> Open:     one failure
//! ```

use std::time::Duration;
use tokio::time::Instant;

/// Current position of the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker state shared by all domains of one throttle
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
    /// When the breaker last moved to Open; recovery is timed from here
    pub opened_at: Option<Instant>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            opened_at: None,
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
        }
    }

    /// Checks whether requests may pass at `now`
    ///
    /// An Open breaker whose recovery timeout has elapsed moves to HalfOpen
    /// here, so the transition happens on the next request rather than on a
    /// timer.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Requests may proceed
    /// * `Err(Duration)` - Time remaining until the breaker half-opens
    pub fn check(&mut self, now: Instant) -> Result<(), Duration> {
        if self.state != CircuitState::Open {
            return Ok(());
        }

        let opened_at = self.opened_at.unwrap_or(now);
        let elapsed = now.saturating_duration_since(opened_at);
        if elapsed >= self.recovery_timeout {
            tracing::info!("Circuit breaker half-open after {:?}", elapsed);
            self.state = CircuitState::HalfOpen;
            Ok(())
        } else {
            Err(self.recovery_timeout - elapsed)
        }
    }

    /// Records a successful request
    pub fn on_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                tracing::info!("Circuit breaker closed after successful probe");
                self.state = CircuitState::Closed;
                self.failure_count = 0;
            }
            CircuitState::Closed => {
                // Threshold counts consecutive failures
                self.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed request
    pub fn on_failure(&mut self, now: Instant) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);

        match self.state {
            CircuitState::HalfOpen => {
                tracing::warn!("Circuit breaker re-opened: probe request failed");
                self.open(now);
            }
            CircuitState::Closed if self.failure_count >= self.failure_threshold => {
                tracing::warn!(
                    "Circuit breaker opened after {} consecutive failures",
                    self.failure_count
                );
                self.open(now);
            }
            // Late failures while Open do not extend the recovery window
            _ => {}
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
    }
}
