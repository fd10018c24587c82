use crate::config::ThrottleConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Tracks the pacing state of a single domain
///
/// Owned by [`DomainThrottle`](super::DomainThrottle) and only mutated under
/// its lock.
#[derive(Debug, Clone)]
pub struct DomainState {
    /// Host this state applies to
    pub domain: String,

    /// When the last slot for this domain was granted
    pub last_request_at: Option<Instant>,

    /// Slots currently held
    pub active_requests: u32,

    /// Adaptive delay between requests, before failure backoff
    pub base_delay_ms: u64,

    /// Failures since the last success
    pub consecutive_failures: u32,

    /// Whether the domain answered 403 and is cooling down
    pub is_blocked: bool,

    /// End of the current cooldown
    pub blocked_until: Option<Instant>,

    /// Jitter multiplier drawn when the last slot was granted
    pub jitter_factor: f64,
}

impl DomainState {
    /// Creates a fresh state starting at the configured default delay
    pub fn new(domain: &str, default_delay_ms: u64) -> Self {
        Self {
            domain: domain.to_string(),
            last_request_at: None,
            active_requests: 0,
            base_delay_ms: default_delay_ms,
            consecutive_failures: 0,
            is_blocked: false,
            blocked_until: None,
            jitter_factor: 1.0,
        }
    }

    /// Computes `min(base_delay_ms * 2^consecutive_failures, max_delay_ms)`
    ///
    /// Arithmetic overflow falls back to the default delay.
    pub fn required_delay_ms(&self, config: &ThrottleConfig) -> u64 {
        2u64.checked_pow(self.consecutive_failures)
            .and_then(|factor| self.base_delay_ms.checked_mul(factor))
            .map(|delay| delay.min(config.max_delay_ms))
            .unwrap_or_else(|| {
                tracing::debug!(
                    "Delay for {} not representable, using default",
                    self.domain
                );
                config.default_delay_ms
            })
    }

    /// The required delay with this domain's jitter applied
    pub fn jittered_delay(&self, config: &ThrottleConfig) -> Duration {
        let delay = self.required_delay_ms(config) as f64 * self.jitter_factor;
        if delay.is_finite() && delay >= 0.0 {
            Duration::from_millis(delay as u64)
        } else {
            Duration::from_millis(config.default_delay_ms)
        }
    }

    /// Calculates the time until the spacing constraint is satisfied
    ///
    /// Returns None if a request can be made now.
    pub fn time_until_next_request(
        &self,
        config: &ThrottleConfig,
        now: Instant,
    ) -> Option<Duration> {
        let last = self.last_request_at?;
        let min_gap = self.jittered_delay(config);
        let elapsed = now.saturating_duration_since(last);
        if elapsed < min_gap {
            Some(min_gap - elapsed)
        } else {
            None
        }
    }

    /// Clears an elapsed cooldown and reports whether the domain is still blocked
    ///
    /// When a cooldown ends the adaptive delay restarts from the default.
    pub fn refresh_block(&mut self, now: Instant, default_delay_ms: u64) -> bool {
        if !self.is_blocked {
            return false;
        }

        match self.blocked_until {
            Some(until) if now < until => true,
            _ => {
                tracing::info!("Cooldown for {} elapsed, unblocking", self.domain);
                self.is_blocked = false;
                self.blocked_until = None;
                self.base_delay_ms = default_delay_ms;
                false
            }
        }
    }

    /// Remaining cooldown, if blocked
    pub fn block_remaining(&self, now: Instant) -> Option<Duration> {
        if !self.is_blocked {
            return None;
        }
        self.blocked_until
            .map(|until| until.saturating_duration_since(now))
    }

    /// Records that a slot was granted
    pub fn record_request(&mut self, now: Instant, jitter_factor: f64) {
        self.active_requests = self.active_requests.saturating_add(1);
        self.last_request_at = Some(now);
        self.jitter_factor = jitter_factor;
    }

    /// Returns a slot
    pub fn release(&mut self) {
        self.active_requests = self.active_requests.saturating_sub(1);
    }

    /// Resets failure backoff and decays the delay toward the default
    pub fn record_success(&mut self, config: &ThrottleConfig) {
        self.consecutive_failures = 0;
        self.is_blocked = false;
        self.blocked_until = None;

        let decayed = (self.base_delay_ms as f64 * 0.9).floor() as u64;
        self.base_delay_ms = clamp_delay(decayed.max(config.default_delay_ms), config);
    }

    /// Escalates the delay according to the response status
    ///
    /// 429 doubles, 403 triples and starts a cooldown, 503 multiplies by 1.5.
    /// Any other failure only counts toward the backoff exponent.
    pub fn record_failure(&mut self, status: Option<u16>, config: &ThrottleConfig, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let escalated = match status {
            Some(429) => self.base_delay_ms.saturating_mul(2),
            Some(403) => {
                self.is_blocked = true;
                self.blocked_until = Some(now + Duration::from_millis(config.block_cooldown_ms));
                tracing::warn!(
                    "{} answered 403, blocked for {}ms",
                    self.domain,
                    config.block_cooldown_ms
                );
                self.base_delay_ms.saturating_mul(3)
            }
            Some(503) => (self.base_delay_ms as f64 * 1.5) as u64,
            _ => self.base_delay_ms,
        };

        self.base_delay_ms = clamp_delay(escalated, config);
    }
}

fn clamp_delay(delay_ms: u64, config: &ThrottleConfig) -> u64 {
    delay_ms.clamp(config.min_delay_ms, config.max_delay_ms)
}
