//! Adaptive per-domain throttling with a shared circuit breaker
//!
//! A [`DomainThrottle`] is shared by every task of one job. Before each page
//! fetch a task calls [`DomainThrottle::await_slot`] and holds the returned
//! [`ThrottlePermit`] for the duration of the request. Response outcomes are
//! fed back through [`DomainThrottle::record_success`] and
//! [`DomainThrottle::record_failure`], which adapt the delay for that domain
//! and drive the circuit breaker.
//!
//! The internal lock is a plain mutex that is never held across an `.await`.

mod circuit;
mod domain_state;

pub use circuit::{CircuitBreaker, CircuitState};
pub use domain_state::DomainState;

use crate::config::ThrottleConfig;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Upper bound on a single wait while a domain is at capacity
const CAPACITY_POLL: Duration = Duration::from_millis(50);

/// Backpressure surfaced by the throttle
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ThrottleError {
    #[error("Circuit breaker open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("Domain {domain} is blocked for another {retry_after:?}")]
    DomainBlocked { domain: String, retry_after: Duration },

    #[error("Timed out waiting for a slot on {domain}")]
    Timeout { domain: String },
}

/// How `acquire` behaves when the circuit is open or the domain is blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotPolicy {
    /// Wait until the constraint clears
    #[default]
    Wait,
    /// Return an error immediately
    FailFast,
}

struct ThrottleInner {
    domains: HashMap<String, DomainState>,
    circuit: CircuitBreaker,
}

enum SlotDecision {
    Granted,
    WaitFor(Duration),
}

/// Per-domain rate limiter shared by a job's tasks
pub struct DomainThrottle {
    config: ThrottleConfig,
    inner: Mutex<ThrottleInner>,
    released: Notify,
}

impl DomainThrottle {
    /// Creates a throttle with no known domains and a closed circuit
    pub fn new(config: ThrottleConfig) -> Self {
        let circuit = CircuitBreaker::new(
            config.failure_threshold,
            Duration::from_millis(config.recovery_timeout_ms),
        );

        Self {
            config,
            inner: Mutex::new(ThrottleInner {
                domains: HashMap::new(),
                circuit,
            }),
            released: Notify::new(),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Waits for a slot on `domain` under the default [`SlotPolicy::Wait`]
    ///
    /// Never fails for ordinary backpressure.
    pub async fn await_slot(&self, domain: &str) -> Result<ThrottlePermit<'_>, ThrottleError> {
        self.acquire(domain, SlotPolicy::Wait, None).await
    }

    /// Waits for a slot on `domain`
    ///
    /// # Arguments
    ///
    /// * `domain` - Host the request is aimed at
    /// * `policy` - Whether an open circuit or a blocked domain fails fast
    /// * `timeout` - Optional deadline for the whole wait
    ///
    /// # Returns
    ///
    /// * `Ok(ThrottlePermit)` - A slot that is released when the permit drops
    /// * `Err(ThrottleError)` - Fail-fast rejection or deadline elapsed
    ///
    /// Giving up (timeout or cancellation of the future) leaves the throttle
    /// state untouched, because state only changes at the moment of grant.
    pub async fn acquire(
        &self,
        domain: &str,
        policy: SlotPolicy,
        timeout: Option<Duration>,
    ) -> Result<ThrottlePermit<'_>, ThrottleError> {
        let started = Instant::now();
        let wait = self.wait_for_slot(domain, policy);

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| ThrottleError::Timeout {
                    domain: domain.to_string(),
                })??,
            None => wait.await?,
        }

        let delay_applied = started.elapsed();
        tracing::trace!("Slot granted for {} after {:?}", domain, delay_applied);

        Ok(ThrottlePermit {
            throttle: self,
            domain: domain.to_string(),
            delay_applied,
            released: false,
        })
    }

    async fn wait_for_slot(&self, domain: &str, policy: SlotPolicy) -> Result<(), ThrottleError> {
        loop {
            match self.try_grant(domain, policy)? {
                SlotDecision::Granted => return Ok(()),
                SlotDecision::WaitFor(wait) => {
                    tracing::trace!("Waiting {:?} for a slot on {}", wait, domain);
                    tokio::select! {
                        _ = self.released.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    /// Checks every constraint and grants the slot atomically if all pass
    fn try_grant(&self, domain: &str, policy: SlotPolicy) -> Result<SlotDecision, ThrottleError> {
        let now = Instant::now();
        let config = &self.config;
        let mut inner = self.lock();

        if let Err(retry_after) = inner.circuit.check(now) {
            return match policy {
                SlotPolicy::FailFast => Err(ThrottleError::CircuitOpen { retry_after }),
                SlotPolicy::Wait => Ok(SlotDecision::WaitFor(retry_after)),
            };
        }

        let state = inner
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(domain, config.default_delay_ms));

        if state.refresh_block(now, config.default_delay_ms) {
            let retry_after = state.block_remaining(now).unwrap_or(CAPACITY_POLL);
            return match policy {
                SlotPolicy::FailFast => Err(ThrottleError::DomainBlocked {
                    domain: domain.to_string(),
                    retry_after,
                }),
                SlotPolicy::Wait => Ok(SlotDecision::WaitFor(retry_after)),
            };
        }

        if state.active_requests >= config.max_concurrent_per_host {
            return Ok(SlotDecision::WaitFor(CAPACITY_POLL));
        }

        if let Some(wait) = state.time_until_next_request(config, now) {
            return Ok(SlotDecision::WaitFor(wait));
        }

        state.record_request(now, self.draw_jitter());
        Ok(SlotDecision::Granted)
    }

    fn draw_jitter(&self) -> f64 {
        let ratio = self.config.jitter_ratio;
        if ratio > 0.0 && ratio < 1.0 {
            rand::thread_rng().gen_range((1.0 - ratio)..=(1.0 + ratio))
        } else {
            1.0
        }
    }

    /// Records a successful response from `domain`
    pub fn record_success(&self, domain: &str) {
        let mut inner = self.lock();
        inner.circuit.on_success();
        if let Some(state) = inner.domains.get_mut(domain) {
            state.record_success(&self.config);
            tracing::trace!("{} ok, base delay {}ms", domain, state.base_delay_ms);
        }
    }

    /// Records a failed request against `domain`
    ///
    /// # Arguments
    ///
    /// * `domain` - Host that failed
    /// * `status` - HTTP status, if the failure carried one
    pub fn record_failure(&self, domain: &str, status: Option<u16>) {
        let now = Instant::now();
        let config = &self.config;
        let mut inner = self.lock();
        inner.circuit.on_failure(now);

        let state = inner
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(domain, config.default_delay_ms));
        state.record_failure(status, config, now);

        tracing::debug!(
            "{} failed (status {:?}), {} consecutive, base delay {}ms",
            domain,
            status,
            state.consecutive_failures,
            state.base_delay_ms
        );
    }

    /// Whether `domain` is inside a 403 cooldown
    ///
    /// An elapsed cooldown is cleared here and the delay reset to the default.
    pub fn is_blocked(&self, domain: &str) -> bool {
        let now = Instant::now();
        let default_delay = self.config.default_delay_ms;
        let mut inner = self.lock();
        inner
            .domains
            .get_mut(domain)
            .map(|state| state.refresh_block(now, default_delay))
            .unwrap_or(false)
    }

    /// Snapshot of the state kept for `domain`
    pub fn domain_state(&self, domain: &str) -> Option<DomainState> {
        self.lock().domains.get(domain).cloned()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.lock().circuit.state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().circuit.failure_count
    }

    fn release_slot(&self, domain: &str) {
        {
            let mut inner = self.lock();
            if let Some(state) = inner.domains.get_mut(domain) {
                state.release();
            }
        }
        self.released.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, ThrottleInner> {
        // State stays consistent between statements, so a poisoned lock is usable
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A granted request slot
///
/// The slot returns to the throttle when the permit is dropped or
/// [`release`](Self::release)d, on every exit path.
pub struct ThrottlePermit<'a> {
    throttle: &'a DomainThrottle,
    domain: String,
    delay_applied: Duration,
    released: bool,
}

impl ThrottlePermit<'_> {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Time spent waiting before the slot was granted
    pub fn delay_applied(&self) -> Duration {
        self.delay_applied
    }

    /// Releases the slot now
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.throttle.release_slot(&self.domain);
        }
    }
}

impl Drop for ThrottlePermit<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for ThrottlePermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottlePermit")
            .field("domain", &self.domain)
            .field("delay_applied", &self.delay_applied)
            .finish()
    }
}
