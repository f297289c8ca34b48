//! Per-backend circuit breaker.
//!
//! Tracks consecutive failures for one backend and temporarily blocks calls
//! to it once a threshold is reached. After a cooldown the breaker lets a
//! single trial call through; its outcome decides whether to close again or
//! re-open.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐  N failures   ┌────────┐  cooldown   ┌──────────┐
//! │ Closed ├──────────────►│  Open  ├────────────►│ HalfOpen │
//! └───▲────┘               └───▲────┘             └────┬─────┘
//!     │                        │  trial failure        │
//!     │                        └───────────────────────┤
//!     │               trial success                    │
//!     └────────────────────────────────────────────────┘
//! ```
//!
//! Admission hands out a [`CallPermit`]. A permit that is dropped without
//! being settled (the call was cancelled) releases a half-open trial slot so
//! the breaker cannot wedge in `HalfOpen`. Every state transition bumps a
//! generation counter; a permit issued before the latest transition settles
//! as a no-op.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Circuit breaker state for a single backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Backend is healthy; all calls are allowed.
    Closed,
    /// Backend failed too often; calls short-circuit until the cooldown ends.
    Open,
    /// Cooldown has elapsed; one trial call decides recovery.
    HalfOpen,
}

/// Configuration for circuit breaker behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before tripping the circuit to Open.
    pub failure_threshold: u32,
    /// Seconds to wait in Open state before transitioning to HalfOpen.
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
        }
    }
}

/// Health snapshot for a single backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendHealth {
    pub state: CircuitState,
    /// Number of consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// When the circuit last opened (if it has).
    pub opened_at: Option<Instant>,
    pub last_success_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    health: BackendHealth,
    trial_in_flight: bool,
    generation: u64,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            health: BackendHealth {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                last_success_at: None,
            },
            trial_in_flight: false,
            generation: 0,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        self.health.state = to;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Circuit breaker guarding one backend.
///
/// All state sits behind one mutex per backend, so concurrent queries
/// touching different backends never contend.
#[derive(Debug)]
pub struct CircuitBreaker {
    backend: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker for `backend`.
    pub fn new(backend: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            backend: backend.into(),
            config,
            state: Mutex::new(BreakerState::closed()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // The state is plain data; a panic mid-update cannot leave it torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.config.cooldown_secs)
    }

    /// Ask to place a call.
    ///
    /// - `Closed`: always admitted.
    /// - `Open`: admitted as the half-open trial once the cooldown has
    ///   elapsed, otherwise refused.
    /// - `HalfOpen`: admitted only if no trial is already in flight.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        let mut state = self.lock();
        match state.health.state {
            CircuitState::Closed => Some(CallPermit::new(self, false, state.generation)),
            CircuitState::Open => {
                let cooled = state
                    .health
                    .opened_at
                    .is_none_or(|opened| opened.elapsed() >= self.cooldown());
                if cooled {
                    tracing::info!(backend = %self.backend, "circuit half-open; sending trial");
                    state.transition(CircuitState::HalfOpen);
                    state.trial_in_flight = true;
                    Some(CallPermit::new(self, true, state.generation))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    None
                } else {
                    state.trial_in_flight = true;
                    Some(CallPermit::new(self, true, state.generation))
                }
            }
        }
    }

    /// Record a successful call: closes the circuit and clears the failure run.
    pub fn record_success(&self) {
        let mut state = self.lock();
        self.apply_success(&mut state);
    }

    fn apply_success(&self, state: &mut BreakerState) {
        if state.health.state != CircuitState::Closed {
            tracing::info!(backend = %self.backend, "circuit closed after successful trial");
            state.transition(CircuitState::Closed);
        }
        state.health.consecutive_failures = 0;
        state.health.opened_at = None;
        state.health.last_success_at = Some(Instant::now());
        state.trial_in_flight = false;
    }

    /// Record a failed call.
    ///
    /// A failed half-open trial re-opens immediately; otherwise the circuit
    /// opens once the consecutive failure count reaches the threshold.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        self.apply_failure(&mut state);
    }

    fn apply_failure(&self, state: &mut BreakerState) {
        state.health.consecutive_failures = state.health.consecutive_failures.saturating_add(1);
        let trip = state.health.state == CircuitState::HalfOpen
            || state.health.consecutive_failures >= self.config.failure_threshold;
        if trip && state.health.state != CircuitState::Open {
            tracing::warn!(
                backend = %self.backend,
                failures = state.health.consecutive_failures,
                "circuit opened"
            );
        }
        if trip {
            state.transition(CircuitState::Open);
            state.health.opened_at = Some(Instant::now());
        }
        state.trial_in_flight = false;
    }

    fn settle(&self, generation: u64, outcome: Option<bool>) {
        let mut state = self.lock();
        if state.generation != generation {
            tracing::debug!(backend = %self.backend, "ignoring outcome of a stale permit");
            return;
        }
        match outcome {
            Some(true) => self.apply_success(&mut state),
            Some(false) => self.apply_failure(&mut state),
            None => state.trial_in_flight = false,
        }
    }

    /// Current circuit state.
    pub fn state(&self) -> CircuitState {
        self.lock().health.state
    }

    /// Snapshot of the backend's health.
    pub fn health(&self) -> BackendHealth {
        self.lock().health.clone()
    }

    /// Return to a closed circuit with no recorded failures.
    pub fn reset(&self) {
        let mut state = self.lock();
        let generation = state.generation.wrapping_add(1);
        *state = BreakerState {
            generation,
            ..BreakerState::closed()
        };
    }
}

/// Admission ticket for one call through a [`CircuitBreaker`].
///
/// Settle it with [`success`](Self::success), [`failure`](Self::failure) or
/// [`release`](Self::release) (an outcome that says nothing about backend
/// health). Dropping it unsettled behaves like `release`.
#[derive(Debug)]
#[must_use = "an unsettled permit records nothing"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    generation: u64,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool, generation: u64) -> Self {
        Self {
            breaker,
            trial,
            generation,
            settled: false,
        }
    }

    /// Whether this call is the half-open recovery trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, Some(true));
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, Some(false));
    }

    pub fn release(self) {}
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.settle(self.generation, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "arxiv",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown_secs,
            },
        )
    }

    fn fail(breaker: &CircuitBreaker, times: u32) {
        for _ in 0..times {
            breaker.try_acquire().expect("admitted").failure();
        }
    }

    #[test]
    fn initial_state_is_closed() {
        let breaker = make_breaker(3, 60);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.health().consecutive_failures, 0);
    }

    #[test]
    fn stays_closed_below_threshold() {
        let breaker = make_breaker(3, 60);
        fail(&breaker, 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn trips_to_open_at_threshold() {
        let breaker = make_breaker(5, 60);
        fail(&breaker, 5);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn open_blocks_until_cooldown_then_half_opens() {
        let breaker = make_breaker(2, 30);
        fail(&breaker, 2);
        assert!(breaker.try_acquire().is_none());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(breaker.try_acquire().is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        let trial = breaker.try_acquire().expect("trial admitted");
        assert!(trial.is_trial());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        trial.release();
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_single_trial() {
        let breaker = make_breaker(1, 0);
        fail(&breaker, 1);
        let trial = breaker.try_acquire().expect("trial");
        assert!(breaker.try_acquire().is_none(), "second trial refused");
        trial.success();
        assert!(breaker.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_restores_closed() {
        let breaker = make_breaker(3, 0);
        fail(&breaker, 3);
        breaker.try_acquire().expect("trial").success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.health().consecutive_failures, 0);
        assert!(breaker.health().last_success_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_retrips_and_restarts_cooldown() {
        let breaker = make_breaker(3, 10);
        fail(&breaker, 3);
        tokio::time::advance(Duration::from_secs(10)).await;
        breaker.try_acquire().expect("trial").failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.try_acquire().is_none(), "cooldown restarted");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trial_frees_the_slot() {
        let breaker = make_breaker(1, 0);
        fail(&breaker, 1);
        {
            let _trial = breaker.try_acquire().expect("trial");
        }
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn late_failure_from_closed_era_does_not_disturb_trial() {
        let breaker = make_breaker(1, 0);
        let early = breaker.try_acquire().expect("admitted while closed");
        fail(&breaker, 1);
        assert_eq!(breaker.state(), CircuitState::Open);

        let trial = breaker.try_acquire().expect("trial");
        early.failure();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_none(), "trial still in flight");

        trial.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn permit_issued_before_reset_is_ignored() {
        let breaker = make_breaker(1, 60);
        let stale = breaker.try_acquire().expect("admitted");
        breaker.reset();
        stale.failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.health().consecutive_failures, 0);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let breaker = make_breaker(5, 60);
        fail(&breaker, 2);
        breaker.try_acquire().expect("admitted").success();
        let health = breaker.health();
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.state, CircuitState::Closed);
    }

    #[test]
    fn released_permit_records_nothing() {
        let breaker = make_breaker(1, 60);
        breaker.try_acquire().expect("admitted").release();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.health().consecutive_failures, 0);
    }

    #[test]
    fn rapid_success_failure_alternation() {
        let breaker = make_breaker(3, 60);
        for _ in 0..10 {
            breaker.try_acquire().expect("admitted").failure();
            breaker.try_acquire().expect("admitted").success();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_all_state() {
        let breaker = make_breaker(3, 60);
        fail(&breaker, 3);
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.health().opened_at.is_none());
        assert!(breaker.try_acquire().is_some());
    }

    #[test]
    fn default_config_values() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.cooldown_secs, 60);
    }
}
