use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{info, warn};

use parley_core::errors::{FailureCause, GatewayError};
use parley_core::gateway::ModelGateway;
use parley_core::turn::Turn;

/// Retry and circuit breaker settings for [`ReliableGateway`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    /// One trial call is in flight; everyone else is rejected until it ends.
    HalfOpen,
}

/// Wraps a gateway with retry logic and a circuit breaker.
///
/// - Retries retryable causes with exponential backoff + jitter
/// - Respects `retry_after` hints from rate limit responses
/// - N consecutive failures open the circuit; after the cooldown a single
///   trial call is let through (half-open). Its success closes the circuit,
///   its failure reopens it
/// - `InvalidHistory` passes straight through and does not count as a failure
pub struct ReliableGateway<G: ModelGateway> {
    inner: G,
    config: ReliableConfig,
    circuit_state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    total_retries: AtomicU64,
}

impl<G: ModelGateway> ReliableGateway<G> {
    pub fn new(inner: G, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit_state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: G) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    /// Admit a new call. After the cooldown the first caller becomes the
    /// half-open trial.
    fn check_circuit(&self) -> Result<(), GatewayError> {
        let mut state = self.circuit_state.write();
        let cooled_down = match *state {
            CircuitState::Closed => return Ok(()),
            CircuitState::Open { since } => since.elapsed() >= self.config.circuit_breaker_cooldown,
            CircuitState::HalfOpen => false,
        };
        if !cooled_down {
            return Err(FailureCause::CircuitOpen.into());
        }
        info!("circuit breaker half-open, admitting trial request");
        *state = CircuitState::HalfOpen;
        Ok(())
    }

    /// Between retries of an admitted call: stop if another call opened the
    /// circuit meanwhile.
    fn ensure_not_open(&self) -> Result<(), GatewayError> {
        match &*self.circuit_state.read() {
            CircuitState::Open { .. } => Err(FailureCause::CircuitOpen.into()),
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        }
    }

    /// The trial ended without reaching the provider; let the next caller try.
    fn release_trial(&self) {
        let mut state = self.circuit_state.write();
        if *state == CircuitState::HalfOpen {
            let since = Instant::now()
                .checked_sub(self.config.circuit_breaker_cooldown)
                .unwrap_or_else(Instant::now);
            *state = CircuitState::Open { since };
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.circuit_state.write();
        if *state != CircuitState::Closed {
            info!("circuit breaker closed after successful request");
            *state = CircuitState::Closed;
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.config.circuit_breaker_threshold {
            let mut state = self.circuit_state.write();
            if *state == CircuitState::Closed || *state == CircuitState::HalfOpen {
                warn!(
                    failures,
                    cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                    "circuit breaker opened"
                );
                *state = CircuitState::Open {
                    since: Instant::now(),
                };
            }
        }
    }

    /// Exponential backoff with jitter, or the server's hint when it sent one.
    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay.min(self.config.max_delay);
        }

        let exp_delay = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_delay.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        match &*self.circuit_state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[async_trait]
impl<G: ModelGateway> ModelGateway for ReliableGateway<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn generate(&self, conversation: &[Turn]) -> Result<String, GatewayError> {
        self.check_circuit()?;

        let mut attempt = 0;
        loop {
            let cause = match self.inner.generate(conversation).await {
                Ok(reply) => {
                    self.record_success();
                    return Ok(reply);
                }
                Err(e @ GatewayError::InvalidHistory(_)) => {
                    self.release_trial();
                    return Err(e);
                }
                Err(GatewayError::GenerationFailed(cause)) => cause,
            };

            if !cause.is_retryable() || attempt >= self.config.max_retries {
                self.record_failure();
                return Err(cause.into());
            }

            let delay = self.retry_delay(attempt, cause.suggested_delay());
            self.total_retries.fetch_add(1, Ordering::Relaxed);
            attempt += 1;

            warn!(
                attempt,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %cause,
                "retrying generation after error"
            );

            tokio::time::sleep(delay).await;
            self.ensure_not_open()?;
        }
    }
}
