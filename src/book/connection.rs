//! Feed connection state machine with reconnect backoff and staleness timer.
//!
//! `Disconnected → Connecting → Connected → (Error | Disconnected)`.
//!
//! The monitor holds no threads or timers of its own. The caller passes the
//! current time into every transition and calls [`ConnectionMonitor::poll`]
//! periodically; deadlines are plain timestamps, so cancelling a pending
//! reconnect is just clearing one.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::reconciler::GapInfo;

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Error => "ERROR",
        }
    }
}

/// Reconnect and staleness timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt
    pub base_delay_ms: u64,

    /// Upper bound on the un-jittered delay
    pub max_delay_ms: u64,

    /// Symmetric jitter applied to every delay (0.2 = ±20%)
    pub jitter_ratio: f64,

    /// Reconnect attempts before falling back to the synthetic feed
    pub max_attempts: u32,

    /// Silence after which a connected feed is considered stale
    pub staleness_timeout_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ratio: 0.2,
            max_attempts: 10,
            staleness_timeout_ms: 10_000,
        }
    }
}

impl BackoffConfig {
    /// Set base and maximum delay.
    pub fn with_delays(mut self, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Set the jitter ratio (clamped to [0, 1]).
    pub fn with_jitter(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    /// Set the maximum number of reconnect attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the staleness timeout.
    pub fn with_staleness_timeout(mut self, timeout_ms: u64) -> Self {
        self.staleness_timeout_ms = timeout_ms;
        self
    }

    /// Un-jittered delay for a zero-based attempt: `min(base × 2^attempt, max)`.
    pub fn nominal_delay_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Jittered delay for a zero-based attempt.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let nominal = self.nominal_delay_ms(attempt) as f64;
        if self.jitter_ratio <= 0.0 {
            return nominal as u64;
        }
        let jitter = rand::thread_rng().gen_range(-self.jitter_ratio..=self.jitter_ratio);
        (nominal * (1.0 + jitter)).max(0.0).round() as u64
    }
}

/// What the caller should do after a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconnectDecision {
    /// Wait `delay_ms`, then reconnect (signalled by `poll`)
    Retry { attempt: u32, delay_ms: u64 },
    /// Attempts exhausted; switch to the synthetic feed
    Fallback,
}

/// Timer events produced by [`ConnectionMonitor::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollEvent {
    /// Backoff elapsed; the caller should reconnect now
    Reconnect { attempt: u32 },
    /// No update within the staleness window; the caller must resync
    Stale {
        silent_ns: i64,
        decision: ReconnectDecision,
    },
}

/// Connection status exposed to status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub last_update_ns: Option<i64>,
    pub gap: Option<GapInfo>,
    pub using_fallback: bool,
    pub last_error: Option<String>,
}

/// Connection state machine.
#[derive(Debug, Clone)]
pub struct ConnectionMonitor {
    config: BackoffConfig,
    state: ConnectionState,
    attempts: u32,
    /// Pending reconnect deadline (ns); `None` = nothing scheduled
    reconnect_at_ns: Option<i64>,
    /// Last successfully applied update (ns)
    last_activity_ns: Option<i64>,
    using_fallback: bool,
    last_error: Option<String>,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl ConnectionMonitor {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            attempts: 0,
            reconnect_at_ns: None,
            last_activity_ns: None,
            using_fallback: false,
            last_error: None,
        }
    }

    #[inline]
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts since the last successful connection.
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[inline]
    pub fn using_fallback(&self) -> bool {
        self.using_fallback
    }

    #[inline]
    pub fn last_activity_ns(&self) -> Option<i64> {
        self.last_activity_ns
    }

    /// Pending reconnect deadline, if one is scheduled.
    #[inline]
    pub fn reconnect_deadline_ns(&self) -> Option<i64> {
        self.reconnect_at_ns
    }

    /// Begin connecting. Only valid from `Disconnected` or `Error`.
    ///
    /// A caller-initiated connect from `Disconnected` starts a fresh attempt
    /// budget and leaves fallback mode.
    pub fn connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Disconnected => {
                self.attempts = 0;
                self.using_fallback = false;
            }
            ConnectionState::Error => {}
            ConnectionState::Connecting | ConnectionState::Connected => return false,
        }
        self.reconnect_at_ns = None;
        self.transition(ConnectionState::Connecting);
        true
    }

    /// The transport delivered data (or reported open): we are connected.
    pub fn on_connected(&mut self, now_ns: i64) {
        self.attempts = 0;
        self.reconnect_at_ns = None;
        self.last_activity_ns = Some(now_ns);
        self.last_error = None;
        self.transition(ConnectionState::Connected);
    }

    /// Reset the staleness timer after a successfully applied update.
    pub fn record_activity(&mut self, now_ns: i64) {
        self.last_activity_ns = Some(now_ns);
    }

    /// Transport failure: enter `Error` and schedule a reconnect, or signal
    /// fallback once the attempt budget is spent.
    pub fn on_transport_error(&mut self, now_ns: i64, message: impl Into<String>) -> ReconnectDecision {
        let message = message.into();
        log::warn!("Transport error ({}): {}", self.state.name(), message);
        self.last_error = Some(message);
        self.transition(ConnectionState::Error);
        self.schedule_reconnect(now_ns)
    }

    /// Explicit disconnect; cancels any pending reconnect.
    pub fn disconnect(&mut self) {
        if self.reconnect_at_ns.take().is_some() {
            log::debug!("Cancelled pending reconnect");
        }
        self.attempts = 0;
        self.transition(ConnectionState::Disconnected);
    }

    /// Fire elapsed timers.
    ///
    /// Returns at most one event: a due reconnect takes priority over the
    /// staleness check, which only runs while `Connected`.
    pub fn poll(&mut self, now_ns: i64) -> Option<PollEvent> {
        if self.state == ConnectionState::Error {
            if let Some(deadline) = self.reconnect_at_ns {
                if now_ns >= deadline {
                    self.reconnect_at_ns = None;
                    self.transition(ConnectionState::Connecting);
                    return Some(PollEvent::Reconnect {
                        attempt: self.attempts,
                    });
                }
            }
            return None;
        }

        if self.state == ConnectionState::Connected {
            let last = self.last_activity_ns?;
            let silent_ns = now_ns.saturating_sub(last);
            let timeout_ns = (self.config.staleness_timeout_ms as i64).saturating_mul(NANOS_PER_MILLI);
            if silent_ns >= timeout_ns {
                log::warn!("Feed stale after {} ms of silence", silent_ns / NANOS_PER_MILLI);
                self.last_error = Some(format!("stale for {} ms", silent_ns / NANOS_PER_MILLI));
                self.transition(ConnectionState::Error);
                let decision = self.schedule_reconnect(now_ns);
                return Some(PollEvent::Stale { silent_ns, decision });
            }
        }

        None
    }

    /// Build a status record; the gap comes from the reconciler.
    pub fn status(&self, gap: Option<GapInfo>) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            reconnect_attempts: self.attempts,
            last_update_ns: self.last_activity_ns,
            gap,
            using_fallback: self.using_fallback,
            last_error: self.last_error.clone(),
        }
    }

    fn schedule_reconnect(&mut self, now_ns: i64) -> ReconnectDecision {
        if self.attempts >= self.config.max_attempts {
            self.reconnect_at_ns = None;
            if !self.using_fallback {
                log::error!(
                    "Reconnect attempts exhausted ({}); falling back to synthetic feed",
                    self.attempts
                );
            }
            self.using_fallback = true;
            return ReconnectDecision::Fallback;
        }

        let delay_ms = self.config.delay_ms(self.attempts);
        self.attempts += 1;
        self.reconnect_at_ns =
            Some(now_ns.saturating_add((delay_ms as i64).saturating_mul(NANOS_PER_MILLI)));

        log::info!(
            "Reconnect attempt {}/{} in {} ms",
            self.attempts,
            self.config.max_attempts,
            delay_ms
        );

        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay_ms,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            log::debug!("Connection {} -> {}", self.state.name(), next.name());
            self.state = next;
        }
    }
}
