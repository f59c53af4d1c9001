//! Reconnect backoff for the WS streamer.
//!
//! Generalized from the teacher's `BrokerState`/`StateTransition` actor
//! state machine: the shape (an enum of connection phases plus an
//! `ErrorRecovery` phase carrying an attempt counter and jittered backoff
//! config) carries over unchanged; the phases themselves are renamed to
//! match the streamer's own lifecycle (`spec.md` §4.2/§5).

use std::time::{Duration, Instant};

/// Exponential backoff parameters (`spec.md` §4.2: base 1s, double each
/// attempt, cap 30s).
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Base delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Jitter as a percentage of the computed delay.
    pub jitter_percent: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_percent: 20,
        }
    }
}

/// Connection lifecycle phase of the WS streamer.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionPhase {
    /// No socket; nothing in flight.
    Disconnected,
    /// Dial in progress.
    Connecting,
    /// Socket open, session frame sent, awaiting `sts.authenticated`.
    Authenticating,
    /// Authenticated and (re)subscribed.
    Streaming {
        /// When streaming began, for diagnostics.
        since: Instant,
    },
    /// Disconnected, waiting out a backoff window before the next dial.
    ErrorRecovery {
        /// Attempts made within the current 5-minute window.
        attempt: u32,
        /// When the current window started.
        window_start: Instant,
        /// When the next attempt is due.
        next_retry: Instant,
        /// Backoff parameters in effect.
        config: BackoffConfig,
    },
}

/// `spec.md` §4.2: maximum attempts per 5-minute window before the
/// window (and the counter) resets.
pub const MAX_ATTEMPTS_PER_WINDOW: u32 = 10;
const WINDOW: Duration = Duration::from_secs(300);

impl ConnectionPhase {
    /// Enter error recovery after a failed connect or an authentication
    /// failure, computing the next retry time. If the prior window has
    /// expired, the attempt counter resets (`spec.md` §4.2).
    pub fn record_failure(&self, now: Instant) -> ConnectionPhase {
        let (attempt, window_start) = match self {
            ConnectionPhase::ErrorRecovery {
                attempt,
                window_start,
                ..
            } if now.duration_since(*window_start) < WINDOW => (attempt + 1, *window_start),
            _ => (1, now),
        };
        let config = BackoffConfig::default();
        let delay = Self::compute_delay(attempt, &config);
        ConnectionPhase::ErrorRecovery {
            attempt,
            window_start,
            next_retry: now + delay,
            config,
        }
    }

    /// Whether the caller has exhausted attempts for the current window.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, ConnectionPhase::ErrorRecovery { attempt, .. } if *attempt > MAX_ATTEMPTS_PER_WINDOW)
    }

    fn compute_delay(attempt: u32, config: &BackoffConfig) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let base = config
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(config.max_delay_ms);
        let jitter_range = (base * config.jitter_percent as u64) / 100;
        Duration::from_millis(apply_jitter(base, jitter_range, config.max_delay_ms))
    }
}

fn apply_jitter(delay_ms: u64, jitter_range: u64, max_delay_ms: u64) -> u64 {
    if jitter_range == 0 {
        return delay_ms.min(max_delay_ms);
    }
    let offset = rand::random_range(0..=jitter_range * 2) as i64 - jitter_range as i64;
    let jittered = if offset < 0 {
        delay_ms.saturating_sub((-offset) as u64)
    } else {
        delay_ms.saturating_add(offset as u64)
    };
    jittered.clamp(100, max_delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_starts_at_attempt_one() {
        let phase = ConnectionPhase::Disconnected.record_failure(Instant::now());
        match phase {
            ConnectionPhase::ErrorRecovery { attempt, .. } => assert_eq!(attempt, 1),
            other => panic!("expected ErrorRecovery, got {other:?}"),
        }
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let now = Instant::now();
        let mut phase = ConnectionPhase::Disconnected.record_failure(now);
        for _ in 0..MAX_ATTEMPTS_PER_WINDOW {
            phase = phase.record_failure(now);
        }
        assert!(phase.is_exhausted());
    }

    #[test]
    fn window_reset_after_five_minutes() {
        let now = Instant::now();
        let phase = ConnectionPhase::ErrorRecovery {
            attempt: MAX_ATTEMPTS_PER_WINDOW + 1,
            window_start: now - Duration::from_secs(301),
            next_retry: now,
            config: BackoffConfig::default(),
        };
        let after = phase.record_failure(now);
        match after {
            ConnectionPhase::ErrorRecovery { attempt, .. } => assert_eq!(attempt, 1),
            other => panic!("expected ErrorRecovery, got {other:?}"),
        }
    }
}
