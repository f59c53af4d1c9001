//! Per-ET-date in-memory session for the Position Monitor
//! (`spec.md` §4.5): aggregates routine checks so only alerts or errors
//! become durable `JobRun`s.

use chrono::NaiveDate;
use std::sync::Mutex;

/// Counters for one ET calendar day's worth of Position Monitor ticks.
#[derive(Debug, Clone, Default)]
pub struct MonitorSessionState {
    /// How many ticks have completed today.
    pub checks_completed: u32,
    /// ET date string of the last completed check, `YYYY-MM-DD`.
    pub last_check_date: Option<NaiveDate>,
    /// How many open positions were examined across all ticks today.
    pub positions_monitored: u32,
    /// How many sustained-breach closes fired today.
    pub alerts_triggered: u32,
    /// Error messages observed today.
    pub errors: Vec<String>,
}

/// Holds the current day's [`MonitorSessionState`], resetting at ET
/// midnight rollover.
#[derive(Debug, Default)]
pub struct MonitorSession {
    state: Mutex<MonitorSessionState>,
}

impl MonitorSession {
    /// A fresh session with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed tick, rolling the counters over if `today` is
    /// a new ET calendar day from the last recorded check.
    pub fn record_tick(&self, today: NaiveDate, positions_examined: u32, alert_triggered: bool, error: Option<String>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.last_check_date != Some(today) {
            *state = MonitorSessionState::default();
        }
        state.checks_completed += 1;
        state.last_check_date = Some(today);
        state.positions_monitored += positions_examined;
        if alert_triggered {
            state.alerts_triggered += 1;
        }
        if let Some(err) = error {
            state.errors.push(err);
        }
    }

    /// A snapshot of today's counters.
    pub fn snapshot(&self) -> MonitorSessionState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
