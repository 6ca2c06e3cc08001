//! Simulated wall clock for a harness run.
//!
//! Time only moves when the harness says so: every executed tool call costs
//! a number of simulated minutes looked up in the scenario's cost table.
//! The clock is independent of real time and deterministic for a given
//! action sequence, start instant and cost table.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use tracing::warn;

use trainee_config::ClockConfig;

/// Default rendering used in transcript time reports.
pub const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Cost charged for an action missing from the cost table.
pub const DEFAULT_ACTION_COST: i64 = 1;

/// Monotonic simulated clock.
///
/// Shared as `Arc<VirtualClock>` between the dispatch loop, which advances
/// it, and the backend servers, which read it.  None of the methods fail.
#[derive(Debug)]
pub struct VirtualClock {
    now: Mutex<NaiveDateTime>,
    action_costs: BTreeMap<String, i64>,
    time_scale: f64,
}

impl VirtualClock {
    /// Build a clock from the scenario's `clock_config`.  An absent or
    /// unparsable `start_datetime` starts the clock at the local time.
    pub fn new(config: &ClockConfig) -> Self {
        let start = match config.start_datetime.as_deref() {
            Some(raw) => parse_datetime(raw).unwrap_or_else(|| {
                warn!(start_datetime = raw, "unparsable start_datetime, using local time");
                Local::now().naive_local()
            }),
            None => Local::now().naive_local(),
        };
        Self::starting_at(start, config.action_costs.clone(), config.time_scale)
    }

    pub fn starting_at(
        start: NaiveDateTime,
        action_costs: BTreeMap<String, i64>,
        time_scale: f64,
    ) -> Self {
        Self {
            now: Mutex::new(start),
            action_costs,
            time_scale,
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        *self.lock()
    }

    pub fn now_str(&self, fmt: &str) -> String {
        self.now().format(fmt).to_string()
    }

    /// `now_str(DEFAULT_FORMAT)`.
    pub fn format(&self) -> String {
        self.now_str(DEFAULT_FORMAT)
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Advance by `minutes` of raw cost.
    ///
    /// The cost is multiplied by `time_scale`; a positive result is rounded
    /// up to whole minutes with a floor of one minute.  Zero, negative and
    /// non-finite results leave the clock untouched, as does a step that
    /// would overflow the calendar.
    pub fn advance_minutes(&self, minutes: f64) {
        let Some(step) = quantize(minutes * self.time_scale) else {
            return;
        };
        let mut now = self.lock();
        if let Some(next) = now.checked_add_signed(step) {
            *now = next;
        }
    }

    /// Charge the cost of a named action.
    ///
    /// The table cost is scaled here and scaled again inside
    /// [`advance_minutes`](Self::advance_minutes), so the effective
    /// multiplier is `time_scale²`.
    pub fn advance_for_action(&self, action_name: &str) {
        let cost = self.action_cost(action_name) as f64 * self.time_scale;
        self.advance_minutes(cost);
    }

    /// Move forward to `instant`.  Earlier instants are ignored.
    pub fn advance_to(&self, instant: NaiveDateTime) {
        let mut now = self.lock();
        if instant > *now {
            *now = instant;
        }
    }

    pub fn action_cost(&self, action_name: &str) -> i64 {
        self.action_costs
            .get(action_name)
            .copied()
            .unwrap_or(DEFAULT_ACTION_COST)
    }

    fn lock(&self) -> MutexGuard<'_, NaiveDateTime> {
        self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whole-minute step for a scaled cost, or `None` for no movement.
fn quantize(scaled: f64) -> Option<Duration> {
    if !scaled.is_finite() || scaled <= 0.0 {
        return None;
    }
    let minutes = scaled.ceil().max(1.0);
    if minutes > i64::MAX as f64 {
        return None;
    }
    Duration::try_minutes(minutes as i64)
}

/// Parse the timestamp shapes accepted in scenario files: ISO-8601 with a
/// space or `T` separator, with or without seconds, or a bare date.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    let raw = raw.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// ── Tests ────────────────────────────────────────────────────────────────────
