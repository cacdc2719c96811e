use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{AttendancePhase, SessionState};

pub const HOUR_MS: u64 = 60 * 60 * 1000;
pub const DEFAULT_TARGET_WORK_MS: u64 = 8 * HOUR_MS;
pub const DEFAULT_TARGET_GROSS_MS: u64 = 9 * HOUR_MS;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Durations {
    /// Wall time since clock-in, breaks included.
    pub gross_elapsed_ms: u64,
    pub worked_ms: u64,
    /// Closed breaks plus the currently open one.
    pub break_ms: u64,
}

impl Durations {
    pub fn gross_hms(&self) -> String {
        format_hms(clamp_to_i64(self.gross_elapsed_ms))
    }

    pub fn worked_hms(&self) -> String {
        format_hms(clamp_to_i64(self.worked_ms))
    }

    pub fn break_hms(&self) -> String {
        format_hms(clamp_to_i64(self.break_ms))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressTargets {
    pub target_work_ms: u64,
    pub target_gross_ms: u64,
}

impl Default for ProgressTargets {
    fn default() -> Self {
        Self {
            target_work_ms: DEFAULT_TARGET_WORK_MS,
            target_gross_ms: DEFAULT_TARGET_GROSS_MS,
        }
    }
}

/// Fractions of the daily targets, each capped at 1.0.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub work: f64,
    pub gross: f64,
}

impl Progress {
    pub fn work_percent(&self) -> u8 {
        to_percent(self.work)
    }

    pub fn gross_percent(&self) -> u8 {
        to_percent(self.gross)
    }
}

/// Milliseconds from `from` to `to`, zero when `to` is earlier.
pub fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}

pub fn derive_durations(state: &SessionState, now: DateTime<Utc>) -> Durations {
    if state.phase() == AttendancePhase::Idle {
        return Durations::default();
    }
    let Some(started_at) = state.started_at() else {
        return Durations::default();
    };

    let gross_elapsed_ms = elapsed_ms(started_at, now);
    let open_break_ms = match (state.phase(), state.break_started_at()) {
        (AttendancePhase::OnBreak, Some(break_started_at)) => elapsed_ms(break_started_at, now),
        _ => 0,
    };
    let break_ms = state.accumulated_break_ms().saturating_add(open_break_ms);

    Durations {
        gross_elapsed_ms,
        worked_ms: gross_elapsed_ms.saturating_sub(break_ms),
        break_ms,
    }
}

pub fn progress(durations: &Durations, targets: &ProgressTargets) -> Progress {
    Progress {
        work: ratio(durations.worked_ms, targets.target_work_ms),
        gross: ratio(durations.gross_elapsed_ms, targets.target_gross_ms),
    }
}

/// Renders milliseconds as `HH:MM:SS`. Hours do not wrap at 24.
pub fn format_hms(ms: i64) -> String {
    let total_secs = ms.max(0) / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

fn ratio(value: u64, target: u64) -> f64 {
    if target == 0 {
        return 0.0;
    }
    (value as f64 / target as f64).min(1.0)
}

fn to_percent(ratio: f64) -> u8 {
    (ratio.clamp(0.0, 1.0) * 100.0).round() as u8
}

fn clamp_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
