use anyhow::{bail, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::durations::{derive_durations, elapsed_ms};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AttendancePhase {
    Idle,
    Working,
    OnBreak,
}

impl Default for AttendancePhase {
    fn default() -> Self {
        AttendancePhase::Idle
    }
}

impl AttendancePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendancePhase::Idle => "Idle",
            AttendancePhase::Working => "Working",
            AttendancePhase::OnBreak => "OnBreak",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceAction {
    ClockIn,
    StartBreak,
    Resume,
    ClockOut,
}

/// A committed phase change. Only produced when the action was valid for the
/// phase it was applied to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub action: AttendanceAction,
    pub from: AttendancePhase,
    pub to: AttendancePhase,
    pub at: DateTime<Utc>,
}

/// What a session amounted to, measured at the clock-out instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShiftSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub gross_elapsed_ms: u64,
    pub worked_ms: u64,
    pub break_ms: u64,
}

/// One workday's attendance session.
///
/// Fields are only reachable through the transition methods, which keep
/// `started_at`/`session_id` set exactly while clocked in and
/// `break_started_at` set exactly while on break. Deserialization checks the
/// same rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", try_from = "RawSessionState")]
pub struct SessionState {
    phase: AttendancePhase,
    session_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    break_started_at: Option<DateTime<Utc>>,
    /// Sum of closed break intervals; the open one is derived from
    /// `break_started_at`.
    accumulated_break_ms: u64,
}

/// Unchecked wire form of [`SessionState`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSessionState {
    phase: AttendancePhase,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    break_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    accumulated_break_ms: u64,
}

impl TryFrom<RawSessionState> for SessionState {
    type Error = Error;

    fn try_from(raw: RawSessionState) -> Result<Self, Self::Error> {
        let clocked_in = raw.phase != AttendancePhase::Idle;
        let on_break = raw.phase == AttendancePhase::OnBreak;

        if raw.started_at.is_some() != clocked_in || raw.session_id.is_some() != clocked_in {
            bail!(
                "phase {} does not match startedAt/sessionId",
                raw.phase.as_str()
            );
        }
        if raw.break_started_at.is_some() != on_break {
            bail!("phase {} does not match breakStartedAt", raw.phase.as_str());
        }
        if !clocked_in && raw.accumulated_break_ms != 0 {
            bail!("idle session carries {}ms of break", raw.accumulated_break_ms);
        }

        Ok(Self {
            phase: raw.phase,
            session_id: raw.session_id,
            started_at: raw.started_at,
            break_started_at: raw.break_started_at,
            accumulated_break_ms: raw.accumulated_break_ms,
        })
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: AttendancePhase::Idle,
            session_id: None,
            started_at: None,
            break_started_at: None,
            accumulated_break_ms: 0,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> AttendancePhase {
        self.phase
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn break_started_at(&self) -> Option<DateTime<Utc>> {
        self.break_started_at
    }

    pub fn accumulated_break_ms(&self) -> u64 {
        self.accumulated_break_ms
    }

    pub fn is_idle(&self) -> bool {
        self.phase == AttendancePhase::Idle
    }

    pub fn apply(&mut self, action: AttendanceAction, now: DateTime<Utc>) -> Option<Transition> {
        match action {
            AttendanceAction::ClockIn => self.clock_in(now),
            AttendanceAction::StartBreak => self.start_break(now),
            AttendanceAction::Resume => self.resume(now),
            AttendanceAction::ClockOut => self.clock_out(now).map(|(transition, _)| transition),
        }
    }

    pub fn clock_in(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        if self.phase != AttendancePhase::Idle {
            return None;
        }

        *self = Self {
            phase: AttendancePhase::Working,
            session_id: Some(Uuid::new_v4().to_string()),
            started_at: Some(now),
            break_started_at: None,
            accumulated_break_ms: 0,
        };

        Some(self.transition(AttendanceAction::ClockIn, AttendancePhase::Idle, now))
    }

    pub fn start_break(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        if self.phase != AttendancePhase::Working {
            return None;
        }

        self.break_started_at = Some(now);
        self.phase = AttendancePhase::OnBreak;
        Some(self.transition(AttendanceAction::StartBreak, AttendancePhase::Working, now))
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        if self.phase != AttendancePhase::OnBreak || self.break_started_at.is_none() {
            return None;
        }

        self.close_break(now);
        self.phase = AttendancePhase::Working;
        Some(self.transition(AttendanceAction::Resume, AttendancePhase::OnBreak, now))
    }

    /// Ends the session. Any open break is folded into the break total before
    /// the summary is measured, then every field resets.
    pub fn clock_out(&mut self, now: DateTime<Utc>) -> Option<(Transition, ShiftSummary)> {
        let from = self.phase;
        if from == AttendancePhase::Idle {
            return None;
        }
        let (Some(session_id), Some(started_at)) = (self.session_id.clone(), self.started_at)
        else {
            return None;
        };

        self.close_break(now);
        self.phase = AttendancePhase::Working;
        let durations = derive_durations(self, now);

        let summary = ShiftSummary {
            session_id,
            started_at,
            ended_at: now,
            gross_elapsed_ms: durations.gross_elapsed_ms,
            worked_ms: durations.worked_ms,
            break_ms: durations.break_ms,
        };

        *self = Self::default();
        Some((self.transition(AttendanceAction::ClockOut, from, now), summary))
    }

    fn close_break(&mut self, now: DateTime<Utc>) {
        if let Some(break_started_at) = self.break_started_at.take() {
            self.accumulated_break_ms = self
                .accumulated_break_ms
                .saturating_add(elapsed_ms(break_started_at, now));
        }
    }

    fn transition(
        &self,
        action: AttendanceAction,
        from: AttendancePhase,
        at: DateTime<Utc>,
    ) -> Transition {
        Transition {
            action,
            from,
            to: self.phase,
            at,
        }
    }
}
