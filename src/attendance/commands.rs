use std::str::FromStr;

use anyhow::{anyhow, Error};

use super::{
    controller::{AttendanceController, AttendanceSnapshot, ClockOutIntent},
    durations::Durations,
    state::{AttendancePhase, ShiftSummary},
    ticker::ViewGuard,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCommand {
    ClockIn,
    StartBreak,
    Resume,
    ClockOut,
    Confirm,
    Cancel,
    Status,
    Quit,
}

impl FromStr for DriverCommand {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "in" | "clock-in" => Ok(DriverCommand::ClockIn),
            "break" | "pause" => Ok(DriverCommand::StartBreak),
            "resume" => Ok(DriverCommand::Resume),
            "out" | "clock-out" | "stop" => Ok(DriverCommand::ClockOut),
            "yes" | "y" => Ok(DriverCommand::Confirm),
            "no" | "n" => Ok(DriverCommand::Cancel),
            "status" | "" => Ok(DriverCommand::Status),
            "quit" | "exit" => Ok(DriverCommand::Quit),
            other => Err(anyhow!("unknown command '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Reply(String),
    Quit,
}

/// Terminal stand-in for the attendance widget: holds the pending clock-out
/// confirmation and keeps a live view mounted while clocked in.
pub struct CommandSession {
    controller: AttendanceController,
    pending: Option<ClockOutIntent>,
    view: Option<ViewGuard>,
}

impl CommandSession {
    pub fn new(controller: AttendanceController) -> Self {
        Self {
            controller,
            pending: None,
            view: None,
        }
    }

    pub fn has_pending_clock_out(&self) -> bool {
        self.pending.is_some()
    }

    pub fn execute(&mut self, command: DriverCommand) -> CommandOutcome {
        let reply = match command {
            DriverCommand::ClockIn => match self.controller.clock_in() {
                Some(_) => "Clocked in.".to_string(),
                None => self.unavailable("Clock in"),
            },
            DriverCommand::StartBreak => match self.controller.start_break() {
                Some(_) => "Break started.".to_string(),
                None => self.unavailable("Break"),
            },
            DriverCommand::Resume => match self.controller.resume() {
                Some(_) => "Back to work.".to_string(),
                None => self.unavailable("Resume"),
            },
            DriverCommand::ClockOut => match self.controller.request_clock_out() {
                Some(intent) => {
                    let preview = *intent.preview();
                    self.pending = Some(intent);
                    format!(
                        "Clock out for the day after {} worked? (yes/no)",
                        preview.worked_hms()
                    )
                }
                None => self.unavailable("Clock out"),
            },
            DriverCommand::Confirm => match self.pending.take() {
                Some(intent) => match self.controller.confirm_clock_out(intent) {
                    Some(summary) => describe_summary(&summary),
                    None => "That clock-out request has expired.".to_string(),
                },
                None => "Nothing to confirm.".to_string(),
            },
            DriverCommand::Cancel => match self.pending.take() {
                Some(_) => "Still clocked in.".to_string(),
                None => "Nothing to cancel.".to_string(),
            },
            DriverCommand::Status => describe_snapshot(&self.controller.snapshot()),
            DriverCommand::Quit => {
                self.view = None;
                return CommandOutcome::Quit;
            }
        };

        self.sync_view();
        CommandOutcome::Reply(reply)
    }

    fn sync_view(&mut self) {
        let clocked_in = !self.controller.current_state().is_idle();
        match (clocked_in, self.view.is_some()) {
            (true, false) => self.view = Some(self.controller.mount_view()),
            (false, true) => self.view = None,
            _ => {}
        }
    }

    fn unavailable(&self, action: &str) -> String {
        let phase = self.controller.current_state().phase();
        format!("{action} is not available while {}.", phase_label(phase))
    }
}

pub fn phase_label(phase: AttendancePhase) -> &'static str {
    match phase {
        AttendancePhase::Idle => "clocked out",
        AttendancePhase::Working => "working",
        AttendancePhase::OnBreak => "on break",
    }
}

pub fn describe_snapshot(snapshot: &AttendanceSnapshot) -> String {
    format!(
        "[{} {}] {} | worked {} ({}% of target) | gross {} ({}%) | break {}",
        snapshot.date_label,
        snapshot.wall_clock,
        phase_label(snapshot.state.phase()),
        snapshot.worked,
        snapshot.work_percent,
        snapshot.gross,
        snapshot.gross_percent,
        snapshot.on_break
    )
}

pub fn describe_summary(summary: &ShiftSummary) -> String {
    let durations = Durations {
        gross_elapsed_ms: summary.gross_elapsed_ms,
        worked_ms: summary.worked_ms,
        break_ms: summary.break_ms,
    };
    format!(
        "Clocked out successfully. Worked {}, break {}, gross {}.",
        durations.worked_hms(),
        durations.break_hms(),
        durations.gross_hms()
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{attendance::clock::FixedClock, settings::AttendanceSettings};

    fn session() -> (CommandSession, AttendanceController, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(),
        ));
        let controller =
            AttendanceController::with_clock(&AttendanceSettings::default(), clock.clone());
        (CommandSession::new(controller.clone()), controller, clock)
    }

    #[test]
    fn parses_aliases() {
        assert_eq!("IN".parse::<DriverCommand>().unwrap(), DriverCommand::ClockIn);
        assert_eq!(" pause ".parse::<DriverCommand>().unwrap(), DriverCommand::StartBreak);
        assert_eq!("y".parse::<DriverCommand>().unwrap(), DriverCommand::Confirm);
        assert_eq!("".parse::<DriverCommand>().unwrap(), DriverCommand::Status);
        assert!("lunch".parse::<DriverCommand>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn clock_out_needs_confirmation() {
        let (mut session, controller, clock) = session();

        session.execute(DriverCommand::ClockIn);
        assert!(controller.is_ticking());
        clock.advance(Duration::seconds(65));

        let outcome = session.execute(DriverCommand::ClockOut);
        assert_eq!(
            outcome,
            CommandOutcome::Reply("Clock out for the day after 00:01:05 worked? (yes/no)".into())
        );
        assert!(session.has_pending_clock_out());
        assert_eq!(controller.current_state().phase(), AttendancePhase::Working);

        session.execute(DriverCommand::Cancel);
        assert!(!session.has_pending_clock_out());
        assert_eq!(controller.current_state().phase(), AttendancePhase::Working);

        session.execute(DriverCommand::ClockOut);
        let outcome = session.execute(DriverCommand::Confirm);
        assert_eq!(
            outcome,
            CommandOutcome::Reply(
                "Clocked out successfully. Worked 00:01:05, break 00:00:00, gross 00:01:05."
                    .into()
            )
        );
        assert!(controller.current_state().is_idle());
        assert!(!controller.is_ticking());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_actions_get_a_hint() {
        let (mut session, controller, _) = session();

        let outcome = session.execute(DriverCommand::Resume);
        assert_eq!(
            outcome,
            CommandOutcome::Reply("Resume is not available while clocked out.".into())
        );
        assert!(controller.current_state().is_idle());
        assert!(!controller.is_ticking());
        assert_eq!(
            session.execute(DriverCommand::Confirm),
            CommandOutcome::Reply("Nothing to confirm.".into())
        );
        assert_eq!(session.execute(DriverCommand::Quit), CommandOutcome::Quit);
    }
}
