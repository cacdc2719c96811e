use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::settings::AttendanceSettings;

use super::{
    clock::{Clock, MonotonicClock},
    durations::{derive_durations, progress, Durations, Progress, ProgressTargets},
    state::{SessionState, ShiftSummary, Transition},
    ticker::{TickSource, ViewGuard},
};

const EVENT_CAPACITY: usize = 64;

/// Everything a view needs to render the attendance widget at one instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSnapshot {
    pub state: SessionState,
    pub durations: Durations,
    pub progress: Progress,
    pub worked: String,
    pub gross: String,
    #[serde(rename = "break")]
    pub on_break: String,
    pub work_percent: u8,
    pub gross_percent: u8,
    /// Local 12-hour wall clock, e.g. `09:41:07 AM`.
    pub wall_clock: String,
    /// Local calendar date, e.g. `Monday, March 4, 2024`.
    pub date_label: String,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AttendanceEvent {
    StateChanged {
        transition: Transition,
        snapshot: AttendanceSnapshot,
    },
    Tick {
        tick: u32,
        snapshot: AttendanceSnapshot,
    },
    ClockedOut {
        summary: ShiftSummary,
    },
}

/// First half of the clock-out handshake. Commit it with
/// [`AttendanceController::confirm_clock_out`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClockOutIntent {
    session_id: String,
    requested_at: DateTime<Utc>,
    preview: Durations,
}

impl ClockOutIntent {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    /// Durations as they stood when the clock-out was requested.
    pub fn preview(&self) -> &Durations {
        &self.preview
    }
}

#[derive(Clone)]
pub struct AttendanceController {
    state: Arc<Mutex<SessionState>>,
    clock: Arc<dyn Clock>,
    targets: ProgressTargets,
    events: broadcast::Sender<AttendanceEvent>,
    ticker: TickSource,
}

impl AttendanceController {
    pub fn new(settings: &AttendanceSettings) -> Self {
        Self::with_clock(settings, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(settings: &AttendanceSettings, clock: Arc<dyn Clock>) -> Self {
        let debug_mode = std::env::var("ATTENDANCE_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let heartbeat_every: u32 = if debug_mode { 1 } else { 10 };

        let state = Arc::new(Mutex::new(SessionState::new()));
        let targets = settings.targets();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let ticker = {
            let state = state.clone();
            let clock = clock.clone();
            let events = events.clone();
            TickSource::new(
                settings.tick_interval(),
                Arc::new(move |tick: u32| {
                    let now = clock.now();
                    let snapshot = {
                        let guard = lock_state(&state);
                        build_snapshot(&guard, now, &targets)
                    };

                    if tick % heartbeat_every == 0 {
                        debug!(
                            "attendance heartbeat: {} worked={} break={}",
                            snapshot.state.phase().as_str(),
                            snapshot.worked,
                            snapshot.on_break
                        );
                    }

                    let _ = events.send(AttendanceEvent::Tick { tick, snapshot });
                }),
            )
        };

        info!("attendance controller ready (clock: {})", clock.name());

        Self {
            state,
            clock,
            targets,
            events,
            ticker,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AttendanceEvent> {
        self.events.subscribe()
    }

    /// Starts live ticking for as long as the returned guard is held.
    pub fn mount_view(&self) -> ViewGuard {
        self.ticker.mount()
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.is_running()
    }

    pub fn current_state(&self) -> SessionState {
        self.lock_state().clone()
    }

    pub fn derive_durations(&self) -> Durations {
        self.derive_durations_at(self.clock.now())
    }

    pub fn derive_durations_at(&self, now: DateTime<Utc>) -> Durations {
        derive_durations(&self.lock_state(), now)
    }

    pub fn snapshot(&self) -> AttendanceSnapshot {
        let now = self.clock.now();
        build_snapshot(&self.lock_state(), now, &self.targets)
    }

    pub fn clock_in(&self) -> Option<Transition> {
        self.commit("clock in", |state, now| state.clock_in(now))
    }

    pub fn start_break(&self) -> Option<Transition> {
        self.commit("start break", |state, now| state.start_break(now))
    }

    pub fn resume(&self) -> Option<Transition> {
        self.commit("resume", |state, now| state.resume(now))
    }

    pub fn request_clock_out(&self) -> Option<ClockOutIntent> {
        let now = self.clock.now();
        let guard = self.lock_state();
        let session_id = guard.session_id()?.to_string();
        Some(ClockOutIntent {
            session_id,
            requested_at: now,
            preview: derive_durations(&guard, now),
        })
    }

    /// No-op unless `confirmed`; obtaining the confirmation is the caller's job.
    pub fn clock_out(&self, confirmed: bool) -> Option<ShiftSummary> {
        if !confirmed {
            debug!("clock out ignored: not confirmed");
            return None;
        }
        self.commit_clock_out(None)
    }

    /// Commits a clock-out only if `intent` was issued for the running session.
    pub fn confirm_clock_out(&self, intent: ClockOutIntent) -> Option<ShiftSummary> {
        self.commit_clock_out(Some(&intent.session_id))
    }

    fn commit_clock_out(&self, expected_session: Option<&str>) -> Option<ShiftSummary> {
        let now = self.clock.now();

        let (transition, summary, snapshot) = {
            let mut guard = self.lock_state();
            if let Some(expected) = expected_session {
                if guard.session_id() != Some(expected) {
                    debug!("clock out ignored: intent for session {expected} is stale");
                    return None;
                }
            }

            let Some((transition, summary)) = guard.clock_out(now) else {
                debug!("clock out ignored: not clocked in");
                return None;
            };
            let snapshot = build_snapshot(&guard, now, &self.targets);
            (transition, summary, snapshot)
        };

        info!(
            "session {} clocked out: worked {}ms, break {}ms",
            summary.session_id, summary.worked_ms, summary.break_ms
        );

        self.emit(AttendanceEvent::StateChanged {
            transition,
            snapshot,
        });
        self.emit(AttendanceEvent::ClockedOut {
            summary: summary.clone(),
        });

        Some(summary)
    }

    /// Applies `apply` under the lock, then notifies subscribers once the
    /// lock is released.
    fn commit<F>(&self, label: &str, apply: F) -> Option<Transition>
    where
        F: FnOnce(&mut SessionState, DateTime<Utc>) -> Option<Transition>,
    {
        let now = self.clock.now();

        let (transition, snapshot) = {
            let mut guard = self.lock_state();
            let phase = guard.phase();
            let Some(transition) = apply(&mut *guard, now) else {
                debug!("{label} ignored in phase {}", phase.as_str());
                return None;
            };
            let snapshot = build_snapshot(&guard, now, &self.targets);
            (transition, snapshot)
        };

        info!(
            "attendance {} -> {}",
            transition.from.as_str(),
            transition.to.as_str()
        );

        self.emit(AttendanceEvent::StateChanged {
            transition: transition.clone(),
            snapshot,
        });

        Some(transition)
    }

    fn emit(&self, event: AttendanceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn build_snapshot(
    state: &SessionState,
    now: DateTime<Utc>,
    targets: &ProgressTargets,
) -> AttendanceSnapshot {
    let durations = derive_durations(state, now);
    let progress = progress(&durations, targets);
    let local = now.with_timezone(&Local);

    AttendanceSnapshot {
        state: state.clone(),
        worked: durations.worked_hms(),
        gross: durations.gross_hms(),
        on_break: durations.break_hms(),
        work_percent: progress.work_percent(),
        gross_percent: progress.gross_percent(),
        wall_clock: local.format("%I:%M:%S %p").to_string(),
        date_label: local.format("%A, %B %-d, %Y").to_string(),
        taken_at: now,
        durations,
        progress,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::attendance::{clock::FixedClock, state::AttendancePhase};

    fn fixture() -> (AttendanceController, Arc<FixedClock>, DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(start));
        let controller =
            AttendanceController::with_clock(&AttendanceSettings::default(), clock.clone());
        (controller, clock, start)
    }

    #[test]
    fn full_day_round_trip() {
        let (controller, clock, _) = fixture();

        controller.clock_in().unwrap();
        clock.advance(Duration::seconds(1));
        controller.start_break().unwrap();
        clock.advance(Duration::seconds(3));
        controller.resume().unwrap();
        clock.advance(Duration::seconds(6));

        assert_eq!(controller.current_state().accumulated_break_ms(), 3_000);
        assert_eq!(controller.derive_durations().worked_ms, 7_000);

        let summary = controller.clock_out(true).unwrap();
        assert_eq!(summary.break_ms, 3_000);
        assert_eq!(summary.worked_ms, 7_000);
        assert_eq!(controller.current_state(), SessionState::default());
    }

    #[test]
    fn unconfirmed_clock_out_keeps_working() {
        let (controller, clock, _) = fixture();
        controller.clock_in().unwrap();
        clock.advance(Duration::seconds(30));
        let before = controller.current_state();

        assert_eq!(controller.clock_out(false), None);
        assert_eq!(controller.current_state(), before);
        assert_eq!(controller.current_state().phase(), AttendancePhase::Working);
    }

    #[test]
    fn resume_while_idle_is_ignored() {
        let (controller, _, _) = fixture();
        let mut events = controller.subscribe();

        assert_eq!(controller.resume(), None);
        assert_eq!(controller.current_state(), SessionState::default());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn snapshot_formats_live_values() {
        let (controller, clock, _) = fixture();
        controller.clock_in().unwrap();
        clock.advance(Duration::seconds(5));

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.worked, "00:00:05");
        assert_eq!(snapshot.gross, "00:00:05");
        assert_eq!(snapshot.on_break, "00:00:00");
        assert_eq!(snapshot.work_percent, 0);
        assert!(snapshot.wall_clock.ends_with("AM") || snapshot.wall_clock.ends_with("PM"));

        // 09:00 UTC falls on one of these days in every timezone.
        let candidates = [
            "Sunday, March 3, 2024",
            "Monday, March 4, 2024",
            "Tuesday, March 5, 2024",
        ];
        assert!(
            candidates.contains(&snapshot.date_label.as_str()),
            "unexpected date label {}",
            snapshot.date_label
        );
    }

    #[test]
    fn events_reload_from_json() {
        let (controller, clock, _) = fixture();
        let mut events = controller.subscribe();
        controller.clock_in().unwrap();
        clock.advance(Duration::seconds(3));
        controller.clock_out(true).unwrap();

        while let Ok(event) = events.try_recv() {
            let json = serde_json::to_string(&event).unwrap();
            let reloaded: AttendanceEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(reloaded, event);
        }

        controller.clock_in().unwrap();
        let intent = controller.request_clock_out().unwrap();
        let reloaded: ClockOutIntent =
            serde_json::from_str(&serde_json::to_string(&intent).unwrap()).unwrap();
        assert_eq!(reloaded, intent);
    }

    #[test]
    fn intent_commits_only_for_its_session() {
        let (controller, clock, _) = fixture();
        assert_eq!(controller.request_clock_out(), None);

        controller.clock_in().unwrap();
        clock.advance(Duration::minutes(10));
        let stale = controller.request_clock_out().unwrap();
        assert_eq!(stale.preview().worked_ms, 600_000);
        assert!(controller.confirm_clock_out(stale.clone()).is_some());

        controller.clock_in().unwrap();
        assert_eq!(controller.confirm_clock_out(stale), None);
        assert_eq!(controller.current_state().phase(), AttendancePhase::Working);

        let fresh = controller.request_clock_out().unwrap();
        assert!(controller.confirm_clock_out(fresh).is_some());
        assert!(controller.current_state().is_idle());
    }

    #[test]
    fn transitions_are_published_after_commit() {
        let (controller, clock, _) = fixture();
        let mut events = controller.subscribe();

        controller.clock_in().unwrap();
        clock.advance(Duration::seconds(2));
        controller.start_break().unwrap();
        clock.advance(Duration::seconds(2));
        controller.clock_out(true).unwrap();

        match events.try_recv().unwrap() {
            AttendanceEvent::StateChanged {
                transition,
                snapshot,
            } => {
                assert_eq!(transition.to, AttendancePhase::Working);
                assert_eq!(snapshot.state.phase(), AttendancePhase::Working);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            events.try_recv().unwrap(),
            AttendanceEvent::StateChanged { .. }
        ));
        match events.try_recv().unwrap() {
            AttendanceEvent::StateChanged { transition, .. } => {
                assert_eq!(transition.from, AttendancePhase::OnBreak);
                assert_eq!(transition.to, AttendancePhase::Idle);
            }
            other => panic!("unexpected event {other:?}"),
        }
        match events.try_recv().unwrap() {
            AttendanceEvent::ClockedOut { summary } => {
                assert_eq!(summary.break_ms, 2_000);
                assert_eq!(summary.worked_ms, 2_000);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_refresh_without_mutating_state() {
        let controller = AttendanceController::new(&AttendanceSettings::default());
        let mut events = controller.subscribe();
        controller.clock_in().unwrap();
        let _ = events.recv().await.unwrap();
        let before = controller.current_state();

        let view = controller.mount_view();
        assert!(controller.is_ticking());
        tokio::time::sleep(StdDuration::from_millis(2_500)).await;

        let mut last_worked = None;
        while let Ok(event) = events.try_recv() {
            if let AttendanceEvent::Tick { snapshot, .. } = event {
                last_worked = Some(snapshot.durations.worked_ms);
            }
        }
        assert_eq!(last_worked, Some(2_000));
        assert_eq!(controller.current_state(), before);

        drop(view);
        assert!(!controller.is_ticking());
        tokio::time::sleep(StdDuration::from_secs(3)).await;
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }
}
