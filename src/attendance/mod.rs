pub mod clock;
pub mod commands;
pub mod controller;
pub mod durations;
pub mod state;
pub mod ticker;

pub use clock::{Clock, FixedClock, MonotonicClock};
pub use controller::{AttendanceController, AttendanceEvent, AttendanceSnapshot, ClockOutIntent};
pub use durations::{derive_durations, format_hms, Durations, Progress, ProgressTargets};
pub use state::{AttendanceAction, AttendancePhase, SessionState, ShiftSummary, Transition};
pub use ticker::{TickSource, ViewGuard};
