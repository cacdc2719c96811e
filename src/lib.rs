pub mod attendance;
pub mod settings;
mod utils;

use std::{io::Write, path::PathBuf};

use anyhow::{Context, Result};
use attendance::{
    commands::{describe_snapshot, CommandOutcome, CommandSession, DriverCommand},
    AttendanceController, AttendanceEvent,
};
use log::info;
use settings::SettingsStore;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};

// Set to true to log driver-level diagnostics
const ENABLE_LOGS: bool = true;

const HELP: &str = "commands: in | break | resume | out | yes | no | status | quit";

pub(crate) struct AppState {
    pub(crate) attendance: AttendanceController,
    pub(crate) settings: SettingsStore,
}

pub fn run() -> Result<()> {
    // RUST_LOG overrides the default level
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Attendance tracker starting up...");

    let data_dir = std::env::var_os("ATTENDANCE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let state = AppState {
        attendance: AttendanceController::new(&settings.settings()),
        settings,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    runtime.block_on(drive(state))
}

async fn drive(state: AppState) -> Result<()> {
    let current = state.settings.settings();
    info!(
        "Daily targets: {}h worked, {}h gross; refreshing every {}ms",
        current.target_work_hours, current.target_gross_hours, current.tick_interval_ms
    );

    let mut events = state.attendance.subscribe();
    let printer = tokio::spawn(async move {
        let mut stdout_failed = false;
        loop {
            match events.recv().await {
                Ok(AttendanceEvent::Tick { snapshot, .. }) => {
                    let line = describe_snapshot(&snapshot);
                    if let Err(err) = write_status(&mut std::io::stdout(), &line) {
                        if !stdout_failed {
                            crate::log_warn!("Failed to write live status: {err}");
                            stdout_failed = true;
                        }
                    }
                }
                Ok(AttendanceEvent::ClockedOut { summary }) => {
                    crate::log_debug!("session {} closed", summary.session_id);
                }
                Ok(AttendanceEvent::StateChanged { .. }) => println!(),
                Err(RecvError::Lagged(skipped)) => {
                    crate::log_warn!("display fell behind by {skipped} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("{HELP}");

    let mut session = CommandSession::new(state.attendance.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let command = match line.parse::<DriverCommand>() {
            Ok(command) => command,
            Err(err) => {
                println!("{err}. {HELP}");
                continue;
            }
        };

        match session.execute(command) {
            CommandOutcome::Reply(message) => println!("{message}"),
            CommandOutcome::Quit => break,
        }
    }

    drop(session);
    printer.abort();
    info!("Attendance tracker shutting down");
    Ok(())
}

/// Redraws the live status line in place.
fn write_status(out: &mut impl Write, line: &str) -> std::io::Result<()> {
    write!(out, "\r{line}")?;
    out.flush()
}
