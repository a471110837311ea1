//! Process exit with log flushing
//!
//! `std::process::exit` skips destructors, so the non-blocking file writer's
//! guard is parked here and dropped before every deliberate exit.

use std::sync::Mutex;

use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

/// Keep `guard` alive until the process ends or `exit` runs.
pub fn install_log_guard(guard: WorkerGuard) {
    if let Ok(mut slot) = LOG_GUARD.lock() {
        *slot = Some(guard);
    }
}

/// Flush the file log, then exit with `code`.
pub fn exit(code: i32) -> ! {
    let guard = match LOG_GUARD.lock() {
        Ok(mut slot) => slot.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    drop(guard);
    std::process::exit(code)
}
