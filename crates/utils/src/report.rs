use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Progress callback: `(task_id, percent, message)`.
pub type ProgressFn = dyn Fn(u64, u8, &str) + Send + Sync;

static PROGRESS: RwLock<Option<Arc<ProgressFn>>> = RwLock::new(None);
static TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Install a process-wide progress callback. Passing `None` disables
/// progress reporting (the default).
pub fn init_prog_reporting(f: Option<Arc<ProgressFn>>) {
    // Lock poisoning only happens if a callback panicked; recover the slot.
    let mut slot = PROGRESS.write().unwrap_or_else(|e| e.into_inner());
    *slot = f;
}

/// Whether a progress callback is installed. Gates opt-in progress arguments
/// for tools that support them (e.g. `e2fsck -C 1`).
pub fn prog_reporting_initialized() -> bool {
    PROGRESS
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .is_some()
}

/// Allocate the next task id.
pub fn get_next_task_id() -> u64 {
    TASK_ID.fetch_add(1, Ordering::Relaxed)
}

fn emit(id: u64, pct: u8, msg: &str) {
    let slot = PROGRESS.read().unwrap_or_else(|e| e.into_inner());
    if let Some(f) = slot.as_ref() {
        f(id, pct, msg);
    }
}

/// Report a new long-running task; returns its progress id.
pub fn report_started(msg: &str) -> u64 {
    let id = get_next_task_id();
    tracing::debug!(task = id, "{msg}");
    emit(id, 0, msg);
    id
}

/// Report progress of a task started with [`report_started`].
pub fn report_progress(id: u64, pct: u8, msg: Option<&str>) {
    emit(id, pct.min(100), msg.unwrap_or(""));
}

/// Report completion of a task started with [`report_started`].
pub fn report_finished(id: u64, msg: &str) {
    tracing::debug!(task = id, "{msg}");
    emit(id, 100, msg);
}

/// Log a status message attached to a task id.
pub fn log_task_status(id: u64, msg: &str) {
    tracing::debug!(task = id, "{msg}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_task_ids_are_monotonic() {
        let a = get_next_task_id();
        let b = get_next_task_id();
        assert!(b > a);
    }

    #[test]
    fn test_reporting_roundtrip() {
        let seen: Arc<Mutex<Vec<(u64, u8, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        init_prog_reporting(Some(Arc::new(move |id, pct, msg| {
            sink.lock().unwrap().push((id, pct, msg.to_string()));
        })));
        assert!(prog_reporting_initialized());

        let id = report_started("Started wiping");
        report_progress(id, 42, None);
        report_finished(id, "Completed");
        init_prog_reporting(None);
        assert!(!prog_reporting_initialized());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], (id, 0, "Started wiping".to_string()));
        assert_eq!(seen[1], (id, 42, String::new()));
        assert_eq!(seen[2], (id, 100, "Completed".to_string()));
    }
}
