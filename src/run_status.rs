use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared progress and cancellation handle for long-running sweeps.
#[derive(Clone, Default)]
pub struct RunStatus {
    inner: Arc<Mutex<RunStatusData>>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct RunStatusData {
    phase: String,
    total_steps: usize,
    completed_steps: usize,
}

#[derive(Clone, Debug)]
pub struct RunStatusSnapshot {
    pub phase: String,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub cancelled: bool,
}

impl RunStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_progress(&self, total_steps: usize, completed_steps: usize) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_steps = total_steps;
            data.completed_steps = completed_steps;
        }
    }

    pub fn increment_completed(&self) {
        if let Ok(mut data) = self.inner.lock() {
            data.completed_steps += 1;
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> RunStatusSnapshot {
        let cancelled = self.is_cancelled();
        if let Ok(data) = self.inner.lock() {
            RunStatusSnapshot {
                phase: data.phase.clone(),
                total_steps: data.total_steps,
                completed_steps: data.completed_steps,
                cancelled,
            }
        } else {
            RunStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_steps: 0,
                completed_steps: 0,
                cancelled,
            }
        }
    }
}
