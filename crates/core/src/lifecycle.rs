use std::sync::atomic::{AtomicU8, Ordering};

/// Coarse component state, advanced only by the owning component.
///
/// # Example
/// ```rust
/// use cadence_core::prelude::{Lifecycle, LifecycleState};
///
/// let lifecycle = Lifecycle::new();
/// assert_eq!(lifecycle.state(), LifecycleState::Idle);
/// assert!(lifecycle.start());
/// assert!(lifecycle.is_running());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// Constructed, worker not started.
    Idle = 0,
    /// Worker running; blocking waits may proceed.
    Running = 1,
    /// Teardown requested; every wait must return not-initialized.
    Stopping = 2,
    /// Worker joined; safe to restart.
    Stopped = 3,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => LifecycleState::Running,
            2 => LifecycleState::Stopping,
            3 => LifecycleState::Stopped,
            _ => LifecycleState::Idle,
        }
    }
}

/// Cancellation source of truth for a worker and its blocking callers.
///
/// Every bounded wait in the pipeline re-checks `is_running` immediately
/// after waking (including after a timeout) and bails out with a
/// not-initialized status otherwise. Teardown flips to `Stopping`,
/// broadcasts all condition variables, joins the worker, then marks
/// `Stopped`.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    /// New lifecycle in the `Idle` state.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Idle as u8),
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition `Idle`/`Stopped` -> `Running`. Returns false if the
    /// component was already started.
    pub fn start(&self) -> bool {
        for from in [LifecycleState::Idle, LifecycleState::Stopped] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    LifecycleState::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    /// Transition `Running` -> `Stopping`. Returns false if no worker
    /// was running (teardown is then a no-op for the caller).
    pub fn begin_stop(&self) -> bool {
        self.state
            .compare_exchange(
                LifecycleState::Running as u8,
                LifecycleState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Mark teardown complete.
    pub fn finish_stop(&self) {
        self.state
            .store(LifecycleState::Stopped as u8, Ordering::Release);
    }

    /// True only while `Running`.
    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
