//! Session lifecycle state shared between the bridge's tasks

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

/// Sentinel stored while no exit status is known
const NO_EXIT: i32 = i32::MIN;

/// Immutable snapshot of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub running: bool,
    pub started: bool,
    pub exit_status: Option<i32>,
    pub clipboard_available: bool,
    pub events_delivered: u64,
}

impl SessionSnapshot {
    /// Returns whether the host should stop driving the session
    pub fn should_quit(&self) -> bool {
        !self.running
    }
}

/// Thread-safe session state, updated by the bridge as messages arrive
#[derive(Debug)]
pub struct SessionState {
    running: AtomicBool,
    started: AtomicBool,
    exit_status: AtomicI32,
    clipboard_available: AtomicBool,
    events_delivered: AtomicU64,
}

impl SessionState {
    pub fn new(clipboard_available: bool) -> Self {
        Self {
            running: AtomicBool::new(true),
            started: AtomicBool::new(false),
            exit_status: AtomicI32::new(NO_EXIT),
            clipboard_available: AtomicBool::new(clipboard_available),
            events_delivered: AtomicU64::new(0),
        }
    }

    /// Take a consistent snapshot of the current state
    pub fn snapshot(&self) -> SessionSnapshot {
        let exit = self.exit_status.load(Ordering::Acquire);
        SessionSnapshot {
            running: self.running.load(Ordering::Acquire),
            started: self.started.load(Ordering::Acquire),
            exit_status: (exit != NO_EXIT).then_some(exit),
            clipboard_available: self.clipboard_available.load(Ordering::Acquire),
            events_delivered: self.events_delivered.load(Ordering::Acquire),
        }
    }

    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    /// Records a clean exit and stops the session
    pub fn mark_exited(&self, status: i32) {
        self.exit_status.store(status, Ordering::Release);
        self.quit();
    }

    pub fn mark_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::AcqRel);
    }

    pub fn set_clipboard_available(&self, available: bool) {
        self.clipboard_available.store(available, Ordering::Release);
    }

    /// Signal the session to stop
    pub fn quit(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Check if the session is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_state_lifecycle() {
        let state = SessionState::default();

        assert!(state.is_running());
        let snapshot = state.snapshot();
        assert!(!snapshot.should_quit());
        assert_eq!(snapshot.exit_status, None);
        assert!(!snapshot.started);

        state.mark_started();
        state.mark_delivered();
        state.mark_delivered();
        state.mark_exited(3);

        let snapshot = state.snapshot();
        assert!(snapshot.should_quit());
        assert!(snapshot.started);
        assert_eq!(snapshot.exit_status, Some(3));
        assert_eq!(snapshot.events_delivered, 2);
    }

    #[test]
    fn test_quit_without_exit_status() {
        let state = SessionState::new(false);
        state.quit();

        let snapshot = state.snapshot();
        assert!(!snapshot.running);
        assert_eq!(snapshot.exit_status, None);
        assert!(!snapshot.clipboard_available);
    }
}
