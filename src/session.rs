//! Update session state shared between the engine and its observers.
//!
//! The running engine and any monitoring task see the same
//! [`SharedSession`]. The cell is owned by the caller and borrowed by the
//! manager, so independent engine instances (and their tests) never share
//! state through globals. Progress callbacks are invoked outside the lock.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::String;

use crate::config::ProgressCallback;
use crate::error::{StateError, UpdateError};
use crate::manifest::DIGEST_HEX_LEN;

/// Lifecycle of an update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Checking,
    Downloading,
    Verifying,
    Flashing,
    Complete,
    Failed,
}

impl UpdateState {
    pub const fn as_str(self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::Checking => "checking",
            UpdateState::Downloading => "downloading",
            UpdateState::Verifying => "verifying",
            UpdateState::Flashing => "flashing",
            UpdateState::Complete => "complete",
            UpdateState::Failed => "failed",
        }
    }

    /// States from which a new session may begin.
    pub(crate) const fn can_begin(self) -> bool {
        matches!(self, UpdateState::Idle | UpdateState::Failed)
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSession {
    pub state: UpdateState,
    pub error: Option<UpdateError>,
    pub bytes_done: u32,
    pub bytes_total: u32,
    /// Whole percent of the transfer, 0 when the total is unknown.
    pub percent: u8,
    pub started_at_ms: u64,
    /// Digest the session will verify against; empty when none is known.
    pub expected_digest: String<DIGEST_HEX_LEN>,
}

impl UpdateSession {
    pub(crate) const fn idle() -> Self {
        Self {
            state: UpdateState::Idle,
            error: None,
            bytes_done: 0,
            bytes_total: 0,
            percent: 0,
            started_at_ms: 0,
            expected_digest: String::new(),
        }
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.started_at_ms)
    }

    /// Rough time-to-finish estimate from the average transfer rate so far.
    pub fn remaining_ms_estimate(&self, now_ms: u64) -> u64 {
        let bytes_per_ms = u64::from(self.bytes_done) / (self.elapsed_ms(now_ms) + 1);
        let remaining = u64::from(self.bytes_total.saturating_sub(self.bytes_done));
        remaining / (bytes_per_ms + 1)
    }
}

struct Inner {
    session: UpdateSession,
    cancel_requested: bool,
    callback: Option<ProgressCallback>,
}

/// Caller-owned session cell.
///
/// `const`-constructible so firmware can keep it in a `static`; tests keep
/// one per scenario on the stack.
pub struct SharedSession {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner>>,
}

impl SharedSession {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                session: UpdateSession::idle(),
                cancel_requested: false,
                callback: None,
            })),
        }
    }

    pub fn snapshot(&self) -> UpdateSession {
        self.inner.lock(|cell| cell.borrow().session.clone())
    }

    pub fn state(&self) -> UpdateState {
        self.inner.lock(|cell| cell.borrow().session.state)
    }

    /// Ask the running session to stop.
    ///
    /// Only a download can be interrupted; the request is picked up at the
    /// next chunk boundary. Once verification has begun the outcome is
    /// already decided and cancellation is refused.
    pub fn cancel(&self) -> Result<(), UpdateError> {
        self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();
            if inner.session.state == UpdateState::Downloading {
                inner.cancel_requested = true;
                Ok(())
            } else {
                Err(StateError::NotInProgress.into())
            }
        })
    }

    /// Atomically claim the session for a new run.
    ///
    /// Succeeds only from `Idle` or `Failed`; the state moves to `Checking`
    /// under the lock, so two concurrent starts cannot both win.
    pub(crate) fn try_begin(&self, now_ms: u64, callback: Option<ProgressCallback>) -> bool {
        self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();
            if !inner.session.state.can_begin() {
                return false;
            }
            inner.session = UpdateSession::idle();
            inner.session.state = UpdateState::Checking;
            inner.session.started_at_ms = now_ms;
            inner.cancel_requested = false;
            inner.callback = callback;
            true
        })
    }

    pub(crate) fn set_state(&self, state: UpdateState) {
        self.inner.lock(|cell| cell.borrow_mut().session.state = state);
    }

    /// Record a failure and hand the error back for propagation.
    pub(crate) fn fail(&self, error: UpdateError) -> UpdateError {
        self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();
            inner.session.state = UpdateState::Failed;
            inner.session.error = Some(error);
        });
        error
    }

    /// Return to `Idle`, clearing any pending cancel request.
    pub(crate) fn reset_idle(&self) {
        self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();
            inner.session.state = UpdateState::Idle;
            inner.session.error = None;
            inner.cancel_requested = false;
        });
    }

    pub(crate) fn set_expected_digest(&self, digest: &str) {
        self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();
            inner.session.expected_digest = String::new();
            let _ = inner.session.expected_digest.push_str(digest);
        });
    }

    pub(crate) fn set_total(&self, bytes_total: u32) {
        self.inner.lock(|cell| cell.borrow_mut().session.bytes_total = bytes_total);
    }

    /// Update the byte counter and return the new whole percent.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn set_progress(&self, bytes_done: u32) -> u8 {
        self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();
            inner.session.bytes_done = bytes_done;
            let total = inner.session.bytes_total;
            inner.session.percent = if total > 0 {
                ((u64::from(bytes_done) * 100 / u64::from(total)).min(100)) as u8
            } else {
                0
            };
            inner.session.percent
        })
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.inner.lock(|cell| cell.borrow().cancel_requested)
    }

    /// Callback and a fresh snapshot, taken together so the observer sees a
    /// consistent view. The callback runs outside the lock.
    pub(crate) fn progress_observer(&self) -> (Option<ProgressCallback>, UpdateSession) {
        self.inner.lock(|cell| {
            let inner = cell.borrow();
            (inner.callback, inner.session.clone())
        })
    }
}

impl Default for SharedSession {
    fn default() -> Self {
        Self::new()
    }
}
