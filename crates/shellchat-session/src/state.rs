use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

// ── States ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    AwaitingReply,
    Running,
    Cancelling,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControllerState::Idle => "idle",
            ControllerState::AwaitingReply => "waiting for a reply",
            ControllerState::Running => "a command is running",
            ControllerState::Cancelling => "stopping the running command",
        })
    }
}

// ── Valid transitions ──

const VALID_TRANSITIONS: &[(ControllerState, &[ControllerState])] = &[
    (
        ControllerState::Idle,
        &[ControllerState::AwaitingReply, ControllerState::Running],
    ),
    (
        ControllerState::AwaitingReply,
        &[ControllerState::Cancelling, ControllerState::Idle],
    ),
    (
        ControllerState::Running,
        &[ControllerState::Cancelling, ControllerState::Idle],
    ),
    (ControllerState::Cancelling, &[ControllerState::Idle]),
];

fn is_valid_transition(from: ControllerState, to: ControllerState) -> bool {
    VALID_TRANSITIONS
        .iter()
        .any(|(f, targets)| *f == from && targets.contains(&to))
}

// ── Guarded cell ──

#[derive(Debug)]
struct Inner {
    state: ControllerState,
    /// Token of the in-flight request; cleared on return to Idle.
    cancel: Option<CancellationToken>,
}

/// Controller state plus the active run's cancellation handle, under one lock.
#[derive(Debug)]
pub(crate) struct StateCell {
    inner: Mutex<Inner>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ControllerState::Idle,
                cancel: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn get(&self) -> ControllerState {
        self.lock().state
    }

    /// Compare-and-swap out of Idle into `to`. The returned lease puts the cell back to Idle
    /// when dropped, whichever way the request ends.
    pub fn acquire(
        &self,
        to: ControllerState,
        cancel: Option<CancellationToken>,
    ) -> Result<Lease<'_>, ControllerState> {
        let mut inner = self.lock();
        if inner.state != ControllerState::Idle || !is_valid_transition(inner.state, to) {
            return Err(inner.state);
        }
        debug!(from = ?inner.state, ?to, "controller transition");
        inner.state = to;
        inner.cancel = cancel;
        Ok(Lease { cell: self })
    }

    /// Run `f` while holding the lock, only if Idle.
    pub fn with_idle<T>(&self, f: impl FnOnce() -> T) -> Result<T, ControllerState> {
        let inner = self.lock();
        if inner.state != ControllerState::Idle {
            return Err(inner.state);
        }
        let out = f();
        drop(inner);
        Ok(out)
    }

    /// Running or AwaitingReply → Cancelling, firing the request's token.
    /// No-op in any other state or when the request cannot be cancelled.
    pub fn stop(&self) -> bool {
        let mut inner = self.lock();
        let from = inner.state;
        if !is_valid_transition(from, ControllerState::Cancelling) {
            return false;
        }
        let Some(token) = inner.cancel.clone() else {
            return false;
        };
        inner.state = ControllerState::Cancelling;
        token.cancel();
        debug!(?from, to = ?ControllerState::Cancelling, "controller transition");
        true
    }

    fn release(&self) {
        let mut inner = self.lock();
        let from = inner.state;
        if from != ControllerState::Idle && is_valid_transition(from, ControllerState::Idle) {
            debug!(?from, to = ?ControllerState::Idle, "controller transition");
            inner.state = ControllerState::Idle;
            inner.cancel = None;
        }
    }
}

/// Held for the duration of one non-idle request.
#[must_use]
pub(crate) struct Lease<'a> {
    cell: &'a StateCell,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.cell.release();
    }
}
