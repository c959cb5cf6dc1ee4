//! Automatic thread cancelability management, based on locks
//!
//! Every thread carries a cancellation state (`Enabled` or `Disabled`) and a
//! lock nesting depth. Acquiring any lock from [`crate::sync`] calls
//! [`disable`]; releasing it calls [`enable`]. Only the outermost pair
//! touches the state: the first `disable` saves the current state and forces
//! `Disabled`, the matching last `enable` puts the saved state back. A
//! cancellation requested in between is therefore deferred until the thread
//! holds no lock at all.
//!
//! Cancellation is deferred and cooperative: it is acted upon only at a
//! cancellation point ([`test_cancel`], [`sleep`]), which returns
//! [`Cancelled`] so the thread body can unwind with `?`.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::error;

use crate::error::{CommonError, CommonResult};
use crate::thread::current_tag;

/// Whether a pending cancellation request may be acted upon by this thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    /// Cancellation requests are honored at cancellation points
    Enabled,
    /// Cancellation requests stay pending
    Disabled,
}

impl std::fmt::Display for CancelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enabled => write!(f, "ENABLED"),
            Self::Disabled => write!(f, "DISABLED"),
        }
    }
}

/// Returned by a cancellation point when the thread has been cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("thread cancelled")]
pub struct Cancelled;

/// Shared cancellation request flag of one managed thread
///
/// The creator keeps a clone to request cancellation; the thread itself binds
/// its handle and installs the token in its thread-local cancel cell at
/// startup. A request made before the bind is still seen at the first
/// cancellation point.
#[derive(Debug, Default)]
pub struct CancelToken {
    requested: AtomicBool,
    thread: OnceCell<std::thread::Thread>,
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bind(&self, thread: std::thread::Thread) {
        let _ = self.thread.set(thread);
    }

    /// Request cancellation and wake the thread if it is sleeping in [`sleep`]
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }

    /// Whether cancellation has been requested
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

struct CancelCell {
    state: Cell<CancelState>,
    depth: Cell<u32>,
    saved: Cell<CancelState>,
    token: RefCell<Option<Arc<CancelToken>>>,
}

thread_local! {
    static CANCEL: CancelCell = const {
        CancelCell {
            state: Cell::new(CancelState::Enabled),
            depth: Cell::new(0),
            saved: Cell::new(CancelState::Enabled),
            token: RefCell::new(None),
        }
    };
}

/// Increment the lock nesting depth, disabling cancellation on 0 -> 1
pub fn disable() {
    CANCEL.with(|cell| {
        let depth = cell.depth.get();
        if depth == 0 {
            let old = cell.state.replace(CancelState::Disabled);
            cell.saved.set(old);
        }
        cell.depth.set(depth.saturating_add(1));
    });
}

/// Decrement the lock nesting depth, restoring the saved state on 1 -> 0
///
/// # Errors
/// Returns [`CommonError::Internal`] (after reporting it) when called with
/// no matching [`disable`]. The cancellation state is left untouched.
pub fn enable() -> CommonResult<()> {
    CANCEL.with(|cell| match cell.depth.get() {
        0 => {
            error!(
                thread = %current_tag(),
                "THREAD_CANCELABILITY: enable() with lock depth 0 - results will be undefined - please report this!"
            );
            Err(CommonError::internal_with_context(
                "cancelability enabled without a matching disable",
                "cancel guard",
            ))
        }
        1 => {
            let old = cell.state.replace(cell.saved.get());
            if old != CancelState::Disabled {
                error!(
                    thread = %current_tag(),
                    found = %old,
                    "THREAD_CANCELABILITY: cancelability was changed while locks were held, expected DISABLED - please report this!"
                );
            }
            cell.depth.set(0);
            Ok(())
        }
        depth => {
            cell.depth.set(depth - 1);
            Ok(())
        }
    })
}

/// Current lock nesting depth of the calling thread
pub fn lock_depth() -> u32 {
    CANCEL.with(|cell| cell.depth.get())
}

/// Current cancellation state of the calling thread
pub fn cancel_state() -> CancelState {
    CANCEL.with(|cell| cell.state.get())
}

/// Set the calling thread's cancellation state, returning the previous one
pub fn set_cancel_state(state: CancelState) -> CancelState {
    CANCEL.with(|cell| cell.state.replace(state))
}

/// Whether cancellation of the calling thread has been requested
pub fn is_cancel_requested() -> bool {
    CANCEL.with(|cell| cell.token.borrow().as_ref().is_some_and(|token| token.is_requested()))
}

/// Cancellation point
///
/// # Errors
/// Returns [`Cancelled`] when cancellation was requested and the thread's
/// state is `Enabled` (i.e. it holds no lock).
pub fn test_cancel() -> Result<(), Cancelled> {
    if cancel_state() == CancelState::Enabled && is_cancel_requested() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

/// Sleep for `duration`, acting as a cancellation point
///
/// A cancellation request wakes the sleeper early. While cancellation is
/// disabled the full duration elapses.
///
/// # Errors
/// Returns [`Cancelled`] under the same conditions as [`test_cancel`].
pub fn sleep(duration: Duration) -> Result<(), Cancelled> {
    test_cancel()?;
    let Some(deadline) = Instant::now().checked_add(duration) else {
        loop {
            std::thread::park();
            test_cancel()?;
        }
    };
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::park_timeout(deadline - now);
        test_cancel()?;
    }
}

pub(crate) fn install_token(token: Option<Arc<CancelToken>>) {
    CANCEL.with(|cell| *cell.token.borrow_mut() = token);
}

/// RAII pairing of [`disable`] and [`enable`]
///
/// Not `Send`: it must be released on the thread that took it.
#[derive(Debug)]
#[must_use = "dropping the guard immediately re-enables cancellation"]
pub struct CancelGuard {
    _not_send: PhantomData<*const ()>,
}

impl CancelGuard {
    /// Disable cancellation until the guard is dropped
    pub fn new() -> Self {
        disable();
        Self { _not_send: PhantomData }
    }
}

impl Default for CancelGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        // underflow is already reported by enable()
        let _ = enable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_disable_enable_restores_state() {
        std::thread::spawn(|| {
            assert_eq!(cancel_state(), CancelState::Enabled);

            disable();
            disable();
            disable();
            assert_eq!(lock_depth(), 3);
            assert_eq!(cancel_state(), CancelState::Disabled);

            enable().unwrap();
            enable().unwrap();
            assert_eq!(cancel_state(), CancelState::Disabled);

            enable().unwrap();
            assert_eq!(lock_depth(), 0);
            assert_eq!(cancel_state(), CancelState::Enabled);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_outer_disabled_state_is_preserved() {
        std::thread::spawn(|| {
            set_cancel_state(CancelState::Disabled);
            disable();
            enable().unwrap();
            assert_eq!(cancel_state(), CancelState::Disabled);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_enable_underflow_is_reported_without_state_change() {
        std::thread::spawn(|| {
            let before = cancel_state();
            let err = enable().unwrap_err();
            assert!(matches!(err, CommonError::Internal { .. }));
            assert_eq!(cancel_state(), before);
            assert_eq!(lock_depth(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_cancel_guard_is_balanced() {
        std::thread::spawn(|| {
            {
                let _outer = CancelGuard::new();
                let _inner = CancelGuard::new();
                assert_eq!(lock_depth(), 2);
            }
            assert_eq!(lock_depth(), 0);
            assert_eq!(cancel_state(), CancelState::Enabled);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_cancellation_point_defers_while_disabled() {
        std::thread::spawn(|| {
            let token = Arc::new(CancelToken::new());
            token.bind(std::thread::current());
            install_token(Some(Arc::clone(&token)));
            assert_eq!(test_cancel(), Ok(()));

            token.request();
            {
                let _guard = CancelGuard::new();
                assert_eq!(test_cancel(), Ok(()));
            }
            assert_eq!(test_cancel(), Err(Cancelled));
            install_token(None);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_sleep_wakes_on_cancel() {
        let (tx, rx) = std::sync::mpsc::channel();
        let sleeper = std::thread::spawn(move || {
            let token = Arc::new(CancelToken::new());
            token.bind(std::thread::current());
            install_token(Some(Arc::clone(&token)));
            tx.send(token).unwrap();
            let started = Instant::now();
            let outcome = sleep(Duration::from_secs(30));
            (outcome, started.elapsed())
        });

        let token = rx.recv().unwrap();
        token.request();
        let (outcome, elapsed) = sleeper.join().unwrap();
        assert_eq!(outcome, Err(Cancelled));
        assert!(elapsed < Duration::from_secs(30));
    }

    #[test]
    fn test_unbounded_sleep_parks_until_cancelled() {
        let (tx, rx) = std::sync::mpsc::channel();
        let sleeper = std::thread::spawn(move || {
            let token = Arc::new(CancelToken::new());
            token.bind(std::thread::current());
            install_token(Some(Arc::clone(&token)));
            tx.send(token).unwrap();
            sleep(Duration::MAX)
        });

        let token = rx.recv().unwrap();
        token.request();
        assert_eq!(sleeper.join().unwrap(), Err(Cancelled));
    }
}
