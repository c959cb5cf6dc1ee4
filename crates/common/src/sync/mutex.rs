//! Cancellation-safe mutex
//!
//! Thin wrapper over `std::sync::Mutex` that disables thread cancellation for
//! as long as the lock is held. A holder that panicked poisons the mutex; the
//! next acquisition reports it as a [`CommonError::Lock`] instead of handing
//! out possibly half-updated data.

use std::ops::{Deref, DerefMut};
use std::panic::Location;
use std::sync::TryLockError;

use tracing::error;

use super::cancel::CancelGuard;
use super::trace::{LockTrace, ReleaseTrace};
use crate::error::{CommonError, CommonResult};

const KIND: &str = "MUTEX_LOCK";

/// Mutual exclusion lock integrated with the cancellation guard
#[derive(Debug, Default)]
pub struct Mutex<T> {
    label: Option<String>,
    inner: std::sync::Mutex<T>,
}

impl<T> Mutex<T> {
    /// Create an unlocked mutex
    pub fn new(value: T) -> Self {
        Self { label: None, inner: std::sync::Mutex::new(value) }
    }

    /// Create an unlocked mutex whose diagnostics carry `label`
    pub fn with_label<S: Into<String>>(label: S, value: T) -> Self {
        Self { label: Some(label.into()), inner: std::sync::Mutex::new(value) }
    }

    /// Diagnostic label, if any
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Block until the lock is acquired
    ///
    /// # Errors
    /// Returns [`CommonError::Lock`] when the mutex is poisoned. The
    /// cancellation guard is rolled back before returning.
    #[track_caller]
    pub fn lock(&self) -> CommonResult<MutexGuard<'_, T>> {
        let trace = LockTrace::begin(KIND, "lock", self.label(), Location::caller());
        let cancel = CancelGuard::new();

        match self.inner.lock() {
            Ok(guard) => {
                let release = trace.release_trace();
                trace.finish("ok");
                Ok(MutexGuard { inner: guard, _release: release, _cancel: cancel })
            }
            Err(poisoned) => {
                drop(poisoned);
                drop(cancel);
                trace.finish("poisoned");
                Err(self.failure("lock"))
            }
        }
    }

    /// Acquire the lock without blocking
    ///
    /// Returns `Ok(None)` when the lock is busy.
    ///
    /// # Errors
    /// Returns [`CommonError::Lock`] when the mutex is poisoned.
    #[track_caller]
    pub fn try_lock(&self) -> CommonResult<Option<MutexGuard<'_, T>>> {
        let trace = LockTrace::begin(KIND, "try_lock", self.label(), Location::caller());
        let cancel = CancelGuard::new();

        match self.inner.try_lock() {
            Ok(guard) => {
                let release = trace.release_trace();
                trace.finish("ok");
                Ok(Some(MutexGuard { inner: guard, _release: release, _cancel: cancel }))
            }
            Err(TryLockError::WouldBlock) => {
                drop(cancel);
                trace.finish("busy");
                Ok(None)
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                drop(poisoned);
                drop(cancel);
                trace.finish("poisoned");
                Err(self.failure("try_lock"))
            }
        }
    }

    /// Whether a previous holder panicked while holding the lock
    pub fn is_poisoned(&self) -> bool {
        self.inner.is_poisoned()
    }

    /// Accept the current contents after a holder panicked
    pub fn clear_poison(&self) {
        self.inner.clear_poison();
    }

    /// Mutable access without locking; exclusive borrow proves no holder exists
    ///
    /// # Errors
    /// Returns [`CommonError::Lock`] when the mutex is poisoned.
    pub fn get_mut(&mut self) -> CommonResult<&mut T> {
        let label = self.label.clone();
        self.inner.get_mut().map_err(|_| poisoned_error("get_mut", label.as_deref()))
    }

    /// Consume the mutex, returning the protected value
    ///
    /// # Errors
    /// Returns [`CommonError::Lock`] when the mutex is poisoned.
    pub fn into_inner(self) -> CommonResult<T> {
        let label = self.label;
        self.inner.into_inner().map_err(|_| poisoned_error("into_inner", label.as_deref()))
    }

    fn failure(&self, operation: &'static str) -> CommonError {
        let err = poisoned_error(operation, self.label());
        error!(lock = self.label().unwrap_or("-"), "{KIND}: failed to {operation} ({err})");
        err
    }
}

fn poisoned_error(operation: &'static str, label: Option<&str>) -> CommonError {
    let message = "poisoned by a holder that panicked";
    match label {
        Some(label) => CommonError::lock_resource(operation, label, message),
        None => CommonError::lock(operation, message),
    }
}

/// Held mutex lock; releasing it re-enables cancellation
///
/// Field order matters: the raw lock is released first, then the release is
/// traced, then the cancellation guard is dropped.
#[must_use = "if unused the mutex will immediately unlock"]
pub struct MutexGuard<'a, T> {
    inner: std::sync::MutexGuard<'a, T>,
    _release: ReleaseTrace<'a>,
    _cancel: CancelGuard,
}

impl<T> MutexGuard<'_, T> {
    /// Release the lock explicitly
    pub fn unlock(this: Self) {
        drop(this);
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexGuard").field("value", &*self.inner).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sync::cancel::{cancel_state, lock_depth, CancelState};

    #[test]
    fn test_lock_unlock_balances_guard() {
        std::thread::spawn(|| {
            let mutex = Mutex::new(1u32);
            {
                let mut guard = mutex.lock().unwrap();
                *guard += 1;
                assert_eq!(lock_depth(), 1);
                assert_eq!(cancel_state(), CancelState::Disabled);
                MutexGuard::unlock(guard);
            }
            assert_eq!(lock_depth(), 0);
            assert_eq!(cancel_state(), CancelState::Enabled);
            assert_eq!(mutex.into_inner().unwrap(), 2);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_try_lock_busy_rolls_back_guard() {
        let mutex = Arc::new(Mutex::with_label("busy", ()));
        let held = mutex.lock().unwrap();

        let other = Arc::clone(&mutex);
        std::thread::spawn(move || {
            assert!(other.try_lock().unwrap().is_none());
            assert_eq!(lock_depth(), 0);
            assert_eq!(cancel_state(), CancelState::Enabled);
        })
        .join()
        .unwrap();

        drop(held);
        assert!(mutex.try_lock().unwrap().is_some());
    }

    #[test]
    fn test_poisoned_lock_reports_and_rolls_back() {
        let mutex = Arc::new(Mutex::with_label("poisoned", 0u8));
        let poisoner = Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the mutex");
        })
        .join();

        std::thread::spawn(move || {
            let err = mutex.lock().unwrap_err();
            assert!(matches!(err, CommonError::Lock { ref resource, .. } if resource.as_deref() == Some("poisoned")));
            assert_eq!(lock_depth(), 0);

            mutex.clear_poison();
            assert!(mutex.lock().is_ok());
        })
        .join()
        .unwrap();
    }
}
