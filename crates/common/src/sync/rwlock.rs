//! Cancellation-safe reader/writer lock

use std::ops::{Deref, DerefMut};
use std::panic::Location;
use std::sync::TryLockError;

use tracing::{debug, error};

use super::cancel::CancelGuard;
use super::trace::{LockTrace, ReleaseTrace};
use crate::error::{CommonError, CommonResult};

const KIND: &str = "RW_LOCK";

/// Reader/writer lock integrated with the cancellation guard
///
/// Readers and writers alike keep cancellation disabled while they hold the
/// lock. Used for every chart, family and host symbol table.
#[derive(Debug, Default)]
pub struct RwLock<T> {
    label: Option<String>,
    inner: std::sync::RwLock<T>,
}

impl<T> RwLock<T> {
    /// Create an unlocked reader/writer lock
    pub fn new(value: T) -> Self {
        Self { label: None, inner: std::sync::RwLock::new(value) }
    }

    /// Create an unlocked reader/writer lock whose diagnostics carry `label`
    pub fn with_label<S: Into<String>>(label: S, value: T) -> Self {
        Self { label: Some(label.into()), inner: std::sync::RwLock::new(value) }
    }

    /// Diagnostic label, if any
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Block until shared access is acquired
    ///
    /// # Errors
    /// Returns [`CommonError::Lock`] when the lock is poisoned.
    #[track_caller]
    pub fn read_lock(&self) -> CommonResult<ReadGuard<'_, T>> {
        let trace = LockTrace::begin(KIND, "read_lock", self.label(), Location::caller());
        let cancel = CancelGuard::new();

        match self.inner.read() {
            Ok(guard) => {
                let release = trace.release_trace();
                trace.finish("ok");
                Ok(ReadGuard { inner: guard, _release: release, _cancel: cancel })
            }
            Err(poisoned) => {
                drop(poisoned);
                drop(cancel);
                trace.finish("poisoned");
                Err(self.failure("read_lock", "obtain read lock"))
            }
        }
    }

    /// Block until exclusive access is acquired
    ///
    /// # Errors
    /// Returns [`CommonError::Lock`] when the lock is poisoned.
    #[track_caller]
    pub fn write_lock(&self) -> CommonResult<WriteGuard<'_, T>> {
        let trace = LockTrace::begin(KIND, "write_lock", self.label(), Location::caller());
        let cancel = CancelGuard::new();

        match self.inner.write() {
            Ok(guard) => {
                let release = trace.release_trace();
                trace.finish("ok");
                Ok(WriteGuard { inner: guard, _release: release, _cancel: cancel })
            }
            Err(poisoned) => {
                drop(poisoned);
                drop(cancel);
                trace.finish("poisoned");
                Err(self.failure("write_lock", "obtain write lock"))
            }
        }
    }

    /// Acquire shared access without blocking; `Ok(None)` when busy
    ///
    /// # Errors
    /// Returns [`CommonError::Lock`] when the lock is poisoned.
    #[track_caller]
    pub fn try_read_lock(&self) -> CommonResult<Option<ReadGuard<'_, T>>> {
        let trace = LockTrace::begin(KIND, "try_read_lock", self.label(), Location::caller());
        let cancel = CancelGuard::new();

        match self.inner.try_read() {
            Ok(guard) => {
                let release = trace.release_trace();
                trace.finish("ok");
                Ok(Some(ReadGuard { inner: guard, _release: release, _cancel: cancel }))
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
                Err(self.failure("try_read_lock", "obtain read lock"))
            }
        }
    }

    /// Acquire exclusive access without blocking; `Ok(None)` when busy
    ///
    /// # Errors
    /// Returns [`CommonError::Lock`] when the lock is poisoned.
    #[track_caller]
    pub fn try_write_lock(&self) -> CommonResult<Option<WriteGuard<'_, T>>> {
        let trace = LockTrace::begin(KIND, "try_write_lock", self.label(), Location::caller());
        let cancel = CancelGuard::new();

        match self.inner.try_write() {
            Ok(guard) => {
                let release = trace.release_trace();
                trace.finish("ok");
                Ok(Some(WriteGuard { inner: guard, _release: release, _cancel: cancel }))
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
                Err(self.failure("try_write_lock", "obtain write lock"))
            }
        }
    }

    /// Whether a writer panicked while holding the lock
    pub fn is_poisoned(&self) -> bool {
        self.inner.is_poisoned()
    }

    /// Accept the current contents after a writer panicked
    pub fn clear_poison(&self) {
        self.inner.clear_poison();
    }

    /// Mutable access without locking; exclusive borrow proves no holder exists
    ///
    /// # Errors
    /// Returns [`CommonError::Lock`] when the lock is poisoned.
    pub fn get_mut(&mut self) -> CommonResult<&mut T> {
        let label = self.label.clone();
        self.inner.get_mut().map_err(|_| poisoned_error("get_mut", label.as_deref()))
    }

    /// Destroy the lock, returning the protected value
    ///
    /// # Errors
    /// Returns [`CommonError::Lock`] when the lock is poisoned.
    pub fn destroy(self) -> CommonResult<T> {
        let label = self.label;
        match self.inner.into_inner() {
            Ok(value) => {
                debug!(target: super::LOCK_TRACE_TARGET, lock = label.as_deref().unwrap_or("-"), "{KIND}: destroyed");
                Ok(value)
            }
            Err(_) => {
                let err = poisoned_error("destroy", label.as_deref());
                error!(lock = label.as_deref().unwrap_or("-"), "{KIND}: failed to destroy lock ({err})");
                Err(err)
            }
        }
    }

    fn failure(&self, operation: &'static str, what: &'static str) -> CommonError {
        let err = poisoned_error(operation, self.label());
        error!(lock = self.label().unwrap_or("-"), "{KIND}: failed to {what} ({err})");
        err
    }
}

fn poisoned_error(operation: &'static str, label: Option<&str>) -> CommonError {
    let message = "poisoned by a writer that panicked";
    match label {
        Some(label) => CommonError::lock_resource(operation, label, message),
        None => CommonError::lock(operation, message),
    }
}

/// Shared access to an [`RwLock`]
#[must_use = "if unused the lock will immediately unlock"]
pub struct ReadGuard<'a, T> {
    inner: std::sync::RwLockReadGuard<'a, T>,
    _release: ReleaseTrace<'a>,
    _cancel: CancelGuard,
}

impl<T> ReadGuard<'_, T> {
    /// Release the lock explicitly
    pub fn unlock(this: Self) {
        drop(this);
    }
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

/// Exclusive access to an [`RwLock`]
#[must_use = "if unused the lock will immediately unlock"]
pub struct WriteGuard<'a, T> {
    inner: std::sync::RwLockWriteGuard<'a, T>,
    _release: ReleaseTrace<'a>,
    _cancel: CancelGuard,
}

impl<T> WriteGuard<'_, T> {
    /// Release the lock explicitly
    pub fn unlock(this: Self) {
        drop(this);
    }
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
