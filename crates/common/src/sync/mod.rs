//! Lock primitives integrated with deferred thread cancellation
//!
//! ## Submodules
//!
//! - **`cancel`**: per-thread cancellation state and lock nesting depth
//! - **`mutex`**: [`Mutex`], mutual exclusion over `std::sync::Mutex`
//! - **`rwlock`**: [`RwLock`], reader/writer lock over `std::sync::RwLock`
//!
//! ## Module Relationships
//!
//! Every successful acquisition in `mutex` and `rwlock` takes a
//! [`CancelGuard`], and every release drops it. A thread holding at least one
//! lock therefore never observes its own cancellation; the request is acted
//! upon at the first cancellation point after the last lock is released.
//!
//! Failed acquisitions roll the guard back before the error is returned, so
//! the nesting depth only ever counts locks actually held.
//!
//! Call sites are traced at `TRACE` under [`LOCK_TRACE_TARGET`].

pub mod cancel;
pub mod mutex;
pub mod rwlock;
mod trace;

pub use cancel::{
    cancel_state, is_cancel_requested, lock_depth, set_cancel_state, sleep, test_cancel,
    CancelGuard, CancelState, CancelToken, Cancelled,
};
pub use mutex::{Mutex, MutexGuard};
pub use rwlock::{ReadGuard, RwLock, WriteGuard};
pub use trace::LOCK_TRACE_TARGET;
