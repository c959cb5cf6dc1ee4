//! Thread lifecycle manager
//!
//! Creates, tags, joins, detaches and cancels worker threads. Each managed
//! thread runs through a trampoline that records a [`ThreadInfo`] in
//! thread-local storage, logs its startup, enables deferred cancellation and
//! arms a cleanup guard. The guard runs exactly once on every exit path:
//! normal return, cancellation (the entry returned [`Cancelled`]) or panic.
//!
//! ```rust,ignore
//! let handle = thread::create("PLUGIN[proc]", ThreadOptions::JOINABLE, || {
//!     loop {
//!         collect_once();
//!         sync::sleep(Duration::from_secs(1))?;
//!     }
//! })?;
//! handle.cancel()?;
//! assert!(matches!(handle.join()?, ThreadExit::Cancelled));
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bitflags::bitflags;
use once_cell::sync::{Lazy, OnceCell};
use tracing::{debug, error, info};

use crate::error::{CommonError, CommonResult};
use crate::sync::cancel::{self, CancelState, CancelToken, Cancelled};

/// Tracing target of thread lifecycle messages
pub const THREAD_TRACE_TARGET: &str = "hibench::threads";

/// Longest tag kept, in bytes
pub const THREAD_TAG_MAX: usize = 100;

/// Tag reported for threads without a managed record
pub const MAIN_TAG: &str = "MAIN";

/// Stack size used when the platform gives no hint
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

bitflags! {
    /// Creation options of a managed thread
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ThreadOptions: u32 {
        /// Keep the thread joinable; otherwise it is detached right away
        const JOINABLE = 1 << 0;
        /// Do not log "thread created"
        const DONT_LOG_STARTUP = 1 << 1;
        /// Do not log "thread finished"
        const DONT_LOG_CLEANUP = 1 << 2;
        /// Neither startup nor cleanup is logged
        const DONT_LOG = Self::DONT_LOG_STARTUP.bits() | Self::DONT_LOG_CLEANUP.bits();
    }
}

#[derive(Debug, Clone, Copy)]
struct ThreadAttributes {
    default_stack_size: usize,
    stack_size: usize,
}

static ATTRIBUTES: Lazy<parking_lot::RwLock<ThreadAttributes>> = Lazy::new(|| {
    let default_stack_size = platform_stack_size();
    parking_lot::RwLock::new(ThreadAttributes { default_stack_size, stack_size: default_stack_size })
});

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadInfo>>> = const { RefCell::new(None) };
    static TID: u64 = NEXT_TID.fetch_add(1, Ordering::Relaxed);
}

fn platform_stack_size() -> usize {
    std::env::var("RUST_MIN_STACK")
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_STACK_SIZE)
}

/// Record the platform default stack size for threads created from now on
///
/// Call once at startup. Returns the default.
pub fn init() -> usize {
    let default_stack_size = platform_stack_size();
    let mut attributes = ATTRIBUTES.write();
    attributes.default_stack_size = default_stack_size;
    attributes.stack_size = default_stack_size;
    debug!(target: THREAD_TRACE_TARGET, stack_size = default_stack_size, "default thread stack size recorded");
    default_stack_size
}

/// Widen the stack of subsequently created threads
///
/// Only a request above the recorded default takes effect; anything at or
/// below it is ignored. Returns the effective size.
pub fn configure_stack_size(requested: usize) -> usize {
    let mut attributes = ATTRIBUTES.write();
    if requested > attributes.default_stack_size {
        info!(
            target: THREAD_TRACE_TARGET,
            from = attributes.stack_size,
            to = requested,
            "thread stack size widened"
        );
        attributes.stack_size = requested;
    } else {
        debug!(
            target: THREAD_TRACE_TARGET,
            requested,
            current = attributes.stack_size,
            default = attributes.default_stack_size,
            "thread stack size kept"
        );
    }
    attributes.stack_size
}

/// Stack size given to threads created now
pub fn stack_size() -> usize {
    ATTRIBUTES.read().stack_size
}

/// Process-unique id of the calling thread
pub fn current_tid() -> u64 {
    TID.with(|tid| *tid)
}

/// Tag of the calling thread, or `"MAIN"` for unmanaged threads
pub fn current_tag() -> String {
    CURRENT
        .try_with(|current| {
            current.borrow().as_ref().map(|info| info.tag.clone()).filter(|tag| !tag.is_empty())
        })
        .ok()
        .flatten()
        .unwrap_or_else(|| MAIN_TAG.to_string())
}

/// Clamp a tag to [`THREAD_TAG_MAX`] bytes at a character boundary
pub fn truncate_tag(tag: &str) -> String {
    let tag = tag.replace('\0', "");
    if tag.len() <= THREAD_TAG_MAX {
        return tag;
    }
    let mut end = THREAD_TAG_MAX;
    while !tag.is_char_boundary(end) {
        end -= 1;
    }
    tag[..end].to_string()
}

/// Record of one managed thread, shared by the thread and its handle
#[derive(Debug)]
pub struct ThreadInfo {
    tag: String,
    options: ThreadOptions,
    tid: OnceCell<u64>,
    cancel: Arc<CancelToken>,
    finished: AtomicBool,
}

impl ThreadInfo {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn options(&self) -> ThreadOptions {
        self.options
    }

    /// Task id, known once the thread has started
    pub fn tid(&self) -> Option<u64> {
        self.tid.get().copied()
    }

    /// Whether cleanup has run
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// How a managed thread's entry ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadExit<T> {
    /// The entry returned normally
    Finished(T),
    /// The entry stopped at a cancellation point
    Cancelled,
}

impl<T> ThreadExit<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn finished(self) -> Option<T> {
        match self {
            Self::Finished(value) => Some(value),
            Self::Cancelled => None,
        }
    }
}

/// Handle to a managed thread
///
/// Dropping the handle of a joinable thread detaches it.
#[derive(Debug)]
pub struct ThreadHandle<T> {
    info: Arc<ThreadInfo>,
    join: Option<JoinHandle<ThreadExit<T>>>,
}

/// Spawn a managed thread running `entry`
///
/// Without [`ThreadOptions::JOINABLE`] the thread is detached right after
/// creation; the returned handle can still cancel it.
///
/// # Errors
/// Returns [`CommonError::Thread`] when the OS refuses to create the thread.
pub fn create<F, T>(tag: &str, options: ThreadOptions, entry: F) -> CommonResult<ThreadHandle<T>>
where
    F: FnOnce() -> Result<T, Cancelled> + Send + 'static,
    T: Send + 'static,
{
    let info = Arc::new(ThreadInfo {
        tag: truncate_tag(tag),
        options,
        tid: OnceCell::new(),
        cancel: Arc::new(CancelToken::new()),
        finished: AtomicBool::new(false),
    });

    let builder = std::thread::Builder::new().name(info.tag.clone()).stack_size(stack_size());
    let record = Arc::clone(&info);
    let spawned = builder.spawn(move || trampoline(record, entry));

    let join = match spawned {
        Ok(join) => join,
        Err(err) => {
            error!(target: THREAD_TRACE_TARGET, tag = %info.tag, "failed to create new thread for {}: {err}", info.tag);
            return Err(CommonError::thread(info.tag.clone(), "create", err.to_string()));
        }
    };

    let mut handle = ThreadHandle { info, join: Some(join) };
    if !options.contains(ThreadOptions::JOINABLE) {
        handle.detach()?;
    }
    Ok(handle)
}

fn trampoline<F, T>(info: Arc<ThreadInfo>, entry: F) -> ThreadExit<T>
where
    F: FnOnce() -> Result<T, Cancelled>,
{
    let tid = current_tid();
    let _ = info.tid.set(tid);
    info.cancel.bind(std::thread::current());
    CURRENT.with(|current| *current.borrow_mut() = Some(Arc::clone(&info)));
    cancel::install_token(Some(Arc::clone(&info.cancel)));

    if !info.options.contains(ThreadOptions::DONT_LOG_STARTUP) {
        info!(target: THREAD_TRACE_TARGET, tag = %info.tag, tid, "thread created with task id {tid}");
    }

    // deferred is the only cancel type
    cancel::set_cancel_state(CancelState::Enabled);

    let _cleanup = ThreadCleanup { info: Arc::clone(&info) };

    match entry() {
        Ok(value) => ThreadExit::Finished(value),
        Err(Cancelled) => {
            debug!(target: THREAD_TRACE_TARGET, tag = %info.tag, tid, "thread stopped at a cancellation point");
            ThreadExit::Cancelled
        }
    }
}

struct ThreadCleanup {
    info: Arc<ThreadInfo>,
}

impl Drop for ThreadCleanup {
    fn drop(&mut self) {
        let current = CURRENT.try_with(|current| current.borrow_mut().take()).ok().flatten();
        let matches = current.as_ref().is_some_and(|record| Arc::ptr_eq(record, &self.info));
        if !matches {
            error!(
                target: THREAD_TRACE_TARGET,
                tag = %self.info.tag,
                found = current.as_ref().map_or("-", |record| record.tag.as_str()),
                "THREADS: thread-local record does not match the thread being cleaned up - please report this!"
            );
        }

        if !self.info.options.contains(ThreadOptions::DONT_LOG_CLEANUP) {
            let tid = self.info.tid().unwrap_or_default();
            info!(target: THREAD_TRACE_TARGET, tag = %self.info.tag, tid, "thread with task id {tid} finished");
        }

        cancel::install_token(None);
        self.info.finished.store(true, Ordering::Release);
    }
}

impl<T> ThreadHandle<T> {
    pub fn tag(&self) -> &str {
        &self.info.tag
    }

    pub fn info(&self) -> &Arc<ThreadInfo> {
        &self.info
    }

    /// Task id of the thread, once it has started
    pub fn tid(&self) -> Option<u64> {
        self.info.tid()
    }

    pub fn is_joinable(&self) -> bool {
        self.join.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.info.is_finished()
    }

    /// Request cancellation
    ///
    /// Acted upon at the thread's next cancellation point taken with no lock
    /// held.
    ///
    /// # Errors
    /// Returns [`CommonError::Thread`] when the thread has already exited.
    pub fn cancel(&self) -> CommonResult<()> {
        if self.info.is_finished() {
            let err = CommonError::thread(self.info.tag.clone(), "cancel", "thread has already exited");
            error!(target: THREAD_TRACE_TARGET, tag = %self.info.tag, "cannot cancel thread: {err}");
            return Err(err);
        }
        self.info.cancel.request();
        debug!(target: THREAD_TRACE_TARGET, tag = %self.info.tag, "thread cancellation requested");
        Ok(())
    }

    /// Wait for the thread to exit
    ///
    /// # Errors
    /// Returns [`CommonError::Thread`] when the thread is detached or panicked.
    pub fn join(mut self) -> CommonResult<ThreadExit<T>> {
        let Some(join) = self.join.take() else {
            let err = CommonError::thread(self.info.tag.clone(), "join", "thread is detached");
            error!(target: THREAD_TRACE_TARGET, tag = %self.info.tag, "cannot join thread: {err}");
            return Err(err);
        };

        join.join().map_err(|payload| {
            let err = CommonError::thread(self.info.tag.clone(), "join", panic_message(payload.as_ref()));
            error!(target: THREAD_TRACE_TARGET, tag = %self.info.tag, "cannot join thread: {err}");
            err
        })
    }

    /// Let the thread run on its own
    ///
    /// # Errors
    /// Returns [`CommonError::Thread`] when the thread is already detached.
    pub fn detach(&mut self) -> CommonResult<()> {
        match self.join.take() {
            Some(join) => {
                drop(join);
                debug!(target: THREAD_TRACE_TARGET, tag = %self.info.tag, "thread detached");
                Ok(())
            }
            None => {
                let err = CommonError::thread(self.info.tag.clone(), "detach", "thread is already detached");
                error!(target: THREAD_TRACE_TARGET, tag = %self.info.tag, "cannot detach thread: {err}");
                Err(err)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("thread panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("thread panicked: {message}")
    } else {
        "thread panicked".to_string()
    }
}
