//! The object-store seam.
//!
//! A [`Cluster`] is one connected store; a [`Pool`] is one I/O context
//! against a named pool, exclusively owned by a worker lane. The
//! asynchronous half of the [`Pool`] interface is deliberately shaped like
//! librados AIO: each call issues exactly one operation and invokes the
//! supplied completion callback when it finishes, possibly from a thread
//! internal to the store. The gateway's completion bridge turns those
//! callbacks back into awaitable results.

use std::fmt;
use std::time::SystemTime;

use bytes::Bytes;

#[cfg(feature = "memstore")]
pub mod memstore;

#[cfg(feature = "rados")]
pub mod rados;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures surfaced by a store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The object (or pool) does not exist.
    NotFound,
    /// The pool already exists (pool creation only).
    Exists,
    /// The store refused the operation.
    Forbidden,
    /// The completion did not arrive within the configured timeout.
    TimedOut,
    /// Anything else: connection loss, issue failure, backend trouble.
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "object not found"),
            StoreError::Exists => write!(f, "already exists"),
            StoreError::Forbidden => write!(f, "operation forbidden"),
            StoreError::TimedOut => write!(f, "operation timed out"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Size and modification time of one stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    pub modified: SystemTime,
}

/// Completion callback handed to the store with each AIO issuance.
///
/// Backends may invoke it from their own internal threads; it must be
/// called at most once, and never if the issuing call returned an error.
pub type AioComplete<T> = Box<dyn FnOnce(StoreResult<T>) + Send + 'static>;

/// One connected cluster. Shared read-only by every lane of a mount.
pub trait Cluster: Send + Sync {
    /// Open an I/O context against `pool`. Called once per lane at setup;
    /// fails if the pool cannot be opened.
    fn open_pool(&self, pool: &str) -> StoreResult<Box<dyn Pool>>;

    /// Create a new pool (backs MKCOL). `Exists` if the name is taken.
    fn create_pool(&self, name: &str) -> StoreResult<()>;

    /// Cluster fsid, for logging.
    fn fsid(&self) -> String;
}

/// One I/O context. Owned by a single lane; the completion callbacks are
/// the only entry points that may run on another thread.
pub trait Pool: Send + Sync {
    /// Issue an asynchronous stat. An `Err` return means the operation was
    /// never issued and `done` will not fire.
    fn stat(&self, key: &str, done: AioComplete<ObjectStat>) -> StoreResult<()>;

    /// Issue an asynchronous read of up to `len` bytes at `off`.
    fn read(&self, key: &str, off: u64, len: usize, done: AioComplete<Bytes>) -> StoreResult<()>;

    /// Issue an asynchronous write of `data` at `off`, creating the object
    /// if needed.
    fn write(&self, key: &str, off: u64, data: Bytes, done: AioComplete<()>) -> StoreResult<()>;

    /// Issue an asynchronous remove. Completes with `NotFound` if the
    /// object did not exist.
    fn remove(&self, key: &str, done: AioComplete<()>) -> StoreResult<()>;

    // Synchronous equivalents, used when the AIO bridge is disabled.

    fn stat_sync(&self, key: &str) -> StoreResult<ObjectStat>;
    fn read_sync(&self, key: &str, off: u64, len: usize) -> StoreResult<Bytes>;
    fn write_sync(&self, key: &str, off: u64, data: &[u8]) -> StoreResult<()>;
    fn remove_sync(&self, key: &str) -> StoreResult<()>;

    /// Open an enumeration cursor over every object in the pool, in the
    /// store's native order.
    fn list(&self) -> StoreResult<Box<dyn ObjectList>>;
}

/// Cursor over object names.
pub trait ObjectList: Send {
    /// The next object name, or `None` at the end of the pool.
    fn next_object(&mut self) -> StoreResult<Option<String>>;
}
