//! librados backend.
//!
//! Thin wrappers over the raw `rados_*` bindings from the `ceph` crate.
//! Asynchronous operations are issued with `rados_aio_*` against a
//! completion whose callback reclaims a boxed context, reads the return
//! value, releases the completion, and hands the typed result to the
//! gateway's completion bridge. librados delivers those callbacks from
//! its own internal threads.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use ceph::rados::{self, rados_completion_t, rados_ioctx_t, rados_list_ctx_t, rados_t};
use libc::{time_t, EACCES, EEXIST, ENOENT, EPERM};

use super::{AioComplete, Cluster, ObjectList, ObjectStat, Pool, StoreError, StoreResult};

fn error_string(errno: i32) -> String {
    unsafe {
        let s = libc::strerror(errno);
        if s.is_null() {
            format!("errno {}", errno)
        } else {
            CStr::from_ptr(s).to_string_lossy().into_owned()
        }
    }
}

fn errno_to_store(err: i32) -> StoreError {
    match -err {
        ENOENT => StoreError::NotFound,
        EEXIST => StoreError::Exists,
        EPERM | EACCES => StoreError::Forbidden,
        errno => StoreError::Unavailable(error_string(errno)),
    }
}

fn check(err: i32) -> StoreResult<()> {
    if err < 0 {
        Err(errno_to_store(err))
    } else {
        Ok(())
    }
}

fn c_string(s: &str) -> StoreResult<CString> {
    CString::new(s).map_err(|_| StoreError::Unavailable(format!("NUL byte in `{}`", s)))
}

fn mtime_to_systemtime(mtime: time_t) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(mtime.max(0) as u64)
}

// The connected rados_t, shutdown exactly once when the last reference
// (cluster or I/O context) goes away.
struct RadosHandle {
    handle: rados_t,
}

// The handle is only used through librados entry points that are
// documented thread-safe for a connected cluster.
unsafe impl Send for RadosHandle {}
unsafe impl Sync for RadosHandle {}

impl Drop for RadosHandle {
    fn drop(&mut self) {
        unsafe { rados::rados_shutdown(self.handle) }
    }
}

/// One connected cluster.
pub struct RadosCluster {
    conn: Arc<RadosHandle>,
}

impl RadosCluster {
    /// Create, configure and connect one cluster handle. `timeout` is
    /// pushed down as `client_mount_timeout`, `rados_mon_op_timeout` and
    /// `rados_osd_op_timeout` so the cluster gives up roughly when the
    /// gateway stops waiting.
    pub fn connect(config: Option<&Path>, timeout: Duration) -> StoreResult<Arc<RadosCluster>> {
        let mut handle: rados_t = ptr::null_mut();
        check(unsafe { rados::rados_create(&mut handle, ptr::null()) })?;
        let conn = Arc::new(RadosHandle { handle });

        match config {
            Some(path) => {
                let path = path
                    .to_str()
                    .ok_or_else(|| StoreError::Unavailable("non-utf8 config path".to_string()))?;
                let c_path = c_string(path)?;
                check(unsafe { rados::rados_conf_read_file(handle, c_path.as_ptr()) })?;
            }
            None => check(unsafe { rados::rados_conf_read_file(handle, ptr::null()) })?,
        }

        let secs = c_string(&timeout.as_secs().to_string())?;
        for option in [
            "client_mount_timeout",
            "rados_mon_op_timeout",
            "rados_osd_op_timeout",
        ] {
            let c_option = c_string(option)?;
            check(unsafe { rados::rados_conf_set(handle, c_option.as_ptr(), secs.as_ptr()) })?;
        }

        check(unsafe { rados::rados_connect(handle) })?;
        Ok(Arc::new(RadosCluster { conn }))
    }
}

impl Cluster for RadosCluster {
    fn open_pool(&self, pool: &str) -> StoreResult<Box<dyn Pool>> {
        let c_pool = c_string(pool)?;
        let mut ioctx: rados_ioctx_t = ptr::null_mut();
        check(unsafe { rados::rados_ioctx_create(self.conn.handle, c_pool.as_ptr(), &mut ioctx) })?;
        Ok(Box::new(RadosPool {
            ioctx,
            _conn: self.conn.clone(),
        }))
    }

    fn create_pool(&self, name: &str) -> StoreResult<()> {
        let c_name = c_string(name)?;
        check(unsafe { rados::rados_pool_create(self.conn.handle, c_name.as_ptr()) })
    }

    fn fsid(&self) -> String {
        let mut buf = [0u8; 64];
        let n = unsafe {
            rados::rados_cluster_fsid(self.conn.handle, buf.as_mut_ptr() as *mut c_char, buf.len())
        };
        if n <= 0 {
            return String::new();
        }
        String::from_utf8_lossy(&buf[..n as usize])
            .trim_end_matches('\0')
            .to_string()
    }
}

/// One I/O context. Each gateway lane gets its own, so operations are
/// never issued concurrently on the same context; `Sync` is needed only
/// because request futures migrate between runtime threads.
pub struct RadosPool {
    ioctx: rados_ioctx_t,
    _conn: Arc<RadosHandle>,
}

unsafe impl Send for RadosPool {}
unsafe impl Sync for RadosPool {}

impl Drop for RadosPool {
    fn drop(&mut self) {
        unsafe { rados::rados_ioctx_destroy(self.ioctx) }
    }
}

// Per-issuance callback contexts. Boxed before the completion is armed,
// reclaimed exactly once: by the callback shim, or by the arming path
// when issuing fails (the callback will not fire then).

struct StatCtx {
    size: u64,
    mtime: time_t,
    done: AioComplete<ObjectStat>,
}

struct ReadCtx {
    buf: Vec<u8>,
    done: AioComplete<Bytes>,
}

struct CodeCtx {
    // The written bytes for writes: librados borrows the buffer until
    // the operation completes.
    _data: Option<Bytes>,
    done: AioComplete<()>,
}

extern "C" fn stat_complete(comp: rados_completion_t, arg: *mut c_void) {
    let ctx = unsafe { Box::from_raw(arg as *mut StatCtx) };
    let ret = unsafe { rados::rados_aio_get_return_value(comp) };
    unsafe { rados::rados_aio_release(comp) };
    let result = if ret < 0 {
        Err(errno_to_store(ret))
    } else {
        Ok(ObjectStat {
            size: ctx.size,
            modified: mtime_to_systemtime(ctx.mtime),
        })
    };
    (ctx.done)(result);
}

extern "C" fn read_complete(comp: rados_completion_t, arg: *mut c_void) {
    let mut ctx = unsafe { Box::from_raw(arg as *mut ReadCtx) };
    let ret = unsafe { rados::rados_aio_get_return_value(comp) };
    unsafe { rados::rados_aio_release(comp) };
    let result = if ret < 0 {
        Err(errno_to_store(ret))
    } else {
        ctx.buf.truncate(ret as usize);
        Ok(Bytes::from(std::mem::take(&mut ctx.buf)))
    };
    (ctx.done)(result);
}

extern "C" fn code_complete(comp: rados_completion_t, arg: *mut c_void) {
    let ctx = unsafe { Box::from_raw(arg as *mut CodeCtx) };
    let ret = unsafe { rados::rados_aio_get_return_value(comp) };
    unsafe { rados::rados_aio_release(comp) };
    let result = if ret < 0 { Err(errno_to_store(ret)) } else { Ok(()) };
    (ctx.done)(result);
}

// Arm a completion around a boxed context, run `issue`, and clean up on
// issue failure. `shim` must eventually reclaim `arg` with Box::from_raw.
unsafe fn issue_aio<C, F>(
    arg: *mut C,
    shim: extern "C" fn(rados_completion_t, *mut c_void),
    issue: F,
) -> StoreResult<()>
where
    F: FnOnce(rados_completion_t) -> i32,
{
    let mut comp: rados_completion_t = ptr::null_mut();
    let err =
        rados::rados_aio_create_completion(arg as *mut c_void, None, Some(shim), &mut comp);
    if err < 0 {
        drop(Box::from_raw(arg));
        return Err(errno_to_store(err));
    }
    let err = issue(comp);
    if err < 0 {
        rados::rados_aio_release(comp);
        drop(Box::from_raw(arg));
        return Err(errno_to_store(err));
    }
    Ok(())
}

impl Pool for RadosPool {
    fn stat(&self, key: &str, done: AioComplete<ObjectStat>) -> StoreResult<()> {
        let c_key = c_string(key)?;
        let mut ctx = Box::new(StatCtx {
            size: 0,
            mtime: 0,
            done,
        });
        let size_ptr = &mut ctx.size as *mut u64;
        let mtime_ptr = &mut ctx.mtime as *mut time_t;
        unsafe {
            issue_aio(Box::into_raw(ctx), stat_complete, |comp| {
                rados::rados_aio_stat(self.ioctx, c_key.as_ptr(), comp, size_ptr, mtime_ptr)
            })
        }
    }

    fn read(&self, key: &str, off: u64, len: usize, done: AioComplete<Bytes>) -> StoreResult<()> {
        let c_key = c_string(key)?;
        let mut ctx = Box::new(ReadCtx {
            buf: vec![0u8; len],
            done,
        });
        let buf_ptr = ctx.buf.as_mut_ptr() as *mut c_char;
        unsafe {
            issue_aio(Box::into_raw(ctx), read_complete, |comp| {
                rados::rados_aio_read(self.ioctx, c_key.as_ptr(), comp, buf_ptr, len, off)
            })
        }
    }

    fn write(&self, key: &str, off: u64, data: Bytes, done: AioComplete<()>) -> StoreResult<()> {
        let c_key = c_string(key)?;
        let buf_ptr = data.as_ptr() as *const c_char;
        let len = data.len();
        let ctx = Box::new(CodeCtx {
            _data: Some(data),
            done,
        });
        unsafe {
            issue_aio(Box::into_raw(ctx), code_complete, |comp| {
                rados::rados_aio_write(self.ioctx, c_key.as_ptr(), comp, buf_ptr, len, off)
            })
        }
    }

    fn remove(&self, key: &str, done: AioComplete<()>) -> StoreResult<()> {
        let c_key = c_string(key)?;
        let ctx = Box::new(CodeCtx { _data: None, done });
        unsafe {
            issue_aio(Box::into_raw(ctx), code_complete, |comp| {
                rados::rados_aio_remove(self.ioctx, c_key.as_ptr(), comp)
            })
        }
    }

    fn stat_sync(&self, key: &str) -> StoreResult<ObjectStat> {
        let c_key = c_string(key)?;
        let mut size: u64 = 0;
        let mut mtime: time_t = 0;
        check(unsafe { rados::rados_stat(self.ioctx, c_key.as_ptr(), &mut size, &mut mtime) })?;
        Ok(ObjectStat {
            size,
            modified: mtime_to_systemtime(mtime),
        })
    }

    fn read_sync(&self, key: &str, off: u64, len: usize) -> StoreResult<Bytes> {
        let c_key = c_string(key)?;
        let mut buf = vec![0u8; len];
        let ret = unsafe {
            rados::rados_read(self.ioctx, c_key.as_ptr(), buf.as_mut_ptr() as *mut c_char, len, off)
        };
        if ret < 0 {
            return Err(errno_to_store(ret));
        }
        buf.truncate(ret as usize);
        Ok(Bytes::from(buf))
    }

    fn write_sync(&self, key: &str, off: u64, data: &[u8]) -> StoreResult<()> {
        let c_key = c_string(key)?;
        check(unsafe {
            rados::rados_write(
                self.ioctx,
                c_key.as_ptr(),
                data.as_ptr() as *const c_char,
                data.len(),
                off,
            )
        })
    }

    fn remove_sync(&self, key: &str) -> StoreResult<()> {
        let c_key = c_string(key)?;
        check(unsafe { rados::rados_remove(self.ioctx, c_key.as_ptr()) })
    }

    fn list(&self) -> StoreResult<Box<dyn ObjectList>> {
        let mut ctx: rados_list_ctx_t = ptr::null_mut();
        check(unsafe { rados::rados_objects_list_open(self.ioctx, &mut ctx) })?;
        Ok(Box::new(RadosObjectList {
            ctx,
            _conn: self._conn.clone(),
        }))
    }
}

struct RadosObjectList {
    ctx: rados_list_ctx_t,
    _conn: Arc<RadosHandle>,
}

unsafe impl Send for RadosObjectList {}

impl Drop for RadosObjectList {
    fn drop(&mut self) {
        unsafe { rados::rados_objects_list_close(self.ctx) }
    }
}

impl ObjectList for RadosObjectList {
    fn next_object(&mut self) -> StoreResult<Option<String>> {
        let mut entry: *const c_char = ptr::null();
        let err =
            unsafe { rados::rados_objects_list_next(self.ctx, &mut entry, ptr::null_mut()) };
        if -err == ENOENT {
            return Ok(None);
        }
        check(err)?;
        let name = unsafe { CStr::from_ptr(entry) }.to_string_lossy().into_owned();
        Ok(Some(name))
    }
}
