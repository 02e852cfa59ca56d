//
// This module contains the main entry point of the library,
// DavGateway.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;
use percent_encoding::percent_decode_str;

use crate::aio::{self, SlotLease, SlotTable};
use crate::body::Body;
use crate::errors::{DavError, DavResult};
use crate::mount::{Mount, MountSpec};
use crate::store::{Cluster, ObjectList, ObjectStat, Pool, StoreError, StoreResult};
use crate::util::{dav_method, round_time, DavMethod};

pub mod handle_delete;
pub mod handle_get;
pub mod handle_mkcol;
pub mod handle_options;
pub mod handle_propfind;
pub mod handle_put;

// Longest request path we accept.
const PATH_MAX: usize = 4096;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_LANES: usize = 8;

/// Object store backend.
#[derive(Clone)]
pub enum Store {
    /// Ephemeral in-memory store, one fresh cluster per mount.
    #[cfg(feature = "memstore")]
    Mem,
    /// librados: one connected cluster per mount, configured from the
    /// mount's `config` path (or library defaults).
    #[cfg(feature = "rados")]
    Rados,
    /// A caller-supplied cluster, shared by every mount built from it.
    Cluster(Arc<dyn Cluster>),
}

impl Store {
    fn connect(&self, spec: &MountSpec, timeout: Duration) -> StoreResult<Arc<dyn Cluster>> {
        let _ = (spec, timeout);
        match self {
            #[cfg(feature = "memstore")]
            Store::Mem => {
                let cluster: Arc<dyn Cluster> = crate::store::memstore::MemCluster::new();
                Ok(cluster)
            }
            #[cfg(feature = "rados")]
            Store::Rados => {
                let cluster: Arc<dyn Cluster> =
                    crate::store::rados::RadosCluster::connect(spec.config.as_deref(), timeout)?;
                Ok(cluster)
            }
            Store::Cluster(cluster) => Ok(cluster.clone()),
        }
    }
}

/// Configuration of the gateway.
#[derive(Clone)]
pub struct GatewayBuilder {
    store: Store,
    mounts: Vec<MountSpec>,
    default_mount: Option<usize>,
    timeout: Duration,
    lanes: usize,
    bridged: bool,
}

impl GatewayBuilder {
    pub fn new(store: Store) -> GatewayBuilder {
        GatewayBuilder {
            store,
            mounts: Vec::new(),
            default_mount: None,
            timeout: DEFAULT_TIMEOUT,
            lanes: DEFAULT_LANES,
            bridged: true,
        }
    }

    /// Register one mount.
    pub fn mount(mut self, spec: MountSpec) -> Self {
        self.mounts.push(spec);
        self
    }

    /// Register one mount and make it the fallback for paths that match
    /// no prefix. Such paths are served verbatim against its pool.
    pub fn default_mount(mut self, spec: MountSpec) -> Self {
        self.default_mount = Some(self.mounts.len());
        self.mounts.push(spec);
        self
    }

    /// Default timeout for store operations; per-mount `timeout=` wins.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of concurrent request lanes. Each lane owns one AIO slot
    /// and one I/O context per mount.
    pub fn lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes;
        self
    }

    /// Run store calls synchronously on the request task instead of
    /// through the AIO bridge.
    pub fn synchronous(mut self, sync: bool) -> Self {
        self.bridged = !sync;
        self
    }

    /// Connect every mount and produce the gateway. Setup errors are not
    /// recoverable; callers are expected to abort startup on `Err`.
    pub fn build(self) -> StoreResult<DavGateway> {
        let lanes = self.lanes.max(1);
        let mut mounts = Vec::with_capacity(self.mounts.len());
        for spec in &self.mounts {
            let timeout = spec.timeout.unwrap_or(self.timeout);
            let cluster = self.store.connect(spec, timeout)?;
            mounts.push(Arc::new(Mount::open(spec, cluster, self.timeout, lanes)?));
        }
        Ok(DavGateway {
            inner: Arc::new(GatewayInner {
                mounts,
                default_mount: self.default_mount,
                slots: SlotTable::new(lanes),
                bridged: self.bridged,
            }),
        })
    }
}

/// The gateway handler.
///
/// Built once at startup via [`DavGateway::builder`]; `handle` maps one
/// `http::Request` to one `http::Response` with a streaming [`Body`].
#[derive(Clone)]
pub struct DavGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    mounts: Vec<Arc<Mount>>,
    default_mount: Option<usize>,
    slots: Arc<SlotTable>,
    bridged: bool,
}

impl DavGateway {
    /// Return a configuration builder.
    pub fn builder(store: Store) -> GatewayBuilder {
        GatewayBuilder::new(store)
    }

    /// Handle one request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        // Turn any DavError result into a plain status response.
        match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result OK");
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                Response::builder()
                    .status(err.statuscode())
                    .header("Content-Length", "0")
                    .body(Body::empty())
                    .unwrap()
            }
        }
    }

    // internal dispatcher.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        let method = dav_method(req.method())?;

        let path = percent_decode_str(req.uri().path())
            .decode_utf8()
            .map_err(|_| DavError::Status(StatusCode::FORBIDDEN))?
            .into_owned();
        if path.is_empty() || path.len() > PATH_MAX {
            return Err(StatusCode::FORBIDDEN.into());
        }

        let mount = self
            .resolve(&path)
            .ok_or(DavError::Status(StatusCode::NOT_FOUND))?;
        let filename = strip_prefix(&path, mount.prefix()).to_string();

        debug!("== START REQUEST {:?} {}", method, path);

        // OPTIONS is answered from the mount's permissions alone.
        if method == DavMethod::Options {
            return self.handle_options(&mount);
        }

        let ops = LaneOps {
            mount: mount.clone(),
            lease: self.inner.slots.lease().await,
            bridged: self.inner.bridged,
        };

        // The bare mount root only answers PROPFIND.
        if filename == "/" {
            if method == DavMethod::PropFind && mount.allows(method) {
                return self.handle_propfind_root(ops, &req, body).await;
            }
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }

        // MKCOL creates a pool; no stat involved.
        if method == DavMethod::MkCol {
            if !mount.allows(method) {
                return Err(StatusCode::METHOD_NOT_ALLOWED.into());
            }
            return self.handle_mkcol(&mount, &filename);
        }

        // Gate the remaining extension methods before any store I/O.
        if !mount.allows(method) {
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }

        let stat = ops.stat(&filename).await;

        // PUT is legal for objects that do not exist yet.
        if method == DavMethod::Put {
            return self.handle_put(ops, &filename, stat.is_ok(), body).await;
        }

        let stat = match stat {
            Ok(stat) => stat,
            // NotFound carries its own status; any other stat failure
            // reads as forbidden.
            Err(e @ StoreError::NotFound) => return Err(e.into()),
            Err(_) => return Err(StatusCode::FORBIDDEN.into()),
        };

        if method == DavMethod::Delete {
            return self.handle_delete(ops, &filename).await;
        }

        if let Some(ims) = req.headers().typed_get::<headers::IfModifiedSince>() {
            if !ims.is_modified(round_time(stat.modified)) {
                let mut res = Response::new(Body::empty());
                *res.status_mut() = StatusCode::NOT_MODIFIED;
                return Ok(res);
            }
        }

        if method == DavMethod::PropFind {
            return self.handle_propfind_item(&filename, &stat, body).await;
        }

        // DavMethod::Get | DavMethod::Head
        self.handle_get(ops, &req, filename, stat, method == DavMethod::Head)
    }

    // Longest matching prefix wins; the designated default mount picks up
    // everything else (and serves such paths verbatim).
    fn resolve(&self, path: &str) -> Option<Arc<Mount>> {
        let inner = &self.inner;
        inner
            .mounts
            .iter()
            .filter(|m| path.starts_with(m.prefix()))
            .max_by_key(|m| m.prefix().len())
            .or_else(|| inner.default_mount.map(|i| &inner.mounts[i]))
            .cloned()
    }
}

// Strip the mount prefix only when the path is strictly longer than and
// starts with it; otherwise serve the path verbatim, leading slash kept.
fn strip_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    if path.len() > prefix.len() && path.starts_with(prefix) {
        &path[prefix.len()..]
    } else {
        path
    }
}

/// The leased lane plus the resolved mount: everything a primitive needs.
///
/// Streaming handlers move this into the response body, which keeps the
/// lane (and its I/O context) reserved until the stream is done.
pub(crate) struct LaneOps {
    mount: Arc<Mount>,
    lease: SlotLease,
    bridged: bool,
}

impl LaneOps {
    fn pool(&self) -> &dyn Pool {
        self.mount.pool(self.lease.id())
    }

    fn timeout(&self) -> Duration {
        self.mount.timeout()
    }

    pub(crate) async fn stat(&self, key: &str) -> StoreResult<ObjectStat> {
        if self.bridged {
            aio::drive(self.lease.slot(), self.timeout(), |done| {
                self.pool().stat(key, done)
            })
            .await
        } else {
            self.pool().stat_sync(key)
        }
    }

    pub(crate) async fn read(&self, key: &str, off: u64, len: usize) -> StoreResult<Bytes> {
        if self.bridged {
            aio::drive(self.lease.slot(), self.timeout(), |done| {
                self.pool().read(key, off, len, done)
            })
            .await
        } else {
            self.pool().read_sync(key, off, len)
        }
    }

    pub(crate) async fn write(&self, key: &str, off: u64, data: Bytes) -> StoreResult<()> {
        if self.bridged {
            aio::drive(self.lease.slot(), self.timeout(), |done| {
                self.pool().write(key, off, data.clone(), done)
            })
            .await
        } else {
            self.pool().write_sync(key, off, &data)
        }
    }

    pub(crate) async fn remove(&self, key: &str) -> StoreResult<()> {
        if self.bridged {
            aio::drive(self.lease.slot(), self.timeout(), |done| {
                self.pool().remove(key, done)
            })
            .await
        } else {
            self.pool().remove_sync(key)
        }
    }

    pub(crate) fn list(&self) -> StoreResult<Box<dyn ObjectList>> {
        self.pool().list()
    }
}

// Consume and discard a request body.
pub(crate) async fn drain_body<ReqBody, ReqData, ReqError>(body: ReqBody)
where
    ReqData: Buf + Send + 'static,
    ReqError: StdError + Send + Sync + 'static,
    ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
{
    pin_utils::pin_mut!(body);
    while let Some(res) = body.data().await {
        if res.is_err() {
            break;
        }
    }
}

// Mid-stream failures cannot change the status anymore; surface them as
// body errors so the connection is truncated.
pub(crate) fn stream_error<E>(e: E) -> io::Error
where
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::Other, e)
}

#[cfg(test)]
mod tests {
    use super::strip_prefix;

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("/r/foo", "/r"), "/foo");
        assert_eq!(strip_prefix("/r/", "/r"), "/");
        assert_eq!(strip_prefix("/r/foo", "/r/"), "foo");
        // equal length or mismatch: served verbatim.
        assert_eq!(strip_prefix("/r", "/r"), "/r");
        assert_eq!(strip_prefix("/other", "/r"), "/other");
    }
}
