//
// End-to-end tests: full requests through DavGateway over the in-memory
// store.
//
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use http::{header, HeaderMap, Request, Response, StatusCode};

use dav_rados::body::Body;
use dav_rados::store::memstore::MemCluster;
use dav_rados::store::{
    AioComplete, Cluster, ObjectList, ObjectStat, Pool, StoreError, StoreResult,
};
use dav_rados::{DavGateway, MountSpec, Store};

fn gateway(specs: &[&str]) -> DavGateway {
    gateway_with(Store::Mem, specs)
}

fn gateway_with(store: Store, specs: &[&str]) -> DavGateway {
    let mut builder = DavGateway::builder(store).lanes(4);
    for spec in specs {
        builder = builder.mount(MountSpec::parse(spec).unwrap());
    }
    builder.build().unwrap()
}

fn request(method: &str, path: &str, body: &[u8]) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .body(Body::from(body.to_vec()))
        .unwrap()
}

async fn collect(res: Response<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let (parts, mut body) = res.into_parts();
    let mut data = Vec::new();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(b) => data.extend_from_slice(&b),
            Err(_) => break,
        }
    }
    (parts.status, parts.headers, Bytes::from(data))
}

async fn roundtrip(gw: &DavGateway, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    collect(gw.handle(req).await).await
}

#[tokio::test]
async fn put_then_get_roundtrip() {
    let gw = gateway(&["mountpoint=/r,pool=p1,allow_put=1,allow_delete=1"]);

    let (status, _, _) = roundtrip(&gw, request("PUT", "/r/foo", b"hello")).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, headers, body) = roundtrip(&gw, request("GET", "/r/foo", b"")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_LENGTH], "5");
    assert!(headers.contains_key(header::LAST_MODIFIED));
    assert_eq!(&body[..], b"hello");
}

#[tokio::test]
async fn head_sends_headers_without_body() {
    let gw = gateway(&["mountpoint=/r,pool=p1,allow_put=1"]);
    roundtrip(&gw, request("PUT", "/r/foo.txt", b"hello")).await;

    let (status, headers, body) = roundtrip(&gw, request("HEAD", "/r/foo.txt", b"")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_LENGTH], "5");
    assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
    assert!(body.is_empty());
}

#[tokio::test]
async fn get_missing_returns_404() {
    let gw = gateway(&["mountpoint=/r,pool=p1,allow_put=1,allow_delete=1"]);
    let (status, _, _) = roundtrip(&gw, request("GET", "/r/missing", b"")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn put_without_permission_is_refused() {
    let gw = gateway(&["mountpoint=/r,pool=p1"]);

    let (status, _, _) = roundtrip(&gw, request("PUT", "/r/x", b"x")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    // nothing was written.
    let (status, _, _) = roundtrip(&gw, request("GET", "/r/x", b"")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn propfind_depth_zero_lists_root() {
    let gw = gateway(&["mountpoint=/r,pool=p1,allow_propfind=1"]);

    let req = Request::builder()
        .method("PROPFIND")
        .uri("/r/")
        .header("Depth", "0")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = roundtrip(&gw, req).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(headers[header::CONTENT_TYPE], "text/xml; charset=\"utf-8\"");

    let body = std::str::from_utf8(&body).unwrap();
    assert_eq!(body.matches("<response>").count(), 1);
    assert!(body.contains("<href>/</href>"));
}

#[tokio::test]
async fn propfind_without_depth_behaves_like_depth_zero() {
    let gw = gateway(&["mountpoint=/r,pool=p1,allow_propfind=1"]);
    let req = Request::builder()
        .method("PROPFIND")
        .uri("/r/")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = roundtrip(&gw, req).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(std::str::from_utf8(&body).unwrap().matches("<response>").count(), 1);
}

#[tokio::test]
async fn propfind_depth_one_lists_objects() {
    let cluster = MemCluster::new();
    let pool = cluster.open_pool("p1").unwrap();
    pool.write_sync("a", 0, b"aa").unwrap();
    pool.write_sync("b", 0, b"bbb").unwrap();

    let gw = gateway_with(
        Store::Cluster(cluster),
        &["mountpoint=/r,pool=p1,allow_propfind=1"],
    );

    let req = Request::builder()
        .method("PROPFIND")
        .uri("/r/")
        .header("Depth", "1")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = roundtrip(&gw, req).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);

    let body = std::str::from_utf8(&body).unwrap();
    assert!(body.contains("<href>/a</href>"));
    assert!(body.contains("<href>/b</href>"));
    assert!(body.contains("<getcontentlength>2</getcontentlength>"));
    assert!(body.contains("<getcontentlength>3</getcontentlength>"));
    assert!(body.ends_with("</multistatus>"));
}

#[tokio::test]
async fn propfind_single_item() {
    let gw = gateway(&["mountpoint=/,pool=p1,allow_put=1,allow_propfind=1"]);
    roundtrip(&gw, request("PUT", "/foo.txt", b"hello")).await;

    let (status, _, body) = roundtrip(&gw, request("PROPFIND", "/foo.txt", b"")).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    let body = std::str::from_utf8(&body).unwrap();
    assert!(body.contains("<href>/foo.txt</href>"));
    assert!(body.contains("<getcontentlength>5</getcontentlength>"));
    assert!(body.contains("<getcontenttype>text/plain</getcontenttype>"));
}

#[tokio::test]
async fn trailing_slash_mount_serves_its_root() {
    // the mountpoint was spelled with a trailing slash; its bare root
    // must still resolve to the root listing.
    let gw = gateway(&["mountpoint=/r/,pool=p1,allow_propfind=1"]);

    let req = Request::builder()
        .method("PROPFIND")
        .uri("/r/")
        .header("Depth", "0")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = roundtrip(&gw, req).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    let body = std::str::from_utf8(&body).unwrap();
    assert_eq!(body.matches("<response>").count(), 1);
    assert!(body.contains("<href>/</href>"));

    // anything but PROPFIND on the bare root is refused, not stat'ed.
    let (status, _, _) = roundtrip(&gw, request("GET", "/r/", b"")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn if_modified_since_yields_304() {
    let gw = gateway(&["mountpoint=/r,pool=p1,allow_put=1"]);
    roundtrip(&gw, request("PUT", "/r/foo", b"hello")).await;

    let (_, headers, _) = roundtrip(&gw, request("GET", "/r/foo", b"")).await;
    let last_modified = headers[header::LAST_MODIFIED].to_str().unwrap().to_string();

    let req = Request::builder()
        .method("GET")
        .uri("/r/foo")
        .header("If-Modified-Since", &last_modified)
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = roundtrip(&gw, req).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());

    // an older date is no match: full response.
    let req = Request::builder()
        .method("GET")
        .uri("/r/foo")
        .header("If-Modified-Since", "Thu, 01 Jan 1970 00:00:00 GMT")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = roundtrip(&gw, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"hello");
}

#[tokio::test]
async fn options_allow_reflects_permissions() {
    let gw = gateway(&["mountpoint=/r,pool=p1,allow_put=1"]);
    let (status, headers, _) = roundtrip(&gw, request("OPTIONS", "/r/foo", b"")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["Dav"], "1");
    assert_eq!(headers[header::ALLOW], "OPTIONS, GET, HEAD, PUT");

    let gw = gateway(&[
        "mountpoint=/r,pool=p1,allow_put=1,allow_delete=1,allow_mkcol=1,allow_propfind=1",
    ]);
    let (_, headers, _) = roundtrip(&gw, request("OPTIONS", "/r/foo", b"")).await;
    assert_eq!(
        headers[header::ALLOW],
        "OPTIONS, GET, HEAD, PUT, DELETE, MKCOL, PROPFIND"
    );
}

#[tokio::test]
async fn delete_twice() {
    let gw = gateway(&["mountpoint=/r,pool=p1,allow_put=1,allow_delete=1"]);
    roundtrip(&gw, request("PUT", "/r/foo", b"x")).await;

    let (status, _, _) = roundtrip(&gw, request("DELETE", "/r/foo", b"")).await;
    assert_eq!(status, StatusCode::OK);

    // the object is gone, so the stat preceding dispatch fails.
    let (status, _, _) = roundtrip(&gw, request("DELETE", "/r/foo", b"")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = roundtrip(&gw, request("GET", "/r/foo", b"")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn put_twice_keeps_second_payload() {
    let gw = gateway(&["mountpoint=/r,pool=p1,allow_put=1"]);
    roundtrip(&gw, request("PUT", "/r/foo", b"hello world")).await;

    let (status, _, _) = roundtrip(&gw, request("PUT", "/r/foo", b"bye")).await;
    assert_eq!(status, StatusCode::CREATED);

    // no stale tail from the longer first payload.
    let (status, headers, body) = roundtrip(&gw, request("GET", "/r/foo", b"")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_LENGTH], "3");
    assert_eq!(&body[..], b"bye");
}

#[tokio::test]
async fn mkcol_create_then_conflict() {
    let gw = gateway(&["mountpoint=/r/,pool=p1,allow_mkcol=1"]);

    let (status, _, _) = roundtrip(&gw, request("MKCOL", "/r/newpool", b"")).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, _) = roundtrip(&gw, request("MKCOL", "/r/newpool", b"")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn large_put_roundtrips_across_chunks() {
    let gw = gateway(&["mountpoint=/r,pool=p1,allow_put=1"]);

    // bigger than several write chunks, not chunk-aligned.
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let (status, _, _) = roundtrip(&gw, request("PUT", "/r/big", &payload)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, headers, body) = roundtrip(&gw, request("GET", "/r/big", b"")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_LENGTH], "100000");
    assert_eq!(&body[..], &payload[..]);
}

#[tokio::test]
async fn sync_mode_roundtrip() {
    let mut builder = DavGateway::builder(Store::Mem).lanes(2).synchronous(true);
    builder = builder.mount(MountSpec::parse("mountpoint=/r,pool=p1,allow_put=1,allow_delete=1").unwrap());
    let gw = builder.build().unwrap();

    let (status, _, _) = roundtrip(&gw, request("PUT", "/r/foo", b"hello")).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _, body) = roundtrip(&gw, request("GET", "/r/foo", b"")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"hello");
    let (status, _, _) = roundtrip(&gw, request("DELETE", "/r/foo", b"")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_method_is_refused() {
    let gw = gateway(&["mountpoint=/r,pool=p1,allow_put=1"]);
    let (status, _, _) = roundtrip(&gw, request("PATCH", "/r/foo", b"")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn root_get_is_refused() {
    let gw = gateway(&["mountpoint=/r,pool=p1,allow_propfind=1"]);
    let (status, _, _) = roundtrip(&gw, request("GET", "/r/", b"")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unresolved_path_is_404() {
    let gw = gateway(&["mountpoint=/r,pool=p1"]);
    let (status, _, _) = roundtrip(&gw, request("GET", "/elsewhere/foo", b"")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn default_mount_serves_verbatim_paths() {
    let cluster = MemCluster::new();
    let pool = cluster.open_pool("p1").unwrap();
    pool.write_sync("/other", 0, b"zz").unwrap();

    let gw = DavGateway::builder(Store::Cluster(cluster))
        .lanes(2)
        .default_mount(MountSpec::parse("mountpoint=/r,pool=p1").unwrap())
        .build()
        .unwrap();

    // no prefix matches, so the path is served verbatim from the default
    // mount's pool.
    let (status, _, body) = roundtrip(&gw, request("GET", "/other", b"")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"zz");
}

// -- a counting store, to show that gated methods never reach it --------

struct CountingCluster {
    inner: Arc<MemCluster>,
    ops: Arc<AtomicUsize>,
}

struct CountingPool {
    inner: Box<dyn Pool>,
    ops: Arc<AtomicUsize>,
}

impl Cluster for CountingCluster {
    fn open_pool(&self, pool: &str) -> StoreResult<Box<dyn Pool>> {
        Ok(Box::new(CountingPool {
            inner: self.inner.open_pool(pool)?,
            ops: self.ops.clone(),
        }))
    }

    fn create_pool(&self, name: &str) -> StoreResult<()> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.create_pool(name)
    }

    fn fsid(&self) -> String {
        self.inner.fsid()
    }
}

impl Pool for CountingPool {
    fn stat(&self, key: &str, done: AioComplete<ObjectStat>) -> StoreResult<()> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.stat(key, done)
    }

    fn read(&self, key: &str, off: u64, len: usize, done: AioComplete<Bytes>) -> StoreResult<()> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.read(key, off, len, done)
    }

    fn write(&self, key: &str, off: u64, data: Bytes, done: AioComplete<()>) -> StoreResult<()> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.write(key, off, data, done)
    }

    fn remove(&self, key: &str, done: AioComplete<()>) -> StoreResult<()> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(key, done)
    }

    fn stat_sync(&self, key: &str) -> StoreResult<ObjectStat> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.stat_sync(key)
    }

    fn read_sync(&self, key: &str, off: u64, len: usize) -> StoreResult<Bytes> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.read_sync(key, off, len)
    }

    fn write_sync(&self, key: &str, off: u64, data: &[u8]) -> StoreResult<()> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.write_sync(key, off, data)
    }

    fn remove_sync(&self, key: &str) -> StoreResult<()> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.remove_sync(key)
    }

    fn list(&self) -> StoreResult<Box<dyn ObjectList>> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.list()
    }
}

#[tokio::test]
async fn disallowed_methods_touch_no_store() {
    let ops = Arc::new(AtomicUsize::new(0));
    let cluster = Arc::new(CountingCluster {
        inner: MemCluster::new(),
        ops: ops.clone(),
    });
    let gw = gateway_with(Store::Cluster(cluster), &["mountpoint=/r,pool=p1"]);

    for method in ["PUT", "DELETE", "MKCOL", "PROPFIND"] {
        let (status, _, _) = roundtrip(&gw, request(method, "/r/foo", b"x")).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{}", method);
    }
    let (status, _, _) = roundtrip(&gw, request("OPTIONS", "/r/foo", b"")).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(ops.load(Ordering::SeqCst), 0);
}

// -- a store that never completes, to exercise the await timeout --------

struct StallCluster;

struct StallPool;

impl Cluster for StallCluster {
    fn open_pool(&self, _pool: &str) -> StoreResult<Box<dyn Pool>> {
        Ok(Box::new(StallPool))
    }

    fn create_pool(&self, _name: &str) -> StoreResult<()> {
        unreachable!("not used by the timeout test")
    }

    fn fsid(&self) -> String {
        "stall".to_string()
    }
}

impl Pool for StallPool {
    // Issues fine, never calls back.
    fn stat(&self, _key: &str, _done: AioComplete<ObjectStat>) -> StoreResult<()> {
        Ok(())
    }

    fn read(&self, _key: &str, _off: u64, _len: usize, _done: AioComplete<Bytes>) -> StoreResult<()> {
        Ok(())
    }

    fn write(&self, _key: &str, _off: u64, _data: Bytes, _done: AioComplete<()>) -> StoreResult<()> {
        Ok(())
    }

    fn remove(&self, _key: &str, _done: AioComplete<()>) -> StoreResult<()> {
        Ok(())
    }

    fn stat_sync(&self, _key: &str) -> StoreResult<ObjectStat> {
        Err(StoreError::Unavailable("stalled".to_string()))
    }

    fn read_sync(&self, _key: &str, _off: u64, _len: usize) -> StoreResult<Bytes> {
        Err(StoreError::Unavailable("stalled".to_string()))
    }

    fn write_sync(&self, _key: &str, _off: u64, _data: &[u8]) -> StoreResult<()> {
        Err(StoreError::Unavailable("stalled".to_string()))
    }

    fn remove_sync(&self, _key: &str) -> StoreResult<()> {
        Err(StoreError::Unavailable("stalled".to_string()))
    }

    fn list(&self) -> StoreResult<Box<dyn ObjectList>> {
        Err(StoreError::Unavailable("stalled".to_string()))
    }
}

#[tokio::test]
async fn stat_timeout_maps_to_403() {
    let gw = DavGateway::builder(Store::Cluster(Arc::new(StallCluster)))
        .lanes(1)
        .timeout(Duration::from_millis(50))
        .mount(MountSpec::parse("mountpoint=/r,pool=p1").unwrap())
        .build()
        .unwrap();

    let (status, _, _) = roundtrip(&gw, request("GET", "/r/foo", b"")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // the single lane was released and can be leased again; a second
    // request runs into the same timeout instead of hanging on the lease.
    let (status, _, _) = roundtrip(&gw, request("GET", "/r/foo", b"")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
