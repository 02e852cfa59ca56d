//! ## WebDAV gateway for RADOS object pools
//!
//! This library exposes Ceph/RADOS object pools as an HTTP resource tree
//! with a partial [Webdav] surface: plain HTTP (OPTIONS/GET/HEAD/PUT/DELETE)
//! plus MKCOL and PROPFIND. Each configured [mount][MountSpec] binds one URL
//! prefix to one pool; requests are translated into object-store operations
//! and the results streamed back.
//!
//! A `handler` is a piece of code that takes a `http::Request`, processes it
//! in some way, and then generates a `http::Response`. This library is a
//! `handler` that maps the HTTP/Webdav protocol to an object store, so it
//! can be used with HTTP servers like [hyper] that work with the standard
//! `http` and `http_body` types.
//!
//! ## Backend interfaces.
//!
//! Storage sits behind the [`store::Cluster`] / [`store::Pool`] traits,
//! whose asynchronous half is shaped like librados AIO: one operation per
//! call, completion delivered through a callback that may arrive on a
//! store-internal thread. The gateway bridges those callbacks back into
//! its request tasks; a generation counter per worker lane makes
//! completions from abandoned (timed-out) operations harmless.
//!
//! Included backends:
//!
//! - `memstore` (default feature): ephemeral in-memory store, used by the
//!   test suite and handy for demos.
//! - `rados` (opt-in feature): librados via the `ceph` crate, one
//!   connected cluster per mount.
//!
//! ## Example.
//!
//! Example server using [hyper] that serves the pool `data001` read-write
//! under the prefix `/r`:
//!
//! ```no_run
//! use std::convert::Infallible;
//! use dav_rados::{DavGateway, MountSpec, Store};
//!
//! #[tokio::main]
//! async fn main() {
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!
//!     let gateway = DavGateway::builder(Store::Mem)
//!         .mount(MountSpec::parse("mountpoint=/r,pool=data001,allow_put=1,allow_delete=1").unwrap())
//!         .build()
//!         .unwrap();
//!
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let gateway = gateway.clone();
//!         async move {
//!             let func = move |req| {
//!                 let gateway = gateway.clone();
//!                 async move { Ok::<_, Infallible>(gateway.handle(req).await) }
//!             };
//!             Ok::<_, Infallible>(hyper::service::service_fn(func))
//!         }
//!     });
//!
//!     println!("Serving on {:?}", addr);
//!     let _ = hyper::Server::bind(&addr)
//!         .serve(make_service)
//!         .await
//!         .map_err(|e| eprintln!("server error: {}", e));
//! }
//! ```
//!
//! [Webdav]: http://www.webdav.org/specs/rfc4918.html
//! [hyper]: https://hyper.rs/

#[macro_use]
extern crate log;

mod aio;
mod errors;
mod handler;
mod mount;
mod multistatus;
mod util;

pub mod body;
pub mod store;

pub use crate::errors::{DavError, DavResult};
pub use crate::handler::{DavGateway, GatewayBuilder, Store};
pub use crate::mount::{DavPermissions, Mount, MountSpec, MountSpecError};
pub use crate::util::{dav_method, DavMethod};
