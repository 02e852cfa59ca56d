use http::{Response, StatusCode};

use crate::body::Body;
use crate::errors::{DavError, DavResult};
use crate::mount::Mount;
use crate::store::StoreError;

impl crate::DavGateway {
    pub(crate) fn handle_mkcol(&self, mount: &Mount, key: &str) -> DavResult<Response<Body>> {
        match mount.cluster().create_pool(key) {
            // RFC 4918 9.3.1: MKCOL on an existing resource.
            Err(e @ StoreError::Exists) => Err(DavError::Store(e)),
            Err(e) => {
                debug!("mkcol {} failed: {}", key, e);
                Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))
            }
            Ok(()) => {
                let mut res = Response::new(Body::empty());
                *res.status_mut() = StatusCode::CREATED;
                Ok(res)
            }
        }
    }
}
