use http::{Response, StatusCode};

use super::LaneOps;
use crate::body::Body;
use crate::errors::{DavError, DavResult};

impl crate::DavGateway {
    pub(crate) async fn handle_delete(&self, ops: LaneOps, key: &str) -> DavResult<Response<Body>> {
        if let Err(e) = ops.remove(key).await {
            debug!("delete {} failed: {}", key, e);
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }
        Ok(Response::new(Body::empty()))
    }
}
