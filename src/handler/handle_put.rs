use std::error::Error as StdError;

use bytes::{Buf, BytesMut};
use http::{Response, StatusCode};
use http_body::Body as HttpBody;
use pin_utils::pin_mut;

use super::LaneOps;
use crate::body::Body;
use crate::errors::{DavError, DavResult};

// One store write per body chunk of at most this size.
pub(crate) const WRITE_CHUNK_SIZE: usize = 32 * 1024;

impl crate::DavGateway {
    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        ops: LaneOps,
        key: &str,
        existed: bool,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        // Offset writes would leave a stale tail when the new body is
        // shorter than the old object; delete up front instead.
        if existed {
            if let Err(e) = ops.remove(key).await {
                debug!("put {}: removing old object failed: {}", key, e);
                return Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR));
            }
        }

        pin_mut!(body);
        let mut pending = BytesMut::new();
        let mut off: u64 = 0;

        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))?;
            while buf.has_remaining() {
                let piece = buf.chunk();
                let n = piece.len();
                pending.extend_from_slice(piece);
                buf.advance(n);

                while pending.len() >= WRITE_CHUNK_SIZE {
                    let out = pending.split_to(WRITE_CHUNK_SIZE).freeze();
                    let len = out.len() as u64;
                    if let Err(e) = ops.write(key, off, out).await {
                        debug!("put {} at {} failed: {}", key, off, e);
                        return Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR));
                    }
                    off += len;
                }
            }
        }

        if !pending.is_empty() {
            let out = pending.freeze();
            if let Err(e) = ops.write(key, off, out).await {
                debug!("put {} at {} failed: {}", key, off, e);
                return Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR));
            }
        }

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::CREATED;
        Ok(res)
    }
}
