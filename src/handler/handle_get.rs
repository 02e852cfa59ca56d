use std::io;

use async_stream::try_stream;
use bytes::Bytes;
use futures_util::Stream;
use headers::HeaderMapExt;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response};

use super::{stream_error, LaneOps};
use crate::body::Body;
use crate::errors::DavResult;
use crate::store::ObjectStat;

// Objects are streamed out in chunks of at most this size.
pub(crate) const READ_CHUNK_SIZE: usize = 8 * 1024;

impl crate::DavGateway {
    pub(crate) fn handle_get(
        &self,
        ops: LaneOps,
        req: &Request<()>,
        key: String,
        stat: ObjectStat,
        head: bool,
    ) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        // The mime type comes from the request path; all headers are
        // sent even when the body is skipped.
        if let Some(mime) = mime_guess::from_path(req.uri().path()).first_raw() {
            res.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(mime));
        }
        res.headers_mut()
            .typed_insert(headers::LastModified::from(stat.modified));
        res.headers_mut()
            .typed_insert(headers::ContentLength(stat.size));

        if !head {
            *res.body_mut() = Body::stream(read_stream(ops, key, stat.size));
        }
        Ok(res)
    }
}

// Chunked object read. An error or short read aborts the stream, which
// truncates the response; the 200 header is long gone by then.
fn read_stream(
    ops: LaneOps,
    key: String,
    size: u64,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    try_stream! {
        let mut remaining = size;
        let mut off: u64 = 0;
        while remaining > 0 {
            let want = remaining.min(READ_CHUNK_SIZE as u64) as usize;
            let chunk = ops.read(&key, off, want).await.map_err(stream_error)?;
            if chunk.is_empty() {
                short_read(&key, off)?;
            }
            off += chunk.len() as u64;
            remaining -= chunk.len() as u64;
            yield chunk;
        }
    }
}

// A zero-length read before `remaining` ran out means the object shrank
// under us.
fn short_read(key: &str, off: u64) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("short read on {} at {}", key, off),
    ))
}
