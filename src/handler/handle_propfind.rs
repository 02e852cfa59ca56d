use std::error::Error as StdError;

use async_stream::try_stream;
use bytes::Buf;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use super::{drain_body, stream_error, LaneOps};
use crate::body::Body;
use crate::errors::DavResult;
use crate::multistatus::{MultiStatus, CONTENT_TYPE as XML_CONTENT_TYPE};
use crate::store::ObjectStat;

impl crate::DavGateway {
    /// PROPFIND on a single object: one buffered multistatus entry for
    /// `"/" + key` with the stats from the dispatcher's stat.
    pub(crate) async fn handle_propfind_item<ReqBody, ReqData, ReqError>(
        &self,
        key: &str,
        stat: &ObjectStat,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        drain_body(body).await;

        let mut ms = MultiStatus::new()?;
        let href = format!("/{}", key);
        ms.add_item(&href, Some(stat), mime_guess::from_path(key).first_raw())?;
        Ok(propfind_response(Body::from(ms.close()?)))
    }

    /// PROPFIND on the mount root. Depth 0 describes the root itself;
    /// any greater depth enumerates the pool, streaming one entry per
    /// object (the namespace is flat, so depth 1 and deeper coincide).
    pub(crate) async fn handle_propfind_root<ReqBody, ReqData, ReqError>(
        &self,
        ops: LaneOps,
        req: &Request<()>,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        drain_body(body).await;

        let depth = req
            .headers()
            .get("Depth")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);

        if depth == 0 {
            let mut ms = MultiStatus::new()?;
            ms.add_item("/", None, None)?;
            return Ok(propfind_response(Body::from(ms.close()?)));
        }

        // Stat each object through the lane the stream now owns and flush
        // the document after every entry.
        let stream = try_stream! {
            let mut ms = MultiStatus::new().map_err(stream_error)?;
            let mut cursor = ops.list().map_err(stream_error)?;
            while let Some(name) = cursor.next_object().map_err(stream_error)? {
                let stat = ops.stat(&name).await.map_err(stream_error)?;
                let href = format!("/{}", name);
                ms.add_item(&href, Some(&stat), mime_guess::from_path(&name).first_raw())
                    .map_err(stream_error)?;
                yield ms.take();
            }
            yield ms.close().map_err(stream_error)?;
        };
        Ok(propfind_response(Body::stream(stream)))
    }
}

fn propfind_response(body: Body) -> Response<Body> {
    let mut res = Response::new(body);
    *res.status_mut() = StatusCode::MULTI_STATUS;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE));
    res
}
