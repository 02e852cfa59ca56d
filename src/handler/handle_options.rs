use headers::HeaderMapExt;
use http::Response;

use crate::body::Body;
use crate::errors::DavResult;
use crate::mount::{DavPermissions, Mount};

impl crate::DavGateway {
    pub(crate) fn handle_options(&self, mount: &Mount) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let h = res.headers_mut();
        h.insert("Dav", "1".parse().unwrap());
        h.typed_insert(headers::ContentLength(0));

        // The always-on methods first, then the per-mount extensions.
        let mut allow = String::from("OPTIONS, GET, HEAD");
        let perms = mount.permissions();
        if perms.contains(DavPermissions::PUT) {
            allow.push_str(", PUT");
        }
        if perms.contains(DavPermissions::DELETE) {
            allow.push_str(", DELETE");
        }
        if perms.contains(DavPermissions::MKCOL) {
            allow.push_str(", MKCOL");
        }
        if perms.contains(DavPermissions::PROPFIND) {
            allow.push_str(", PROPFIND");
        }
        h.insert("Allow", allow.parse().unwrap());

        Ok(res)
    }
}
