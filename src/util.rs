use std::io::{Cursor, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use headers::Header;

use crate::errors::{DavError, DavResult};

/// The methods this gateway dispatches on. Everything else is refused
/// with 405 before any store I/O happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DavMethod {
    Options,
    Head,
    Get,
    Put,
    Delete,
    MkCol,
    PropFind,
}

// translate the http method into our own enum that has the
// webdav extension methods as well.
pub fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::OPTIONS => DavMethod::Options,
        http::Method::HEAD => DavMethod::Head,
        http::Method::GET => DavMethod::Get,
        http::Method::PUT => DavMethod::Put,
        http::Method::DELETE => DavMethod::Delete,
        _ => match m.as_str() {
            "MKCOL" => DavMethod::MkCol,
            "PROPFIND" => DavMethod::PropFind,
            _ => return Err(DavError::UnknownMethod),
        },
    };
    Ok(m)
}

pub fn systemtime_to_httpdate(t: SystemTime) -> String {
    let d = headers::Date::from(t);
    let mut v = Vec::new();
    d.encode(&mut v);
    v[0].to_str().unwrap().to_owned()
}

// SystemTime has nanosecond precision. Round it down to the
// nearest second, because an HttpDate has second precision.
pub fn round_time(t: SystemTime) -> SystemTime {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => UNIX_EPOCH + Duration::from_secs(d.as_secs()),
        Err(_) => t,
    }
}

// A buffer that implements "Write", drained in chunks while streaming.
pub struct MemBuffer(Cursor<Vec<u8>>);

impl MemBuffer {
    pub fn new() -> MemBuffer {
        MemBuffer(Cursor::new(Vec::new()))
    }

    pub fn take(&mut self) -> Bytes {
        let buf = std::mem::take(self.0.get_mut());
        self.0.set_position(0);
        Bytes::from(buf)
    }
}

impl Write for MemBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
