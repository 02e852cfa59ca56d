use std::fmt;
use std::io;

use http::StatusCode;

use crate::store::StoreError;

/// Errors bubbling out of the request handlers.
///
/// Most handlers map store failures to a status code on the spot; whatever
/// reaches the top level is turned into a bare status response here.
#[derive(Debug)]
pub enum DavError {
    /// Respond with this status and an empty body.
    Status(StatusCode),
    /// A store operation failed and no handler picked a more specific status.
    Store(StoreError),
    /// Request or response body I/O failed.
    Io(io::Error),
    /// The multistatus writer failed.
    Xml(xml::writer::Error),
    /// The request method is not one this gateway serves.
    UnknownMethod,
}

pub type DavResult<T> = Result<T, DavError>;

impl DavError {
    pub fn statuscode(&self) -> StatusCode {
        match self {
            DavError::Status(code) => *code,
            DavError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            DavError::Store(StoreError::Exists) => StatusCode::METHOD_NOT_ALLOWED,
            DavError::Store(StoreError::Forbidden) => StatusCode::FORBIDDEN,
            DavError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::Io(_) | DavError::Xml(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::UnknownMethod => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl fmt::Display for DavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DavError::Status(code) => write!(f, "{}", code),
            DavError::Store(e) => write!(f, "store: {}", e),
            DavError::Io(e) => write!(f, "io: {}", e),
            DavError::Xml(e) => write!(f, "xml: {}", e),
            DavError::UnknownMethod => write!(f, "unknown method"),
        }
    }
}

impl std::error::Error for DavError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DavError::Store(e) => Some(e),
            DavError::Io(e) => Some(e),
            DavError::Xml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StatusCode> for DavError {
    fn from(code: StatusCode) -> Self {
        DavError::Status(code)
    }
}

impl From<StoreError> for DavError {
    fn from(e: StoreError) -> Self {
        DavError::Store(e)
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::Io(e)
    }
}

impl From<xml::writer::Error> for DavError {
    fn from(e: xml::writer::Error) -> Self {
        DavError::Xml(e)
    }
}
