//! Error types for the origin-pull cache

use std::fmt;

/// Failure talking to the origin server
#[derive(Debug)]
pub enum OriginError {
    /// Transport failure (connect, timeout, TLS, body read)
    Http(Box<reqwest::Error>),
    /// Origin answered with a non-success status
    Status(u16),
    /// Origin answered with a redirect instead of the resource
    Redirect(u16),
    /// Failure reported by a non-HTTP origin implementation
    Other(String),
}

impl fmt::Display for OriginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginError::Http(err) => write!(f, "origin request failed: {}", err),
            OriginError::Status(code) => write!(f, "origin returned status {}", code),
            OriginError::Redirect(code) => {
                write!(f, "origin redirected (status {}), resource format is invalid", code)
            }
            OriginError::Other(msg) => write!(f, "origin error: {}", msg),
        }
    }
}

impl std::error::Error for OriginError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OriginError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for OriginError {
    fn from(err: reqwest::Error) -> Self {
        OriginError::Http(Box::new(err))
    }
}

/// Terminal error for a single cache request.
///
/// Each variant maps to exactly one HTTP status; the front end renders it once.
#[derive(Debug)]
pub enum CacheError {
    /// Missing extension, disallowed directory or malformed path
    BadRequest(String),
    /// Extension not accepted or without a MIME type
    UnsupportedMediaType(String),
    /// Origin HEAD failed (unreachable or resource absent)
    NotFound(String),
    /// Origin GET failed or the refresh could not complete
    InternalServerError(String),
    /// Another refresh of the same entry holds the lock
    ServiceBusy(String),
    /// Local filesystem failure
    Io(Box<std::io::Error>),
}

impl CacheError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CacheError::BadRequest(_) => 400,
            CacheError::UnsupportedMediaType(_) => 415,
            CacheError::NotFound(_) => 404,
            CacheError::InternalServerError(_) => 500,
            CacheError::ServiceBusy(_) => 503,
            CacheError::Io(_) => 500,
        }
    }

    /// Diagnostic text that is safe to show to clients.
    ///
    /// Local I/O errors are reduced to a generic message.
    pub fn public_message(&self) -> String {
        match self {
            CacheError::BadRequest(msg)
            | CacheError::UnsupportedMediaType(msg)
            | CacheError::NotFound(msg)
            | CacheError::InternalServerError(msg)
            | CacheError::ServiceBusy(msg) => msg.clone(),
            CacheError::Io(_) => "cache storage error".to_string(),
        }
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            CacheError::UnsupportedMediaType(msg) => write!(f, "Unsupported media type: {}", msg),
            CacheError::NotFound(msg) => write!(f, "Not found: {}", msg),
            CacheError::InternalServerError(msg) => write!(f, "Internal server error: {}", msg),
            CacheError::ServiceBusy(msg) => write!(f, "Service busy: {}", msg),
            CacheError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(CacheError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(CacheError::UnsupportedMediaType("x".into()).status_code(), 415);
        assert_eq!(CacheError::NotFound("x".into()).status_code(), 404);
        assert_eq!(CacheError::InternalServerError("x".into()).status_code(), 500);
        assert_eq!(CacheError::ServiceBusy("x".into()).status_code(), 503);
    }

    #[test]
    fn test_io_error_hides_details() {
        let err = CacheError::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/var/cache/secret denied",
        ));
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.public_message(), "cache storage error");
        assert!(format!("{}", err).contains("denied"));
    }

    #[test]
    fn test_origin_error_display() {
        assert_eq!(
            format!("{}", OriginError::Status(404)),
            "origin returned status 404"
        );
        assert!(format!("{}", OriginError::Redirect(302)).contains("302"));
    }

    #[test]
    fn test_error_is_debug() {
        let err = CacheError::ServiceBusy("locked".to_string());
        assert!(format!("{:?}", err).contains("ServiceBusy"));
    }
}
