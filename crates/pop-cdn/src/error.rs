//! Error types for the pop-cdn edge server

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use origin_pull_cache::{CacheError, OriginError};
use std::fmt;

/// Startup errors
#[derive(Debug)]
pub enum PopCdnError {
    Cache(CacheError),
    Origin(OriginError),
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for PopCdnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PopCdnError::Cache(err) => write!(f, "Cache error: {}", err),
            PopCdnError::Origin(err) => write!(f, "Origin client error: {}", err),
            PopCdnError::Io(err) => write!(f, "IO error: {}", err),
            PopCdnError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for PopCdnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PopCdnError::Cache(err) => Some(err),
            PopCdnError::Origin(err) => Some(err),
            PopCdnError::Io(err) => Some(err.as_ref()),
            PopCdnError::Config(_) => None,
        }
    }
}

impl From<CacheError> for PopCdnError {
    fn from(err: CacheError) -> Self {
        PopCdnError::Cache(err)
    }
}

impl From<OriginError> for PopCdnError {
    fn from(err: OriginError) -> Self {
        PopCdnError::Origin(err)
    }
}

impl From<std::io::Error> for PopCdnError {
    fn from(err: std::io::Error) -> Self {
        PopCdnError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for PopCdnError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        PopCdnError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PopCdnError>;

/// Request error rendered as the HTML error page.
///
/// This is the only place a [`CacheError`] becomes a response.
#[derive(Debug)]
pub struct AppError(pub CacheError);

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError(err)
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Minimal error page naming the status and a diagnostic message
pub fn render_error_page(status: StatusCode, message: &str) -> String {
    let title = escape_html(&format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    ));
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta http-equiv=\"Content-Type\" content=\"text/html; charset=utf-8\">\n<title>{title}</title>\n</head>\n<body>\n<h4>pop-cdn</h4>\n<h4>{title}</h4>\n<p>{message}</p>\n</body>\n</html>\n",
        title = title,
        message = escape_html(message),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match &self.0 {
            CacheError::InternalServerError(_) | CacheError::Io(_) => {
                tracing::error!(error = %self.0, "Internal server error");
            }
            _ => tracing::debug!(error = %self.0, status = status.as_u16(), "Request rejected"),
        }

        let mut response = (
            status,
            [
                (header::CONTENT_TYPE, "text/html; charset=utf-8"),
                (header::CACHE_CONTROL, "private"),
            ],
            render_error_page(status, &self.0.public_message()),
        )
            .into_response();

        if matches!(self.0, CacheError::ServiceBusy(_)) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
        }
        response
    }
}
