//!
//! src/errors.rs  Oct 14th, 2026
//!
//! Defines enums and methods of error conversion
//! for errors the crawler and catalog api use
//!
//!

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlerError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("rate limited: retry {0:?}")]
    RateLimited(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("xml error: {0}")]
    Xml(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("db error: {0}")]
    Db(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl CrawlerError {
    /// Whether a later attempt could plausibly succeed. Network failures,
    /// throttling and upstream 5xx are transient, everything else
    /// (missing GUIDs, bad XML, 4xx) is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            CrawlerError::Http(_) | CrawlerError::RateLimited(_) => true,
            CrawlerError::Status { status, .. } =>
                *status == 429 || (500..600).contains(status),
            _ => false
        }
    }
}

impl From<reqwest::Error> for CrawlerError {
    fn from(e: reqwest::Error) -> Self { CrawlerError::Http(e.to_string()) }
}

impl From<serde_json::Error> for CrawlerError {
    fn from(e: serde_json::Error) -> Self { CrawlerError::Parse(e.to_string()) }
}

impl From<sqlx::Error> for CrawlerError {
    fn from(e: sqlx::Error) -> Self { CrawlerError::Db(e.to_string()) }
}

impl From<quick_xml::Error> for CrawlerError {
    fn from(e: quick_xml::Error) -> Self { CrawlerError::Xml(e.to_string()) }
}

impl From<quick_xml::events::attributes::AttrError> for CrawlerError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        CrawlerError::Xml(e.to_string())
    }
}

/// Api responses never leak internals: the detail goes to the log and the
/// caller gets a generic message
impl IntoResponse for CrawlerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CrawlerError::NotFound(what) => (StatusCode::NOT_FOUND, format!("not found: {what}")),
            CrawlerError::Parse(what)    => (StatusCode::BAD_REQUEST, format!("bad request: {what}")),
            _ => {
                tracing::error!(error = %self, "api.internal_error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(CrawlerError::Http("connection reset".into()).is_transient());
        assert!(CrawlerError::RateLimited("30s".into()).is_transient());
        assert!(CrawlerError::Status { status: 503, url: "u".into() }.is_transient());
        assert!(CrawlerError::Status { status: 429, url: "u".into() }.is_transient());

        assert!(!CrawlerError::Status { status: 400, url: "u".into() }.is_transient());
        assert!(!CrawlerError::NotFound("guid".into()).is_transient());
        assert!(!CrawlerError::Xml("eof".into()).is_transient());
    }

    #[test]
    fn internal_errors_are_generic_500() {
        let resp = CrawlerError::Db("disk full at /secret/path".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = CrawlerError::NotFound("track".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
