use crate::api::utils::{HandlerBody, json_response};
use hyper::header::{ALLOW, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Errors that can occur while serving a request
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Server API_KEY is not set")]
    MissingApiKey,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("csv_text is required (string)")]
    MissingCsvText,

    #[error("Not Found")]
    NotFound,

    #[error("Method Not Allowed")]
    MethodNotAllowed { allow: &'static str },

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Failed to parse request body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            RelayError::MissingCsvText => StatusCode::BAD_REQUEST,
            RelayError::NotFound => StatusCode::NOT_FOUND,
            RelayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            RelayError::MissingApiKey
            | RelayError::RequestBodyError(_)
            | RelayError::InvalidJson(_)
            | RelayError::InternalError(_)
            | RelayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Unexpected faults, reported to the caller with a generic message plus detail.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            RelayError::RequestBodyError(_)
                | RelayError::InvalidJson(_)
                | RelayError::InternalError(_)
                | RelayError::Io(_)
        )
    }

    pub fn into_response(self) -> Response<HandlerBody> {
        let body = if self.is_internal() {
            ErrorBody {
                error: "Internal Server Error".into(),
                detail: Some(self.to_string()),
            }
        } else {
            ErrorBody {
                error: self.to_string(),
                detail: None,
            }
        };

        let mut response = json_response(self.status(), &body);
        if let RelayError::MethodNotAllowed { allow } = self {
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static(allow));
        }
        response
    }
}
