use crate::errors::RelayError;
use http_body_util::combinators::{BoxBody, UnsyncBoxBody};
use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;
use shared::http::full_body;

pub type HandlerBody = BoxBody<Bytes, RelayError>;
pub type RequestBody = UnsyncBoxBody<Bytes, RelayError>;

const JSON_CONTENT_TYPE: &str = "application/json";
const FALLBACK_ERROR_BODY: &[u8] = br#"{"error":"Internal Server Error"}"#;

/// Converts any incoming body into the boxed body handlers work with.
pub fn box_body<B>(body: B) -> RequestBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: std::fmt::Display,
{
    body.map_err(|e| RelayError::RequestBodyError(e.to_string()))
        .boxed_unsync()
}

/// Collects a request body, failing once more than `limit` bytes have arrived.
pub async fn read_body(body: RequestBody, limit: usize) -> Result<Bytes, RelayError> {
    Limited::new(body, limit)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| match e.downcast::<RelayError>() {
            Ok(inner) => *inner,
            Err(other) => RelayError::RequestBodyError(other.to_string()),
        })
}

/// True when the `Content-Type` is `application/json`, ignoring parameters and case.
pub fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(JSON_CONTENT_TYPE))
}

pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<HandlerBody> {
    let bytes = serde_json::to_vec(value).unwrap_or_else(|_| FALLBACK_ERROR_BODY.to_vec());

    let mut response = Response::new(full_body(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}

pub fn text_response(status: StatusCode, text: &'static str) -> Response<HandlerBody> {
    let mut response = Response::new(full_body(text));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
