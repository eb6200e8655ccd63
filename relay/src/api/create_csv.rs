//! `POST /create-csv`: hands the `csv_text` field of a JSON body back as a CSV file.
//!
//! Checks run in a fixed order and the first failure wins:
//! 1. the server has an API key configured (500 otherwise)
//! 2. the `x-api-key` header matches it exactly (401)
//! 3. the body carries a non-empty string `csv_text` (400)
//!
//! The body is only read once the caller is authenticated. The payload is
//! returned byte for byte and is never logged.

use crate::api::utils::{HandlerBody, RequestBody, is_json_content_type, read_body};
use crate::config::ApiKey;
use crate::errors::RelayError;
use crate::handler::Handler;
use async_trait::async_trait;
use hyper::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap, HeaderValue};
use hyper::{Request, Response};
use serde_json::Value;
use shared::http::full_body;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";
const CSV_DISPOSITION: &str = "attachment; filename=\"result.csv\"";

pub struct CreateCsvHandler {
    api_key: Option<ApiKey>,
    max_body_bytes: usize,
}

impl CreateCsvHandler {
    pub fn new(api_key: Option<ApiKey>, max_body_bytes: usize) -> Self {
        Self {
            api_key,
            max_body_bytes,
        }
    }
}

#[async_trait]
impl Handler for CreateCsvHandler {
    fn name(&self) -> &'static str {
        "create_csv"
    }

    async fn handle(
        &self,
        request: Request<RequestBody>,
    ) -> Result<Response<HandlerBody>, RelayError> {
        let expected = self.api_key.as_ref().ok_or(RelayError::MissingApiKey)?;
        authenticate(request.headers(), expected)?;

        // Only JSON bodies are parsed; anything else is treated as an empty object.
        if !is_json_content_type(request.headers()) {
            return Err(RelayError::MissingCsvText);
        }

        let body = read_body(request.into_body(), self.max_body_bytes).await?;
        let csv_text = extract_csv_text(&body)?;

        Ok(csv_response(csv_text))
    }
}

fn authenticate(headers: &HeaderMap, expected: &ApiKey) -> Result<(), RelayError> {
    let provided = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    match provided {
        Some(key) if expected.matches(key) => Ok(()),
        _ => Err(RelayError::Unauthorized),
    }
}

fn extract_csv_text(body: &[u8]) -> Result<String, RelayError> {
    if body.trim_ascii().is_empty() {
        return Err(RelayError::MissingCsvText);
    }

    match serde_json::from_slice::<Value>(body)? {
        Value::Object(mut fields) => match fields.remove("csv_text") {
            Some(Value::String(text)) if !text.is_empty() => Ok(text),
            _ => Err(RelayError::MissingCsvText),
        },
        _ => Err(RelayError::MissingCsvText),
    }
}

fn csv_response(csv_text: String) -> Response<HandlerBody> {
    let mut response = Response::new(full_body(csv_text));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(CSV_CONTENT_TYPE));
    headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static(CSV_DISPOSITION));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::utils::box_body;
    use crate::config::MAX_BODY_BYTES;
    use http_body_util::{BodyExt, Full};
    use hyper::body::Bytes;

    fn handler(key: Option<&str>) -> CreateCsvHandler {
        CreateCsvHandler::new(key.and_then(ApiKey::new), MAX_BODY_BYTES)
    }

    fn request(key: Option<&str>, body: impl Into<Bytes>) -> Request<RequestBody> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/create-csv")
            .header(CONTENT_TYPE, "application/json");
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(box_body(Full::new(body.into()))).unwrap()
    }

    async fn body_bytes(response: Response<HandlerBody>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_relays_csv_text() {
        let response = handler(Some("secret123"))
            .handle(request(Some("secret123"), r#"{"csv_text":"a,b\n1,2\n"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/csv; charset=utf-8");
        assert_eq!(
            response.headers()[CONTENT_DISPOSITION],
            "attachment; filename=\"result.csv\""
        );
        assert_eq!(body_bytes(response).await.as_ref(), b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_payload_is_byte_identical() {
        let payloads = [
            "x",
            "name,city\n\"Doe, Jane\",Zürich\r\n",
            "no trailing newline",
            "\n\n,,\n",
            "列1,列2\n値,🙂\n",
            "tab\tseparated\\with \"quotes\"",
        ];

        let handler = handler(Some("k"));
        for payload in payloads {
            let body = serde_json::to_vec(&serde_json::json!({ "csv_text": payload })).unwrap();
            let response = handler.handle(request(Some("k"), body)).await.unwrap();
            assert_eq!(response.status(), 200);
            assert_eq!(body_bytes(response).await.as_ref(), payload.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_extra_fields_are_ignored() {
        let response = handler(Some("k"))
            .handle(request(Some("k"), r#"{"csv_text":"a","other":[1,2]}"#))
            .await
            .unwrap();
        assert_eq!(body_bytes(response).await.as_ref(), b"a");
    }

    #[tokio::test]
    async fn test_missing_server_key() {
        let err = handler(None)
            .handle(request(Some("secret123"), r#"{"csv_text":"a"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::MissingApiKey));

        // Checked before anything the caller sent.
        let err = handler(None)
            .handle(request(None, "not json"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::MissingApiKey));
    }

    #[tokio::test]
    async fn test_wrong_or_missing_key() {
        let handler = handler(Some("secret123"));
        for key in [Some("wrong"), Some(""), Some("secret123 "), Some("Secret123"), None] {
            let err = handler
                .handle(request(key, r#"{"csv_text":"a"}"#))
                .await
                .unwrap_err();
            assert!(matches!(err, RelayError::Unauthorized), "{key:?}");
        }
    }

    #[tokio::test]
    async fn test_unauthorized_wins_over_bad_body() {
        let handler = handler(Some("secret123"));
        for body in ["{oops", r#"{"csv_text":123}"#, ""] {
            let err = handler
                .handle(request(Some("wrong"), body))
                .await
                .unwrap_err();
            assert!(matches!(err, RelayError::Unauthorized), "{body}");
        }
    }

    #[tokio::test]
    async fn test_invalid_csv_text() {
        let handler = handler(Some("k"));
        let bodies = [
            r#"{}"#,
            r#"{"csv_text":null}"#,
            r#"{"csv_text":123}"#,
            r#"{"csv_text":["a","b"]}"#,
            r#"{"csv_text":{"a":1}}"#,
            r#"{"csv_text":true}"#,
            r#"{"csv_text":""}"#,
            r#"["csv_text"]"#,
            r#""a,b""#,
            "",
            "  \n",
        ];

        for body in bodies {
            let err = handler.handle(request(Some("k"), body)).await.unwrap_err();
            assert!(matches!(err, RelayError::MissingCsvText), "{body}");
        }
    }

    #[tokio::test]
    async fn test_non_json_content_type() {
        let request = Request::builder()
            .method("POST")
            .uri("/create-csv")
            .header(API_KEY_HEADER, "k")
            .header(CONTENT_TYPE, "text/plain")
            .body(box_body(Full::new(Bytes::from_static(br#"{"csv_text":"a"}"#))))
            .unwrap();

        let err = handler(Some("k")).handle(request).await.unwrap_err();
        assert!(matches!(err, RelayError::MissingCsvText));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let err = handler(Some("k"))
            .handle(request(Some("k"), r#"{"csv_text": "a"#))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidJson(_)));
        assert!(err.is_internal());
    }

    #[tokio::test]
    async fn test_body_over_limit() {
        let handler = CreateCsvHandler::new(ApiKey::new("k"), 16);
        let err = handler
            .handle(request(Some("k"), r#"{"csv_text":"0123456789"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::RequestBodyError(_)));
    }

    #[tokio::test]
    async fn test_idempotent() {
        let handler = handler(Some("k"));
        let mut bodies = Vec::new();
        for _ in 0..2 {
            let response = handler
                .handle(request(Some("k"), r#"{"csv_text":"a,b\n"}"#))
                .await
                .unwrap();
            assert_eq!(response.status(), 200);
            bodies.push(body_bytes(response).await);
        }
        assert_eq!(bodies[0], bodies[1]);
    }
}
