use crate::api::utils::{HandlerBody, RequestBody, text_response};
use crate::errors::RelayError;
use crate::handler::Handler;
use async_trait::async_trait;
use hyper::{Request, Response, StatusCode};

pub const GREETING: &str = "Hello from csv-relay!\n";

/// `GET /`. Fixed greeting used by hosting platforms as a liveness check.
pub struct LandingHandler;

#[async_trait]
impl Handler for LandingHandler {
    fn name(&self) -> &'static str {
        "landing"
    }

    async fn handle(
        &self,
        _request: Request<RequestBody>,
    ) -> Result<Response<HandlerBody>, RelayError> {
        Ok(text_response(StatusCode::OK, GREETING))
    }
}

/// `GET /health`
pub struct HealthHandler;

#[async_trait]
impl Handler for HealthHandler {
    fn name(&self) -> &'static str {
        "health"
    }

    async fn handle(
        &self,
        _request: Request<RequestBody>,
    ) -> Result<Response<HandlerBody>, RelayError> {
        Ok(text_response(StatusCode::OK, "ok\n"))
    }
}
