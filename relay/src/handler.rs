use crate::api::utils::{HandlerBody, RequestBody};
use crate::errors::RelayError;
use async_trait::async_trait;
use hyper::{Request, Response};

/// An endpoint the router can dispatch to.
///
/// Handlers report failures as `RelayError`; the router turns those into
/// responses, so nothing a handler returns can take the connection down.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Name used in logs and as the `route` metric tag.
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        request: Request<RequestBody>,
    ) -> Result<Response<HandlerBody>, RelayError>;
}
