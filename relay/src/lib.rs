pub mod api;
pub mod config;
pub mod errors;
pub mod handler;
pub mod metrics_defs;
pub mod router;

use api::utils::{HandlerBody, box_body};
use errors::RelayError;
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response};
use router::Router;
use shared::http::run_http_service;
use std::pin::Pin;

pub async fn run(config: config::Config) -> Result<(), RelayError> {
    if config.api_key.is_none() {
        tracing::warn!("APIKEY is not set, /create-csv will answer 500 until it is configured");
    }

    let relay_service = RelayService::new(&config);
    run_http_service(
        &config.listener.host,
        config.listener.port,
        config.timeouts,
        relay_service,
    )
    .await
}

/// hyper entry point for the relay. Every request gets a response; request
/// level failures never surface as service errors.
pub struct RelayService {
    router: Router,
}

impl RelayService {
    pub fn new(config: &config::Config) -> Self {
        Self {
            router: Router::new(config),
        }
    }
}

impl Service<Request<Incoming>> for RelayService {
    type Response = Response<HandlerBody>;
    type Error = RelayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let router = self.router.clone();
        Box::pin(async move { Ok(router.route(req.map(box_body)).await) })
    }
}
