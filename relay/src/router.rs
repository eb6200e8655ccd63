use crate::api::create_csv::CreateCsvHandler;
use crate::api::landing::{HealthHandler, LandingHandler};
use crate::api::utils::{HandlerBody, RequestBody};
use crate::config::Config;
use crate::errors::RelayError;
use crate::handler::Handler;
use crate::metrics_defs::{REQUEST_COUNT, REQUEST_DURATION, REQUESTS_INFLIGHT};
use futures::FutureExt;
use hyper::{Method, Request, Response};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Method and path a handler is mounted on
pub struct Route {
    method: Method,
    path: &'static str,
    allow: &'static str,
    handler: Arc<dyn Handler>,
}

impl Route {
    /// Mounts a handler for GET. HEAD requests are served by the same handler.
    pub fn get(path: &'static str, handler: Arc<dyn Handler>) -> Self {
        Route {
            method: Method::GET,
            path,
            allow: "GET, HEAD",
            handler,
        }
    }

    pub fn post(path: &'static str, handler: Arc<dyn Handler>) -> Self {
        Route {
            method: Method::POST,
            path,
            allow: "POST",
            handler,
        }
    }

    fn accepts(&self, method: &Method) -> bool {
        self.method == method || (self.method == Method::GET && method == Method::HEAD)
    }
}

enum RouteMatch<'a> {
    Found(&'a dyn Handler),
    WrongMethod(&'static str),
    NotFound,
}

/// Dispatches requests to handlers by exact path and method
#[derive(Clone)]
pub struct Router {
    routes: Arc<Vec<Route>>,
}

impl Router {
    /// Builds the relay's routes from its configuration
    pub fn new(config: &Config) -> Self {
        let create_csv = CreateCsvHandler::new(config.api_key.clone(), config.max_body_bytes);

        Self::with_routes(vec![
            Route::get("/", Arc::new(LandingHandler)),
            Route::get("/health", Arc::new(HealthHandler)),
            Route::post("/create-csv", Arc::new(create_csv)),
        ])
    }

    pub fn with_routes(routes: Vec<Route>) -> Self {
        Self {
            routes: Arc::new(routes),
        }
    }

    /// Routes a request and always produces a response; handler errors are
    /// converted here.
    pub async fn route(&self, req: Request<RequestBody>) -> Response<HandlerBody> {
        let _inflight = InflightGuard::new();
        let start = Instant::now();

        tracing::debug!(method = %req.method(), path = %req.uri().path(), "Received request");

        let matched = self.find_matching_route(req.method(), req.uri().path());
        let (route, result) = match matched {
            RouteMatch::Found(handler) => (handler.name(), call_handler(handler, req).await),
            RouteMatch::WrongMethod(allow) => {
                ("unmatched", Err(RelayError::MethodNotAllowed { allow }))
            }
            RouteMatch::NotFound => ("unmatched", Err(RelayError::NotFound)),
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                log_error(route, &e);
                e.into_response()
            }
        };

        let status = response.status().as_u16().to_string();
        shared::counter!(REQUEST_COUNT, "status" => status.clone(), "route" => route).increment(1);
        shared::histogram!(REQUEST_DURATION, "status" => status, "route" => route)
            .record(start.elapsed().as_secs_f64());

        response
    }

    fn find_matching_route(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        let mut allow = None;
        for route in self.routes.iter().filter(|route| route.path == path) {
            if route.accepts(method) {
                return RouteMatch::Found(route.handler.as_ref());
            }
            allow = Some(route.allow);
        }

        match allow {
            Some(allow) => RouteMatch::WrongMethod(allow),
            None => RouteMatch::NotFound,
        }
    }
}

/// Runs a handler, turning a panic into an internal error so the caller
/// still gets a response.
async fn call_handler(
    handler: &dyn Handler,
    req: Request<RequestBody>,
) -> Result<Response<HandlerBody>, RelayError> {
    match AssertUnwindSafe(handler.handle(req)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(RelayError::InternalError(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        "handler panicked".to_string()
    }
}

fn log_error(route: &'static str, error: &RelayError) {
    match error {
        RelayError::MissingApiKey => {
            tracing::warn!(route, "Rejected request, server API key is not configured")
        }
        RelayError::Unauthorized => {
            tracing::warn!(route, "Rejected request with missing or invalid API key")
        }
        e if e.is_internal() => tracing::error!(route, error = %e, "Request failed"),
        e => tracing::debug!(route, error = %e, "Request rejected"),
    }
}

/// Keeps the in-flight gauge accurate even when a request future is dropped.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        shared::gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        shared::gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}
