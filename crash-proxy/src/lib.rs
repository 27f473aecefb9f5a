//! Validating reverse proxy for crash app submissions.
//!
//! Crash reports posted to one of the ingestion routes are decoded and
//! checked against that route's [`validation::RoutePolicy`]. Valid reports are
//! forwarded, byte for byte, to the configured upstream index; everything
//! else is answered with a client error and never reaches the upstream.
//! Each route has its own rate limit.
//!
//! ```text
//! request ─▶ router ─▶ rate limit ─▶ read body ─▶ decode ─▶ validate ─▶ forward ─▶ upstream
//!                │                                                                   │
//!                └─ GET /healthcheck ─▶ "I'm Alive!"            response ◀───────────┘
//! ```

pub mod config;
pub mod errors;
pub mod forwarder;
pub mod message;
pub mod metrics_defs;
pub mod rate_limit;
pub mod router;
pub mod validation;

#[cfg(test)]
mod testutils;

use crate::errors::CrashProxyError;
use crate::forwarder::{HttpForwarder, ProxyBody};
use crate::router::Router;
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response};
use shared::http::{run_http_service, serve_listener};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpListener;

pub async fn run(config: config::Config) -> Result<(), CrashProxyError> {
    let service = CrashProxyService::new(&config);
    run_http_service(&config.listener.host, config.listener.port, service).await
}

/// Serves on an already bound listener, ignoring the configured listener.
pub async fn serve(listener: TcpListener, config: config::Config) -> Result<(), CrashProxyError> {
    serve_listener(listener, CrashProxyService::new(&config)).await
}

pub struct CrashProxyService {
    router: Router,
}

impl CrashProxyService {
    pub fn new(config: &config::Config) -> Self {
        let forwarder = Arc::new(HttpForwarder::new(&config.upstream));
        Self {
            router: Router::new(config, forwarder),
        }
    }
}

impl Service<Request<Incoming>> for CrashProxyService {
    type Response = Response<ProxyBody>;
    type Error = CrashProxyError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let router = self.router.clone();
        Box::pin(async move { Ok(router.route(req).await) })
    }
}
