use crate::config::Config;
use crate::errors::CrashProxyError;
use crate::forwarder::{Forward, ProxyBody};
use crate::message::CrashReportMessage;
use crate::metrics_defs::{
    REQUEST_DURATION, REQUESTS_FORWARDED, REQUESTS_INFLIGHT, REQUESTS_RATE_LIMITED,
    REQUESTS_REJECTED, UPSTREAM_ERRORS,
};
use crate::rate_limit::RateLimiter;
use crate::validation::{RoutePolicy, Validator};
use http::HeaderMap;
use http::header::CONTENT_LENGTH;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response, StatusCode};
use shared::http::{make_error_response, make_text_response};
use shared::{counter, gauge, histogram};
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Instant;

pub const HEALTHCHECK_PATH: &str = "/healthcheck";
const HEALTHCHECK_KEY: &str = "healthcheck";
const ALIVE_MESSAGE: &str = "I'm Alive!";

/// How a request ended.
pub enum Outcome {
    /// Refused before or while forwarding; nothing usable came from upstream
    Rejected(CrashProxyError),
    /// The upstream's response, to be relayed as is
    Forwarded(Response<ProxyBody>),
    /// Liveness check answered
    Alive,
    /// No route for this method and path
    NotRouted(StatusCode),
}

/// Maps requests to the ingestion chain or the liveness responder
///
/// Ingestion runs rate limit, body read, decode, validate and forward, in that
/// order, stopping at the first failure.
#[derive(Clone)]
pub struct Router {
    validator: Validator,
    rate_limiter: RateLimiter,
    forwarder: Arc<dyn Forward>,
    body_ceiling: usize,
}

impl Router {
    pub fn new(config: &Config, forwarder: Arc<dyn Forward>) -> Self {
        Self {
            validator: Validator::new(&config.limits),
            rate_limiter: RateLimiter::new(&config.rate_limit),
            forwarder,
            body_ceiling: config.limits.body_ceiling(),
        }
    }

    /// Routes a request and turns the outcome into the response for the client.
    pub async fn route<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let start = Instant::now();
        let route_name = route_name(req.uri().path());

        let inflight = InflightGuard::new();
        let response = outcome_response(self.dispatch(req).await);
        drop(inflight);

        histogram!(
            REQUEST_DURATION,
            "route" => route_name,
            "status" => response.status().as_u16().to_string()
        )
        .record(start.elapsed().as_secs_f64());

        response
    }

    pub async fn dispatch<B>(&self, req: Request<B>) -> Outcome
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let path = req.uri().path();

        if let Some(policy) = RoutePolicy::for_path(path) {
            if req.method() != Method::POST {
                return Outcome::NotRouted(StatusCode::METHOD_NOT_ALLOWED);
            }
            return match self.ingest(policy, req).await {
                Ok(response) => {
                    counter!(REQUESTS_FORWARDED, "route" => policy.name).increment(1);
                    Outcome::Forwarded(response)
                }
                Err(e) => {
                    record_failure(policy.name, &e);
                    Outcome::Rejected(e)
                }
            };
        }

        if path == HEALTHCHECK_PATH {
            if req.method() != Method::GET {
                return Outcome::NotRouted(StatusCode::METHOD_NOT_ALLOWED);
            }
            if !self.rate_limiter.admit(HEALTHCHECK_KEY) {
                record_failure(HEALTHCHECK_KEY, &CrashProxyError::RateLimited);
                return Outcome::Rejected(CrashProxyError::RateLimited);
            }
            return Outcome::Alive;
        }

        tracing::debug!(method = %req.method(), path, "No route matched");
        Outcome::NotRouted(StatusCode::NOT_FOUND)
    }

    async fn ingest<B>(
        &self,
        policy: &'static RoutePolicy,
        req: Request<B>,
    ) -> Result<Response<ProxyBody>, CrashProxyError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        if !self.rate_limiter.admit(policy.name) {
            return Err(CrashProxyError::RateLimited);
        }

        let (parts, body) = req.into_parts();
        let bytes = self.read_body(&parts.headers, body).await?;

        let message =
            CrashReportMessage::from_slice(&bytes).map_err(CrashProxyError::DecodeError)?;
        self.validator.validate_for(Some(policy), &message)?;

        tracing::debug!(route = policy.name, size = bytes.len(), "Forwarding crash report");

        // The bytes as received, not a re-encoding of `message`
        self.forwarder.forward(Request::from_parts(parts, bytes)).await
    }

    // Buffers the body, refusing anything above the ceiling as early as possible.
    async fn read_body<B>(&self, headers: &HeaderMap, body: B) -> Result<Bytes, CrashProxyError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let declared_len = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared_len.is_some_and(|len| len > self.body_ceiling as u64) {
            return Err(CrashProxyError::PayloadTooLarge(self.body_ceiling));
        }

        match Limited::new(body, self.body_ceiling).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                Err(CrashProxyError::PayloadTooLarge(self.body_ceiling))
            }
            Err(e) => Err(CrashProxyError::RequestBodyError(e.to_string())),
        }
    }
}

// Holds one unit of the in-flight gauge until dropped, including when the
// request future is abandoned.
struct InflightGuard(metrics::Gauge);

impl InflightGuard {
    fn new() -> Self {
        let gauge = gauge!(REQUESTS_INFLIGHT);
        gauge.increment(1.0);
        Self(gauge)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.decrement(1.0);
    }
}

fn route_name(path: &str) -> &'static str {
    match RoutePolicy::for_path(path) {
        Some(policy) => policy.name,
        None if path == HEALTHCHECK_PATH => HEALTHCHECK_KEY,
        None => "unknown",
    }
}

fn record_failure(route: &'static str, error: &CrashProxyError) {
    match error {
        CrashProxyError::RateLimited => {
            counter!(REQUESTS_RATE_LIMITED, "route" => route).increment(1);
            tracing::info!(route, "Rate limited");
        }
        e if e.is_client_facing() => {
            counter!(REQUESTS_REJECTED, "route" => route, "reason" => e.reason()).increment(1);
            tracing::info!(route, reason = e.reason(), error = %e, "Rejected crash report");
        }
        e => {
            counter!(UPSTREAM_ERRORS, "kind" => e.reason()).increment(1);
            tracing::error!(route, error = %e, "Forwarding failed");
        }
    }
}

fn outcome_response(outcome: Outcome) -> Response<ProxyBody> {
    match outcome {
        Outcome::Forwarded(response) => response,
        Outcome::Alive => make_text_response(StatusCode::OK, ALIVE_MESSAGE),
        Outcome::NotRouted(status) => make_error_response(status),
        Outcome::Rejected(e) if e.is_client_facing() => {
            make_text_response(e.status_code(), format!("{e}\n"))
        }
        Outcome::Rejected(e) => make_error_response(e.status_code()),
    }
}
