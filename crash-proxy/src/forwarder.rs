use crate::config::UpstreamConfig;
use crate::errors::CrashProxyError;
use async_trait::async_trait;
use http::Version;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Frame, SizeHint};
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use shared::http::{add_via_header, filter_hop_by_hop};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep, sleep, timeout};
use url::Url;

pub type ProxyBody = BoxBody<Bytes, CrashProxyError>;

/// Relays an already buffered request to the upstream.
#[async_trait]
pub trait Forward: Send + Sync {
    async fn forward(&self, request: Request<Bytes>) -> Result<Response<ProxyBody>, CrashProxyError>;
}

/// Forwards to a single upstream over HTTP/1.1
///
/// The request keeps its method, path, query, headers and body bytes. Only
/// hop-by-hop headers are dropped and a Via header is added, in both
/// directions. The response body is streamed back as it arrives.
///
/// # Timeout Behavior
///
/// The timeout covers connecting, sending the request and receiving the
/// response head. While the response body streams, the same duration bounds
/// the wait for each next frame, so a stalled upstream cannot hold the client
/// connection open indefinitely.
pub struct HttpForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    upstream_url: Url,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(config: &UpstreamConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            upstream_url: config.url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl Forward for HttpForwarder {
    async fn forward(&self, request: Request<Bytes>) -> Result<Response<ProxyBody>, CrashProxyError> {
        // Use host as identifier for error messages
        let upstream_identifier = self
            .upstream_url
            .host_str()
            .unwrap_or(self.upstream_url.as_str())
            .to_string();

        let (mut parts, body) = request.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        parts.uri = upstream_uri(&self.upstream_url, path_and_query)
            .as_str()
            .parse()
            .map_err(|e| CrashProxyError::InternalError(format!("Failed to build URI: {e}")))?;

        filter_hop_by_hop(&mut parts.headers, parts.version);
        add_via_header(&mut parts.headers, parts.version);
        // The upstream connection is always HTTP/1.1, whatever the client spoke
        parts.version = Version::HTTP_11;

        let upstream_request = Request::from_parts(parts, Full::new(body));

        let response = timeout(self.timeout, self.client.request(upstream_request))
            .await
            .map_err(|_| CrashProxyError::UpstreamTimeout(upstream_identifier.clone()))?
            .map_err(|e| CrashProxyError::UpstreamRequestFailed(upstream_identifier.clone(), e.to_string()))?;

        let (mut parts, body) = response.into_parts();
        let response_version = parts.version;
        filter_hop_by_hop(&mut parts.headers, response_version);
        add_via_header(&mut parts.headers, response_version);

        let body = IdleTimeoutBody::new(
            body.map_err(CrashProxyError::from).boxed(),
            self.timeout,
            upstream_identifier,
        );
        Ok(Response::from_parts(parts, body.boxed()))
    }
}

/// Fails the body with `UpstreamTimeout` when no frame arrives within `idle`.
struct IdleTimeoutBody {
    inner: ProxyBody,
    idle: Duration,
    deadline: Pin<Box<Sleep>>,
    upstream: String,
}

impl IdleTimeoutBody {
    fn new(inner: ProxyBody, idle: Duration, upstream: String) -> Self {
        Self {
            inner,
            idle,
            deadline: Box::pin(sleep(idle)),
            upstream,
        }
    }
}

impl Body for IdleTimeoutBody {
    type Data = Bytes;
    type Error = CrashProxyError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, CrashProxyError>>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(frame) => {
                let next = Instant::now() + this.idle;
                this.deadline.as_mut().reset(next);
                Poll::Ready(frame)
            }
            Poll::Pending => match this.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => Poll::Ready(Some(Err(CrashProxyError::UpstreamTimeout(
                    this.upstream.clone(),
                )))),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Joins the upstream base URL with an inbound path and query.
///
/// Exactly one slash separates the base path from the request path, so
/// `http://es/prefix` and `/k2crashreporter/k2crashes` give
/// `http://es/prefix/k2crashreporter/k2crashes`. Queries from both sides are kept.
pub fn upstream_uri(base: &Url, path_and_query: &str) -> Url {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };

    let base_path = base.path();
    let joined = match (base_path.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base_path}{}", &path[1..]),
        (false, false) => format!("{base_path}/{path}"),
        _ => format!("{base_path}{path}"),
    };

    let joined_query = match (base.query(), query) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => Some(format!("{a}&{b}")),
        (Some(a), None) | (Some(a), Some("")) => Some(a.to_string()),
        (_, Some(b)) => Some(b.to_string()),
        (None, None) => None,
    };

    let mut url = base.clone();
    url.set_path(&joined);
    url.set_query(joined_query.as_deref());
    url
}
