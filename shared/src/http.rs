// Server loop and the header helpers applied by a proxy in both directions:
// requests from clients to upstreams, and responses coming back from upstreams to clients.

use http::Version;
use http::header::{
    CONNECTION, HeaderMap, HeaderName, HeaderValue, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE,
    TRAILER, TRANSFER_ENCODING, UPGRADE, VIA,
};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioExecutor;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;

const PROXY_NAME: &str = "crashgate";

static HOP_BY_HOP_NAMES: &[HeaderName] = &[
    CONNECTION,
    TRANSFER_ENCODING,
    TE,
    TRAILER,
    UPGRADE,
    PROXY_AUTHORIZATION,
    PROXY_AUTHENTICATE,
];

pub async fn run_http_service<S, E>(host: &str, port: u16, service: S) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
{
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!(host, port, "Listening");

    serve_listener(listener, service).await
}

/// Accept loop over an already bound listener. Each connection gets its own task.
pub async fn serve_listener<S, E>(listener: TcpListener, service: S) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
{
    let service_arc = Arc::new(service);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        let io = TokioIo::new(stream);
        let svc = service_arc.clone();

        // Hand the connection to hyper; auto-detect h1/h2 on this socket
        tokio::spawn(async move {
            if let Err(e) = Builder::new(TokioExecutor::new())
                .serve_connection(io, svc)
                .await
            {
                tracing::debug!(peer = %peer_addr, error = %e, "Connection closed with error");
            }
        });
    }
}

/// Plain text response with the given status.
pub fn make_text_response<E>(
    status_code: StatusCode,
    body: impl Into<Bytes>,
) -> Response<BoxBody<Bytes, E>> {
    let mut response = Response::new(Full::new(body.into()).map_err(|e| match e {}).boxed());
    *response.status_mut() = status_code;
    response
}

/// Response whose body is only the canonical reason phrase of `status_code`.
pub fn make_error_response<E>(status_code: StatusCode) -> Response<BoxBody<Bytes, E>> {
    let message = status_code
        .canonical_reason()
        .unwrap_or("an error occurred");

    make_text_response(status_code, message)
}

pub fn is_http1(v: Version) -> bool {
    matches!(v, Version::HTTP_09 | Version::HTTP_10 | Version::HTTP_11)
}

/// Adds a Via header to indicate the request/response passed through this proxy.
/// Appends to existing if Via is already present.
pub fn add_via_header(headers: &mut HeaderMap, version: Version) {
    let version_str = match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_11 => "1.1",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => {
            tracing::warn!(?version, "Unknown HTTP version, skipping Via header");
            return;
        }
    };

    let via_value = format!("{version_str} {PROXY_NAME}");

    let combined = match headers.get(VIA).map(|v| v.to_str()) {
        Some(Ok(existing)) => format!("{existing}, {via_value}"),
        // Leave an unreadable Via alone rather than clobber it
        Some(Err(_)) => return,
        None => via_value,
    };

    if let Ok(new_value) = HeaderValue::from_str(&combined) {
        headers.insert(VIA, new_value);
    }
}

// For HTTP/1.x connections, hop-by-hop headers are removed before forwarding:
// - standard hop-by-hop headers
// - any extra headers listed in the Connection header value
// - keep-alive header for HTTP/0.9 and HTTP/1.0 only
//
// HTTP/2 and HTTP/3 don't use hop-by-hop headers, so no filtering is performed.
pub fn filter_hop_by_hop(headers: &mut HeaderMap, version: Version) -> &mut HeaderMap {
    if !is_http1(version) {
        return headers;
    }

    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| HeaderName::from_bytes(token.as_bytes()).ok())
        .collect();

    for name in HOP_BY_HOP_NAMES.iter().chain(listed.iter()) {
        headers.remove(name);
    }

    if matches!(version, Version::HTTP_09 | Version::HTTP_10) {
        headers.remove(HeaderName::from_static("keep-alive"));
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    #[test]
    fn test_filter_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, custom"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("cusTOM", HeaderValue::from_static("some-value"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

        let filtered = filter_hop_by_hop(&mut headers, Version::HTTP_11);

        assert_eq!(filtered.len(), 1);
        assert_eq!(
            filtered.get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json"))
        );
        assert!(filtered.get(CONNECTION).is_none());
        assert!(filtered.get(TRANSFER_ENCODING).is_none());
        // listed in the Connection header value, matched case-insensitively
        assert!(filtered.get("keep-alive").is_none());
        assert!(filtered.get("custom").is_none());
    }

    #[test]
    fn test_filter_headers_http2_untouched() {
        let mut headers = HeaderMap::new();
        headers.insert(TE, HeaderValue::from_static("trailers"));

        let filtered = filter_hop_by_hop(&mut headers, Version::HTTP_2);
        assert!(filtered.get(TE).is_some());
    }

    #[test]
    fn test_via_header() {
        let mut headers = HeaderMap::new();
        add_via_header(&mut headers, Version::HTTP_11);
        assert_eq!(headers.get(VIA).unwrap(), "1.1 crashgate");

        add_via_header(&mut headers, Version::HTTP_2);
        assert_eq!(headers.get(VIA).unwrap(), "1.1 crashgate, 2 crashgate");
    }

    #[test]
    fn test_error_response_uses_reason_phrase() {
        let response = make_error_response::<std::convert::Infallible>(StatusCode::BAD_GATEWAY);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
