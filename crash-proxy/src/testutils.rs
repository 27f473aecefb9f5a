use crate::config::{Config, Limits, RateLimitConfig};
use crate::errors::CrashProxyError;
use crate::forwarder::{Forward, ProxyBody};
use crate::metrics_defs::REQUESTS_INFLIGHT;
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, Response, StatusCode};
use metrics::{
    Counter, Gauge, GaugeFn, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use std::sync::{Arc, Mutex};
use url::Url;

pub const VALID_DATE: &str = "2017-09-26T15:56:49.012Z";
pub const VALID_TASK: &str = "roles/kraken.readiness : Get all nodes";
pub const VALID_LOG: &str = "PLAY [cluster] ****\nTASK [roles/kraken.readiness : Get all nodes] ****\nfatal: [localhost]: FAILED!";

pub fn test_config(requests_per_minute: u32) -> Config {
    Config {
        limits: Limits::default(),
        rate_limit: RateLimitConfig {
            requests_per_minute,
            key_ttl_secs: 3600,
        },
        ..Config::new(Url::parse("http://127.0.0.1:9200").unwrap())
    }
}

/// JSON body as the crash app sends it; `date` is omitted when empty.
pub fn crash_report_body(date: &str, log: &str, failed_task: &str) -> Bytes {
    let mut value = serde_json::json!({
        "k2_log": log,
        "failed_task": failed_task,
    });
    if !date.is_empty() {
        value["date"] = date.into();
    }
    Bytes::from(serde_json::to_vec(&value).unwrap())
}

/// Upstream stand-in that records what it receives and answers 201.
#[derive(Default)]
pub struct RecordingForwarder {
    received: Mutex<Vec<Request<Bytes>>>,
}

impl RecordingForwarder {
    pub fn received(&self) -> Vec<(String, Bytes)> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.uri().path().to_string(), r.body().clone()))
            .collect()
    }
}

#[async_trait]
impl Forward for RecordingForwarder {
    async fn forward(&self, request: Request<Bytes>) -> Result<Response<ProxyBody>, CrashProxyError> {
        self.received.lock().unwrap().push(request);
        let mut response = Response::new(
            Full::new(Bytes::from_static(br#"{"result":"created"}"#))
                .map_err(|e| match e {})
                .boxed(),
        );
        *response.status_mut() = StatusCode::CREATED;
        Ok(response)
    }
}

/// Upstream stand-in that is never reachable.
pub struct UnreachableForwarder;

#[async_trait]
impl Forward for UnreachableForwarder {
    async fn forward(&self, _request: Request<Bytes>) -> Result<Response<ProxyBody>, CrashProxyError> {
        Err(CrashProxyError::UpstreamRequestFailed(
            "es-internal.example".to_string(),
            "connection refused".to_string(),
        ))
    }
}

/// Upstream stand-in that never answers.
pub struct PendingForwarder;

#[async_trait]
impl Forward for PendingForwarder {
    async fn forward(&self, _request: Request<Bytes>) -> Result<Response<ProxyBody>, CrashProxyError> {
        std::future::pending().await
    }
}

#[derive(Default)]
struct GaugeState {
    current: f64,
    peak: f64,
}

#[derive(Default)]
struct InflightGauge(Mutex<GaugeState>);

impl GaugeFn for InflightGauge {
    fn increment(&self, value: f64) {
        let mut state = self.0.lock().unwrap();
        state.current += value;
        state.peak = state.peak.max(state.current);
    }

    fn decrement(&self, value: f64) {
        self.0.lock().unwrap().current -= value;
    }

    fn set(&self, value: f64) {
        let mut state = self.0.lock().unwrap();
        state.current = value;
        state.peak = state.peak.max(value);
    }
}

/// Recorder that tracks the in-flight gauge and drops everything else.
#[derive(Default)]
pub struct InflightRecorder {
    gauge: Arc<InflightGauge>,
}

impl InflightRecorder {
    pub fn inflight(&self) -> f64 {
        self.gauge.0.lock().unwrap().current
    }

    pub fn peak_inflight(&self) -> f64 {
        self.gauge.0.lock().unwrap().peak
    }
}

impl Recorder for InflightRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> Counter {
        Counter::noop()
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        if key.name() == REQUESTS_INFLIGHT.name {
            Gauge::from_arc(self.gauge.clone())
        } else {
            Gauge::noop()
        }
    }

    fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}
