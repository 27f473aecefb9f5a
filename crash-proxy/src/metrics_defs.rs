use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with route, status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const REQUESTS_REJECTED: MetricDef = MetricDef {
    name: "requests.rejected",
    metric_type: MetricType::Counter,
    description: "Crash reports refused before forwarding. Tagged with route, reason.",
};

pub const REQUESTS_RATE_LIMITED: MetricDef = MetricDef {
    name: "requests.rate_limited",
    metric_type: MetricType::Counter,
    description: "Requests refused by the rate limiter. Tagged with route.",
};

pub const REQUESTS_FORWARDED: MetricDef = MetricDef {
    name: "requests.forwarded",
    metric_type: MetricType::Counter,
    description: "Crash reports relayed to the upstream. Tagged with route.",
};

pub const UPSTREAM_ERRORS: MetricDef = MetricDef {
    name: "upstream.errors",
    metric_type: MetricType::Counter,
    description: "Forwarding attempts that got no upstream response. Tagged with kind.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    REQUESTS_REJECTED,
    REQUESTS_RATE_LIMITED,
    REQUESTS_FORWARDED,
    UPSTREAM_ERRORS,
];
