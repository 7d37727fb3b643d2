use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "dispatcher.request_duration",
    metric_type: MetricType::Histogram,
    description: "End-to-end latency of dispatched requests in seconds",
};

pub const BACKEND_CALL_DURATION: MetricDef = MetricDef {
    name: "dispatcher.backend_call_duration",
    metric_type: MetricType::Histogram,
    description: "Latency of individual backend calls in seconds",
};

pub const COMPOSITE_STEPS_EXECUTED: MetricDef = MetricDef {
    name: "dispatcher.composite.steps_executed",
    metric_type: MetricType::Counter,
    description: "Composite steps that ran to completion",
};

pub const COMPOSITE_FAILURES: MetricDef = MetricDef {
    name: "dispatcher.composite.failures",
    metric_type: MetricType::Counter,
    description: "Composite executions aborted by a failing step",
};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "dispatcher.cache.hits",
    metric_type: MetricType::Counter,
    description: "Response cache lookups that found a live entry",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "dispatcher.cache.misses",
    metric_type: MetricType::Counter,
    description: "Response cache lookups that found nothing",
};

pub const CACHE_WRITES: MetricDef = MetricDef {
    name: "dispatcher.cache.writes",
    metric_type: MetricType::Counter,
    description: "Responses written through to the cache store",
};

pub const CACHE_LOCK_TIMEOUTS: MetricDef = MetricDef {
    name: "dispatcher.cache.lock_timeouts",
    metric_type: MetricType::Counter,
    description: "Callers that gave up waiting for the recompute lock and went uncached",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    BACKEND_CALL_DURATION,
    COMPOSITE_STEPS_EXECUTED,
    COMPOSITE_FAILURES,
    CACHE_HIT,
    CACHE_MISS,
    CACHE_WRITES,
    CACHE_LOCK_TIMEOUTS,
];
