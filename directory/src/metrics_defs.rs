use shared::metrics_defs::{MetricDef, MetricType};

pub const DIRECTORY_RELOADS: MetricDef = MetricDef {
    name: "directory.reloads",
    metric_type: MetricType::Counter,
    description: "Successful endpoint definition reloads",
};

pub const DIRECTORY_RELOAD_FAILURES: MetricDef = MetricDef {
    name: "directory.reload_failures",
    metric_type: MetricType::Counter,
    description: "Endpoint definition reloads that failed to load or validate",
};

pub const ALL_METRICS: &[MetricDef] = &[DIRECTORY_RELOADS, DIRECTORY_RELOAD_FAILURES];
