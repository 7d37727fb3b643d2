//! Metric declarations.
//!
//! Each crate declares its metrics as `MetricDef` constants next to the code
//! that records them and exposes them through an `ALL_METRICS` slice, so the
//! full instrument set is enumerable without grepping call sites. The macros
//! resolve against the `metrics` crate in the recording crate, keyed by the
//! definition's name.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// One named instrument. `description` is documentation for operators; only
/// `name` reaches the metrics sink.
#[derive(Clone, Copy, Debug)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

#[macro_export]
macro_rules! counter {
    ($def:expr) => {
        metrics::counter!($def.name)
    };
}

#[macro_export]
macro_rules! gauge {
    ($def:expr) => {
        metrics::gauge!($def.name)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr) => {
        metrics::histogram!($def.name)
    };
}
