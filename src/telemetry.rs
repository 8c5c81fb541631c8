//! Counter helpers that compile away without the `metrics` feature.

use crate::types::QueueName;

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc(_name: &'static str) {}

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc_queue(name: &'static str, queue: &QueueName) {
    metrics::increment_counter!(name, "queue" => queue.0.clone());
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc_queue(_name: &'static str, _queue: &QueueName) {}
