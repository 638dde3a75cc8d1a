//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Hot Parameter Metric
//!
//! Per-rule rolling counters keyed by distinct parameter value. Capacity
//! is bounded; when full, the stalest tracked value is evicted so a
//! high-cardinality parameter cannot grow the map without limit.

use crate::constants::{
    PARAMS_MAX_CAPACITY, PARAM_EVICTION_SAMPLE, WINDOW_INTERVAL_MS, WINDOW_SAMPLE_COUNT,
};
use crate::metrics::window::BucketLeapArray;
use crate::param_value::ParamValue;
use dashmap::DashMap;
use std::sync::Arc;

/// Counter slot inside each per-value window.
const VALUE_EVENT: usize = 0;

/// Rolling per-value counters for one hot-parameter rule.
pub struct ClusterParamMetric {
    values: DashMap<ParamValue, Arc<BucketLeapArray>>,
    capacity: usize,
}

impl ClusterParamMetric {
    /// Creates a metric with the default capacity bound.
    pub fn new() -> Self {
        Self::with_capacity(PARAMS_MAX_CAPACITY)
    }

    /// Creates a metric tracking at most `capacity` distinct values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Windowed per-second average for one value; 0.0 when untracked.
    pub fn avg(&self, value: &ParamValue) -> f64 {
        self.values
            .get(value)
            .map(|counter| counter.avg(VALUE_EVENT))
            .unwrap_or(0.0)
    }

    /// Adds `weight` to the value's current bucket.
    pub fn add(&self, value: &ParamValue, weight: u64) {
        if let Some(counter) = self.values.get(value) {
            counter.add(VALUE_EVENT, weight);
            return;
        }
        if self.values.len() >= self.capacity {
            self.evict_stalest();
        }
        let counter = self
            .values
            .entry(value.clone())
            .or_insert_with(|| {
                Arc::new(BucketLeapArray::new(WINDOW_SAMPLE_COUNT, WINDOW_INTERVAL_MS, 1))
            })
            .clone();
        counter.add(VALUE_EVENT, weight);
    }

    /// Number of distinct values currently tracked.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Drops the stalest entry among a small sample.
    ///
    /// Sampling keeps eviction O(1)-ish instead of scanning the whole map;
    /// the last-touched bucket timestamp is the recency signal.
    fn evict_stalest(&self) {
        let mut stalest: Option<(ParamValue, u64)> = None;
        for entry in self.values.iter().take(PARAM_EVICTION_SAMPLE) {
            let touched = entry.value().last_touched_ms();
            if stalest.as_ref().map_or(true, |(_, t)| touched < *t) {
                stalest = Some((entry.key().clone(), touched));
            }
        }
        if let Some((key, _)) = stalest {
            self.values.remove(&key);
        }
    }
}

impl Default for ClusterParamMetric {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of hot-parameter metrics, keyed by rule id.
///
/// Same lifecycle contract as [`crate::metrics::MetricRegistry`]:
/// idempotent create/remove, sentinel `None` on absent ids.
#[derive(Default)]
pub struct ParamMetricRegistry {
    metrics: DashMap<u64, Arc<ClusterParamMetric>>,
}

impl ParamMetricRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the metric for `rule_id`, creating it if absent.
    pub fn get_or_create(&self, rule_id: u64) -> Arc<ClusterParamMetric> {
        self.metrics
            .entry(rule_id)
            .or_insert_with(|| Arc::new(ClusterParamMetric::new()))
            .clone()
    }

    /// Returns the metric for `rule_id` if present.
    pub fn get(&self, rule_id: u64) -> Option<Arc<ClusterParamMetric>> {
        self.metrics.get(&rule_id).map(|entry| entry.clone())
    }

    /// Removes the metric for `rule_id`.
    pub fn remove(&self, rule_id: u64) {
        self.metrics.remove(&rule_id);
    }

    /// Number of live metrics.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
