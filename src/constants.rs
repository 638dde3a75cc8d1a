//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Centralized configuration constants for Clusteron.
//!
//! This module provides well-documented constants used throughout the library.
//! All magic numbers are defined here with their purpose and usage context.

// ============================================================================
// Sliding Window Constants
// ============================================================================

/// Length of the trailing metric window in milliseconds (1 second).
///
/// Admission decisions compare per-second averages against per-second
/// thresholds, so the default window covers exactly one second.
pub const WINDOW_INTERVAL_MS: u64 = 1000;

/// Number of buckets the metric window is split into.
///
/// More buckets mean smoother sliding behavior at slightly higher
/// bookkeeping cost. Must divide [`WINDOW_INTERVAL_MS`] evenly.
pub const WINDOW_SAMPLE_COUNT: usize = 10;

/// Length of a single window bucket in milliseconds.
pub const WINDOW_BUCKET_LENGTH_MS: u64 = WINDOW_INTERVAL_MS / WINDOW_SAMPLE_COUNT as u64;

// ============================================================================
// Server Flow Constants
// ============================================================================

/// Default global overshoot allowance applied to every flow threshold.
///
/// A factor of 1.0 enforces thresholds exactly; values above 1.0 trade
/// strictness for throughput under bursty fleets.
pub const DEFAULT_EXCEED_FACTOR: f64 = 1.0;

/// Default upper bound on outstanding next-window reservations, expressed
/// as a ratio of the rule threshold.
///
/// Prioritized requests may only reserve future capacity while the pending
/// reservation average stays below `ratio * threshold`.
pub const DEFAULT_MAX_OCCUPY_RATIO: f64 = 1.0;

// ============================================================================
// Hot Parameter Constants
// ============================================================================

/// Maximum number of distinct parameter values tracked per rule.
///
/// Bounds per-rule memory; beyond this the stalest tracked value is evicted.
pub const PARAMS_MAX_CAPACITY: usize = 20_000;

/// Number of entries sampled when looking for the stalest value to evict.
pub const PARAM_EVICTION_SAMPLE: usize = 8;

// ============================================================================
// Validation Constants
// ============================================================================

/// Maximum acquire count accepted in a single token request.
///
/// Prevents a single request from consuming an entire window of quota.
pub const MAX_ACQUIRE_COUNT: u32 = 1_000_000;

/// Maximum client address length (45 characters for IPv6 with port).
///
/// Covers both IPv4 and IPv6 address formats.
pub const MAX_CLIENT_ADDRESS_LENGTH: usize = 45;

/// Wildcard origin a blank `limit_origin` is normalized to.
pub const WILDCARD_LIMIT_ORIGIN: &str = "default";

// ============================================================================
// Batch Attachment Keys
// ============================================================================

/// Attachment key carrying the rule id that failed a batch request.
pub const ATTACHMENT_BLOCKED_RULE_ID: &str = "blocked_rule_id";
