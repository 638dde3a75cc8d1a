//! Prelude module - Commonly used types for quick imports
//!
//! This module re-exports the most commonly used types from Clusteron,
//! allowing users to import them with a single `use clusteron::prelude::*;`
//! statement instead of importing each type individually.

// Core types - always available
pub use crate::config::ServerFlowConfig;
pub use crate::error::{ClusterError, TokenResult, TokenStatus};
pub use crate::token_service::TokenService;

// Rule model
pub use crate::param_value::ParamValue;
pub use crate::rules::{FlowRule, ParamRule, ThresholdKind};

// Metrics
pub use crate::metrics::MetricEvent;

// Concurrency leasing
pub use crate::concurrency_checker::TokenLease;
