//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Clusteron - Cluster Admission Control Token Service
//!
//! Lets a fleet of client processes share one global rate/concurrency
//! budget per logical resource instead of each process enforcing only its
//! local fraction of traffic.
//!
//! # API Layers
//!
//! ## Prelude (Quick Start)
//!
//! Use `use clusteron::prelude::*;` to import all commonly used types.
//!
//! ## Core API
//!
//! - [`TokenService`] - Facade routing and batching token requests
//! - [`ServerFlowConfig`] - Server-wide tunables with hot update
//! - [`TokenResult`] / [`TokenStatus`] - Outcome of every admission call
//! - [`ClusterError`] - Error types for the construction surface
//!
//! ## Rules & Registries
//!
//! [`FlowRule`] / [`ParamRule`] pushed as full replacement lists by an
//! external config source; copy-on-write tables own metric lifecycles.
//!
//! ## Checkers
//!
//! QPS admission (with next-window occupation and quota borrowing),
//! hot-parameter admission, and concurrency permit leasing.
//!
//! # Examples
//!
//! ```rust
//! use clusteron::prelude::*;
//!
//! let service = TokenService::new(ServerFlowConfig::default()).unwrap();
//! service.on_flow_rules_updated(vec![FlowRule {
//!     id: 1,
//!     resource: "orders".to_string(),
//!     threshold: 100.0,
//!     threshold_kind: ThresholdKind::Global,
//!     ..FlowRule::default()
//! }]);
//!
//! let result = service.request_token(1, 1, false);
//! assert_eq!(result.status, TokenStatus::Ok);
//! ```
//!
//! # Design Notes
//!
//! - The engine is synchronous: every call is one bounded
//!   read-compute-write on the caller's thread, and `ShouldWait` is
//!   purely advisory.
//! - QPS and hot-parameter paths are statistical (windowed counters,
//!   small overshoot possible under races); only concurrency permits are
//!   a hard guarantee.
//! - Concurrency leases have no expiry: a client that crashes without
//!   releasing leaks its permits.

pub mod concurrency_checker;
pub mod config;
pub mod constants;
pub mod error;
pub mod flow_checker;
pub mod metrics;
pub mod param_checker;
pub mod param_value;
pub mod prelude;
pub mod registry;
pub mod rules;
pub mod token_service;

// 重新导出常用类型
pub use concurrency_checker::{ConcurrencyChecker, TokenLease};
pub use config::ServerFlowConfig;
pub use error::{ClusterError, TokenResult, TokenStatus};
pub use flow_checker::FlowTokenChecker;
pub use metrics::{
    ClusterMetric, ClusterParamMetric, MetricEvent, MetricRegistry, ParamMetricRegistry,
};
pub use param_checker::ParamTokenChecker;
pub use param_value::ParamValue;
pub use registry::{FlowRuleTable, ParamRuleTable};
pub use rules::{FlowRule, ParamRule, ThresholdKind};
pub use token_service::{ServiceStats, ServiceStatsSnapshot, TokenService};
