//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 令牌服务门面
//!
//! 引擎的唯一入口：校验入参、解析规则、分发到对应判定器，
//! 并聚合批量请求。配置源的全量规则推送也从这里进入。

use crate::concurrency_checker::{ConcurrencyChecker, TokenLease};
use crate::config::ServerFlowConfig;
use crate::constants::{ATTACHMENT_BLOCKED_RULE_ID, MAX_ACQUIRE_COUNT, MAX_CLIENT_ADDRESS_LENGTH};
use crate::error::{ClusterError, TokenResult, TokenStatus};
use crate::flow_checker::FlowTokenChecker;
use crate::metrics::{ClusterMetric, ClusterParamMetric, MetricRegistry, ParamMetricRegistry};
use crate::param_checker::ParamTokenChecker;
use crate::param_value::ParamValue;
use crate::registry::{FlowRuleTable, ParamRuleTable};
use crate::rules::{FlowRule, ParamRule};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// 集群令牌服务
///
/// 所有状态由本对象显式持有，可并存多个互不干扰的实例。
pub struct TokenService {
    config: Arc<RwLock<ServerFlowConfig>>,
    flow_metrics: Arc<MetricRegistry>,
    param_metrics: Arc<ParamMetricRegistry>,
    flow_rules: Arc<FlowRuleTable>,
    param_rules: Arc<ParamRuleTable>,
    flow_checker: FlowTokenChecker,
    param_checker: ParamTokenChecker,
    concurrency: ConcurrencyChecker,
    stats: ServiceStats,
}

impl TokenService {
    /// 以给定配置组装服务
    pub fn new(config: ServerFlowConfig) -> Result<Self, ClusterError> {
        config.validate().map_err(ClusterError::ConfigError)?;

        let config = Arc::new(RwLock::new(config));
        let flow_metrics = Arc::new(MetricRegistry::new());
        let param_metrics = Arc::new(ParamMetricRegistry::new());
        let flow_rules = Arc::new(FlowRuleTable::new(Arc::clone(&flow_metrics)));
        let param_rules = Arc::new(ParamRuleTable::new(Arc::clone(&param_metrics)));
        let flow_checker = FlowTokenChecker::new(
            Arc::clone(&flow_rules),
            Arc::clone(&flow_metrics),
            Arc::clone(&config),
        );
        let param_checker =
            ParamTokenChecker::new(Arc::clone(&param_metrics), Arc::clone(&config));
        let concurrency = ConcurrencyChecker::new(Arc::clone(&flow_rules), Arc::clone(&config));

        Ok(Self {
            config,
            flow_metrics,
            param_metrics,
            flow_rules,
            param_rules,
            flow_checker,
            param_checker,
            concurrency,
            stats: ServiceStats::default(),
        })
    }

    /// 申请 QPS 令牌
    pub fn request_token(
        &self,
        rule_id: u64,
        acquire_count: u32,
        prioritized: bool,
    ) -> TokenResult {
        if rule_id == 0 || acquire_count == 0 || acquire_count > MAX_ACQUIRE_COUNT {
            return self.finish(TokenResult::bad_request());
        }
        let Some(rule) = self.flow_rules.get_by_id(rule_id) else {
            return self.finish(TokenResult::no_rule());
        };
        self.finish(self.flow_checker.acquire(&rule, acquire_count, prioritized))
    }

    /// 申请热点参数令牌
    pub fn request_param_token(
        &self,
        rule_id: u64,
        acquire_count: u32,
        values: &[ParamValue],
    ) -> TokenResult {
        if rule_id == 0
            || acquire_count == 0
            || acquire_count > MAX_ACQUIRE_COUNT
            || values.is_empty()
        {
            return self.finish(TokenResult::bad_request());
        }
        let Some(rule) = self.param_rules.get_by_id(rule_id) else {
            return self.finish(TokenResult::no_rule());
        };
        self.finish(self.param_checker.acquire(&rule, acquire_count, values))
    }

    /// 批量申请 QPS 令牌
    ///
    /// 逐条独立判定，指标副作用跨批不回滚。任何硬失败立即胜出
    /// 并附上肇事规则 id；否则有等待取最大等待；全通过为准入。
    pub fn batch_request_token(
        &self,
        rule_ids: &[u64],
        acquire_count: u32,
        prioritized: bool,
    ) -> TokenResult {
        if rule_ids.is_empty() {
            return self.finish(TokenResult::bad_request());
        }

        let mut max_wait_ms = 0u64;
        let mut waited = false;
        for &rule_id in rule_ids {
            let result = self.request_token(rule_id, acquire_count, prioritized);
            match result.status {
                TokenStatus::Ok => {}
                TokenStatus::ShouldWait => {
                    waited = true;
                    max_wait_ms = max_wait_ms.max(result.wait_ms.unwrap_or(0));
                }
                _ => {
                    return result
                        .with_attachment(ATTACHMENT_BLOCKED_RULE_ID, rule_id.to_string());
                }
            }
        }
        if waited {
            TokenResult::should_wait(max_wait_ms)
        } else {
            TokenResult::ok()
        }
    }

    /// 批量申请热点参数令牌
    ///
    /// `params` 以规则 id 为键给出各规则的参数值；缺键或空值的
    /// 规则按参数非法处理。聚合口径同 [`Self::batch_request_token`]。
    pub fn batch_request_param_token(
        &self,
        rule_ids: &[u64],
        acquire_count: u32,
        params: &AHashMap<u64, Vec<ParamValue>>,
    ) -> TokenResult {
        if rule_ids.is_empty() {
            return self.finish(TokenResult::bad_request());
        }

        for &rule_id in rule_ids {
            let values = params.get(&rule_id).map(Vec::as_slice).unwrap_or(&[]);
            let result = self.request_param_token(rule_id, acquire_count, values);
            match result.status {
                TokenStatus::Ok => {}
                _ => {
                    return result
                        .with_attachment(ATTACHMENT_BLOCKED_RULE_ID, rule_id.to_string());
                }
            }
        }
        TokenResult::ok()
    }

    /// 申请并发令牌
    pub fn acquire_concurrent_token(
        &self,
        client_address: &str,
        rule_id: u64,
        acquire_count: u32,
    ) -> TokenResult {
        let address = client_address.trim();
        if rule_id == 0
            || acquire_count == 0
            || acquire_count > MAX_ACQUIRE_COUNT
            || address.is_empty()
            || address.len() > MAX_CLIENT_ADDRESS_LENGTH
        {
            return self.finish(TokenResult::bad_request());
        }
        let Some(rule) = self.flow_rules.get_by_id(rule_id) else {
            return self.finish(TokenResult::no_rule());
        };
        self.finish(self.concurrency.acquire(address, &rule, acquire_count))
    }

    /// 释放并发令牌
    pub fn release_concurrent_token(&self, token_id: Uuid) -> TokenResult {
        self.finish(self.concurrency.release(token_id))
    }

    /// 配置源推送流控规则全集
    pub fn on_flow_rules_updated(&self, rules: Vec<FlowRule>) {
        self.flow_rules.on_update(rules);
        self.concurrency.prune_removed_rules();
    }

    /// 配置源推送参数规则全集
    pub fn on_param_rules_updated(&self, rules: Vec<ParamRule>) {
        self.param_rules.on_update(rules);
    }

    /// 热更新服务端配置
    pub fn update_server_config(&self, next: ServerFlowConfig) -> Result<(), ClusterError> {
        next.validate().map_err(ClusterError::ConfigError)?;
        *self.config.write() = next;
        debug!(
            exceed_factor = next.exceed_factor,
            connected_client_count = next.connected_client_count,
            "服务端配置已更新"
        );
        Ok(())
    }

    /// 当前服务端配置
    pub fn server_config(&self) -> ServerFlowConfig {
        *self.config.read()
    }

    /// 按 id 查流控规则
    pub fn flow_rule(&self, rule_id: u64) -> Option<Arc<FlowRule>> {
        self.flow_rules.get_by_id(rule_id)
    }

    /// 按 id 查参数规则
    pub fn param_rule(&self, rule_id: u64) -> Option<Arc<ParamRule>> {
        self.param_rules.get_by_id(rule_id)
    }

    /// 按 id 查流控指标
    pub fn flow_metric(&self, rule_id: u64) -> Option<Arc<ClusterMetric>> {
        self.flow_metrics.get(rule_id)
    }

    /// 按 id 查参数指标
    pub fn param_metric(&self, rule_id: u64) -> Option<Arc<ClusterParamMetric>> {
        self.param_metrics.get(rule_id)
    }

    /// 某条规则当前的在飞并发数
    pub fn concurrent_in_flight(&self, rule_id: u64) -> u64 {
        self.concurrency.in_flight(rule_id)
    }

    /// 存活租约数量
    pub fn active_lease_count(&self) -> usize {
        self.concurrency.active_lease_count()
    }

    /// 查询租约
    pub fn lease(&self, token_id: Uuid) -> Option<TokenLease> {
        self.concurrency.lease(token_id)
    }

    /// 运行统计快照
    pub fn stats(&self) -> ServiceStatsSnapshot {
        self.stats.snapshot()
    }

    fn finish(&self, result: TokenResult) -> TokenResult {
        self.stats.record(result.status);
        result
    }
}

/// 服务运行统计
///
/// 热路径上只做 Relaxed 自增，读取时一次性成像。
#[derive(Default)]
pub struct ServiceStats {
    total: AtomicU64,
    passed: AtomicU64,
    blocked: AtomicU64,
    waited: AtomicU64,
    bad_requests: AtomicU64,
    no_rule: AtomicU64,
    internal_failures: AtomicU64,
    released: AtomicU64,
    already_released: AtomicU64,
}

impl ServiceStats {
    fn record(&self, status: TokenStatus) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match status {
            TokenStatus::Ok => &self.passed,
            TokenStatus::Blocked => &self.blocked,
            TokenStatus::ShouldWait => &self.waited,
            TokenStatus::BadRequest => &self.bad_requests,
            TokenStatus::NoRuleExists | TokenStatus::NoRefRuleExists => &self.no_rule,
            TokenStatus::Fail | TokenStatus::NotAvailable => &self.internal_failures,
            TokenStatus::ReleaseOk => &self.released,
            TokenStatus::AlreadyRelease => &self.already_released,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ServiceStatsSnapshot {
        ServiceStatsSnapshot {
            total_requests: self.total.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            waited: self.waited.load(Ordering::Relaxed),
            bad_requests: self.bad_requests.load(Ordering::Relaxed),
            no_rule: self.no_rule.load(Ordering::Relaxed),
            internal_failures: self.internal_failures.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            already_released: self.already_released.load(Ordering::Relaxed),
            generated_at: Utc::now(),
        }
    }
}

/// 统计快照
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatsSnapshot {
    /// 处理的请求总数
    pub total_requests: u64,
    /// 准入数
    pub passed: u64,
    /// 拒绝数
    pub blocked: u64,
    /// 建议等待数
    pub waited: u64,
    /// 参数非法数
    pub bad_requests: u64,
    /// 规则缺失数
    pub no_rule: u64,
    /// 内部异常数
    pub internal_failures: u64,
    /// 释放成功数
    pub released: u64,
    /// 幂等重放数
    pub already_released: u64,
    /// 快照时间
    pub generated_at: DateTime<Utc>,
}
