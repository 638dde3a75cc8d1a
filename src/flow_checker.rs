//! 全局 QPS 准入
//!
//! 集群流控的核心判定：以滑动窗口内的放行请求均值对照生效
//! 阈值决定准入；优先请求在额度耗尽时可预占下一窗口，配置了
//! 引用资源的规则可借用其空闲额度。判定全程无锁，接受窗口
//! 粒度内的统计性超发。

use crate::config::ServerFlowConfig;
use crate::error::{TokenResult, TokenStatus};
use crate::metrics::{ClusterMetric, MetricEvent, MetricRegistry};
use crate::registry::FlowRuleTable;
use crate::rules::FlowRule;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

/// QPS 令牌判定器
pub struct FlowTokenChecker {
    rules: Arc<FlowRuleTable>,
    metrics: Arc<MetricRegistry>,
    config: Arc<RwLock<ServerFlowConfig>>,
}

impl FlowTokenChecker {
    /// 组装判定器
    pub fn new(
        rules: Arc<FlowRuleTable>,
        metrics: Arc<MetricRegistry>,
        config: Arc<RwLock<ServerFlowConfig>>,
    ) -> Self {
        Self {
            rules,
            metrics,
            config,
        }
    }

    /// 对单条规则申请 `acquire_count` 个令牌
    pub fn acquire(&self, rule: &FlowRule, acquire_count: u32, prioritized: bool) -> TokenResult {
        let Some(metric) = self.metrics.get(rule.id) else {
            warn!(rule_id = rule.id, "流控规则缺少对应指标");
            return TokenResult::new(TokenStatus::Fail);
        };
        let config = *self.config.read();

        let latest_qps = metric.avg(MetricEvent::PassRequest);
        let global_threshold =
            rule.effective_threshold(config.connected_client_count) * config.exceed_factor;
        let remaining = global_threshold - latest_qps - acquire_count as f64;

        if remaining >= 0.0 {
            metric.add(MetricEvent::Pass, acquire_count as u64);
            metric.add(MetricEvent::PassRequest, 1);
            if prioritized {
                metric.add(MetricEvent::OccupiedPass, acquire_count as u64);
            }
            return TokenResult::ok_with_remaining(remaining.floor() as i64);
        }

        if config.borrow_ref_enabled && rule.ref_flow_id.is_some() {
            return self.acquire_with_ref(rule, &metric, acquire_count, prioritized, &config);
        }

        if prioritized {
            let occupy_avg = metric.avg(MetricEvent::Waiting);
            if occupy_avg <= config.max_occupy_ratio * global_threshold {
                let wait_ms = metric.try_occupy_next(acquire_count, global_threshold);
                if wait_ms > 0 {
                    return TokenResult::should_wait(wait_ms);
                }
            }
        }

        block(&metric, acquire_count, prioritized)
    }

    /// 借用判定
    ///
    /// 常规额度已尽、规则配置了引用资源时进入。本资源与引用
    /// 资源的用量按引用侧单请求成本换算到同一口径，加权之和
    /// 不超过两侧加权阈值之和即准入；引用侧已饱和或其窗口尚
    /// 未观测满（数据不可信）时不借。
    fn acquire_with_ref(
        &self,
        rule: &FlowRule,
        metric: &ClusterMetric,
        acquire_count: u32,
        prioritized: bool,
        config: &ServerFlowConfig,
    ) -> TokenResult {
        let Some(ref_id) = rule.ref_flow_id else {
            return block(metric, acquire_count, prioritized);
        };
        let Some(ref_rule) = self.rules.get_by_id(ref_id) else {
            return TokenResult::new(TokenStatus::NoRefRuleExists);
        };
        let Some(ref_metric) = self.metrics.get(ref_id) else {
            warn!(rule_id = rule.id, ref_id, "引用规则缺少对应指标");
            return TokenResult::new(TokenStatus::Fail);
        };

        let clients = config.connected_client_count;
        let own_threshold = rule.effective_threshold(clients) * config.exceed_factor;
        let ref_threshold = ref_rule.effective_threshold(clients) * config.exceed_factor;

        let ref_pass = ref_metric.avg(MetricEvent::Pass);
        let ref_requests = ref_metric.avg(MetricEvent::PassRequest);

        // 引用侧饱和或窗口未观测满，不外借
        if ref_pass >= ref_threshold || !ref_metric.observed_full_window() {
            return block(metric, acquire_count, prioritized);
        }

        // 引用侧单请求成本；空闲时按 1 计
        let split_ratio = if ref_requests > 0.0 {
            (ref_pass / ref_requests).max(f64::MIN_POSITIVE)
        } else {
            1.0
        };

        let own_pass = metric.avg(MetricEvent::Pass);
        let own_waiting = metric.avg(MetricEvent::Waiting);

        let usage =
            (own_pass + own_waiting + acquire_count as f64) / split_ratio + ref_pass * rule.ref_ratio;
        let budget = own_threshold / split_ratio + ref_threshold * rule.ref_ratio;

        if usage <= budget {
            metric.add(MetricEvent::Pass, acquire_count as u64);
            metric.add(MetricEvent::PassRequest, 1);
            if prioritized {
                metric.add(MetricEvent::OccupiedPass, acquire_count as u64);
            }
            return TokenResult::ok_with_remaining((budget - usage).floor() as i64);
        }

        block(metric, acquire_count, prioritized)
    }
}

fn block(metric: &ClusterMetric, acquire_count: u32, prioritized: bool) -> TokenResult {
    metric.add(MetricEvent::Block, acquire_count as u64);
    metric.add(MetricEvent::BlockRequest, 1);
    if prioritized {
        metric.add(MetricEvent::OccupiedBlock, acquire_count as u64);
    }
    TokenResult::blocked()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TokenStatus;
    use crate::rules::ThresholdKind;

    fn env(config: ServerFlowConfig) -> (FlowTokenChecker, Arc<FlowRuleTable>, Arc<MetricRegistry>) {
        let metrics = Arc::new(MetricRegistry::new());
        let rules = Arc::new(FlowRuleTable::new(Arc::clone(&metrics)));
        let config = Arc::new(RwLock::new(config));
        let checker = FlowTokenChecker::new(Arc::clone(&rules), Arc::clone(&metrics), config);
        (checker, rules, metrics)
    }

    fn checker() -> (FlowTokenChecker, Arc<FlowRuleTable>, Arc<MetricRegistry>) {
        env(ServerFlowConfig::default())
    }

    fn global_rule(id: u64, threshold: f64) -> FlowRule {
        FlowRule {
            id,
            resource: format!("resource-{}", id),
            threshold,
            threshold_kind: ThresholdKind::Global,
            ..FlowRule::default()
        }
    }

    #[test]
    fn test_admits_until_threshold_then_blocks() {
        let (checker, rules, _) = checker();
        let rule = global_rule(1, 3.0);
        rules.on_update(vec![rule.clone()]);

        for expected_remaining in [2, 1, 0] {
            let result = checker.acquire(&rule, 1, false);
            assert_eq!(result.status, TokenStatus::Ok);
            assert_eq!(result.remaining, Some(expected_remaining));
        }
        let result = checker.acquire(&rule, 1, false);
        assert_eq!(result.status, TokenStatus::Blocked);
    }

    #[test]
    fn test_block_records_events() {
        let (checker, rules, metrics) = checker();
        let rule = global_rule(1, 1.0);
        rules.on_update(vec![rule.clone()]);

        checker.acquire(&rule, 1, false);
        checker.acquire(&rule, 1, false);

        let metric = metrics.get(1).unwrap();
        assert_eq!(metric.sum(MetricEvent::Pass), 1);
        assert_eq!(metric.sum(MetricEvent::PassRequest), 1);
        assert_eq!(metric.sum(MetricEvent::Block), 1);
        assert_eq!(metric.sum(MetricEvent::BlockRequest), 1);
    }

    #[test]
    fn test_prioritized_exhaustion_waits_then_blocks() {
        let (checker, rules, metrics) = checker();
        let rule = global_rule(1, 1.0);
        rules.on_update(vec![rule.clone()]);

        assert_eq!(checker.acquire(&rule, 1, true).status, TokenStatus::Ok);

        // 额度已尽：优先请求预占下一窗口
        let waited = checker.acquire(&rule, 1, true);
        assert_eq!(waited.status, TokenStatus::ShouldWait);
        assert!(waited.wait_ms.unwrap() > 0);
        assert_eq!(metrics.get(1).unwrap().sum(MetricEvent::Waiting), 1);

        // 预占额度同样耗尽后拒绝
        let blocked = checker.acquire(&rule, 1, true);
        assert_eq!(blocked.status, TokenStatus::Blocked);
    }

    #[test]
    fn test_non_prioritized_never_occupies() {
        let (checker, rules, metrics) = checker();
        let rule = global_rule(1, 1.0);
        rules.on_update(vec![rule.clone()]);

        checker.acquire(&rule, 1, false);
        let result = checker.acquire(&rule, 1, false);
        assert_eq!(result.status, TokenStatus::Blocked);
        assert_eq!(metrics.get(1).unwrap().sum(MetricEvent::Waiting), 0);
    }

    #[test]
    fn test_missing_metric_is_internal_failure() {
        let (checker, _, _) = checker();
        // 规则未经注册表装载，指标不存在
        let rule = global_rule(42, 10.0);
        assert_eq!(checker.acquire(&rule, 1, false).status, TokenStatus::Fail);
    }

    #[test]
    fn test_missing_ref_rule() {
        let (checker, rules, _) = checker();
        let mut rule = global_rule(1, 1.0);
        rule.ref_flow_id = Some(99);
        rules.on_update(vec![rule.clone()]);

        checker.acquire(&rule, 1, false);
        let result = checker.acquire(&rule, 1, false);
        assert_eq!(result.status, TokenStatus::NoRefRuleExists);
    }

    #[test]
    fn test_exceed_factor_stretches_threshold() {
        let (checker, rules, _) = env(ServerFlowConfig {
            exceed_factor: 2.0,
            ..ServerFlowConfig::default()
        });
        let rule = global_rule(1, 2.0);
        rules.on_update(vec![rule.clone()]);

        // 放大系数 2.0 下阈值 2 放行 4 个请求
        for _ in 0..4 {
            assert_eq!(checker.acquire(&rule, 1, false).status, TokenStatus::Ok);
        }
        assert_eq!(checker.acquire(&rule, 1, false).status, TokenStatus::Blocked);
    }

    #[test]
    fn test_avg_local_threshold_scales_with_clients() {
        let (checker, rules, _) = env(ServerFlowConfig {
            connected_client_count: 2,
            ..ServerFlowConfig::default()
        });
        let rule = FlowRule {
            threshold_kind: ThresholdKind::AvgLocal,
            ..global_rule(1, 1.0)
        };
        rules.on_update(vec![rule.clone()]);

        // 单机阈值 1 乘以 2 个在线客户端
        assert_eq!(checker.acquire(&rule, 1, false).status, TokenStatus::Ok);
        assert_eq!(checker.acquire(&rule, 1, false).status, TokenStatus::Ok);
        assert_eq!(checker.acquire(&rule, 1, false).status, TokenStatus::Blocked);
    }

    #[test]
    fn test_borrow_refused_before_ref_window_matures() {
        let (checker, rules, _) = checker();
        let ref_rule = global_rule(1, 10.0);
        let mut rule = global_rule(2, 1.0);
        rule.ref_flow_id = Some(1);
        rules.on_update(vec![ref_rule, rule.clone()]);

        checker.acquire(&rule, 1, false);
        // 引用侧指标刚创建，窗口未观测满，拒绝外借
        let result = checker.acquire(&rule, 1, false);
        assert_eq!(result.status, TokenStatus::Blocked);
    }

    #[test]
    fn test_borrow_from_idle_reference() {
        let (checker, rules, _) = checker();
        let ref_rule = global_rule(1, 10.0);
        let mut rule = global_rule(2, 1.0);
        rule.ref_flow_id = Some(1);
        rules.on_update(vec![ref_rule, rule.clone()]);

        // 等满一个窗口，让引用侧数据可信
        std::thread::sleep(std::time::Duration::from_millis(1100));

        assert_eq!(checker.acquire(&rule, 1, false).status, TokenStatus::Ok);
        // 自身额度已尽，但引用侧空闲，可借
        let borrowed = checker.acquire(&rule, 1, false);
        assert_eq!(borrowed.status, TokenStatus::Ok);
        assert!(borrowed.remaining.unwrap() > 0);
    }

    #[test]
    fn test_borrow_refused_when_reference_saturated() {
        let (checker, rules, _) = checker();
        let ref_rule = global_rule(1, 2.0);
        let mut rule = global_rule(2, 1.0);
        rule.ref_flow_id = Some(1);
        rules.on_update(vec![ref_rule.clone(), rule.clone()]);

        std::thread::sleep(std::time::Duration::from_millis(1100));

        // 灌满引用侧
        assert_eq!(checker.acquire(&ref_rule, 1, false).status, TokenStatus::Ok);
        assert_eq!(checker.acquire(&ref_rule, 1, false).status, TokenStatus::Ok);

        checker.acquire(&rule, 1, false);
        let result = checker.acquire(&rule, 1, false);
        assert_eq!(result.status, TokenStatus::Blocked);
    }

    #[test]
    fn test_borrow_disabled_falls_back_to_block() {
        let (checker, rules, _) = env(ServerFlowConfig {
            borrow_ref_enabled: false,
            ..ServerFlowConfig::default()
        });
        let ref_rule = global_rule(1, 10.0);
        let mut rule = global_rule(2, 1.0);
        rule.ref_flow_id = Some(1);
        rules.on_update(vec![ref_rule, rule.clone()]);

        std::thread::sleep(std::time::Duration::from_millis(1100));

        checker.acquire(&rule, 1, false);
        let result = checker.acquire(&rule, 1, false);
        assert_eq!(result.status, TokenStatus::Blocked);
    }
}
