//! 热点参数准入
//!
//! 对单条参数规则的一组去重标量值做整体判定：任何一个值将越
//! 过阈值则整批拒绝且不产生任何副作用，全部通过才统一计数。

use crate::config::ServerFlowConfig;
use crate::error::{TokenResult, TokenStatus};
use crate::metrics::ParamMetricRegistry;
use crate::param_value::ParamValue;
use crate::rules::ParamRule;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

/// 热点参数令牌判定器
pub struct ParamTokenChecker {
    metrics: Arc<ParamMetricRegistry>,
    config: Arc<RwLock<ServerFlowConfig>>,
}

impl ParamTokenChecker {
    /// 组装判定器
    pub fn new(metrics: Arc<ParamMetricRegistry>, config: Arc<RwLock<ServerFlowConfig>>) -> Self {
        Self { metrics, config }
    }

    /// 对一组去重后的参数值申请令牌
    ///
    /// 调用方负责摊平与去重；这里不再去重，重复值会被重复计数。
    pub fn acquire(
        &self,
        rule: &ParamRule,
        acquire_count: u32,
        values: &[ParamValue],
    ) -> TokenResult {
        let Some(metric) = self.metrics.get(rule.id) else {
            warn!(rule_id = rule.id, "参数规则缺少对应指标");
            return TokenResult::new(TokenStatus::Fail);
        };
        let config = *self.config.read();
        let threshold = rule.effective_threshold(config.connected_client_count);

        // 先整体探测：任一值越界则全批拒绝，不留副作用
        for value in values {
            if metric.avg(value) + 1.0 > threshold {
                return TokenResult::blocked();
            }
        }
        for value in values {
            metric.add(value, acquire_count as u64);
        }
        TokenResult::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ThresholdKind;

    fn env() -> (ParamTokenChecker, Arc<ParamMetricRegistry>) {
        let metrics = Arc::new(ParamMetricRegistry::new());
        let config = Arc::new(RwLock::new(ServerFlowConfig::default()));
        let checker = ParamTokenChecker::new(Arc::clone(&metrics), config);
        (checker, metrics)
    }

    fn rule(threshold: f64) -> ParamRule {
        ParamRule {
            id: 1,
            param_idx: 1,
            threshold,
            threshold_kind: ThresholdKind::Global,
            cluster: true,
        }
    }

    #[test]
    fn test_admits_and_counts_every_value() {
        let (checker, metrics) = env();
        metrics.get_or_create(1);

        let values = [ParamValue::from("a"), ParamValue::from("b")];
        let result = checker.acquire(&rule(5.0), 2, &values);
        assert_eq!(result.status, TokenStatus::Ok);

        let metric = metrics.get(1).unwrap();
        assert_eq!(metric.avg(&values[0]), 2.0);
        assert_eq!(metric.avg(&values[1]), 2.0);
    }

    #[test]
    fn test_one_hot_value_rejects_whole_batch() {
        let (checker, metrics) = env();
        let metric = metrics.get_or_create(1);

        let cold = ParamValue::from("cold");
        let hot = ParamValue::from("hot");
        metric.add(&cold, 4);
        metric.add(&hot, 6);

        // 阈值 5：hot 单独越界，整批拒绝，计数不动
        let result = checker.acquire(&rule(5.0), 1, &[cold.clone(), hot.clone()]);
        assert_eq!(result.status, TokenStatus::Blocked);
        assert_eq!(metric.avg(&cold), 4.0);
        assert_eq!(metric.avg(&hot), 6.0);
    }

    #[test]
    fn test_threshold_boundary() {
        let (checker, metrics) = env();
        let metric = metrics.get_or_create(1);
        let value = ParamValue::from("edge");
        metric.add(&value, 4);

        // 4 + 1 > 5 不成立，恰好放行
        assert_eq!(
            checker.acquire(&rule(5.0), 1, &[value.clone()]).status,
            TokenStatus::Ok
        );
        // 5 + 1 > 5，拒绝
        assert_eq!(
            checker.acquire(&rule(5.0), 1, &[value]).status,
            TokenStatus::Blocked
        );
    }

    #[test]
    fn test_missing_metric_is_internal_failure() {
        let (checker, _) = env();
        let result = checker.acquire(&rule(5.0), 1, &[ParamValue::from("x")]);
        assert_eq!(result.status, TokenStatus::Fail);
    }
}
