//! 规则注册表
//!
//! 保存当前生效的规则全集，接收配置源的全量替换推送。
//! 更新采用写时复制：在旁侧构建全新映射后整体换入，读取方
//! 始终面对一份不可变快照；指标的创建与回收与换入动作对外
//! 表现为一次原子更新。

use crate::constants::WILDCARD_LIMIT_ORIGIN;
use crate::metrics::{MetricRegistry, ParamMetricRegistry};
use crate::rules::{FlowRule, ParamRule};
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, warn};

type FlowRuleMap = AHashMap<u64, Arc<FlowRule>>;
type ParamRuleMap = AHashMap<u64, Arc<ParamRule>>;

/// 流控规则表
pub struct FlowRuleTable {
    snapshot: RwLock<Arc<FlowRuleMap>>,
    update_lock: Mutex<()>,
    metrics: Arc<MetricRegistry>,
}

impl FlowRuleTable {
    /// 创建空规则表，指标生命周期由本表驱动
    pub fn new(metrics: Arc<MetricRegistry>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(FlowRuleMap::new())),
            update_lock: Mutex::new(()),
            metrics,
        }
    }

    /// 全量替换规则集
    ///
    /// 过滤非集群规则；非法条目告警后丢弃，不影响其余条目。
    /// 新增规则的指标在快照换入前就绪，消失规则的指标在换入后
    /// 回收，读取方不会看到有规则无指标的中间态。
    pub fn on_update(&self, raw: Vec<FlowRule>) {
        let _guard = self.update_lock.lock();

        let mut next = FlowRuleMap::with_capacity(raw.len());
        for mut rule in raw {
            if !rule.cluster {
                continue;
            }
            if let Err(reason) = rule.validate() {
                warn!(rule_id = rule.id, %reason, "忽略非法流控规则");
                continue;
            }
            if rule.limit_origin.trim().is_empty() {
                rule.limit_origin = WILDCARD_LIMIT_ORIGIN.to_string();
            }
            if next.insert(rule.id, Arc::new(rule)).is_some() {
                warn!("流控规则 id 重复，保留后者");
            }
        }

        for id in next.keys() {
            self.metrics.get_or_create(*id);
        }

        let next = Arc::new(next);
        let prev = {
            let mut snapshot = self.snapshot.write();
            std::mem::replace(&mut *snapshot, Arc::clone(&next))
        };

        for id in prev.keys() {
            if !next.contains_key(id) {
                self.metrics.remove(*id);
            }
        }

        debug!(rules = next.len(), "流控规则表已更新");
    }

    /// 按 id 取规则；id 为 0 或缺失返回 `None`
    pub fn get_by_id(&self, id: u64) -> Option<Arc<FlowRule>> {
        if id == 0 {
            return None;
        }
        self.snapshot.read().get(&id).cloned()
    }

    /// 当前规则数量
    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }
}

/// 热点参数规则表
///
/// 结构与 [`FlowRuleTable`] 一致，驱动参数指标的生命周期。
pub struct ParamRuleTable {
    snapshot: RwLock<Arc<ParamRuleMap>>,
    update_lock: Mutex<()>,
    metrics: Arc<ParamMetricRegistry>,
}

impl ParamRuleTable {
    /// 创建空规则表
    pub fn new(metrics: Arc<ParamMetricRegistry>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(ParamRuleMap::new())),
            update_lock: Mutex::new(()),
            metrics,
        }
    }

    /// 全量替换规则集，语义同 [`FlowRuleTable::on_update`]
    pub fn on_update(&self, raw: Vec<ParamRule>) {
        let _guard = self.update_lock.lock();

        let mut next = ParamRuleMap::with_capacity(raw.len());
        for rule in raw {
            if !rule.cluster {
                continue;
            }
            if let Err(reason) = rule.validate() {
                warn!(rule_id = rule.id, %reason, "忽略非法参数规则");
                continue;
            }
            if next.insert(rule.id, Arc::new(rule)).is_some() {
                warn!("参数规则 id 重复，保留后者");
            }
        }

        for id in next.keys() {
            self.metrics.get_or_create(*id);
        }

        let next = Arc::new(next);
        let prev = {
            let mut snapshot = self.snapshot.write();
            std::mem::replace(&mut *snapshot, Arc::clone(&next))
        };

        for id in prev.keys() {
            if !next.contains_key(id) {
                self.metrics.remove(*id);
            }
        }

        debug!(rules = next.len(), "参数规则表已更新");
    }

    /// 按 id 取规则；id 为 0 或缺失返回 `None`
    pub fn get_by_id(&self, id: u64) -> Option<Arc<ParamRule>> {
        if id == 0 {
            return None;
        }
        self.snapshot.read().get(&id).cloned()
    }

    /// 当前规则数量
    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ThresholdKind;

    fn flow_rule(id: u64, threshold: f64) -> FlowRule {
        FlowRule {
            id,
            resource: format!("resource-{}", id),
            threshold,
            threshold_kind: ThresholdKind::Global,
            ..FlowRule::default()
        }
    }

    #[test]
    fn test_update_creates_and_removes_metrics() {
        let metrics = Arc::new(MetricRegistry::new());
        let table = FlowRuleTable::new(Arc::clone(&metrics));

        table.on_update(vec![flow_rule(1, 10.0), flow_rule(2, 20.0)]);
        assert_eq!(table.len(), 2);
        assert!(metrics.get(1).is_some());
        assert!(metrics.get(2).is_some());

        // 规则 1 从全量列表中消失，指标随之回收
        table.on_update(vec![flow_rule(2, 20.0)]);
        assert!(table.get_by_id(1).is_none());
        assert!(metrics.get(1).is_none());
        assert!(table.get_by_id(2).is_some());
        assert!(metrics.get(2).is_some());
    }

    #[test]
    fn test_invalid_rules_dropped_without_aborting() {
        let metrics = Arc::new(MetricRegistry::new());
        let table = FlowRuleTable::new(Arc::clone(&metrics));

        table.on_update(vec![
            flow_rule(1, 10.0),
            flow_rule(0, 5.0),      // id 非法
            flow_rule(3, f64::NAN), // 阈值非法
            FlowRule {
                resource: "  ".to_string(),
                ..flow_rule(4, 1.0)
            },
        ]);

        assert_eq!(table.len(), 1);
        assert!(table.get_by_id(1).is_some());
        assert!(metrics.get(3).is_none());
    }

    #[test]
    fn test_non_cluster_rules_filtered() {
        let metrics = Arc::new(MetricRegistry::new());
        let table = FlowRuleTable::new(metrics);

        let mut local = flow_rule(5, 10.0);
        local.cluster = false;
        table.on_update(vec![local]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_blank_origin_defaults_to_wildcard() {
        let metrics = Arc::new(MetricRegistry::new());
        let table = FlowRuleTable::new(metrics);

        table.on_update(vec![flow_rule(1, 10.0)]);
        let rule = table.get_by_id(1).unwrap();
        assert_eq!(rule.limit_origin, WILDCARD_LIMIT_ORIGIN);
    }

    #[test]
    fn test_zero_id_always_absent() {
        let metrics = Arc::new(MetricRegistry::new());
        let table = FlowRuleTable::new(metrics);
        assert!(table.get_by_id(0).is_none());
    }

    #[test]
    fn test_param_table_lifecycle() {
        let metrics = Arc::new(ParamMetricRegistry::new());
        let table = ParamRuleTable::new(Arc::clone(&metrics));

        let rule = ParamRule {
            id: 9,
            param_idx: 1,
            threshold: 5.0,
            threshold_kind: ThresholdKind::Global,
            cluster: true,
        };
        table.on_update(vec![rule.clone(), ParamRule { param_idx: 0, ..rule }]);

        // 同 id 的非法条目被丢弃，合法条目保留
        assert_eq!(table.len(), 1);
        assert!(metrics.get(9).is_some());

        table.on_update(vec![]);
        assert!(table.get_by_id(9).is_none());
        assert!(metrics.get(9).is_none());
    }
}
