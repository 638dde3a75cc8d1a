//! 测试共用构造器

use clusteron::prelude::*;

/// 以默认配置组装服务
pub fn service() -> TokenService {
    TokenService::new(ServerFlowConfig::default()).unwrap()
}

/// 全局口径的流控规则
pub fn global_flow_rule(id: u64, resource: &str, threshold: f64) -> FlowRule {
    FlowRule {
        id,
        resource: resource.to_string(),
        threshold,
        threshold_kind: ThresholdKind::Global,
        ..FlowRule::default()
    }
}

/// 全局口径的参数规则
pub fn global_param_rule(id: u64, threshold: f64) -> ParamRule {
    ParamRule {
        id,
        param_idx: 1,
        threshold,
        threshold_kind: ThresholdKind::Global,
        cluster: true,
    }
}

/// 装好规则的服务
pub fn service_with_flow_rules(rules: Vec<FlowRule>) -> TokenService {
    let service = service();
    service.on_flow_rules_updated(rules);
    service
}
