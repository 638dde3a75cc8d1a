//! 规则模型
//!
//! 定义集群限流规则结构与逐条校验逻辑。规则由外部配置源以
//! 全量列表推送，非法条目在注册表层被丢弃而非中断更新。

use serde::{Deserialize, Serialize};

/// 阈值口径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    /// 单机均摊：阈值乘以当前在线客户端数
    AvgLocal,
    /// 全局：阈值即集群总额度
    Global,
}

impl Default for ThresholdKind {
    fn default() -> Self {
        ThresholdKind::AvgLocal
    }
}

/// 流控规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRule {
    /// 规则 id，全局唯一且为正
    pub id: u64,
    /// 资源名
    pub resource: String,
    /// 来源限定，空白视为通配
    #[serde(default)]
    pub limit_origin: String,
    /// 阈值
    pub threshold: f64,
    /// 阈值口径
    #[serde(default)]
    pub threshold_kind: ThresholdKind,
    /// 引用资源的规则 id，配置后允许向其借用空闲额度
    #[serde(default)]
    pub ref_flow_id: Option<u64>,
    /// 借用权重
    #[serde(default = "default_ref_ratio")]
    pub ref_ratio: f64,
    /// 是否集群模式
    #[serde(default = "default_cluster")]
    pub cluster: bool,
}

fn default_ref_ratio() -> f64 {
    1.0
}

fn default_cluster() -> bool {
    true
}

impl Default for FlowRule {
    fn default() -> Self {
        Self {
            id: 0,
            resource: String::new(),
            limit_origin: String::new(),
            threshold: 0.0,
            threshold_kind: ThresholdKind::default(),
            ref_flow_id: None,
            ref_ratio: 1.0,
            cluster: true,
        }
    }
}

impl FlowRule {
    /// 校验规则
    pub fn validate(&self) -> Result<(), String> {
        if self.id == 0 {
            return Err("规则 id 必须为正".to_string());
        }
        if self.resource.trim().is_empty() {
            return Err("资源名不能为空".to_string());
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(format!("阈值非法: {}", self.threshold));
        }
        if !self.ref_ratio.is_finite() || self.ref_ratio <= 0.0 {
            return Err(format!("借用权重非法: {}", self.ref_ratio));
        }
        if self.ref_flow_id == Some(self.id) {
            return Err("引用规则不能指向自身".to_string());
        }
        Ok(())
    }

    /// 生效阈值
    ///
    /// `Global` 直接取配置值；`AvgLocal` 乘以在线客户端数，
    /// 客户端数未上报时得 0，规则随之收紧到全拒绝。
    pub fn effective_threshold(&self, connected_client_count: u32) -> f64 {
        match self.threshold_kind {
            ThresholdKind::Global => self.threshold,
            ThresholdKind::AvgLocal => self.threshold * connected_client_count as f64,
        }
    }
}

/// 热点参数规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamRule {
    /// 规则 id，全局唯一且为正
    pub id: u64,
    /// 参数位置，从 1 起
    pub param_idx: i32,
    /// 阈值
    pub threshold: f64,
    /// 阈值口径
    #[serde(default)]
    pub threshold_kind: ThresholdKind,
    /// 是否集群模式
    #[serde(default = "default_cluster")]
    pub cluster: bool,
}

impl Default for ParamRule {
    fn default() -> Self {
        Self {
            id: 0,
            param_idx: 1,
            threshold: 0.0,
            threshold_kind: ThresholdKind::default(),
            cluster: true,
        }
    }
}

impl ParamRule {
    /// 校验规则
    pub fn validate(&self) -> Result<(), String> {
        if self.id == 0 {
            return Err("规则 id 必须为正".to_string());
        }
        if self.param_idx <= 0 {
            return Err(format!("参数位置非法: {}", self.param_idx));
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(format!("阈值非法: {}", self.threshold));
        }
        Ok(())
    }

    /// 生效阈值，口径同 [`FlowRule::effective_threshold`]
    pub fn effective_threshold(&self, connected_client_count: u32) -> f64 {
        match self.threshold_kind {
            ThresholdKind::Global => self.threshold,
            ThresholdKind::AvgLocal => self.threshold * connected_client_count as f64,
        }
    }
}
