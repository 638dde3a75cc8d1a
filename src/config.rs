//! 服务端配置
//!
//! 定义令牌服务的全局可调参数，支持运行期热更新。

use crate::constants::{DEFAULT_EXCEED_FACTOR, DEFAULT_MAX_OCCUPY_RATIO};
use serde::{Deserialize, Serialize};

/// 服务端流控配置
///
/// 由外部配置源推送，更新前整体校验；字段较小，读取按值拷贝。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServerFlowConfig {
    /// 阈值放大系数，>= 0 且有限；1.0 表示严格执行阈值
    #[serde(default = "default_exceed_factor")]
    pub exceed_factor: f64,
    /// 下一窗口预占额度上限（相对阈值的比例）
    #[serde(default = "default_max_occupy_ratio")]
    pub max_occupy_ratio: f64,
    /// 是否允许向引用资源借用额度
    #[serde(default = "default_borrow_ref_enabled")]
    pub borrow_ref_enabled: bool,
    /// 当前在线客户端数估计，由心跳侧上报
    #[serde(default)]
    pub connected_client_count: u32,
}

fn default_exceed_factor() -> f64 {
    DEFAULT_EXCEED_FACTOR
}

fn default_max_occupy_ratio() -> f64 {
    DEFAULT_MAX_OCCUPY_RATIO
}

fn default_borrow_ref_enabled() -> bool {
    true
}

impl Default for ServerFlowConfig {
    fn default() -> Self {
        Self {
            exceed_factor: DEFAULT_EXCEED_FACTOR,
            max_occupy_ratio: DEFAULT_MAX_OCCUPY_RATIO,
            borrow_ref_enabled: true,
            connected_client_count: 0,
        }
    }
}

impl ServerFlowConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if !self.exceed_factor.is_finite() || self.exceed_factor <= 0.0 {
            return Err(format!("阈值放大系数非法: {}", self.exceed_factor));
        }
        if !self.max_occupy_ratio.is_finite() || self.max_occupy_ratio < 0.0 {
            return Err(format!("预占比例非法: {}", self.max_occupy_ratio));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ServerFlowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.exceed_factor, 1.0);
        assert_eq!(config.connected_client_count, 0);
        assert!(config.borrow_ref_enabled);
    }

    #[test]
    fn test_validate_rejects_bad_factor() {
        let mut config = ServerFlowConfig::default();
        config.exceed_factor = 0.0;
        assert!(config.validate().is_err());

        config.exceed_factor = f64::INFINITY;
        assert!(config.validate().is_err());

        config.exceed_factor = 1.5;
        config.max_occupy_ratio = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_push_uses_defaults() {
        let config: ServerFlowConfig =
            serde_json::from_str(r#"{"connected_client_count": 8}"#).unwrap();
        assert_eq!(config.connected_client_count, 8);
        assert_eq!(config.exceed_factor, 1.0);
        assert!(config.borrow_ref_enabled);
    }
}
