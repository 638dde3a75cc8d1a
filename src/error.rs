//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 错误类型与令牌结果定义
//!
//! 使用thiserror定义构造面错误；准入结果不是错误，
//! 通过 [`TokenResult`] 的状态码表达。

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Clusteron 错误类型
///
/// 仅覆盖构造与配置面；校验失败、容量耗尽等预期结果一律走
/// [`TokenStatus`]，不会以 `Err` 形式出现。
#[derive(Error, Debug)]
pub enum ClusterError {
    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 校验错误
    #[error("校验错误: {0}")]
    ValidationError(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    InternalError(String),
}

/// 令牌请求状态码
///
/// 与外部传输层共享的封闭状态空间；`NotAvailable` 由传输层在
/// 引擎不可达时产生，引擎自身不会返回。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    /// 准入
    Ok,
    /// 拒绝
    Blocked,
    /// 建议等待后重试（携带等待毫秒数）
    ShouldWait,
    /// 规则不存在
    NoRuleExists,
    /// 引用规则不存在
    NoRefRuleExists,
    /// 请求参数非法
    BadRequest,
    /// 内部不一致（规则存在但指标缺失）
    Fail,
    /// 引擎不可达（仅传输层产生）
    NotAvailable,
    /// 令牌已释放（幂等重放）
    AlreadyRelease,
    /// 释放成功
    ReleaseOk,
}

/// 令牌请求结果
///
/// 每次准入调用返回一个结果值，除状态码外可携带剩余额度、
/// 建议等待毫秒数、并发令牌 id 与附加信息。
#[derive(Debug, Clone, PartialEq)]
pub struct TokenResult {
    /// 状态码
    pub status: TokenStatus,
    /// 剩余额度（向下取整）
    pub remaining: Option<i64>,
    /// 建议等待毫秒数
    pub wait_ms: Option<u64>,
    /// 并发令牌 id
    pub token_id: Option<Uuid>,
    /// 附加信息（如批量请求中失败的规则 id）
    pub attachments: AHashMap<String, String>,
}

impl TokenResult {
    /// 创建指定状态的结果
    pub fn new(status: TokenStatus) -> Self {
        Self {
            status,
            remaining: None,
            wait_ms: None,
            token_id: None,
            attachments: AHashMap::new(),
        }
    }

    /// 准入结果
    pub fn ok() -> Self {
        Self::new(TokenStatus::Ok)
    }

    /// 携带剩余额度的准入结果
    pub fn ok_with_remaining(remaining: i64) -> Self {
        Self::new(TokenStatus::Ok).with_remaining(remaining)
    }

    /// 拒绝结果
    pub fn blocked() -> Self {
        Self::new(TokenStatus::Blocked)
    }

    /// 建议等待结果
    pub fn should_wait(wait_ms: u64) -> Self {
        let mut result = Self::new(TokenStatus::ShouldWait);
        result.wait_ms = Some(wait_ms);
        result
    }

    /// 参数非法结果
    pub fn bad_request() -> Self {
        Self::new(TokenStatus::BadRequest)
    }

    /// 规则缺失结果
    pub fn no_rule() -> Self {
        Self::new(TokenStatus::NoRuleExists)
    }

    /// 设置剩余额度
    pub fn with_remaining(mut self, remaining: i64) -> Self {
        self.remaining = Some(remaining);
        self
    }

    /// 设置并发令牌 id
    pub fn with_token_id(mut self, token_id: Uuid) -> Self {
        self.token_id = Some(token_id);
        self
    }

    /// 追加附加信息
    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    /// 是否为软通过（`Ok` 或 `ShouldWait`）
    ///
    /// 批量聚合以此划分硬失败：任何非软通过状态立即胜出。
    pub fn is_pass(&self) -> bool {
        matches!(self.status, TokenStatus::Ok | TokenStatus::ShouldWait)
    }
}
