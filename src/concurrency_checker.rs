//! 并发许可租约
//!
//! 并发限流是引擎里唯一的硬保证路径：在飞计数不允许越过阈值
//! 哪怕一个许可。热路径先做无锁预检，通过后在规则粒度的互斥
//! 锁下复检并记账；释放凭租约 token 幂等完成。
//!
//! 没有租约过期机制：客户端取得许可后崩溃而未释放，许可会
//! 永久泄漏，需要上层运维介入。

use crate::config::ServerFlowConfig;
use crate::error::{TokenResult, TokenStatus};
use crate::registry::FlowRuleTable;
use crate::rules::FlowRule;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// 并发令牌租约
///
/// 成功获取许可时铸造，释放时凭 `token_id` 注销。
#[derive(Debug, Clone, Serialize)]
pub struct TokenLease {
    /// 租约唯一标识
    pub token_id: Uuid,
    /// 所属规则 id
    pub flow_id: u64,
    /// 占用的许可数
    pub acquire_count: u32,
    /// 客户端地址
    pub client_address: String,
    /// 铸造时间
    pub created_at: DateTime<Utc>,
}

/// 单条规则的许可槽
struct PermitSlot {
    in_flight: AtomicU64,
    guard: Mutex<()>,
}

impl PermitSlot {
    fn new() -> Self {
        Self {
            in_flight: AtomicU64::new(0),
            guard: Mutex::new(()),
        }
    }
}

/// 并发许可判定器
pub struct ConcurrencyChecker {
    rules: Arc<FlowRuleTable>,
    config: Arc<RwLock<ServerFlowConfig>>,
    slots: DashMap<u64, Arc<PermitSlot>>,
    leases: DashMap<Uuid, TokenLease>,
}

impl ConcurrencyChecker {
    /// 组装判定器
    pub fn new(rules: Arc<FlowRuleTable>, config: Arc<RwLock<ServerFlowConfig>>) -> Self {
        Self {
            rules,
            config,
            slots: DashMap::new(),
            leases: DashMap::new(),
        }
    }

    /// 申请 `acquire_count` 个并发许可
    pub fn acquire(
        &self,
        client_address: &str,
        rule: &FlowRule,
        acquire_count: u32,
    ) -> TokenResult {
        let config = *self.config.read();
        let threshold = rule.effective_threshold(config.connected_client_count).floor() as u64;
        let wanted = acquire_count as u64;

        let slot = self
            .slots
            .entry(rule.id)
            .or_insert_with(|| Arc::new(PermitSlot::new()))
            .clone();

        // 无锁预检：多数拒绝在这里廉价返回
        if slot.in_flight.load(Ordering::Acquire) + wanted > threshold {
            return TokenResult::blocked();
        }

        let in_flight_after = {
            let _guard = slot.guard.lock();
            // 多个线程可能同时通过预检，持锁复检
            let current = slot.in_flight.load(Ordering::Acquire);
            if current + wanted > threshold {
                return TokenResult::blocked();
            }
            slot.in_flight.fetch_add(wanted, Ordering::AcqRel) + wanted
        };

        let lease = TokenLease {
            token_id: Uuid::new_v4(),
            flow_id: rule.id,
            acquire_count,
            client_address: client_address.to_string(),
            created_at: Utc::now(),
        };
        let token_id = lease.token_id;
        self.leases.insert(token_id, lease);

        TokenResult::ok_with_remaining(threshold.saturating_sub(in_flight_after) as i64)
            .with_token_id(token_id)
    }

    /// 释放租约
    ///
    /// 幂等：未知或已释放的 token 返回 `AlreadyRelease`；租约仍在
    /// 但规则已被移除时返回 `NoRuleExists`，租约保留。
    pub fn release(&self, token_id: Uuid) -> TokenResult {
        let flow_id = match self.leases.get(&token_id) {
            Some(lease) => lease.flow_id,
            None => return TokenResult::new(TokenStatus::AlreadyRelease),
        };
        if self.rules.get_by_id(flow_id).is_none() {
            return TokenResult::new(TokenStatus::NoRuleExists);
        }

        // remove 即原子认领：并发重放只有一个调用方走到这里之后
        let Some((_, lease)) = self.leases.remove(&token_id) else {
            return TokenResult::new(TokenStatus::AlreadyRelease);
        };
        if let Some(slot) = self.slots.get(&lease.flow_id) {
            let wanted = lease.acquire_count as u64;
            let _ = slot
                .in_flight
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    Some(current.saturating_sub(wanted))
                });
        }
        TokenResult::new(TokenStatus::ReleaseOk)
    }

    /// 某条规则当前的在飞许可数
    pub fn in_flight(&self, flow_id: u64) -> u64 {
        self.slots
            .get(&flow_id)
            .map(|slot| slot.in_flight.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// 存活租约数量
    pub fn active_lease_count(&self) -> usize {
        self.leases.len()
    }

    /// 查询租约
    pub fn lease(&self, token_id: Uuid) -> Option<TokenLease> {
        self.leases.get(&token_id).map(|lease| lease.clone())
    }

    /// 回收已下线规则的许可槽
    ///
    /// 规则表全量更新后调用；对应规则的租约保留，释放时会命中
    /// `NoRuleExists`。
    pub(crate) fn prune_removed_rules(&self) {
        self.slots.retain(|id, _| self.rules.get_by_id(*id).is_some());
    }
}
