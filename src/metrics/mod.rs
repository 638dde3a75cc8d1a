//! 集群指标
//!
//! 每条集群流控规则对应一份滑动窗口指标，记录准入过程中的
//! 各类事件；指标的创建与销毁由规则注册表驱动，规则存活期间
//! 有且仅有一份指标。

pub mod param_metric;
pub mod window;

use crate::constants::{WINDOW_INTERVAL_MS, WINDOW_SAMPLE_COUNT};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use window::{current_time_ms, BucketLeapArray};

pub use param_metric::{ClusterParamMetric, ParamMetricRegistry};

/// 指标事件种类
///
/// 封闭枚举，对应窗口桶内的计数器下标。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricEvent {
    /// 放行的令牌数
    Pass,
    /// 拒绝的令牌数
    Block,
    /// 放行的请求数
    PassRequest,
    /// 拒绝的请求数
    BlockRequest,
    /// 优先请求放行的令牌数
    OccupiedPass,
    /// 优先请求拒绝的令牌数
    OccupiedBlock,
    /// 已预占下一窗口的令牌数
    Waiting,
}

impl MetricEvent {
    /// 事件种类总数
    pub const COUNT: usize = 7;

    fn index(self) -> usize {
        self as usize
    }
}

/// 单条规则的集群指标
pub struct ClusterMetric {
    window: BucketLeapArray,
    created_at_ms: u64,
}

impl ClusterMetric {
    /// 以默认窗口参数创建
    pub fn new() -> Self {
        Self::with_window(WINDOW_SAMPLE_COUNT, WINDOW_INTERVAL_MS)
    }

    /// 以指定窗口参数创建
    pub fn with_window(sample_count: usize, interval_ms: u64) -> Self {
        Self {
            window: BucketLeapArray::new(sample_count, interval_ms, MetricEvent::COUNT),
            created_at_ms: current_time_ms(),
        }
    }

    /// 累加事件计数
    pub fn add(&self, event: MetricEvent, weight: u64) {
        self.window.add(event.index(), weight);
    }

    /// 窗口内事件的每秒均值
    pub fn avg(&self, event: MetricEvent) -> f64 {
        self.window.avg(event.index())
    }

    /// 窗口内事件总量
    pub fn sum(&self, event: MetricEvent) -> u64 {
        self.window.sum(event.index())
    }

    /// 尝试预占下一窗口的通过额度
    ///
    /// 仅当本次预占与既有预占之和不超过阈值时成立；成立后记一笔
    /// [`MetricEvent::Waiting`] 并返回距下一窗口的毫秒数（恒为正），
    /// 否则返回 0。
    pub fn try_occupy_next(&self, weight: u32, threshold: f64) -> u64 {
        let now = current_time_ms();
        let reserved = self.window.avg_at(now, MetricEvent::Waiting.index());
        if reserved + weight as f64 <= threshold {
            self.window.add_at(now, MetricEvent::Waiting.index(), weight as u64);
            self.window.ms_to_next_bucket(now).max(1)
        } else {
            0
        }
    }

    /// 指标是否已存在满一个完整窗口
    ///
    /// 刚创建的指标还来不及观测到真实负载，借用判定在此之前
    /// 不信任其数据。
    pub fn observed_full_window(&self) -> bool {
        current_time_ms().saturating_sub(self.created_at_ms) >= self.window.interval_ms()
    }

    /// 窗口总长度（毫秒）
    pub fn interval_ms(&self) -> u64 {
        self.window.interval_ms()
    }
}

impl Default for ClusterMetric {
    fn default() -> Self {
        Self::new()
    }
}

/// 流控指标注册表
///
/// 以规则 id 为键；生命周期操作幂等，键缺失时读取得到哨兵
/// `None` 而非错误。
#[derive(Default)]
pub struct MetricRegistry {
    metrics: DashMap<u64, Arc<ClusterMetric>>,
}

impl MetricRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出或创建指标
    pub fn get_or_create(&self, flow_id: u64) -> Arc<ClusterMetric> {
        self.metrics
            .entry(flow_id)
            .or_insert_with(|| Arc::new(ClusterMetric::new()))
            .clone()
    }

    /// 取出指标
    pub fn get(&self, flow_id: u64) -> Option<Arc<ClusterMetric>> {
        self.metrics.get(&flow_id).map(|entry| entry.clone())
    }

    /// 移除指标
    pub fn remove(&self, flow_id: u64) {
        self.metrics.remove(&flow_id);
    }

    /// 当前指标数量
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
