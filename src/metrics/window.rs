//! 滑动窗口环形数组
//!
//! 固定长度的桶环，按时间戳定位当前桶；过期桶在下次访问时
//! 持锁重置，窗口内的累加与读取全程无锁。

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 当前 Unix 毫秒时间戳
pub(crate) fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// 单个窗口桶
///
/// `start_ms` 为桶起始时间戳；计数器按事件下标排列。
/// 重置只在桶过期后发生，由 `reset_lock` 保证同一时刻仅一个
/// 线程执行清零。
struct WindowBucket {
    start_ms: AtomicU64,
    counters: Vec<AtomicU64>,
    reset_lock: Mutex<()>,
}

impl WindowBucket {
    fn new(events: usize) -> Self {
        Self {
            start_ms: AtomicU64::new(0),
            counters: (0..events).map(|_| AtomicU64::new(0)).collect(),
            reset_lock: Mutex::new(()),
        }
    }
}

/// 滑动窗口计数数组
///
/// 将长度 `interval_ms` 的尾随窗口切成 `sample_count` 个桶，
/// 每桶按事件种类维护原子计数。读取时丢弃落在窗口外的桶，
/// 等效于过期桶被隐式清零。
pub struct BucketLeapArray {
    sample_count: usize,
    interval_ms: u64,
    bucket_len_ms: u64,
    buckets: Vec<WindowBucket>,
}

impl BucketLeapArray {
    /// 创建窗口数组
    ///
    /// `interval_ms` 必须能被 `sample_count` 整除。
    pub fn new(sample_count: usize, interval_ms: u64, events: usize) -> Self {
        debug_assert!(sample_count > 0);
        debug_assert!(events > 0);
        debug_assert_eq!(interval_ms % sample_count as u64, 0);
        Self {
            sample_count,
            interval_ms,
            bucket_len_ms: interval_ms / sample_count as u64,
            buckets: (0..sample_count).map(|_| WindowBucket::new(events)).collect(),
        }
    }

    /// 窗口总长度（毫秒）
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// 单桶长度（毫秒）
    pub fn bucket_len_ms(&self) -> u64 {
        self.bucket_len_ms
    }

    /// 定位 `time_ms` 所在的桶，过期则持锁重置
    fn bucket_at(&self, time_ms: u64) -> &WindowBucket {
        let idx = ((time_ms / self.bucket_len_ms) as usize) % self.sample_count;
        let start = time_ms - time_ms % self.bucket_len_ms;
        let bucket = &self.buckets[idx];

        if bucket.start_ms.load(Ordering::Acquire) != start {
            let _guard = bucket.reset_lock.lock();
            // 重复检查：并发重置者只有一个生效
            if bucket.start_ms.load(Ordering::Acquire) < start {
                for counter in &bucket.counters {
                    counter.store(0, Ordering::Release);
                }
                bucket.start_ms.store(start, Ordering::Release);
            }
        }
        bucket
    }

    pub(crate) fn add_at(&self, time_ms: u64, event: usize, weight: u64) {
        self.bucket_at(time_ms).counters[event].fetch_add(weight, Ordering::Relaxed);
    }

    pub(crate) fn sum_at(&self, time_ms: u64, event: usize) -> u64 {
        let mut total = 0;
        for bucket in &self.buckets {
            let start = bucket.start_ms.load(Ordering::Acquire);
            if time_ms.saturating_sub(start) < self.interval_ms {
                total += bucket.counters[event].load(Ordering::Relaxed);
            }
        }
        total
    }

    pub(crate) fn avg_at(&self, time_ms: u64, event: usize) -> f64 {
        self.sum_at(time_ms, event) as f64 * 1000.0 / self.interval_ms as f64
    }

    /// 距下一个桶边界的毫秒数，恒为正
    pub(crate) fn ms_to_next_bucket(&self, time_ms: u64) -> u64 {
        self.bucket_len_ms - time_ms % self.bucket_len_ms
    }

    /// 当前桶累加事件计数
    pub fn add(&self, event: usize, weight: u64) {
        self.add_at(current_time_ms(), event, weight);
    }

    /// 窗口内事件总量
    pub fn sum(&self, event: usize) -> u64 {
        self.sum_at(current_time_ms(), event)
    }

    /// 窗口内事件的每秒均值
    pub fn avg(&self, event: usize) -> f64 {
        self.avg_at(current_time_ms(), event)
    }

    /// 最近一次被写入的桶起始时间戳，从未写入时为 0
    pub fn last_touched_ms(&self) -> u64 {
        self.buckets
            .iter()
            .map(|bucket| bucket.start_ms.load(Ordering::Acquire))
            .max()
            .unwrap_or(0)
    }
}
