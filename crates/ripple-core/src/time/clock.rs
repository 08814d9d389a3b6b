//! 时钟抽象：统一“读取单调时间”与“可取消地等待”两种能力。
//!
//! # 设计背景（Why）
//! - 重试退避、节流窗口与重放缓冲的最大时效都依赖可靠的时间来源；直接调用
//!   系统时钟会让测试无法复现。通过 trait 注入时钟，生产环境使用真实时间，
//!   测试注入可控的虚拟时间。
//! - 等待必须是可取消的：定时算子的释放路径靠取消令牌把沉睡中的线程立即
//!   唤醒，而不是等到下一个周期。
//!
//! # 契约约束（What）
//! - `now` 单调不减；
//! - `sleep` 在时长走完前返回 [`SleepOutcome::Elapsed`] 则违约；取消令牌置位
//!   后应尽快返回 [`SleepOutcome::Cancelled`]。

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::context::Cancellation;

/// 一次可取消等待的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepOutcome {
    /// 等待时长已走完。
    Elapsed,
    /// 等待期间取消令牌被置位。
    Cancelled,
}

/// 可注入的时钟能力。
///
/// # 使用指引（How）
/// - 以 `Arc<dyn Clock>` 传递给需要时间能力的算子；
/// - 生产环境使用 [`SystemClock`]；测试注入 [`ManualClock`] 并通过
///   `advance` 推进虚拟时间。
pub trait Clock: Send + Sync + 'static {
    /// 返回当前的单调时间点。
    fn now(&self) -> Instant;

    /// 等待给定时长，取消令牌置位时提前返回。
    fn sleep(&self, duration: Duration, cancel: &Cancellation) -> SleepOutcome;
}

/// 基于真实单调时钟的系统实现。
///
/// `sleep` 直接挂在取消令牌的条件变量上：时长走完自然醒，取消发生立即醒，
/// 无需任何轮询。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration, cancel: &Cancellation) -> SleepOutcome {
        if cancel.wait_timeout(duration) {
            SleepOutcome::Cancelled
        } else {
            SleepOutcome::Elapsed
        }
    }
}

/// 手动推进的虚拟时钟，供确定性测试使用。
///
/// # 契约说明（What）
/// - `now` 返回“构造基准 + 已推进量”；
/// - `advance` 推进虚拟时间并唤醒全部沉睡者；
/// - `sleep` 以短片轮询取消令牌：虚拟时钟没有全局唤醒源，取消的可见延迟
///   以一个轮询片为上界（仅测试场景，可接受）。
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<ManualState>,
}

struct ManualState {
    base: Instant,
    elapsed: Mutex<Duration>,
    sleepers: Condvar,
}

const MANUAL_POLL_SLICE: Duration = Duration::from_millis(5);

impl ManualClock {
    /// 创建虚拟时钟，基准取构造时刻。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManualState {
                base: Instant::now(),
                elapsed: Mutex::new(Duration::ZERO),
                sleepers: Condvar::new(),
            }),
        }
    }

    /// 推进虚拟时间并唤醒全部沉睡者。
    pub fn advance(&self, delta: Duration) {
        {
            let mut elapsed = self.inner.elapsed.lock();
            *elapsed += delta;
        }
        self.inner.sleepers.notify_all();
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.base + *self.inner.elapsed.lock()
    }

    fn sleep(&self, duration: Duration, cancel: &Cancellation) -> SleepOutcome {
        let mut elapsed = self.inner.elapsed.lock();
        let target = *elapsed + duration;
        loop {
            if cancel.is_cancelled() {
                return SleepOutcome::Cancelled;
            }
            if *elapsed >= target {
                return SleepOutcome::Elapsed;
            }
            let _ = self.inner.sleepers.wait_for(&mut elapsed, MANUAL_POLL_SLICE);
        }
    }
}
