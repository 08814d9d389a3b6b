//! 错误重试：带退避策略的自动重订阅。
//!
//! # 算法要点（How）
//! - 上游出错且剩余尝试次数大于零：按退避策略等待（等待可被退订打断），
//!   然后重新订阅同一个源；当前活跃的上游订阅存放在可替换槽位中，输出
//!   订阅的释放义务会取消等待并退订槽位里的订阅；
//! - 预算耗尽后，最后一次错误原样转发给下游；
//! - 等待期间发生退订：干净退出，不再重订阅，也不再发射任何通知；
//! - 等待结束后检测到上下文取消：以 `context.cancelled` 错误终止下游。

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::context::{Cancellation, Context};
use crate::error::StreamError;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::subscriber::Subscriber;
use crate::subscription::{Subscription, Teardown};
use crate::time::{Clock, SleepOutcome, SystemClock};

// 指数退避的饱和上限：防止浮点放大把等待拉到不可用的量级。
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// 重试等待策略的封闭集合。
///
/// # 契约说明（What）
/// - `attempt` 从 0 开始计数（第一次重试为 0）；
/// - 指数策略的结果被钳制在 `[0, MAX_BACKOFF]`，可再叠加 `max_delay` 上限；
/// - 相同输入产生相同输出，便于测试复现。
#[derive(Clone, Debug, PartialEq)]
pub enum BackoffPolicy {
    /// 固定间隔。
    Constant {
        /// 每次重试前的等待时长。
        delay: Duration,
    },
    /// 线性递增：`base + step * attempt`。
    Linear {
        /// 首次重试的基础等待。
        base: Duration,
        /// 每次递增的步长。
        step: Duration,
    },
    /// 指数递增：`base * factor^attempt`，可选饱和上限。
    Exponential {
        /// 首次重试的基础等待。
        base: Duration,
        /// 放大系数。
        factor: f64,
        /// 可选的等待上限。
        max_delay: Option<Duration>,
    },
}

impl BackoffPolicy {
    /// 计算第 `attempt` 次重试前应等待的时长。
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::Constant { delay } => *delay,
            BackoffPolicy::Linear { base, step } => base.saturating_add(*step * attempt),
            BackoffPolicy::Exponential {
                base,
                factor,
                max_delay,
            } => {
                let exponent = factor.powi(attempt.min(i32::MAX as u32) as i32);
                let scaled_secs = base.as_secs_f64() * exponent;
                let scaled = if scaled_secs.is_finite()
                    && scaled_secs >= 0.0
                    && scaled_secs < MAX_BACKOFF.as_secs_f64()
                {
                    Duration::from_secs_f64(scaled_secs)
                } else {
                    MAX_BACKOFF
                };
                match max_delay {
                    Some(cap) => scaled.min(*cap),
                    None => scaled,
                }
            }
        }
    }
}

/// 重试配置：尝试预算与退避策略。
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl RetryConfig {
    /// 创建最多重试 `max_attempts` 次、无等待的配置。
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: BackoffPolicy::Constant {
                delay: Duration::ZERO,
            },
        }
    }

    /// 替换退避策略。
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// 读取重试预算。
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 读取退避策略。
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }
}

struct RetryShared<T> {
    source: Observable<T>,
    config: RetryConfig,
    clock: Arc<dyn Clock>,
    stop: Cancellation,
    current: Mutex<Option<Subscription>>,
    dst: Arc<Subscriber<T>>,
}

fn subscribe_attempt<T: Send + 'static>(shared: &Arc<RetryShared<T>>, ctx: &Context, remaining: u32) {
    let observer = RetryObserver {
        shared: shared.clone(),
        remaining,
    };
    let subscription = shared.source.subscribe_with_context(ctx.clone(), observer);
    // 判定与写入在槽位锁内完成，与释放义务的“取消并退订”串行化，
    // 不给“已取消却仍存入活跃句柄”留窗口。
    let mut current = shared.current.lock();
    if shared.stop.is_cancelled() {
        drop(current);
        subscription.unsubscribe();
        return;
    }
    // 同步失败的尝试会在 subscribe 返回前套叠出更深的尝试；已关闭的旧句柄
    // 不得覆盖嵌套尝试存入的活跃句柄。
    if !subscription.is_closed() {
        *current = Some(subscription);
    }
}

struct RetryObserver<T> {
    shared: Arc<RetryShared<T>>,
    remaining: u32,
}

impl<T: Send + 'static> Observer<T> for RetryObserver<T> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        self.shared.dst.next(ctx, value);
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        if self.remaining == 0 {
            self.shared.dst.error(ctx, error);
            return;
        }
        let attempt = self.shared.config.max_attempts - self.remaining;
        let delay = self.shared.config.backoff.delay_for(attempt);
        if !delay.is_zero()
            && self.shared.clock.sleep(delay, &self.shared.stop) == SleepOutcome::Cancelled
        {
            return;
        }
        if self.shared.stop.is_cancelled() {
            return;
        }
        if ctx.is_cancelled() {
            self.shared.dst.error(ctx, StreamError::cancelled());
            return;
        }
        tracing::debug!(
            attempt = attempt + 1,
            remaining = self.remaining - 1,
            error = %error,
            "上游以错误终止，执行重订阅"
        );
        subscribe_attempt(&self.shared, ctx, self.remaining - 1);
    }

    fn on_complete(&mut self, ctx: &Context) {
        self.shared.dst.complete(ctx);
    }
}

impl<T: Send + 'static> Observable<T> {
    /// 出错时最多重订阅 `max_attempts` 次，不设等待。
    pub fn retry(self, max_attempts: u32) -> Observable<T> {
        self.retry_with_config(RetryConfig::new(max_attempts))
    }

    /// 以完整配置执行重试，时间来源为系统时钟。
    pub fn retry_with_config(self, config: RetryConfig) -> Observable<T> {
        self.retry_with_clock(config, Arc::new(SystemClock))
    }

    /// 注入自定义时钟的重试变体，退避等待经由该时钟执行。
    pub fn retry_with_clock(self, config: RetryConfig, clock: Arc<dyn Clock>) -> Observable<T> {
        Observable::new(move |ctx, dst| {
            let stop = Cancellation::new();
            let shared = Arc::new(RetryShared {
                source: self.clone(),
                config: config.clone(),
                clock: clock.clone(),
                stop: stop.clone(),
                current: Mutex::new(None),
                dst,
            });
            let budget = shared.config.max_attempts;
            shared.dst.subscription().add(Teardown::from_fn({
                let shared = shared.clone();
                move || {
                    shared.stop.cancel();
                    if let Some(active) = shared.current.lock().take() {
                        active.unsubscribe();
                    }
                }
            }));
            subscribe_attempt(&shared, &ctx, budget);
            Teardown::noop()
        })
    }
}
