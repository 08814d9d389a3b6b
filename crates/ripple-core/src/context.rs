//! 调用上下文：取消、截止与用户作用域值的只读载体。
//!
//! # 设计背景（Why）
//! - 每一次通知投递都伴随一个上下文；算子可以在转发前替换它，从而把取消信号、
//!   截止时间与请求级元数据沿订阅链路向下传播。
//! - 取消原语需要同时满足两类消费者：热路径上的无锁轮询（原子位），以及定时器、
//!   阻塞汇聚器的“挂起等待、取消即醒”（条件变量）。
//!
//! # 契约约束（What）
//! - [`Cancellation`] 一旦置位不可回退；共享同一原子位的全部派生实例同时可见；
//! - [`Deadline`] 仅基于单调时钟，判定是否超时由调用方提供“当前时刻”；
//! - [`Context`] 克隆为常数成本，值绑定通过派生产生新实例，原实例不受影响。

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// 取消原语，统一表达跨算子的可中断性契约。
///
/// # 设计背景（Why）
/// - 长时间运行的生产者、定时器与重试循环都必须能被外部主动打断；
/// - 原子位承担热路径判定，条件变量让阻塞中的线程在取消发生时立即被唤醒，
///   而不是等到下一次轮询。
///
/// # 契约说明（What）
/// - `cancel` 仅在首次置位时返回 `true`，便于调用方执行一次性兜底逻辑；
/// - `child` 派生共享同一原子位的实例，用于跨模块传播取消语义；
/// - `wait`/`wait_timeout` 阻塞至取消发生（或超时），被 `cancel` 即时唤醒。
#[derive(Clone)]
pub struct Cancellation {
    inner: Arc<CancellationState>,
}

struct CancellationState {
    flag: AtomicBool,
    lock: Mutex<()>,
    waiters: Condvar,
}

impl Cancellation {
    /// 创建处于“未取消”状态的令牌。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState {
                flag: AtomicBool::new(false),
                lock: Mutex::new(()),
                waiters: Condvar::new(),
            }),
        }
    }

    /// 查询当前是否已被标记取消。无锁。
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 将令牌标记为取消并唤醒全部等待者。
    ///
    /// 返回 `true` 表示本次调用首次触发取消；`false` 表示先前已被取消。
    pub fn cancel(&self) -> bool {
        let first = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            // 与等待者的“锁内复查标志”配对，保证不丢失唤醒。
            let _guard = self.inner.lock.lock();
            self.inner.waiters.notify_all();
        }
        first
    }

    /// 派生共享同一原子位的子令牌。
    pub fn child(&self) -> Self {
        self.clone()
    }

    /// 阻塞直至取消发生。
    pub fn wait(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut guard = self.inner.lock.lock();
        while !self.is_cancelled() {
            self.inner.waiters.wait(&mut guard);
        }
    }

    /// 阻塞至取消发生或超时。返回 `true` 表示已取消，`false` 表示超时后仍未取消。
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_cancelled() {
            if self.inner.waiters.wait_until(&mut guard, deadline).timed_out() {
                return self.is_cancelled();
            }
        }
        true
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellation")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// 截止原语，描述操作的最迟完成时刻。仅使用单调时钟。
///
/// # 契约说明（What）
/// - 可以为空（未设置），代表调用方未施加硬超时；
/// - 截止到期不会自动触发取消，检测方需自行调用 [`Cancellation::cancel`]。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    instant: Option<Instant>,
}

impl Deadline {
    /// 创建未设置截止时间的实例。
    pub const fn none() -> Self {
        Self { instant: None }
    }

    /// 根据绝对时间点构造截止时间。
    pub fn at(instant: Instant) -> Self {
        Self {
            instant: Some(instant),
        }
    }

    /// 以当前时刻加偏移构造截止时间。
    pub fn with_timeout(now: Instant, timeout: Duration) -> Self {
        Self::at(now + timeout)
    }

    /// 返回内部时间点，便于与调度器协作。
    pub fn instant(&self) -> Option<Instant> {
        self.instant
    }

    /// 判断在给定时刻是否已超时。未设置截止时间恒为 `false`。
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.instant {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// 距截止还剩多少时间；已过期返回零，未设置返回 `None`。
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.instant.map(|deadline| deadline.saturating_duration_since(now))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::none()
    }
}

type ValueSlot = (&'static str, Arc<dyn Any + Send + Sync>);

struct ContextInner {
    cancellation: Cancellation,
    deadline: Deadline,
    values: Vec<ValueSlot>,
}

/// 调用上下文：取消令牌、截止时间与用户作用域值的 `Arc` 聚合。
///
/// # 设计背景（Why）
/// - 每次投递都携带上下文，克隆必须是常数成本，故内部以 `Arc` 共享；
/// - 值绑定采用“派生出新上下文”的不可变风格，避免跨订阅的意外写穿。
///
/// # 契约说明（What）
/// - [`Context::background`]：无取消、无截止的根上下文；
/// - [`Context::with_value`]：派生携带新键值的子上下文，同键后写覆盖先写；
/// - [`Context::value`]：按键与类型取值，类型不匹配视同缺失。
///
/// # 风险提示（Trade-offs）
/// - 值槽为线性查找：上下文值定位于“少量请求级元数据”，不是通用容器；
///   若键数量失控，应重新审视设计而非更换数据结构。
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// 创建无取消、无截止的根上下文。
    pub fn background() -> Self {
        Self::builder().build()
    }

    /// 创建上下文构建器。
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// 获取取消令牌。
    pub fn cancellation(&self) -> &Cancellation {
        &self.inner.cancellation
    }

    /// 是否已被取消。等价于 `self.cancellation().is_cancelled()`。
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// 查询截止时间。
    pub fn deadline(&self) -> Deadline {
        self.inner.deadline
    }

    /// 按键与类型读取用户作用域值。
    pub fn value<V: Any + Send + Sync>(&self, key: &str) -> Option<Arc<V>> {
        self.inner
            .values
            .iter()
            .rev()
            .find(|(slot_key, _)| *slot_key == key)
            .and_then(|(_, slot)| slot.clone().downcast::<V>().ok())
    }

    /// 派生携带新键值的子上下文，取消与截止沿用当前实例。
    pub fn with_value<V: Any + Send + Sync>(&self, key: &'static str, value: V) -> Self {
        let mut values = self.inner.values.clone();
        values.push((key, Arc::new(value)));
        Self {
            inner: Arc::new(ContextInner {
                cancellation: self.inner.cancellation.clone(),
                deadline: self.inner.deadline,
                values,
            }),
        }
    }

    /// 派生替换取消令牌的子上下文，截止与值槽沿用当前实例。
    pub fn with_cancellation(&self, cancellation: Cancellation) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                cancellation,
                deadline: self.inner.deadline,
                values: self.inner.values.clone(),
            }),
        }
    }

    /// 派生替换截止时间的子上下文。
    pub fn with_deadline(&self, deadline: Deadline) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                cancellation: self.inner.cancellation.clone(),
                deadline,
                values: self.inner.values.clone(),
            }),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.inner.deadline)
            .field("values", &self.inner.values.len())
            .finish()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let deadline = match self.inner.deadline.instant() {
            Some(instant) => format!("{instant:?}"),
            None => "none".to_string(),
        };
        write!(
            f,
            "Context{{cancelled={}, deadline={}, values={}}}",
            self.is_cancelled(),
            deadline,
            self.inner.values.len()
        )
    }
}

/// [`Context`] 构建器。
pub struct ContextBuilder {
    cancellation: Cancellation,
    deadline: Deadline,
    values: Vec<ValueSlot>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            cancellation: Cancellation::new(),
            deadline: Deadline::none(),
            values: Vec::new(),
        }
    }
}

impl ContextBuilder {
    /// 设置取消令牌。
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// 设置截止时间。
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// 追加用户作用域值。
    pub fn with_value<V: Any + Send + Sync>(mut self, key: &'static str, value: V) -> Self {
        self.values.push((key, Arc::new(value)));
        self
    }

    /// 构建上下文。
    pub fn build(self) -> Context {
        Context {
            inner: Arc::new(ContextInner {
                cancellation: self.cancellation,
                deadline: self.deadline,
                values: self.values,
            }),
        }
    }
}
