//! 可观察对象：惰性生产者与订阅协议的载体。
//!
//! # 设计背景（Why）
//! - 一个可观察对象在语义上就是一个函数：`(上下文, 观察者) → 释放义务`。
//!   它不持有任何运行期状态，订阅才触发执行；对同一对象订阅 N 次得到 N 份
//!   相互独立的执行（冷流），除非它是主题或可连接对象的出口。
//! - 算子被建模为“值 + 函数”而非类型层级：任何
//!   `FnOnce(Observable<A>) -> Observable<B>` 都是合法算子，经 [`Observable::pipe`]
//!   从左到右纯组合，订阅时才执行整条链。
//!
//! # 契约约束（What）
//! - 订阅必须返回一个订阅句柄，释放它即停止生产；
//! - 生产者返回的释放义务被注册到该句柄上（义务融合）；
//! - 订阅发起时上下文若已取消，生产者不会执行，观察者收到
//!   `context.cancelled` 错误后订阅立即关闭；
//! - 生产者自身 panic 由订阅边界捕获，上报进程级钩子后以错误终止。

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::context::Context;
use crate::error::StreamError;
use crate::hooks;
use crate::observer::Observer;
use crate::subscriber::{EmitMode, Subscriber};
use crate::subscription::{Subscription, Teardown};

type Producer<T> = dyn Fn(Context, Arc<Subscriber<T>>) -> Teardown + Send + Sync;

/// 惰性的流描述：订阅即执行，释放即停止。
///
/// # 契约说明（What）
/// - [`Observable::new`]：安全构造。生产者的每次发射都经过订阅者的
///   检查路径（互斥、闩锁、panic 捕获、丢弃上报）；
/// - [`Observable::unsafe_new`]：生产者承诺自行维持发射纪律，投递走
///   无检查路径（闩锁仍生效，panic 捕获与丢弃上报由生产者自理）；
/// - 克隆只是共享生产者定义，不共享任何执行状态。
pub struct Observable<T> {
    producer: Arc<Producer<T>>,
    mode: EmitMode,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
            mode: self.mode,
        }
    }
}

impl<T: Send + 'static> Observable<T> {
    /// 以安全模式构造可观察对象。
    ///
    /// 生产者收到的 [`Subscriber`] 已经承担互斥、终止闩锁与 panic 拦截；
    /// 生产者只需专注发射与资源回收。
    pub fn new(
        producer: impl Fn(Context, Arc<Subscriber<T>>) -> Teardown + Send + Sync + 'static,
    ) -> Self {
        Self {
            producer: Arc::new(producer),
            mode: EmitMode::Checked,
        }
    }

    /// 以非安全模式构造可观察对象。
    ///
    /// # 契约说明（What）
    /// - 仅当生产者已经以其他方式保证“单次投递互斥、终止后不再发射、
    ///   回调 panic 不外泄”时方可使用；
    /// - 终止闩锁仍然生效——这是句柄状态一致性的底线——但运行时不再
    ///   捕获 panic，也不上报丢弃通知。
    pub fn unsafe_new(
        producer: impl Fn(Context, Arc<Subscriber<T>>) -> Teardown + Send + Sync + 'static,
    ) -> Self {
        Self {
            producer: Arc::new(producer),
            mode: EmitMode::Unchecked,
        }
    }

    /// 以后台上下文订阅。
    pub fn subscribe(&self, observer: impl Observer<T> + 'static) -> Subscription {
        self.subscribe_with_context(Context::background(), observer)
    }

    /// 以指定上下文订阅。生产者会看到该上下文，并应在发射时原样或替换后传递。
    pub fn subscribe_with_context(
        &self,
        ctx: Context,
        observer: impl Observer<T> + 'static,
    ) -> Subscription {
        self.subscribe_boxed(ctx, Box::new(observer))
    }

    pub(crate) fn subscribe_boxed(&self, ctx: Context, observer: Box<dyn Observer<T>>) -> Subscription {
        let subscriber = Subscriber::attach(observer, self.mode);
        let subscription = subscriber.subscription().clone();
        if ctx.is_cancelled() {
            subscriber.error(&ctx, StreamError::cancelled());
            return subscription;
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            (self.producer)(ctx.clone(), subscriber.clone())
        }));
        match outcome {
            Ok(teardown) => {
                // 义务融合：订阅已同步终止时，add 会立即执行该义务。
                let _ = subscription.add(teardown);
            }
            Err(payload) => {
                hooks::emit_panic("observable.producer", payload.as_ref());
                subscriber.error(&ctx, StreamError::callback_panicked("生产者在订阅执行期间 panic"));
            }
        }
        subscription
    }

    /// 把当前对象的通知原样转发进一个既有订阅者，返回内层订阅句柄。
    ///
    /// 供 `defer`、`catch`、合并族算子复用：下游纪律由 `dst` 自身承担。
    pub(crate) fn subscribe_forward(&self, ctx: Context, dst: Arc<Subscriber<T>>) -> Subscription {
        self.subscribe_boxed(ctx, Box::new(ForwardObserver { dst }))
    }

    /// 从左到右应用一个算子。组合是纯的：不订阅、不执行。
    pub fn pipe<B, F>(self, op: F) -> Observable<B>
    where
        F: FnOnce(Observable<T>) -> Observable<B>,
    {
        op(self)
    }
}

/// 把通知原样搬运到既有订阅者的转发观察者。
pub(crate) struct ForwardObserver<T> {
    pub(crate) dst: Arc<Subscriber<T>>,
}

impl<T: Send + 'static> Observer<T> for ForwardObserver<T> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        self.dst.next(ctx, value);
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        self.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        self.dst.complete(ctx);
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    /// 发射单个元素后完成。
    pub fn just(value: T) -> Self {
        Observable::new(move |ctx, subscriber| {
            subscriber.next(&ctx, value.clone());
            subscriber.complete(&ctx);
            Teardown::noop()
        })
    }

    /// 以给定错误终止的流。
    pub fn throw(error: StreamError) -> Self {
        Observable::new(move |ctx, subscriber| {
            subscriber.error(&ctx, error.clone());
            Teardown::noop()
        })
    }
}

impl<T: Send + 'static> Observable<T> {
    /// 把一个可克隆的迭代器源转成冷流：每次订阅独立走一遍迭代。
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    {
        Observable::new(move |ctx, subscriber| {
            for value in items.clone() {
                // 同步源也要尊重提前退订：下游关闭后停止迭代。
                if subscriber.is_closed() {
                    return Teardown::noop();
                }
                subscriber.next(&ctx, value);
            }
            subscriber.complete(&ctx);
            Teardown::noop()
        })
    }

    /// 不发射任何元素、立即完成的流。
    pub fn empty() -> Self {
        Observable::new(|ctx, subscriber| {
            subscriber.complete(&ctx);
            Teardown::noop()
        })
    }

    /// 永不发射、永不终止的流。用于占位与测试。
    pub fn never() -> Self {
        Observable::new(|_ctx, _subscriber| Teardown::noop())
    }

    /// 订阅时才由工厂生成实际的流。
    pub fn defer(factory: impl Fn() -> Observable<T> + Send + Sync + 'static) -> Self {
        Observable::new(move |ctx, subscriber| Teardown::from(factory().subscribe_forward(ctx, subscriber)))
    }
}

impl<T> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable").finish()
    }
}
