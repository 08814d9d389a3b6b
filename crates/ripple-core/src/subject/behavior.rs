use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::{SubjectHandle, SubjectObserver, SubjectRegistry, Terminal, drop_subject_emission, register};
use crate::context::Context;
use crate::error::StreamError;
use crate::notification::NotificationKind;
use crate::observable::Observable;
use crate::subscriber::Subscriber;
use crate::subscription::Teardown;

/// 保留最近值的多播主题：迟到者先补收最近一次 `Next`（或初始种子），再接收未来通知。
///
/// # 契约说明（What）
/// - 构造必须提供种子值，`latest` 因此恒有值；
/// - `Active` 期间注册：立即补发存储的最近值，随后与其他订阅者同步接收广播；
/// - `Completed` 后注册：补发最近值，然后完成；`Errored` 后注册：只收到错误；
/// - [`BehaviorSubject::value`] 随时可读，读取无锁（指针交换发布）。
///
/// # 使用约束
/// - 广播在主题锁内执行；从订阅者回调中重入同一主题的发射口会死锁。
pub struct BehaviorSubject<T> {
    inner: Arc<BehaviorInner<T>>,
}

struct BehaviorInner<T> {
    state: Mutex<Terminal>,
    registry: Arc<SubjectRegistry<T>>,
    // 最近值以指针交换发布：写入发生在状态锁内，value() 的无锁读取
    // 永远看到某个完整的历史值，不会读到撕裂状态。
    latest: ArcSwap<T>,
}

impl<T> Clone for BehaviorSubject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> BehaviorSubject<T> {
    /// 以初始种子创建主题。
    pub fn new(seed: T) -> Self {
        Self {
            inner: Arc::new(BehaviorInner {
                state: Mutex::new(Terminal::Active),
                registry: Arc::new(SubjectRegistry::new()),
                latest: ArcSwap::from_pointee(seed),
            }),
        }
    }

    /// 读取当前存储的最近值。无锁。
    pub fn value(&self) -> T {
        (**self.inner.latest.load()).clone()
    }

    /// 发射一个元素：覆盖存储的最近值并广播。终止后调用被丢弃。
    pub fn next(&self, ctx: &Context, value: T) {
        let state = self.inner.state.lock();
        if !state.is_active() {
            drop(state);
            drop_subject_emission(NotificationKind::Next, Some(&value), None);
            return;
        }
        self.inner.latest.store(Arc::new(value.clone()));
        for subscriber in self.inner.registry.snapshot() {
            subscriber.next(ctx, value.clone());
        }
    }

    /// 以错误终止。重复终止被丢弃。
    pub fn error(&self, ctx: &Context, error: StreamError) {
        let mut state = self.inner.state.lock();
        if !state.is_active() {
            drop(state);
            drop_subject_emission::<T>(NotificationKind::Error, None, Some(&error));
            return;
        }
        *state = Terminal::Errored {
            error: error.clone(),
            ctx: ctx.clone(),
        };
        for subscriber in self.inner.registry.drain() {
            subscriber.error(ctx, error.clone());
        }
    }

    /// 正常完成。重复终止被丢弃。
    pub fn complete(&self, ctx: &Context) {
        let mut state = self.inner.state.lock();
        if !state.is_active() {
            drop(state);
            drop_subject_emission::<T>(NotificationKind::Complete, None, None);
            return;
        }
        *state = Terminal::Completed { ctx: ctx.clone() };
        for subscriber in self.inner.registry.drain() {
            subscriber.complete(ctx);
        }
    }

    /// 当前注册的订阅者数量。
    pub fn count_observers(&self) -> usize {
        self.inner.registry.len()
    }

    /// 以可观察对象视图暴露本主题。
    pub fn as_observable(&self) -> Observable<T> {
        let subject = self.clone();
        Observable::new(move |ctx, subscriber| {
            subject.attach(ctx, subscriber);
            Teardown::noop()
        })
    }

    /// 把本主题适配为观察者。
    pub fn observer(&self) -> SubjectObserver<Self> {
        SubjectObserver::new(self.clone())
    }

    fn attach(&self, ctx: Context, subscriber: Arc<Subscriber<T>>) {
        let state = self.inner.state.lock();
        match &*state {
            Terminal::Active => {
                // 补发与注册在同一临界区内完成：补发值与后续广播之间不会插入
                // 其他发射，迟到者看到的序列与其余订阅者前缀一致。
                subscriber.next(&ctx, self.value());
                register(&self.inner.registry, &subscriber);
            }
            Terminal::Errored { error, ctx } => {
                let (error, ctx) = (error.clone(), ctx.clone());
                drop(state);
                subscriber.error(&ctx, error);
            }
            Terminal::Completed { ctx } => {
                let ctx = ctx.clone();
                drop(state);
                subscriber.next(&ctx, self.value());
                subscriber.complete(&ctx);
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SubjectHandle<T> for BehaviorSubject<T> {
    fn next(&self, ctx: &Context, value: T) {
        BehaviorSubject::next(self, ctx, value);
    }

    fn error(&self, ctx: &Context, error: StreamError) {
        BehaviorSubject::error(self, ctx, error);
    }

    fn complete(&self, ctx: &Context) {
        BehaviorSubject::complete(self, ctx);
    }
}

impl<T: Send + 'static> std::fmt::Debug for BehaviorSubject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorSubject")
            .field("observers", &self.inner.registry.len())
            .finish()
    }
}
