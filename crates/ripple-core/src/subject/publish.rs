use std::sync::Arc;

use parking_lot::Mutex;

use super::{SubjectHandle, SubjectObserver, SubjectRegistry, Terminal, drop_subject_emission, register};
use crate::context::Context;
use crate::error::StreamError;
use crate::notification::NotificationKind;
use crate::observable::Observable;
use crate::subscriber::Subscriber;
use crate::subscription::Teardown;

/// 无重放的多播主题：迟到者只看到未来的通知。
///
/// # 契约说明（What）
/// - `Active` 期间的发射同步广播给当下注册的全部订阅者；
/// - 终止后注册的订阅者：`Errored` 收到存储的错误，`Completed` 只收到完成；
/// - 终止后的发射丢弃，订阅者不可见。
///
/// # 使用约束
/// - 广播在主题锁内执行；从订阅者回调中重入同一主题的
///   `next`/`error`/`complete` 会死锁。
pub struct PublishSubject<T> {
    inner: Arc<PublishInner<T>>,
}

struct PublishInner<T> {
    state: Mutex<Terminal>,
    registry: Arc<SubjectRegistry<T>>,
}

impl<T> Clone for PublishSubject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> PublishSubject<T> {
    /// 创建处于 `Active` 状态的主题。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PublishInner {
                state: Mutex::new(Terminal::Active),
                registry: Arc::new(SubjectRegistry::new()),
            }),
        }
    }

    /// 发射一个元素。终止后调用被丢弃。
    pub fn next(&self, ctx: &Context, value: T) {
        let state = self.inner.state.lock();
        if !state.is_active() {
            drop(state);
            drop_subject_emission(NotificationKind::Next, Some(&value), None);
            return;
        }
        for subscriber in self.inner.registry.snapshot() {
            subscriber.next(ctx, value.clone());
        }
    }

    /// 以错误终止：广播给全部订阅者并清空注册表。重复终止被丢弃。
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

    /// 正常完成：广播给全部订阅者并清空注册表。重复终止被丢弃。
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

    /// 把本主题适配为观察者，作为某个源的订阅终点。
    pub fn observer(&self) -> SubjectObserver<Self> {
        SubjectObserver::new(self.clone())
    }

    fn attach(&self, _ctx: Context, subscriber: Arc<Subscriber<T>>) {
        let state = self.inner.state.lock();
        match &*state {
            Terminal::Active => register(&self.inner.registry, &subscriber),
            Terminal::Errored { error, ctx } => {
                let (error, ctx) = (error.clone(), ctx.clone());
                drop(state);
                subscriber.error(&ctx, error);
            }
            Terminal::Completed { ctx } => {
                let ctx = ctx.clone();
                drop(state);
                subscriber.complete(&ctx);
            }
        }
    }
}

impl<T: Clone + Send + 'static> Default for PublishSubject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> SubjectHandle<T> for PublishSubject<T> {
    fn next(&self, ctx: &Context, value: T) {
        PublishSubject::next(self, ctx, value);
    }

    fn error(&self, ctx: &Context, error: StreamError) {
        PublishSubject::error(self, ctx, error);
    }

    fn complete(&self, ctx: &Context) {
        PublishSubject::complete(self, ctx);
    }
}

impl<T: Send + 'static> std::fmt::Debug for PublishSubject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishSubject")
            .field("observers", &self.inner.registry.len())
            .finish()
    }
}
