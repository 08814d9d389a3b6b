use std::sync::Arc;

use parking_lot::Mutex;

use super::{SubjectHandle, SubjectObserver, SubjectRegistry, Terminal, drop_subject_emission, register};
use crate::context::Context;
use crate::error::StreamError;
use crate::notification::NotificationKind;
use crate::observable::Observable;
use crate::subscriber::Subscriber;
use crate::subscription::Teardown;

struct AsyncState<T> {
    terminal: Terminal,
    latest: Option<T>,
}

/// 只在完成时发射最后值的多播主题。
///
/// # 契约说明（What）
/// - `next` 仅覆盖存储的最近值，不触发任何广播；覆盖是静默的，被覆盖的旧值
///   不进入丢弃钩子；
/// - `complete`：若存在存储值，先向每个订阅者发射该值，再发送完成；从未收到
///   `next` 时只发送完成；
/// - `error`：订阅者只看到错误，存储值被丢弃；
/// - 完成后注册的订阅者按同样顺序收到合成补发（存储值 + 完成）。
///
/// # 使用约束
/// - 广播在主题锁内执行；从订阅者回调中重入同一主题的发射口会死锁。
pub struct AsyncSubject<T> {
    inner: Arc<AsyncInner<T>>,
}

struct AsyncInner<T> {
    state: Mutex<AsyncState<T>>,
    registry: Arc<SubjectRegistry<T>>,
}

impl<T> Clone for AsyncSubject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> AsyncSubject<T> {
    /// 创建处于 `Active` 状态的主题。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AsyncInner {
                state: Mutex::new(AsyncState {
                    terminal: Terminal::Active,
                    latest: None,
                }),
                registry: Arc::new(SubjectRegistry::new()),
            }),
        }
    }

    /// 覆盖存储的最近值。不广播；终止后调用被丢弃。
    pub fn next(&self, _ctx: &Context, value: T) {
        let mut state = self.inner.state.lock();
        if !state.terminal.is_active() {
            drop(state);
            drop_subject_emission(NotificationKind::Next, Some(&value), None);
            return;
        }
        state.latest = Some(value);
    }

    /// 以错误终止：订阅者只看到错误，存储值不再发射。
    pub fn error(&self, ctx: &Context, error: StreamError) {
        let mut state = self.inner.state.lock();
        if !state.terminal.is_active() {
            drop(state);
            drop_subject_emission::<T>(NotificationKind::Error, None, Some(&error));
            return;
        }
        state.terminal = Terminal::Errored {
            error: error.clone(),
            ctx: ctx.clone(),
        };
        for subscriber in self.inner.registry.drain() {
            subscriber.error(ctx, error.clone());
        }
    }

    /// 完成：先发射存储值（若有），再向全部订阅者发送完成。
    pub fn complete(&self, ctx: &Context) {
        let mut state = self.inner.state.lock();
        if !state.terminal.is_active() {
            drop(state);
            drop_subject_emission::<T>(NotificationKind::Complete, None, None);
            return;
        }
        state.terminal = Terminal::Completed { ctx: ctx.clone() };
        let latest = state.latest.clone();
        let subscribers = self.inner.registry.drain();
        if let Some(value) = latest {
            for subscriber in &subscribers {
                subscriber.next(ctx, value.clone());
            }
        }
        for subscriber in subscribers {
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

    fn attach(&self, _ctx: Context, subscriber: Arc<Subscriber<T>>) {
        let state = self.inner.state.lock();
        match &state.terminal {
            Terminal::Active => register(&self.inner.registry, &subscriber),
            Terminal::Errored { error, ctx } => {
                let (error, ctx) = (error.clone(), ctx.clone());
                drop(state);
                subscriber.error(&ctx, error);
            }
            Terminal::Completed { ctx } => {
                let ctx = ctx.clone();
                let latest = state.latest.clone();
                drop(state);
                if let Some(value) = latest {
                    subscriber.next(&ctx, value);
                }
                subscriber.complete(&ctx);
            }
        }
    }
}

impl<T: Clone + Send + 'static> Default for AsyncSubject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> SubjectHandle<T> for AsyncSubject<T> {
    fn next(&self, ctx: &Context, value: T) {
        AsyncSubject::next(self, ctx, value);
    }

    fn error(&self, ctx: &Context, error: StreamError) {
        AsyncSubject::error(self, ctx, error);
    }

    fn complete(&self, ctx: &Context) {
        AsyncSubject::complete(self, ctx);
    }
}

impl<T: Send + 'static> std::fmt::Debug for AsyncSubject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSubject")
            .field("observers", &self.inner.registry.len())
            .finish()
    }
}
