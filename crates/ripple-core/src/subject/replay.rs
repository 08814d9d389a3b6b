use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{SubjectHandle, SubjectObserver, SubjectRegistry, Terminal, drop_subject_emission, register};
use crate::context::Context;
use crate::error::StreamError;
use crate::notification::NotificationKind;
use crate::observable::Observable;
use crate::subscriber::Subscriber;
use crate::subscription::Teardown;
use crate::time::{Clock, SystemClock};

struct ReplayEntry<T> {
    recorded_at: Instant,
    value: T,
}

struct ReplayState<T> {
    terminal: Terminal,
    ring: VecDeque<ReplayEntry<T>>,
}

/// 带有界重放环的多播主题：迟到者先补收缓冲内仍然有效的历史元素。
///
/// # 契约说明（What）
/// - 环最多保留最近 `capacity` 个 `Next`，溢出时淘汰最旧项；
/// - 可选的最大时效：补发与新发射前都会先剔除超龄条目；
/// - `Active` 期间注册：补发缓冲后进入注册表；`Completed` 后注册：补发缓冲后
///   完成；`Errored` 后注册：只收到错误，不补发缓冲；
/// - 时间来源可注入，测试可用虚拟时钟精确驱动时效淘汰。
///
/// # 使用约束
/// - 广播在主题锁内执行；从订阅者回调中重入同一主题的发射口会死锁。
pub struct ReplaySubject<T> {
    inner: Arc<ReplayInner<T>>,
}

struct ReplayInner<T> {
    state: Mutex<ReplayState<T>>,
    registry: Arc<SubjectRegistry<T>>,
    capacity: usize,
    max_age: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl<T> Clone for ReplaySubject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> ReplaySubject<T> {
    /// 创建容量为 `capacity` 的重放主题，不限时效。
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, None, Arc::new(SystemClock))
    }

    /// 创建同时受容量与最大时效约束的重放主题。
    pub fn with_max_age(capacity: usize, max_age: Duration) -> Self {
        Self::with_clock(capacity, Some(max_age), Arc::new(SystemClock))
    }

    /// 注入自定义时钟的完整构造器。
    pub fn with_clock(capacity: usize, max_age: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(ReplayInner {
                state: Mutex::new(ReplayState {
                    terminal: Terminal::Active,
                    ring: VecDeque::with_capacity(capacity.min(64)),
                }),
                registry: Arc::new(SubjectRegistry::new()),
                capacity,
                max_age,
                clock,
            }),
        }
    }

    /// 发射一个元素：剔除超龄条目、写入环、广播。终止后调用被丢弃。
    pub fn next(&self, ctx: &Context, value: T) {
        let mut state = self.inner.state.lock();
        if !state.terminal.is_active() {
            drop(state);
            drop_subject_emission(NotificationKind::Next, Some(&value), None);
            return;
        }
        let now = self.inner.clock.now();
        Self::trim_expired(&mut state, self.inner.max_age, now);
        state.ring.push_back(ReplayEntry {
            recorded_at: now,
            value: value.clone(),
        });
        while state.ring.len() > self.inner.capacity {
            state.ring.pop_front();
        }
        for subscriber in self.inner.registry.snapshot() {
            subscriber.next(ctx, value.clone());
        }
    }

    /// 以错误终止。缓冲保留但终止后注册者不会收到补发。
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

    /// 正常完成。迟到者仍可补收缓冲内未超龄的元素。
    pub fn complete(&self, ctx: &Context) {
        let mut state = self.inner.state.lock();
        if !state.terminal.is_active() {
            drop(state);
            drop_subject_emission::<T>(NotificationKind::Complete, None, None);
            return;
        }
        state.terminal = Terminal::Completed { ctx: ctx.clone() };
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
        let mut state = self.inner.state.lock();
        match &state.terminal {
            Terminal::Errored { error, ctx } => {
                let (error, ctx) = (error.clone(), ctx.clone());
                drop(state);
                subscriber.error(&ctx, error);
                return;
            }
            Terminal::Completed { ctx: terminal_ctx } => {
                let terminal_ctx = terminal_ctx.clone();
                let now = self.inner.clock.now();
                Self::trim_expired(&mut state, self.inner.max_age, now);
                for entry in &state.ring {
                    subscriber.next(&terminal_ctx, entry.value.clone());
                }
                drop(state);
                subscriber.complete(&terminal_ctx);
                return;
            }
            Terminal::Active => {}
        }
        let now = self.inner.clock.now();
        Self::trim_expired(&mut state, self.inner.max_age, now);
        for entry in &state.ring {
            subscriber.next(&ctx, entry.value.clone());
        }
        register(&self.inner.registry, &subscriber);
    }

    fn trim_expired(state: &mut ReplayState<T>, max_age: Option<Duration>, now: Instant) {
        let Some(max_age) = max_age else {
            return;
        };
        while let Some(front) = state.ring.front() {
            if front.recorded_at + max_age <= now {
                state.ring.pop_front();
            } else {
                break;
            }
        }
    }
}

impl<T: Clone + Send + 'static> SubjectHandle<T> for ReplaySubject<T> {
    fn next(&self, ctx: &Context, value: T) {
        ReplaySubject::next(self, ctx, value);
    }

    fn error(&self, ctx: &Context, error: StreamError) {
        ReplaySubject::error(self, ctx, error);
    }

    fn complete(&self, ctx: &Context) {
        ReplaySubject::complete(self, ctx);
    }
}

impl<T: Send + 'static> std::fmt::Debug for ReplaySubject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplaySubject")
            .field("capacity", &self.inner.capacity)
            .field("observers", &self.inner.registry.len())
            .finish()
    }
}
