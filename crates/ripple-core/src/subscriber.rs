//! 订阅者：观察者与订阅的融合体，承载投递纪律。
//!
//! # 设计背景（Why）
//! - 生产者眼中的“观察者”其实是这里的 [`Subscriber`]：它在原始观察者之外
//!   补上三条铁律——单次投递互斥、终止闩锁、panic 不越界。把纪律集中在一处，
//!   算子与生产者就可以假设下游永远守约。
//!
//! # 架构定位（Where）
//! - [`Observable::subscribe`](crate::observable::Observable::subscribe) 在订阅时
//!   把任意 [`Observer`] 包装成 `Arc<Subscriber>` 再交给生产者；
//! - 主题的注册表里存放的同样是 `Arc<Subscriber>`，广播端直接调用其投递入口。
//!
//! # 契约约束（What）
//! - `next`/`error`/`complete` 对同一订阅者全局互斥，一次只执行一个；
//! - 接受终止通知后：先转发给内部观察者，再闩锁关闭并执行全部释放义务；
//! - 关闭后的任何通知路由到进程级丢弃钩子，绝不再转发；
//! - 用户回调 panic 在此捕获并上报，订阅闩锁关闭，panic 不穿越订阅边界。
//!
//! # 风险提示（Trade-offs）
//! - 投递互斥意味着回调阻塞多久，生产者就被背压多久——这正是本运行时的
//!   同步返回式背压模型，不是缺陷。

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::StreamError;
use crate::hooks::{self, DroppedNotification};
use crate::notification::NotificationKind;
use crate::observer::Observer;
use crate::subscription::Subscription;

/// 投递路径模式。
///
/// - `Checked`：默认模式，捕获回调 panic、记录关闭后到达的通知；
/// - `Unchecked`：由 [`Observable::unsafe_new`](crate::observable::Observable::unsafe_new)
///   构造的生产者使用。终止闩锁与互斥仍然生效（这是内存安全的底线），但
///   panic 捕获与丢弃上报交还给生产者自理。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EmitMode {
    Checked,
    Unchecked,
}

/// 观察者 ⊕ 订阅：生产者可见的下游端点。
///
/// # 契约说明（What）
/// - 投递入口见 [`Subscriber::next`] / [`Subscriber::error`] / [`Subscriber::complete`]；
/// - [`Subscriber::subscription`] 暴露释放句柄，生产者可向其追加释放义务；
/// - [`Subscriber::is_closed`] 供生产者在长循环中轮询，提前停止无谓生产。
pub struct Subscriber<T> {
    delivery: Mutex<Box<dyn Observer<T>>>,
    closed: AtomicBool,
    subscription: Subscription,
    mode: EmitMode,
}

impl<T: Send + 'static> Subscriber<T> {
    pub(crate) fn attach(observer: Box<dyn Observer<T>>, mode: EmitMode) -> Arc<Self> {
        Arc::new(Self {
            delivery: Mutex::new(observer),
            closed: AtomicBool::new(false),
            subscription: Subscription::new(),
            mode,
        })
    }

    /// 是否已关闭（终止通知已接受，或订阅已被外部释放）。
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.subscription.is_closed()
    }

    /// 本订阅者的释放句柄。
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// 投递一个元素。
    ///
    /// 同步返回即背压：调用在内部观察者处理完毕前不会返回。关闭后到达的
    /// 元素进入丢弃钩子。
    pub fn next(&self, ctx: &Context, value: T) {
        if self.is_closed() {
            self.drop_next(&value);
            return;
        }
        let mut observer = self.delivery.lock();
        // 锁内复查：与终止投递竞争时，后到者必须落入丢弃路径。
        if self.is_closed() {
            drop(observer);
            self.drop_next(&value);
            return;
        }
        match self.mode {
            EmitMode::Checked => {
                let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_next(ctx, value)));
                if let Err(payload) = outcome {
                    // 在释放投递锁前闩锁关闭，等待中的投递者醒来即走丢弃路径。
                    self.closed.store(true, Ordering::Release);
                    drop(observer);
                    hooks::emit_panic("subscriber.next", payload.as_ref());
                    self.subscription.unsubscribe();
                }
            }
            EmitMode::Unchecked => observer.on_next(ctx, value),
        }
    }

    /// 投递错误终止：先转发，再闩锁关闭并执行释放义务。
    pub fn error(&self, ctx: &Context, error: StreamError) {
        if self.is_closed() {
            self.drop_terminal(NotificationKind::Error, Some(&error));
            return;
        }
        let mut observer = self.delivery.lock();
        if self.is_closed() {
            drop(observer);
            self.drop_terminal(NotificationKind::Error, Some(&error));
            return;
        }
        match self.mode {
            EmitMode::Checked => {
                let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_error(ctx, error)));
                if let Err(payload) = outcome {
                    hooks::emit_panic("subscriber.error", payload.as_ref());
                }
            }
            EmitMode::Unchecked => observer.on_error(ctx, error),
        }
        self.closed.store(true, Ordering::Release);
        drop(observer);
        self.subscription.unsubscribe();
    }

    /// 投递正常完成：先转发，再闩锁关闭并执行释放义务。
    pub fn complete(&self, ctx: &Context) {
        if self.is_closed() {
            self.drop_terminal(NotificationKind::Complete, None);
            return;
        }
        let mut observer = self.delivery.lock();
        if self.is_closed() {
            drop(observer);
            self.drop_terminal(NotificationKind::Complete, None);
            return;
        }
        match self.mode {
            EmitMode::Checked => {
                let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_complete(ctx)));
                if let Err(payload) = outcome {
                    hooks::emit_panic("subscriber.complete", payload.as_ref());
                }
            }
            EmitMode::Unchecked => observer.on_complete(ctx),
        }
        self.closed.store(true, Ordering::Release);
        drop(observer);
        self.subscription.unsubscribe();
    }

    fn drop_next(&self, value: &T) {
        if self.mode == EmitMode::Unchecked {
            return;
        }
        hooks::emit_dropped(&DroppedNotification {
            kind: NotificationKind::Next,
            value: Some(value as &(dyn Any + Send)),
            value_type: std::any::type_name::<T>(),
            error: None,
            stage: "subscriber",
        });
    }

    fn drop_terminal(&self, kind: NotificationKind, error: Option<&StreamError>) {
        if self.mode == EmitMode::Unchecked {
            return;
        }
        hooks::emit_dropped(&DroppedNotification {
            kind,
            value: None,
            value_type: std::any::type_name::<T>(),
            error,
            stage: "subscriber",
        });
    }
}

impl<T> std::fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("mode", &self.mode)
            .finish()
    }
}
