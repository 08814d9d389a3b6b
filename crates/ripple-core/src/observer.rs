//! 观察者契约：三回调消费端与便捷构造器。
//!
//! # 设计背景（Why）
//! - 消费端的全部能力就是三个入口：收元素、收错误、收完成。把它们抽象为一个
//!   对象安全的 trait，算子内部的转发器与用户侧的回调观察者得以共用同一路径。
//! - 互斥与终止闩锁不在这里实现：观察者保持纯粹，投递纪律由外层的
//!   [`Subscriber`](crate::subscriber::Subscriber) 统一兜底。
//!
//! # 契约约束（What）
//! - 实现必须 `Send`：通知可能来自定时器线程或任意生产者线程；
//! - 回调内允许阻塞（同步返回即背压），但不得重入同一主题的发射口。

use crate::context::Context;
use crate::error::StreamError;
use crate::hooks::{self, DroppedNotification};
use crate::notification::NotificationKind;

/// 通知消费端，三个入口与投递动作一一对应。
///
/// # 契约说明（What）
/// - `on_next`：上游推送一个元素；
/// - `on_error` / `on_complete`：终止通知，二者互斥且至多出现一次——该不变式
///   由外层订阅者保证，实现方无需自检；
/// - 所有入口都伴随一个 [`Context`]，算子可能在转发前替换它。
pub trait Observer<T>: Send {
    /// 接收一个元素。
    fn on_next(&mut self, ctx: &Context, value: T);

    /// 接收错误终止。
    fn on_error(&mut self, ctx: &Context, error: StreamError);

    /// 接收正常完成。
    fn on_complete(&mut self, ctx: &Context);
}

type NextFn<T> = Box<dyn FnMut(&Context, T) + Send>;
type ErrorFn = Box<dyn FnMut(&Context, StreamError) + Send>;
type CompleteFn = Box<dyn FnMut(&Context) + Send>;

/// 回调观察者：以一到三个闭包构造的 [`Observer`] 实现。
///
/// # 契约说明（What）
/// - 缺省的 `next` 与 `complete` 为空操作；
/// - 缺省的 `error` 会把错误转投进程级丢弃钩子，保证错误不会无声蒸发；
/// - 上下文无关与带序号的变体仅改变闭包签名，不改变投递语义。
pub struct CallbackObserver<T> {
    next: Option<NextFn<T>>,
    error: Option<ErrorFn>,
    complete: Option<CompleteFn>,
}

impl<T: Send + 'static> CallbackObserver<T> {
    /// 仅关心元素的观察者。
    pub fn next(f: impl FnMut(&Context, T) + Send + 'static) -> Self {
        Self {
            next: Some(Box::new(f)),
            error: None,
            complete: None,
        }
    }

    /// 上下文无关的元素观察者。
    pub fn next_value(mut f: impl FnMut(T) + Send + 'static) -> Self {
        Self::next(move |_ctx, value| f(value))
    }

    /// 带递增序号的元素观察者，序号从 0 开始。
    pub fn enumerated(mut f: impl FnMut(&Context, usize, T) + Send + 'static) -> Self {
        let mut index = 0usize;
        Self::next(move |ctx, value| {
            f(ctx, index, value);
            index += 1;
        })
    }

    /// 完整的三回调观察者。
    pub fn full(
        next: impl FnMut(&Context, T) + Send + 'static,
        error: impl FnMut(&Context, StreamError) + Send + 'static,
        complete: impl FnMut(&Context) + Send + 'static,
    ) -> Self {
        Self {
            next: Some(Box::new(next)),
            error: Some(Box::new(error)),
            complete: Some(Box::new(complete)),
        }
    }

    /// 补充错误回调。
    pub fn with_error(mut self, f: impl FnMut(&Context, StreamError) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    /// 补充完成回调。
    pub fn with_complete(mut self, f: impl FnMut(&Context) + Send + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }
}

impl<T: Send + 'static> Observer<T> for CallbackObserver<T> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        if let Some(f) = self.next.as_mut() {
            f(ctx, value);
        }
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        match self.error.as_mut() {
            Some(f) => f(ctx, error),
            // 未配置错误回调时转投丢弃钩子，避免错误无声蒸发。
            None => hooks::emit_dropped(&DroppedNotification {
                kind: NotificationKind::Error,
                value: None,
                value_type: std::any::type_name::<T>(),
                error: Some(&error),
                stage: "observer.unhandled_error",
            }),
        }
    }

    fn on_complete(&mut self, ctx: &Context) {
        if let Some(f) = self.complete.as_mut() {
            f(ctx);
        }
    }
}
