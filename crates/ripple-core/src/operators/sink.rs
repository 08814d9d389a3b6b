//! 阻塞式汇聚驱动器：`collect`、`first`、`last`。
//!
//! 汇聚器消费整条流：订阅、阻塞等待终止、同步返回结果。上下文取消经
//! [`Observable::throw_on_context_cancel`] 桥接为错误，等待因此永远能被
//! 取消唤醒，不会悬死在已放弃的流上。

use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::{DrainError, StreamError};
use crate::observable::Observable;
use crate::observer::CallbackObserver;

struct CollectState<T> {
    items: Vec<T>,
    last_ctx: Option<Context>,
    error: Option<StreamError>,
}

impl<T: Send + 'static> Observable<T> {
    /// 汇聚整条流：返回全部元素、最后一次投递携带的上下文与终止错误（若有）。
    ///
    /// 阻塞直至流终止或上下文取消（取消表现为 `context.cancelled` 错误）。
    pub fn collect(self, ctx: Context) -> (Vec<T>, Context, Option<StreamError>) {
        let state = Arc::new(Mutex::new(CollectState {
            items: Vec::new(),
            last_ctx: None,
            error: None,
        }));
        let on_next = {
            let state = state.clone();
            move |cb_ctx: &Context, value: T| {
                let mut state = state.lock();
                state.items.push(value);
                state.last_ctx = Some(cb_ctx.clone());
            }
        };
        let on_error = {
            let state = state.clone();
            move |cb_ctx: &Context, error: StreamError| {
                let mut state = state.lock();
                state.error = Some(error);
                state.last_ctx = Some(cb_ctx.clone());
            }
        };
        let on_complete = {
            let state = state.clone();
            move |cb_ctx: &Context| {
                let mut state = state.lock();
                state.last_ctx = Some(cb_ctx.clone());
            }
        };
        let subscription = self
            .throw_on_context_cancel()
            .subscribe_with_context(ctx.clone(), CallbackObserver::full(on_next, on_error, on_complete));
        subscription.wait();
        let mut state = state.lock();
        (
            std::mem::take(&mut state.items),
            state.last_ctx.take().unwrap_or(ctx),
            state.error.take(),
        )
    }

    /// 取第一个元素后立即退订上游。
    pub fn first(self, ctx: Context) -> Result<T, DrainError> {
        let (items, _last_ctx, error) = self.take(1).collect(ctx);
        match error {
            Some(error) => Err(DrainError::Upstream(error)),
            None => items.into_iter().next().ok_or(DrainError::Empty),
        }
    }

    /// 等待流终止并返回最后一个元素。
    pub fn last(self, ctx: Context) -> Result<T, DrainError> {
        let (items, _last_ctx, error) = self.collect(ctx);
        match error {
            Some(error) => Err(DrainError::Upstream(error)),
            None => items.into_iter().next_back().ok_or(DrainError::Empty),
        }
    }
}
