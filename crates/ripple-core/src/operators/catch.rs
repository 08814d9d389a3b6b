//! 错误恢复：`catch` 与 `on_error_resume_next`。
//!
//! 上游出错时由恢复工厂产出替补流，其通知原样接入下游；上游正常完成则
//! 原样转发。替补流的订阅存放在可替换槽位中，输出订阅的释放义务会退订
//! 当前活跃的一侧（源或替补）。

use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::StreamError;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::subscriber::Subscriber;
use crate::subscription::{Subscription, Teardown};

struct CatchShared<T> {
    handler: Arc<dyn Fn(StreamError) -> Observable<T> + Send + Sync>,
    current: Mutex<Option<Subscription>>,
    dst: Arc<Subscriber<T>>,
}

struct CatchObserver<T> {
    shared: Arc<CatchShared<T>>,
}

impl<T: Send + 'static> Observer<T> for CatchObserver<T> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        self.shared.dst.next(ctx, value);
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        let fallback = (self.shared.handler)(error);
        let subscription = fallback.subscribe_forward(ctx.clone(), self.shared.dst.clone());
        // 判定与写入在槽位锁内完成，与释放义务的取出串行化。
        let mut current = self.shared.current.lock();
        if self.shared.dst.is_closed() {
            drop(current);
            subscription.unsubscribe();
            return;
        }
        if !subscription.is_closed() {
            *current = Some(subscription);
        }
    }

    fn on_complete(&mut self, ctx: &Context) {
        self.shared.dst.complete(ctx);
    }
}

impl<T: Send + 'static> Observable<T> {
    /// 上游出错时切换到恢复工厂产出的替补流。
    pub fn catch(
        self,
        handler: impl Fn(StreamError) -> Observable<T> + Send + Sync + 'static,
    ) -> Observable<T> {
        let handler: Arc<dyn Fn(StreamError) -> Observable<T> + Send + Sync> = Arc::new(handler);
        Observable::new(move |ctx, dst| {
            let shared = Arc::new(CatchShared {
                handler: handler.clone(),
                current: Mutex::new(None),
                dst,
            });
            shared.dst.subscription().add(Teardown::from_fn({
                let shared = shared.clone();
                move || {
                    if let Some(active) = shared.current.lock().take() {
                        active.unsubscribe();
                    }
                }
            }));
            let source_subscription = self.subscribe_with_context(
                ctx,
                CatchObserver {
                    shared: shared.clone(),
                },
            );
            let mut current = shared.current.lock();
            if shared.dst.is_closed() {
                drop(current);
                source_subscription.unsubscribe();
            } else if !source_subscription.is_closed() && current.is_none() {
                *current = Some(source_subscription);
            }
            Teardown::noop()
        })
    }

    /// 上游出错时无条件切换到固定的替补流。
    pub fn on_error_resume_next(self, fallback: Observable<T>) -> Observable<T> {
        self.catch(move |_error| fallback.clone())
    }
}
