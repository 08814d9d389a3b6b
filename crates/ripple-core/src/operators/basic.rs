//! 逐元素算子：映射、过滤、截取、跳过与旁路观察。
//!
//! 这些算子直接由发射契约导出：转发器各自包装下游订阅者，上游订阅句柄作为
//! 释放义务挂在输出订阅上，取消自然级联。

use std::sync::Arc;

use crate::context::Context;
use crate::error::StreamError;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::subscriber::Subscriber;
use crate::subscription::Teardown;

struct MapObserver<T, B> {
    dst: Arc<Subscriber<B>>,
    project: Arc<dyn Fn(T) -> B + Send + Sync>,
}

impl<T: Send + 'static, B: Send + 'static> Observer<T> for MapObserver<T, B> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        let mapped = (self.project)(value);
        self.dst.next(ctx, mapped);
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        self.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        self.dst.complete(ctx);
    }
}

struct FilterObserver<T> {
    dst: Arc<Subscriber<T>>,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: Send + 'static> Observer<T> for FilterObserver<T> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        if (self.predicate)(&value) {
            self.dst.next(ctx, value);
        }
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        self.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        self.dst.complete(ctx);
    }
}

struct TakeObserver<T> {
    dst: Arc<Subscriber<T>>,
    remaining: usize,
}

impl<T: Send + 'static> Observer<T> for TakeObserver<T> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        if self.remaining == 0 {
            return;
        }
        self.remaining -= 1;
        self.dst.next(ctx, value);
        if self.remaining == 0 {
            // 完成即闩锁下游：其订阅的释放义务会级联退订上游。
            self.dst.complete(ctx);
        }
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        self.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        self.dst.complete(ctx);
    }
}

struct SkipObserver<T> {
    dst: Arc<Subscriber<T>>,
    remaining: usize,
}

impl<T: Send + 'static> Observer<T> for SkipObserver<T> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        if self.remaining > 0 {
            self.remaining -= 1;
            return;
        }
        self.dst.next(ctx, value);
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        self.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        self.dst.complete(ctx);
    }
}

struct TapObserver<T> {
    dst: Arc<Subscriber<T>>,
    probe: Arc<dyn Fn(&T) + Send + Sync>,
}

impl<T: Send + 'static> Observer<T> for TapObserver<T> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        (self.probe)(&value);
        self.dst.next(ctx, value);
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        self.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        self.dst.complete(ctx);
    }
}

impl<T: Send + 'static> Observable<T> {
    /// 把每个元素经投影函数映射为新元素。
    pub fn map<B: Send + 'static>(
        self,
        project: impl Fn(T) -> B + Send + Sync + 'static,
    ) -> Observable<B> {
        let project: Arc<dyn Fn(T) -> B + Send + Sync> = Arc::new(project);
        Observable::new(move |ctx, dst| {
            let observer = MapObserver {
                dst,
                project: project.clone(),
            };
            Teardown::from(self.subscribe_with_context(ctx, observer))
        })
    }

    /// 仅保留谓词判定为真的元素。
    pub fn filter(self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Observable<T> {
        let predicate: Arc<dyn Fn(&T) -> bool + Send + Sync> = Arc::new(predicate);
        Observable::new(move |ctx, dst| {
            let observer = FilterObserver {
                dst,
                predicate: predicate.clone(),
            };
            Teardown::from(self.subscribe_with_context(ctx, observer))
        })
    }

    /// 取前 `count` 个元素后完成并退订上游。`count == 0` 时订阅即完成。
    pub fn take(self, count: usize) -> Observable<T> {
        Observable::new(move |ctx, dst| {
            if count == 0 {
                dst.complete(&ctx);
                return Teardown::noop();
            }
            let observer = TakeObserver {
                dst,
                remaining: count,
            };
            Teardown::from(self.subscribe_with_context(ctx, observer))
        })
    }

    /// 跳过前 `count` 个元素。
    pub fn skip(self, count: usize) -> Observable<T> {
        Observable::new(move |ctx, dst| {
            let observer = SkipObserver {
                dst,
                remaining: count,
            };
            Teardown::from(self.subscribe_with_context(ctx, observer))
        })
    }

    /// 旁路观察每个元素，不改变流的内容。
    pub fn tap(self, probe: impl Fn(&T) + Send + Sync + 'static) -> Observable<T> {
        let probe: Arc<dyn Fn(&T) + Send + Sync> = Arc::new(probe);
        Observable::new(move |ctx, dst| {
            let observer = TapObserver {
                dst,
                probe: probe.clone(),
            };
            Teardown::from(self.subscribe_with_context(ctx, observer))
        })
    }
}
