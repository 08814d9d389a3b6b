//! 以边界流切分子流：`window_when` 与 `buffer_when`。
//!
//! # 算法要点（How）
//! - `window_when` 维护一个“当前窗口”发布主题：订阅时立即开出首个窗口；
//!   边界每发射一次，完成当前窗口、开出新窗口并把它发给下游；
//! - 源的元素写入当前窗口；源终止时当前窗口与下游收到同样的终止；
//!   边界完成关闭当前窗口并完成下游，边界出错按源错误处理；
//! - `buffer_when` 是同一旋转机制加一个收集器：窗口关闭时把窗口期内积累的
//!   元素作为一个切片发给下游。

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::StreamError;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::subject::PublishSubject;
use crate::subscriber::Subscriber;
use crate::subscription::{Subscription, Teardown};

struct WindowShared<T: Clone + Send + 'static> {
    current: Mutex<Option<PublishSubject<T>>>,
    dst: Arc<Subscriber<Observable<T>>>,
}

struct WindowSource<T: Clone + Send + 'static> {
    shared: Arc<WindowShared<T>>,
}

impl<T: Clone + Send + 'static> Observer<T> for WindowSource<T> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        // 克隆出主题再投递，避免在窗口锁内执行订阅者回调。
        let window = self.shared.current.lock().clone();
        if let Some(window) = window {
            window.next(ctx, value);
        }
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        let window = self.shared.current.lock().take();
        if let Some(window) = window {
            window.error(ctx, error.clone());
        }
        self.shared.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        let window = self.shared.current.lock().take();
        if let Some(window) = window {
            window.complete(ctx);
        }
        self.shared.dst.complete(ctx);
    }
}

struct WindowBoundary<T: Clone + Send + 'static, B> {
    shared: Arc<WindowShared<T>>,
    _boundary: PhantomData<fn(B)>,
}

impl<T: Clone + Send + 'static, B: Send + 'static> Observer<B> for WindowBoundary<T, B> {
    fn on_next(&mut self, ctx: &Context, _boundary: B) {
        let fresh = PublishSubject::new();
        let closed = self.shared.current.lock().replace(fresh.clone());
        // 先关旧窗、再发新窗：下游观察到的窗口序列与切分顺序一致。
        if let Some(window) = closed {
            window.complete(ctx);
        }
        self.shared.dst.next(ctx, fresh.as_observable());
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        let window = self.shared.current.lock().take();
        if let Some(window) = window {
            window.error(ctx, error.clone());
        }
        self.shared.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        let window = self.shared.current.lock().take();
        if let Some(window) = window {
            window.complete(ctx);
        }
        self.shared.dst.complete(ctx);
    }
}

struct BufferShared<T> {
    buffer: Mutex<Vec<T>>,
    dst: Arc<Subscriber<Vec<T>>>,
}

struct BufferSource<T> {
    shared: Arc<BufferShared<T>>,
}

impl<T: Send + 'static> Observer<T> for BufferSource<T> {
    fn on_next(&mut self, _ctx: &Context, value: T) {
        self.shared.buffer.lock().push(value);
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        // 窗口因错误关闭时不发射残余切片。
        self.shared.buffer.lock().clear();
        self.shared.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        let slice = std::mem::take(&mut *self.shared.buffer.lock());
        self.shared.dst.next(ctx, slice);
        self.shared.dst.complete(ctx);
    }
}

struct BufferBoundary<T, B> {
    shared: Arc<BufferShared<T>>,
    _boundary: PhantomData<fn(B)>,
}

impl<T: Send + 'static, B: Send + 'static> Observer<B> for BufferBoundary<T, B> {
    fn on_next(&mut self, ctx: &Context, _boundary: B) {
        let slice = std::mem::take(&mut *self.shared.buffer.lock());
        self.shared.dst.next(ctx, slice);
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        self.shared.buffer.lock().clear();
        self.shared.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        let slice = std::mem::take(&mut *self.shared.buffer.lock());
        self.shared.dst.next(ctx, slice);
        self.shared.dst.complete(ctx);
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    /// 以边界流切分源：下游得到一串窗口（发布主题视图），源元素进入当前窗口。
    pub fn window_when<B: Send + 'static>(
        self,
        boundary: Observable<B>,
    ) -> Observable<Observable<T>> {
        Observable::new(move |ctx, dst| {
            let shared = Arc::new(WindowShared {
                current: Mutex::new(None),
                dst: dst.clone(),
            });
            let first = PublishSubject::new();
            *shared.current.lock() = Some(first.clone());
            dst.next(&ctx, first.as_observable());
            if dst.is_closed() {
                return Teardown::noop();
            }
            // 源与边界共用一个组订阅：释放输出即同时退订两者。
            let group = Subscription::new();
            group.add_subscription(self.subscribe_with_context(
                ctx.clone(),
                WindowSource {
                    shared: shared.clone(),
                },
            ));
            group.add_subscription(boundary.subscribe_with_context(
                ctx,
                WindowBoundary {
                    shared,
                    _boundary: PhantomData,
                },
            ));
            Teardown::from(group)
        })
    }
}

impl<T: Send + 'static> Observable<T> {
    /// [`Observable::window_when`] 加收集器：每个窗口关闭时发射窗口期内积累的切片。
    pub fn buffer_when<B: Send + 'static>(self, boundary: Observable<B>) -> Observable<Vec<T>> {
        Observable::new(move |ctx, dst| {
            let shared = Arc::new(BufferShared {
                buffer: Mutex::new(Vec::new()),
                dst,
            });
            let group = Subscription::new();
            group.add_subscription(self.subscribe_with_context(
                ctx.clone(),
                BufferSource {
                    shared: shared.clone(),
                },
            ));
            group.add_subscription(boundary.subscribe_with_context(
                ctx,
                BufferBoundary {
                    shared,
                    _boundary: PhantomData,
                },
            ));
            Teardown::from(group)
        })
    }
}
