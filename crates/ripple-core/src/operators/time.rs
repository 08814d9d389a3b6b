//! 定时源与时间窗算子。
//!
//! # 并发模型（How）
//! - 每个活跃订阅至多一个轻量定时线程；释放义务取消一个停止令牌，沉睡中的
//!   线程被立即唤醒后自行退出。释放路径从不 join 线程——终止通知可能恰好
//!   在定时线程上发出，join 会造成自我等待；
//! - `interval`/`timer` 的时间来源可注入，`debounce`/`throttle` 的窗口判定
//!   基于真实单调时钟与条件变量截止等待（虚拟时钟无法为其提供统一唤醒源）；
//! - 循环型算子在每轮迭代间检查上下文取消，命中即以 `context.cancelled`
//!   错误终止下游。

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::context::{Cancellation, Context};
use crate::error::{StreamError, codes};
use crate::observable::Observable;
use crate::observer::Observer;
use crate::subscriber::Subscriber;
use crate::subscription::{Subscription, Teardown};
use crate::time::{Clock, SleepOutcome, SystemClock};

// 上下文取消监视器的轮询片：退订立即唤醒，取消的可见延迟以此为上界。
const CANCEL_WATCH_SLICE: Duration = Duration::from_millis(20);

fn spawn_failed(cause: std::io::Error) -> StreamError {
    StreamError::new(codes::TIMER_SPAWN_FAILED, "无法创建定时线程").with_cause(cause)
}

/// 按固定周期发射 0,1,2,… 直至退订。时间来源为系统时钟。
pub fn interval(period: Duration) -> Observable<u64> {
    interval_with_clock(period, Arc::new(SystemClock))
}

/// 注入自定义时钟的 [`interval`]。
pub fn interval_with_clock(period: Duration, clock: Arc<dyn Clock>) -> Observable<u64> {
    Observable::new(move |ctx, subscriber| {
        let stop = Cancellation::new();
        let worker_stop = stop.clone();
        let worker_clock = clock.clone();
        let worker_subscriber = subscriber.clone();
        let worker_ctx = ctx.clone();
        let spawn = thread::Builder::new()
            .name("ripple-interval".into())
            .spawn(move || {
                let mut sequence: u64 = 0;
                loop {
                    if worker_clock.sleep(period, &worker_stop) == SleepOutcome::Cancelled {
                        break;
                    }
                    if worker_ctx.is_cancelled() {
                        worker_subscriber.error(&worker_ctx, StreamError::cancelled());
                        break;
                    }
                    if worker_subscriber.is_closed() {
                        break;
                    }
                    worker_subscriber.next(&worker_ctx, sequence);
                    sequence += 1;
                }
            });
        match spawn {
            Ok(_) => Teardown::from_fn(move || {
                stop.cancel();
            }),
            Err(cause) => {
                subscriber.error(&ctx, spawn_failed(cause));
                Teardown::noop()
            }
        }
    })
}

/// 在 `delay` 之后发射单个 0 并完成。时间来源为系统时钟。
pub fn timer(delay: Duration) -> Observable<u64> {
    timer_with_clock(delay, Arc::new(SystemClock))
}

/// 注入自定义时钟的 [`timer`]。
pub fn timer_with_clock(delay: Duration, clock: Arc<dyn Clock>) -> Observable<u64> {
    Observable::new(move |ctx, subscriber| {
        let stop = Cancellation::new();
        let worker_stop = stop.clone();
        let worker_clock = clock.clone();
        let worker_subscriber = subscriber.clone();
        let worker_ctx = ctx.clone();
        let spawn = thread::Builder::new()
            .name("ripple-timer".into())
            .spawn(move || {
                if worker_clock.sleep(delay, &worker_stop) == SleepOutcome::Cancelled {
                    return;
                }
                if worker_ctx.is_cancelled() {
                    worker_subscriber.error(&worker_ctx, StreamError::cancelled());
                    return;
                }
                worker_subscriber.next(&worker_ctx, 0);
                worker_subscriber.complete(&worker_ctx);
            });
        match spawn {
            Ok(_) => Teardown::from_fn(move || {
                stop.cancel();
            }),
            Err(cause) => {
                subscriber.error(&ctx, spawn_failed(cause));
                Teardown::noop()
            }
        }
    })
}

struct DebounceState<T> {
    pending: Option<(Context, T)>,
    deadline: Option<Instant>,
    done: bool,
}

struct DebounceShared<T> {
    state: Mutex<DebounceState<T>>,
    signal: Condvar,
    dst: Arc<Subscriber<T>>,
}

fn run_debounce<T: Send + 'static>(shared: &DebounceShared<T>) {
    loop {
        let fired = {
            let mut state = shared.state.lock();
            loop {
                if state.done {
                    return;
                }
                match state.deadline {
                    None => shared.signal.wait(&mut state),
                    Some(deadline) => {
                        if Instant::now() >= deadline {
                            state.deadline = None;
                            break state.pending.take();
                        }
                        let _ = shared.signal.wait_until(&mut state, deadline);
                    }
                }
            }
        };
        if let Some((ctx, value)) = fired {
            shared.dst.next(&ctx, value);
        }
    }
}

struct DebounceObserver<T> {
    shared: Arc<DebounceShared<T>>,
    window: Duration,
}

impl<T: Send + 'static> Observer<T> for DebounceObserver<T> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        {
            let mut state = self.shared.state.lock();
            // 每个新元素都重置静默窗口，旧的待发值被静默覆盖。
            state.pending = Some((ctx.clone(), value));
            state.deadline = Some(Instant::now() + self.window);
        }
        self.shared.signal.notify_one();
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        {
            let mut state = self.shared.state.lock();
            state.pending = None;
            state.deadline = None;
            state.done = true;
        }
        self.shared.signal.notify_all();
        self.shared.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        let fired = {
            let mut state = self.shared.state.lock();
            state.done = true;
            state.deadline = None;
            state.pending.take()
        };
        self.shared.signal.notify_all();
        if let Some((pending_ctx, value)) = fired {
            self.shared.dst.next(&pending_ctx, value);
        }
        self.shared.dst.complete(ctx);
    }
}

/// 节流配置：冷却窗口与尾沿开关。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    cooldown: Duration,
    trailing: bool,
}

impl ThrottleConfig {
    /// 仅前沿发射的配置。
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            trailing: false,
        }
    }

    /// 启用尾沿补发：冷却期内最后一个被抑制的元素在冷却结束时发射。
    pub fn with_trailing(mut self) -> Self {
        self.trailing = true;
        self
    }

    /// 冷却窗口。
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// 是否启用尾沿补发。
    pub fn trailing(&self) -> bool {
        self.trailing
    }
}

struct ThrottleState<T> {
    cooldown_until: Option<Instant>,
    trailing_pending: Option<(Context, T)>,
    done: bool,
}

struct ThrottleShared<T> {
    state: Mutex<ThrottleState<T>>,
    signal: Condvar,
    dst: Arc<Subscriber<T>>,
    config: ThrottleConfig,
}

fn run_trailing<T: Send + 'static>(shared: &ThrottleShared<T>) {
    loop {
        let fired = {
            let mut state = shared.state.lock();
            loop {
                if state.done {
                    return;
                }
                match state.cooldown_until {
                    None => shared.signal.wait(&mut state),
                    Some(until) => {
                        if Instant::now() >= until {
                            break;
                        }
                        let _ = shared.signal.wait_until(&mut state, until);
                    }
                }
            }
            match state.trailing_pending.take() {
                Some(pending) => {
                    // 尾沿补发本身也开启一轮新的冷却。
                    state.cooldown_until = Some(Instant::now() + shared.config.cooldown);
                    Some(pending)
                }
                None => {
                    state.cooldown_until = None;
                    None
                }
            }
        };
        if let Some((ctx, value)) = fired {
            shared.dst.next(&ctx, value);
        }
    }
}

struct ThrottleObserver<T> {
    shared: Arc<ThrottleShared<T>>,
}

impl<T: Send + 'static> Observer<T> for ThrottleObserver<T> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        let now = Instant::now();
        let forwarded = {
            let mut state = self.shared.state.lock();
            if state.cooldown_until.is_none_or(|until| now >= until) {
                state.cooldown_until = Some(now + self.shared.config.cooldown);
                Some(value)
            } else {
                if self.shared.config.trailing {
                    state.trailing_pending = Some((ctx.clone(), value));
                }
                None
            }
        };
        match forwarded {
            Some(value) => self.shared.dst.next(ctx, value),
            None => {
                self.shared.signal.notify_one();
            }
        }
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        {
            let mut state = self.shared.state.lock();
            state.trailing_pending = None;
            state.done = true;
        }
        self.shared.signal.notify_all();
        self.shared.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        let fired = {
            let mut state = self.shared.state.lock();
            state.done = true;
            state.trailing_pending.take()
        };
        self.shared.signal.notify_all();
        if let Some((pending_ctx, value)) = fired {
            self.shared.dst.next(&pending_ctx, value);
        }
        self.shared.dst.complete(ctx);
    }
}

impl<T: Send + 'static> Observable<T> {
    /// 静默窗口去抖：元素到达后等待 `window`，期间无新元素才发射；新元素重置
    /// 窗口并覆盖待发值。源完成时补发待发值再完成。
    pub fn debounce(self, window: Duration) -> Observable<T> {
        Observable::new(move |ctx, dst| {
            let shared = Arc::new(DebounceShared {
                state: Mutex::new(DebounceState {
                    pending: None,
                    deadline: None,
                    done: false,
                }),
                signal: Condvar::new(),
                dst,
            });
            let worker = shared.clone();
            let spawn = thread::Builder::new()
                .name("ripple-debounce".into())
                .spawn(move || run_debounce(worker.as_ref()));
            if let Err(cause) = spawn {
                shared.dst.error(&ctx, spawn_failed(cause));
                return Teardown::noop();
            }
            let group = Subscription::new();
            group.add(Teardown::from_fn({
                let shared = shared.clone();
                move || {
                    shared.state.lock().done = true;
                    shared.signal.notify_all();
                }
            }));
            group.add_subscription(self.subscribe_with_context(
                ctx,
                DebounceObserver { shared, window },
            ));
            Teardown::from(group)
        })
    }

    /// 前沿节流：冷却期外的元素立即转发并开启冷却，期内元素被抑制。
    pub fn throttle(self, cooldown: Duration) -> Observable<T> {
        self.throttle_with(ThrottleConfig::new(cooldown))
    }

    /// 按完整节流配置执行，尾沿补发需要一个定时线程。
    pub fn throttle_with(self, config: ThrottleConfig) -> Observable<T> {
        Observable::new(move |ctx, dst| {
            let shared = Arc::new(ThrottleShared {
                state: Mutex::new(ThrottleState {
                    cooldown_until: None,
                    trailing_pending: None,
                    done: false,
                }),
                signal: Condvar::new(),
                dst,
                config,
            });
            if config.trailing {
                let worker = shared.clone();
                let spawn = thread::Builder::new()
                    .name("ripple-throttle".into())
                    .spawn(move || run_trailing(worker.as_ref()));
                if let Err(cause) = spawn {
                    shared.dst.error(&ctx, spawn_failed(cause));
                    return Teardown::noop();
                }
            }
            let group = Subscription::new();
            group.add(Teardown::from_fn({
                let shared = shared.clone();
                move || {
                    shared.state.lock().done = true;
                    shared.signal.notify_all();
                }
            }));
            group.add_subscription(
                self.subscribe_with_context(ctx, ThrottleObserver { shared }),
            );
            Teardown::from(group)
        })
    }

    /// 把上下文取消桥接为下游错误。
    ///
    /// 包在带有内部定时线程的源外侧使用：监视线程在退订时立即退出，上下文
    /// 取消则在一个轮询片内转化为 `context.cancelled` 错误。
    pub fn throw_on_context_cancel(self) -> Observable<T> {
        Observable::new(move |ctx, dst| {
            let stop = Cancellation::new();
            let watch_stop = stop.clone();
            let watch_ctx = ctx.clone();
            let watch_dst = dst.clone();
            let spawn = thread::Builder::new()
                .name("ripple-ctx-watch".into())
                .spawn(move || {
                    loop {
                        if watch_ctx.is_cancelled() {
                            watch_dst.error(&watch_ctx, StreamError::cancelled());
                            return;
                        }
                        if watch_stop.wait_timeout(CANCEL_WATCH_SLICE) {
                            return;
                        }
                    }
                });
            if let Err(cause) = spawn {
                dst.error(&ctx, spawn_failed(cause));
                return Teardown::noop();
            }
            let group = Subscription::new();
            group.add(Teardown::from_fn(move || {
                stop.cancel();
            }));
            group.add_subscription(self.subscribe_forward(ctx, dst));
            Teardown::from(group)
        })
    }
}
