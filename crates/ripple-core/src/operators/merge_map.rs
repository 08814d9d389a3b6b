//! 内层流合并：受并发上限约束的 `merge_map` / `flat_map`。
//!
//! # 算法要点（How）
//! - 外层每产出一个元素：若活跃内层数未达上限，立即投影并订阅内层；否则进入
//!   FIFO 等待队列；
//! - 内层完成：优先从队列补位（并发槽易主，活跃计数不变），队列为空才释放
//!   计数；外层已完成且活跃数归零时向下游发送完成；
//! - 任一侧出错立即向下游转发错误，下游终止闩锁触发释放义务，统一挂在
//!   “组订阅”上的全部内层订阅随之级联退订；
//! - 下游看到的 `Next` 按到达顺序交错，算子不做任何重排。
//!
//! # 不变式（What）
//! - 任意时刻活跃内层订阅数 ≤ 并发上限；
//! - 终止通知之后下游不再收到任何发射；
//! - 取消输出订阅会同时退订外层与全部内层。

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::StreamError;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::subscriber::Subscriber;
use crate::subscription::{Subscription, Teardown};

struct MergeState<T> {
    active: usize,
    pending: VecDeque<T>,
    outer_done: bool,
    settled: bool,
}

struct MergeShared<T, B> {
    state: Mutex<MergeState<T>>,
    project: Arc<dyn Fn(T) -> Observable<B> + Send + Sync>,
    dst: Arc<Subscriber<B>>,
    group: Subscription,
    limit: usize,
}

enum SlotDecision<T> {
    Drain(T),
    Finish,
    Nothing,
}

impl<T: Send + 'static, B: Send + 'static> MergeShared<T, B> {
    fn launch(self: &Arc<Self>, ctx: &Context, value: T) {
        let inner = (self.project)(value);
        let slot = Arc::new(Mutex::new(None::<Subscription>));
        let observer = InnerObserver {
            shared: self.clone(),
            slot: slot.clone(),
        };
        let subscription = inner.subscribe_with_context(ctx.clone(), observer);
        *slot.lock() = Some(subscription.clone());
        // 同步完成的内层此刻已关闭，add_subscription 会静默跳过。
        self.group.add_subscription(subscription);
    }

    fn on_inner_settled(self: &Arc<Self>, ctx: &Context) {
        let decision = {
            let mut state = self.state.lock();
            if state.settled {
                SlotDecision::Nothing
            } else if let Some(value) = state.pending.pop_front() {
                // 并发槽易主：活跃计数保持不变。
                SlotDecision::Drain(value)
            } else {
                state.active -= 1;
                if state.outer_done && state.active == 0 {
                    state.settled = true;
                    SlotDecision::Finish
                } else {
                    SlotDecision::Nothing
                }
            }
        };
        match decision {
            SlotDecision::Drain(value) => self.launch(ctx, value),
            SlotDecision::Finish => self.dst.complete(ctx),
            SlotDecision::Nothing => {}
        }
    }
}

struct OuterObserver<T, B> {
    shared: Arc<MergeShared<T, B>>,
}

impl<T: Send + 'static, B: Send + 'static> Observer<T> for OuterObserver<T, B> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        let launch = {
            let mut state = self.shared.state.lock();
            if state.settled {
                None
            } else if state.active < self.shared.limit {
                state.active += 1;
                Some(value)
            } else {
                state.pending.push_back(value);
                None
            }
        };
        if let Some(value) = launch {
            self.shared.launch(ctx, value);
        }
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        {
            let mut state = self.shared.state.lock();
            if state.settled {
                return;
            }
            state.settled = true;
        }
        self.shared.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        let finish = {
            let mut state = self.shared.state.lock();
            if state.settled {
                return;
            }
            state.outer_done = true;
            if state.active == 0 && state.pending.is_empty() {
                state.settled = true;
                true
            } else {
                false
            }
        };
        if finish {
            self.shared.dst.complete(ctx);
        }
    }
}

struct InnerObserver<T, B> {
    shared: Arc<MergeShared<T, B>>,
    slot: Arc<Mutex<Option<Subscription>>>,
}

impl<T: Send + 'static, B: Send + 'static> Observer<B> for InnerObserver<T, B> {
    fn on_next(&mut self, ctx: &Context, value: B) {
        self.shared.dst.next(ctx, value);
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        {
            let mut state = self.shared.state.lock();
            if state.settled {
                return;
            }
            state.settled = true;
        }
        // 下游终止会级联退订组订阅，所有仍活跃的内层随之停止。
        self.shared.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        // 按标识把已完成的内层从组订阅摘除，避免组内条目无界增长。
        if let Some(subscription) = self.slot.lock().take() {
            self.shared.group.remove(&subscription);
        }
        self.shared.on_inner_settled(ctx);
    }
}

impl<T: Send + 'static> Observable<T> {
    /// 把每个元素投影为内层流并合并其发射，活跃内层数受 `concurrency` 约束。
    ///
    /// `concurrency == 0` 表示不设上限。超出上限的元素进入 FIFO 队列，在并发
    /// 槽释放时按序补位。
    pub fn merge_map<B: Send + 'static>(
        self,
        project: impl Fn(T) -> Observable<B> + Send + Sync + 'static,
        concurrency: usize,
    ) -> Observable<B> {
        let project: Arc<dyn Fn(T) -> Observable<B> + Send + Sync> = Arc::new(project);
        Observable::new(move |ctx, dst| {
            let limit = if concurrency == 0 { usize::MAX } else { concurrency };
            let group = Subscription::new();
            dst.subscription().add_subscription(group.clone());
            let shared = Arc::new(MergeShared {
                state: Mutex::new(MergeState {
                    active: 0,
                    pending: VecDeque::new(),
                    outer_done: false,
                    settled: false,
                }),
                project: project.clone(),
                dst,
                group: group.clone(),
                limit,
            });
            let outer = self.subscribe_with_context(ctx, OuterObserver { shared });
            group.add_subscription(outer);
            Teardown::noop()
        })
    }

    /// 无并发上限的 [`Observable::merge_map`]。
    pub fn flat_map<B: Send + 'static>(
        self,
        project: impl Fn(T) -> Observable<B> + Send + Sync + 'static,
    ) -> Observable<B> {
        self.merge_map(project, 0)
    }
}
