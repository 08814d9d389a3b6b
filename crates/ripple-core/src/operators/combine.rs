//! 多源组合：`merge`、`concat`、`zip` 与 `combine_latest`。
//!
//! # 形态约定（What）
//! - 组合算子接受同型的 `Vec<Observable<T>>`；异型组合应先用 `map` 把各源
//!   折叠进同一个枚举或元组类型再进入组合；
//! - `zip`/`combine_latest` 的产物是与源同序的 `Vec<T>` 元组；
//! - 空源列表立即完成。
//!
//! # 终止策略
//! - `merge`/`concat` 在全部源完成后完成，任一源出错立即出错；
//! - `zip` 默认采用“任一已完成源的队列被弹空即终止”；
//! - `combine_latest` 在每个源都完成后完成。

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::StreamError;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::subscriber::Subscriber;
use crate::subscription::{Subscription, Teardown};

/// 合并多个源的交错发射，活跃订阅数受 `concurrency` 约束（0 表示不设上限）。
pub fn merge<T: Send + 'static>(sources: Vec<Observable<T>>, concurrency: usize) -> Observable<T> {
    Observable::from_iter(sources).merge_map(|source| source, concurrency)
}

/// 顺序订阅各源：前一个完成后才订阅下一个。
pub fn concat<T: Send + 'static>(sources: Vec<Observable<T>>) -> Observable<T> {
    merge(sources, 1)
}

struct ZipState<T> {
    queues: Vec<VecDeque<T>>,
    completed: Vec<bool>,
    settled: bool,
}

struct ZipShared<T> {
    state: Mutex<ZipState<T>>,
    dst: Arc<Subscriber<Vec<T>>>,
}

struct ZipObserver<T> {
    shared: Arc<ZipShared<T>>,
    index: usize,
}

impl<T: Send + 'static> Observer<T> for ZipObserver<T> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        let mut state = self.shared.state.lock();
        if state.settled {
            return;
        }
        state.queues[self.index].push_back(value);
        if state.queues.iter().all(|queue| !queue.is_empty()) {
            let mut tuple = Vec::with_capacity(state.queues.len());
            for queue in state.queues.iter_mut() {
                if let Some(head) = queue.pop_front() {
                    tuple.push(head);
                }
            }
            // 发射保持在状态锁内：弹出顺序与下游观察到的元组顺序一致。
            self.shared.dst.next(ctx, tuple);
            let exhausted = state
                .completed
                .iter()
                .zip(state.queues.iter())
                .any(|(done, queue)| *done && queue.is_empty());
            if exhausted {
                state.settled = true;
                self.shared.dst.complete(ctx);
            }
        }
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        let mut state = self.shared.state.lock();
        if state.settled {
            return;
        }
        state.settled = true;
        self.shared.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        let mut state = self.shared.state.lock();
        if state.settled {
            return;
        }
        state.completed[self.index] = true;
        if state.queues[self.index].is_empty() {
            state.settled = true;
            self.shared.dst.complete(ctx);
        }
    }
}

/// 拉链组合：每个源各持一条 FIFO 队列，所有队列非空时弹出队首组成元组发射。
pub fn zip<T: Send + 'static>(sources: Vec<Observable<T>>) -> Observable<Vec<T>> {
    Observable::new(move |ctx, dst| {
        if sources.is_empty() {
            dst.complete(&ctx);
            return Teardown::noop();
        }
        let shared = Arc::new(ZipShared {
            state: Mutex::new(ZipState {
                queues: (0..sources.len()).map(|_| VecDeque::new()).collect(),
                completed: vec![false; sources.len()],
                settled: false,
            }),
            dst,
        });
        let group = Subscription::new();
        for (index, source) in sources.iter().enumerate() {
            group.add_subscription(source.subscribe_with_context(
                ctx.clone(),
                ZipObserver {
                    shared: shared.clone(),
                    index,
                },
            ));
        }
        Teardown::from(group)
    })
}

struct CombineState<T> {
    latest: Vec<Option<T>>,
    remaining: usize,
    settled: bool,
}

struct CombineShared<T> {
    state: Mutex<CombineState<T>>,
    dst: Arc<Subscriber<Vec<T>>>,
}

struct CombineObserver<T> {
    shared: Arc<CombineShared<T>>,
    index: usize,
}

impl<T: Clone + Send + 'static> Observer<T> for CombineObserver<T> {
    fn on_next(&mut self, ctx: &Context, value: T) {
        let mut state = self.shared.state.lock();
        if state.settled {
            return;
        }
        state.latest[self.index] = Some(value);
        // 每个源至少发射一次之后，任何一侧的新元素都产出一个新元组。
        if let Some(tuple) = state.latest.iter().cloned().collect::<Option<Vec<T>>>() {
            self.shared.dst.next(ctx, tuple);
        }
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        let mut state = self.shared.state.lock();
        if state.settled {
            return;
        }
        state.settled = true;
        self.shared.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        let mut state = self.shared.state.lock();
        if state.settled {
            return;
        }
        state.remaining -= 1;
        if state.remaining == 0 {
            state.settled = true;
            self.shared.dst.complete(ctx);
        }
    }
}

/// 最新值组合：所有源都发射过之后，任一源的新元素都会携带各源最新值发射元组。
pub fn combine_latest<T: Clone + Send + 'static>(sources: Vec<Observable<T>>) -> Observable<Vec<T>> {
    Observable::new(move |ctx, dst| {
        if sources.is_empty() {
            dst.complete(&ctx);
            return Teardown::noop();
        }
        let shared = Arc::new(CombineShared {
            state: Mutex::new(CombineState {
                latest: vec![None; sources.len()],
                remaining: sources.len(),
                settled: false,
            }),
            dst,
        });
        let group = Subscription::new();
        for (index, source) in sources.iter().enumerate() {
            group.add_subscription(source.subscribe_with_context(
                ctx.clone(),
                CombineObserver {
                    shared: shared.clone(),
                    index,
                },
            ));
        }
        Teardown::from(group)
    })
}
