//! 多播主题：可观察对象与观察者的杂交体。
//!
//! # 设计背景（Why）
//! - 主题把命令式的发射调用桥接给任意多个订阅者，是“冷流变热流”的基础设施。
//!   四个变体只在“缓存什么、迟到者看到什么”上有差异，注册表、终止状态机与
//!   广播纪律完全一致，故收敛在本模块统一实现。
//!
//! # 并发纪律（How）
//! - 注册表使用并发映射（观察者序号 → 订阅者），序号由原子计数器单调分配；
//! - 每个主题持有一把状态互斥锁，保护终止状态与变体缓冲；
//! - **广播在状态锁内完成**：任何订阅者都不可能在终止迁移之后再观察到一次
//!   发射。代价是回调运行在主题锁下——从订阅者回调中重入同一主题的发射口
//!   会死锁，这是文档化的使用约束而非缺陷；
//! - 广播前先对注册表做快照再逐个投递，避免回调内退订时与分片锁互等。
//!
//! # 状态机（What）
//! - `Active → Errored` 与 `Active → Completed` 均为终止迁移，不可逆；
//! - 终止前注册的订阅者收到终止通知并被清出注册表；
//! - 终止后注册的订阅者按变体策略收到合成的补发，拿到的是已关闭的句柄；
//! - 终止后的发射一律丢弃（路由至进程级丢弃钩子），订阅者不可见。

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::context::Context;
use crate::error::StreamError;
use crate::hooks::{self, DroppedNotification};
use crate::notification::NotificationKind;
use crate::observer::Observer;
use crate::subscriber::Subscriber;
use crate::subscription::Teardown;

mod async_subject;
mod behavior;
mod publish;
mod replay;

pub use async_subject::AsyncSubject;
pub use behavior::BehaviorSubject;
pub use publish::PublishSubject;
pub use replay::ReplaySubject;

/// 主题的终止状态。
pub(crate) enum Terminal {
    Active,
    Errored { error: StreamError, ctx: Context },
    Completed { ctx: Context },
}

impl Terminal {
    pub(crate) fn is_active(&self) -> bool {
        matches!(self, Terminal::Active)
    }
}

/// 观察者序号 → 订阅者 的并发注册表。
pub(crate) struct SubjectRegistry<T> {
    entries: DashMap<u64, Arc<Subscriber<T>>>,
    next_index: AtomicU64,
}

impl<T: Send + 'static> SubjectRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_index: AtomicU64::new(0),
        }
    }

    pub(crate) fn insert(&self, subscriber: Arc<Subscriber<T>>) -> u64 {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(index, subscriber);
        index
    }

    pub(crate) fn remove(&self, index: u64) {
        self.entries.remove(&index);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// 拍下当前订阅者快照。广播对快照进行，投递期间不持有任何分片锁，
    /// 回调内的退订才能安全地回到注册表摘除自身。
    pub(crate) fn snapshot(&self) -> Vec<Arc<Subscriber<T>>> {
        self.entries.iter().map(|entry| entry.value().clone()).collect()
    }

    /// 终止迁移：取走全部订阅者并清空注册表。
    pub(crate) fn drain(&self) -> Vec<Arc<Subscriber<T>>> {
        let snapshot = self.snapshot();
        self.entries.clear();
        snapshot
    }
}

/// 把订阅者登记进注册表，并在其订阅关闭时自动摘除对应条目。
///
/// 注册表持订阅者强引用、订阅者的释放义务持注册表弱引用：环在“关闭即摘除”
/// 处被显式切断，主题不依赖延迟回收。
pub(crate) fn register<T: Send + 'static>(
    registry: &Arc<SubjectRegistry<T>>,
    subscriber: &Arc<Subscriber<T>>,
) {
    let index = registry.insert(subscriber.clone());
    let weak = Arc::downgrade(registry);
    subscriber.subscription().add(Teardown::from_fn(move || {
        if let Some(registry) = weak.upgrade() {
            registry.remove(index);
        }
    }));
}

/// 终止后的发射路由到丢弃钩子。订阅者不可见，亦非错误。
pub(crate) fn drop_subject_emission<T: Send + 'static>(
    kind: NotificationKind,
    value: Option<&T>,
    error: Option<&StreamError>,
) {
    hooks::emit_dropped(&DroppedNotification {
        kind,
        value: value.map(|v| v as &(dyn Any + Send)),
        value_type: std::any::type_name::<T>(),
        error,
        stage: "subject",
    });
}

/// 主题的观察者侧能力：命令式发射口的统一抽象。
///
/// 四个主题变体都实现本 trait；经 [`SubjectObserver`] 适配后，一个主题可以
/// 直接作为 [`Observer`] 充当某个源的订阅终点（可连接对象正是这样工作的）。
pub trait SubjectHandle<T>: Clone + Send + Sync + 'static {
    /// 发射一个元素。
    fn next(&self, ctx: &Context, value: T);
    /// 以错误终止。
    fn error(&self, ctx: &Context, error: StreamError);
    /// 正常完成。
    fn complete(&self, ctx: &Context);
}

/// 把主题适配为 [`Observer`] 的桥接器。
pub struct SubjectObserver<S> {
    subject: S,
}

impl<S> SubjectObserver<S> {
    /// 以主题句柄构造桥接器。
    pub fn new(subject: S) -> Self {
        Self { subject }
    }
}

impl<T, S> Observer<T> for SubjectObserver<S>
where
    T: Send + 'static,
    S: SubjectHandle<T>,
{
    fn on_next(&mut self, ctx: &Context, value: T) {
        self.subject.next(ctx, value);
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        self.subject.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        self.subject.complete(ctx);
    }
}
