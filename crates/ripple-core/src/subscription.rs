//! 订阅与回收：可组合、幂等的资源释放树。
//!
//! # 设计背景（Why）
//! - 一次订阅往往牵连多份资源：生产者的停止回调、动态增减的内层订阅、
//!   定时器的取消令牌。把它们组织成一棵“释放义务树”，释放任意节点即可
//!   确定性地回收整棵子树。
//! - 订阅与订阅者、父与子之间天然成环；这里以“子方持父方弱引用 + 关闭时
//!   显式摘除”的方式切断环，资源在关闭时立刻回收，不依赖任何延迟回收机制。
//!
//! # 契约约束（What）
//! - `unsubscribe` 幂等：释放逻辑恰好执行一次，后续调用为空操作；
//! - 子项按注册顺序的逆序（LIFO）释放；
//! - 向已关闭订阅追加子项时，子项立即被释放；
//! - 某个释放回调 panic 不阻断其余回调，panic 经进程级钩子上报。

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::hooks;

/// 一份释放义务：空操作、一次性回调或另一个订阅。
pub struct Teardown(TeardownKind);

enum TeardownKind {
    Noop,
    Call(Box<dyn FnOnce() + Send>),
    Child(Subscription),
}

impl Teardown {
    /// 空操作释放义务。
    pub fn noop() -> Self {
        Self(TeardownKind::Noop)
    }

    /// 由一次性回调构造释放义务。
    pub fn from_fn(f: impl FnOnce() + Send + 'static) -> Self {
        Self(TeardownKind::Call(Box::new(f)))
    }

    fn run(self) {
        match self.0 {
            TeardownKind::Noop => {}
            TeardownKind::Call(f) => run_guarded(f),
            TeardownKind::Child(sub) => sub.unsubscribe(),
        }
    }
}

impl From<Subscription> for Teardown {
    fn from(sub: Subscription) -> Self {
        Self(TeardownKind::Child(sub))
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match &self.0 {
            TeardownKind::Noop => "Noop",
            TeardownKind::Call(_) => "Call",
            TeardownKind::Child(_) => "Child",
        };
        f.debug_tuple("Teardown").field(&label).finish()
    }
}

// 释放回调 panic 不得中断其余回调的执行。
fn run_guarded(f: Box<dyn FnOnce() + Send>) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        hooks::emit_panic("subscription.teardown", payload.as_ref());
    }
}

/// 由 [`Subscription::add`] 返回的句柄，用于按标识摘除对应回调。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TeardownHandle(u64);

struct Entry {
    id: u64,
    kind: EntryKind,
}

enum EntryKind {
    Call(Option<Box<dyn FnOnce() + Send>>),
    Child(Subscription),
}

struct SubscriptionState {
    entries: Vec<Entry>,
    parents: Vec<Weak<SubscriptionInner>>,
}

struct SubscriptionInner {
    closed: AtomicBool,
    state: Mutex<SubscriptionState>,
    closed_waiters: Condvar,
    entry_ids: AtomicU64,
}

/// 一次可观察对象与观察者绑定的释放句柄。
///
/// # 设计背景（Why）
/// - 订阅是“释放义务的有序容器”：生产者停止回调、内层订阅与附加资源都挂在
///   这里；克隆只是共享同一内部状态，任何克隆发起的 `unsubscribe` 都作用于
///   同一棵树。
///
/// # 契约说明（What）
/// - `add` / `add_subscription`：注册释放义务，返回可用于摘除的句柄或建立
///   父子交叉链接；
/// - `remove` / `remove_handle`：按标识摘除（不执行释放逻辑）；
/// - `unsubscribe`：LIFO 执行全部义务并闩锁关闭，幂等；
/// - `wait` / `wait_timeout`：阻塞直至关闭，供同步驱动器使用。
///
/// # 风险提示（Trade-offs）
/// - 释放回调运行在调用 `unsubscribe` 的线程上：回调内不得再进入会与该线程
///   互等的锁，否则释放路径会被拖死。
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    /// 创建处于开启状态的空订阅。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                closed: AtomicBool::new(false),
                state: Mutex::new(SubscriptionState {
                    entries: Vec::new(),
                    parents: Vec::new(),
                }),
                closed_waiters: Condvar::new(),
                entry_ids: AtomicU64::new(0),
            }),
        }
    }

    /// 创建已处于关闭状态的哨兵订阅。
    ///
    /// 主题在终止态下接纳新订阅者时返回它：终止通知已同步补发完毕，调用方
    /// 拿到的句柄没有任何待释放资源。
    pub fn closed() -> Self {
        let sub = Self::new();
        sub.inner.closed.store(true, Ordering::Release);
        sub
    }

    /// 是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 注册一份释放义务。
    ///
    /// - 空操作义务不占条目，返回 `None`；
    /// - 若订阅已关闭，义务立即执行，返回 `None`；
    /// - 其余情况返回句柄，可经 [`Subscription::remove_handle`] 摘除。
    pub fn add(&self, teardown: Teardown) -> Option<TeardownHandle> {
        if matches!(teardown.0, TeardownKind::Noop) {
            return None;
        }
        if self.is_closed() {
            teardown.run();
            return None;
        }
        let id = self.inner.entry_ids.fetch_add(1, Ordering::Relaxed);
        let kind = match teardown.0 {
            TeardownKind::Noop => unreachable!(),
            TeardownKind::Call(f) => EntryKind::Call(Some(f)),
            TeardownKind::Child(sub) => EntryKind::Child(sub),
        };
        {
            let mut state = self.inner.state.lock();
            // 在锁外判定、锁内复查：与并发的 unsubscribe 竞争时不得遗留条目。
            if self.is_closed() {
                drop(state);
                Entry { id, kind }.dispose();
                return None;
            }
            state.entries.push(Entry { id, kind });
        }
        Some(TeardownHandle(id))
    }

    /// 注册一个子订阅并建立交叉链接：任何一方关闭都会摘除这条边。
    pub fn add_subscription(&self, child: Subscription) {
        if child.is_closed() {
            return;
        }
        if self.is_closed() {
            child.unsubscribe();
            return;
        }
        child.push_parent(Arc::downgrade(&self.inner));
        // 若本方在注册途中被关闭，add 会立即释放子项，父向弱引用无需摘除。
        let _ = self.add(Teardown::from(child.clone()));
    }

    /// 按标识摘除一个子订阅。只断开链接，不执行其释放逻辑。
    pub fn remove(&self, child: &Subscription) {
        let mut state = self.inner.state.lock();
        state.entries.retain(|entry| match &entry.kind {
            EntryKind::Child(sub) => !Arc::ptr_eq(&sub.inner, &child.inner),
            EntryKind::Call(_) => true,
        });
    }

    /// 按句柄摘除一份回调义务。只断开链接，不执行回调。
    pub fn remove_handle(&self, handle: TeardownHandle) {
        let mut state = self.inner.state.lock();
        state.entries.retain(|entry| entry.id != handle.0);
    }

    /// 执行全部释放义务并闩锁关闭。幂等。
    ///
    /// 义务按注册顺序的逆序执行；某个回调 panic 经进程级钩子上报后，
    /// 其余义务仍然执行。
    pub fn unsubscribe(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let (entries, parents) = {
            let mut state = self.inner.state.lock();
            (
                std::mem::take(&mut state.entries),
                std::mem::take(&mut state.parents),
            )
        };
        self.inner.closed_waiters.notify_all();
        for entry in entries.into_iter().rev() {
            entry.dispose();
        }
        // 从各父订阅的子表摘除自身，保证资源表不残留已死边。
        for parent in parents {
            if let Some(parent) = parent.upgrade() {
                Subscription { inner: parent }.remove(self);
            }
        }
    }

    /// 阻塞直至订阅关闭。
    pub fn wait(&self) {
        if self.is_closed() {
            return;
        }
        let mut state = self.inner.state.lock();
        while !self.is_closed() {
            self.inner.closed_waiters.wait(&mut state);
        }
    }

    /// 阻塞直至订阅关闭或超时。返回 `true` 表示已关闭。
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_closed() {
            return true;
        }
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !self.is_closed() {
            if self
                .inner
                .closed_waiters
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return self.is_closed();
            }
        }
        true
    }

    fn push_parent(&self, parent: Weak<SubscriptionInner>) {
        let mut state = self.inner.state.lock();
        state.parents.push(parent);
    }

    /// 同一性判定：两个句柄是否指向同一订阅。
    pub fn ptr_eq(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Entry {
    fn dispose(self) {
        match self.kind {
            EntryKind::Call(Some(f)) => run_guarded(f),
            EntryKind::Call(None) => {}
            EntryKind::Child(sub) => sub.unsubscribe(),
        }
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}
