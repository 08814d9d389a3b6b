//! 按键切分子流：`group_by` 与带组时效的变体。
//!
//! # 算法要点（How）
//! - 维护 键 → 发布主题 的并发映射。元素到达时求键：已有组则直接投递；
//!   新键先创建主题、把 `GroupedObservable` 发给下游，再投递首个元素——
//!   下游因此有机会在首元素到达前同步订阅新组；
//! - 源终止时把同样的终止通知广播给全部组主题，然后转发给下游；
//! - 带时效变体为每个新组启动一个轻量定时线程：时效走完即完成该组并从映射
//!   摘除，同键的后续元素会开启一个全新的组。

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::context::{Cancellation, Context};
use crate::error::StreamError;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::subject::PublishSubject;
use crate::subscriber::Subscriber;
use crate::subscription::{Subscription, Teardown};
use crate::time::{Clock, SleepOutcome, SystemClock};

/// 携带分组键的子流。
pub struct GroupedObservable<K, T> {
    key: K,
    observable: Observable<T>,
}

impl<K: Clone, T> Clone for GroupedObservable<K, T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            observable: self.observable.clone(),
        }
    }
}

impl<K, T> GroupedObservable<K, T> {
    /// 分组键。
    pub fn key(&self) -> &K {
        &self.key
    }

    /// 子流视图。订阅它等价于订阅该组的发布主题。
    pub fn observable(&self) -> &Observable<T> {
        &self.observable
    }
}

impl<K, T> std::fmt::Debug for GroupedObservable<K, T>
where
    K: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupedObservable")
            .field("key", &self.key)
            .finish()
    }
}

struct GroupShared<K, T>
where
    K: Eq + Hash,
{
    groups: Arc<DashMap<K, PublishSubject<T>>>,
    dst: Arc<Subscriber<GroupedObservable<K, T>>>,
    key_of: Arc<dyn Fn(&T) -> K + Send + Sync>,
    expiry: Option<GroupExpiry>,
}

struct GroupExpiry {
    window: Duration,
    clock: Arc<dyn Clock>,
    stop: Cancellation,
}

struct GroupObserver<K, T>
where
    K: Eq + Hash,
{
    shared: Arc<GroupShared<K, T>>,
}

impl<K, T> Observer<T> for GroupObserver<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    fn on_next(&mut self, ctx: &Context, value: T) {
        let key = (self.shared.key_of)(&value);
        let existing = self.shared.groups.get(&key).map(|entry| entry.value().clone());
        match existing {
            Some(subject) => subject.next(ctx, value),
            None => {
                let subject = PublishSubject::new();
                self.shared.groups.insert(key.clone(), subject.clone());
                if let Some(expiry) = &self.shared.expiry {
                    spawn_expiry(
                        self.shared.groups.clone(),
                        key.clone(),
                        ctx.clone(),
                        expiry,
                    );
                }
                self.shared.dst.next(
                    ctx,
                    GroupedObservable {
                        key,
                        observable: subject.as_observable(),
                    },
                );
                subject.next(ctx, value);
            }
        }
    }

    fn on_error(&mut self, ctx: &Context, error: StreamError) {
        let subjects: Vec<PublishSubject<T>> = self
            .shared
            .groups
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.shared.groups.clear();
        for subject in subjects {
            subject.error(ctx, error.clone());
        }
        self.shared.dst.error(ctx, error);
    }

    fn on_complete(&mut self, ctx: &Context) {
        let subjects: Vec<PublishSubject<T>> = self
            .shared
            .groups
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.shared.groups.clear();
        for subject in subjects {
            subject.complete(ctx);
        }
        self.shared.dst.complete(ctx);
    }
}

fn spawn_expiry<K, T>(
    groups: Arc<DashMap<K, PublishSubject<T>>>,
    key: K,
    ctx: Context,
    expiry: &GroupExpiry,
) where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    let window = expiry.window;
    let clock = expiry.clock.clone();
    let stop = expiry.stop.child();
    let spawn = std::thread::Builder::new()
        .name("ripple-group-expiry".into())
        .spawn(move || {
            if clock.sleep(window, &stop) == SleepOutcome::Elapsed {
                if let Some((_, subject)) = groups.remove(&key) {
                    subject.complete(&ctx);
                }
            }
        });
    if let Err(cause) = spawn {
        // 定时线程创建失败只是失去自动到期能力，组仍随源终止关闭。
        tracing::warn!(error = %cause, "分组到期线程创建失败，该组将随源一起终止");
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    /// 按键函数把源切分为多个子流，每个新键产出一个 [`GroupedObservable`]。
    pub fn group_by<K>(
        self,
        key_of: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> Observable<GroupedObservable<K, T>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        self.group_by_inner(key_of, None)
    }

    /// 带组时效的 [`Observable::group_by`]：每个组自创建起最多存活 `window`，
    /// 到期即独立完成并从映射摘除；同键的后续元素开启新组。
    pub fn group_by_with_duration<K>(
        self,
        key_of: impl Fn(&T) -> K + Send + Sync + 'static,
        window: Duration,
    ) -> Observable<GroupedObservable<K, T>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        self.group_by_inner(key_of, Some((window, Arc::new(SystemClock) as Arc<dyn Clock>)))
    }

    fn group_by_inner<K>(
        self,
        key_of: impl Fn(&T) -> K + Send + Sync + 'static,
        expiry: Option<(Duration, Arc<dyn Clock>)>,
    ) -> Observable<GroupedObservable<K, T>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        let key_of: Arc<dyn Fn(&T) -> K + Send + Sync> = Arc::new(key_of);
        Observable::new(move |ctx, dst| {
            let stop = Cancellation::new();
            let shared = Arc::new(GroupShared {
                groups: Arc::new(DashMap::new()),
                dst,
                key_of: key_of.clone(),
                expiry: expiry.as_ref().map(|(window, clock)| GroupExpiry {
                    window: *window,
                    clock: clock.clone(),
                    stop: stop.clone(),
                }),
            });
            let group = Subscription::new();
            group.add(Teardown::from_fn(move || {
                stop.cancel();
            }));
            group.add_subscription(self.subscribe_with_context(ctx, GroupObserver { shared }));
            Teardown::from(group)
        })
    }
}
