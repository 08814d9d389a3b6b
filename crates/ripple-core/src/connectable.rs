//! 可连接对象：冷流到热流的门控转换。
//!
//! # 设计背景（Why）
//! - 当一个源应当只执行一次并被 N 个消费者共享时，直接订阅会触发 N 份独立
//!   执行。这里预先物化一个发布主题作为出口，真正的生产由 `connect` 显式
//!   触发——订阅者挂在主题上，与源的执行解耦。
//!
//! # 契约约束（What）
//! - `connect` 恰好订阅源一次；连接存活期间的重复调用返回同一个订阅句柄；
//! - 释放连接句柄后允许再次 `connect`，开启一轮全新的源执行；
//! - 先于 `connect` 注册的订阅者看到连接后的全部发射；其后注册的只看到
//!   后续发射（发布语义）。

use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::observable::Observable;
use crate::subject::PublishSubject;
use crate::subscription::Subscription;

/// 冷源与发布主题之间的门控包装。
pub struct Connectable<T> {
    inner: Arc<ConnectableInner<T>>,
}

struct ConnectableInner<T> {
    source: Observable<T>,
    subject: PublishSubject<T>,
    connection: Mutex<Option<Subscription>>,
}

impl<T> Clone for Connectable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Connectable<T> {
    /// 以给定源构造可连接对象。构造本身不订阅、不执行。
    pub fn new(source: Observable<T>) -> Self {
        Self {
            inner: Arc::new(ConnectableInner {
                source,
                subject: PublishSubject::new(),
                connection: Mutex::new(None),
            }),
        }
    }

    /// 主题出口：订阅它不会触发源的执行。
    pub fn observable(&self) -> Observable<T> {
        self.inner.subject.as_observable()
    }

    /// 触发源的执行（最多一次），返回连接句柄。
    ///
    /// 连接仍然存活时重复调用为空操作，返回同一句柄；连接被释放后再次调用
    /// 会重新订阅源。
    pub fn connect(&self) -> Subscription {
        self.connect_with_context(Context::background())
    }

    /// 以指定上下文触发连接。
    pub fn connect_with_context(&self, ctx: Context) -> Subscription {
        let mut connection = self.inner.connection.lock();
        if let Some(existing) = connection.as_ref() {
            if !existing.is_closed() {
                return existing.clone();
            }
        }
        let subscription = self
            .inner
            .source
            .subscribe_with_context(ctx, self.inner.subject.observer());
        *connection = Some(subscription.clone());
        subscription
    }

    /// 当前挂在主题出口上的订阅者数量。
    pub fn count_observers(&self) -> usize {
        self.inner.subject.count_observers()
    }
}

impl<T> std::fmt::Debug for Connectable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connectable").finish()
    }
}

/// 自由函数形式的构造入口，便于在管道组合中使用。
pub fn connectable<T: Clone + Send + 'static>(source: Observable<T>) -> Connectable<T> {
    Connectable::new(source)
}
