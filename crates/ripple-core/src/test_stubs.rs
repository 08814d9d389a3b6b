//! 官方维护的测试桩：录制观察者与空操作观察者。
//!
//! # 设计背景（Why）
//! - 流的断言套路高度一致：订阅、驱动、等待终止、对比通知序列。把录制与
//!   等待能力收敛为官方桩，避免各处重复定义临时结构，契约演进时单点适配。
//!
//! # 使用方式（How）
//! - `let rec = Recording::new(); source.subscribe(rec.observer());`
//! - 异步源配合 `rec.wait_for_terminal(timeout)` 阻塞至终止；
//! - `rec.notifications()` / `rec.values()` / `rec.error()` 读取录制结果。

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::context::Context;
use crate::error::StreamError;
use crate::notification::Notification;
use crate::observer::Observer;

struct RecordingState<T> {
    log: Vec<Notification<T>>,
    terminated: bool,
}

struct RecordingShared<T> {
    state: Mutex<RecordingState<T>>,
    terminal_waiters: Condvar,
}

/// 录制句柄：持有通知日志，可多次派生观察者端点。
pub struct Recording<T> {
    shared: Arc<RecordingShared<T>>,
}

impl<T> Clone for Recording<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> Recording<T> {
    /// 创建空录制。
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RecordingShared {
                state: Mutex::new(RecordingState {
                    log: Vec::new(),
                    terminated: false,
                }),
                terminal_waiters: Condvar::new(),
            }),
        }
    }

    /// 派生一个观察者端点。多个端点写入同一份日志。
    pub fn observer(&self) -> RecordingObserver<T> {
        RecordingObserver {
            shared: self.shared.clone(),
        }
    }

    /// 阻塞直至录制到终止通知或超时。返回 `true` 表示已终止。
    pub fn wait_for_terminal(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.terminated {
            if self
                .shared
                .terminal_waiters
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.terminated;
            }
        }
        true
    }

    /// 是否已录制到终止通知。
    pub fn is_terminated(&self) -> bool {
        self.shared.state.lock().terminated
    }

    /// 录制到的通知条数。
    pub fn len(&self) -> usize {
        self.shared.state.lock().log.len()
    }

    /// 是否尚无任何录制。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + 'static> Recording<T> {
    /// 完整通知序列的拷贝。
    pub fn notifications(&self) -> Vec<Notification<T>> {
        self.shared.state.lock().log.clone()
    }

    /// 仅抽取 `Next` 元素。
    pub fn values(&self) -> Vec<T> {
        self.shared
            .state
            .lock()
            .log
            .iter()
            .filter_map(|notification| match notification {
                Notification::Next(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// 录制到的错误（若以错误终止）。
    pub fn error(&self) -> Option<StreamError> {
        self.shared
            .state
            .lock()
            .log
            .iter()
            .find_map(|notification| match notification {
                Notification::Error(error) => Some(error.clone()),
                _ => None,
            })
    }

    /// 是否以正常完成终止。
    pub fn is_completed(&self) -> bool {
        self.shared
            .state
            .lock()
            .log
            .iter()
            .any(|notification| matches!(notification, Notification::Complete))
    }
}

impl<T: Send + 'static> Default for Recording<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Recording`] 派生的观察者端点。
pub struct RecordingObserver<T> {
    shared: Arc<RecordingShared<T>>,
}

impl<T: Send + 'static> Observer<T> for RecordingObserver<T> {
    fn on_next(&mut self, _ctx: &Context, value: T) {
        self.shared.state.lock().log.push(Notification::Next(value));
    }

    fn on_error(&mut self, _ctx: &Context, error: StreamError) {
        {
            let mut state = self.shared.state.lock();
            state.log.push(Notification::Error(error));
            state.terminated = true;
        }
        self.shared.terminal_waiters.notify_all();
    }

    fn on_complete(&mut self, _ctx: &Context) {
        {
            let mut state = self.shared.state.lock();
            state.log.push(Notification::Complete);
            state.terminated = true;
        }
        self.shared.terminal_waiters.notify_all();
    }
}

/// 丢弃一切通知的空操作观察者。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl<T: Send + 'static> Observer<T> for NoopObserver {
    fn on_next(&mut self, _ctx: &Context, _value: T) {}

    fn on_error(&mut self, _ctx: &Context, _error: StreamError) {}

    fn on_complete(&mut self, _ctx: &Context) {}
}
