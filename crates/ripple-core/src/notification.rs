use crate::error::StreamError;

/// `Notification<T>` 是流中单步事件的统一载体：要么携带一个元素，要么以错误或完成收尾。
///
/// # 设计背景（Why）
/// - 推送式流的全部语义都可以归结为“零或多个 `Next`，最多一个终止事件”；
///   将三种事件收敛为同一枚举，便于录制、断言与丢弃钩子的统一处理。
/// - 值类型不携带身份，可自由复制（`T: Clone` 时），生命周期与投递动作同长。
///
/// # 契约说明（What）
/// - 一条合法的流是有限或无限的 `Next` 序列，之后至多跟随一个 `Error` 或 `Complete`；
/// - 终止事件一旦出现，订阅即告关闭，后续通知只会进入丢弃钩子（参见 [`crate::hooks`]）。
#[derive(Clone, Debug, PartialEq)]
pub enum Notification<T> {
    /// 流中的一个元素。
    Next(T),
    /// 以错误终止，携带稳定错误码的 [`StreamError`]。
    Error(StreamError),
    /// 正常完成。
    Complete,
}

/// 通知种类标签，供丢弃钩子等类型擦除场景使用。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationKind {
    /// 对应 [`Notification::Next`]。
    Next,
    /// 对应 [`Notification::Error`]。
    Error,
    /// 对应 [`Notification::Complete`]。
    Complete,
}

impl<T> Notification<T> {
    /// 返回当前通知的种类标签。
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Next(_) => NotificationKind::Next,
            Notification::Error(_) => NotificationKind::Error,
            Notification::Complete => NotificationKind::Complete,
        }
    }

    /// 是否为 `Next`。
    pub fn is_next(&self) -> bool {
        matches!(self, Notification::Next(_))
    }

    /// 是否为终止通知（`Error` 或 `Complete`）。
    pub fn is_terminal(&self) -> bool {
        !self.is_next()
    }

    /// 若为 `Next`，取出内部元素。
    pub fn into_next(self) -> Option<T> {
        match self {
            Notification::Next(value) => Some(value),
            _ => None,
        }
    }
}

impl core::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            NotificationKind::Next => "next",
            NotificationKind::Error => "error",
            NotificationKind::Complete => "complete",
        };
        f.write_str(label)
    }
}
