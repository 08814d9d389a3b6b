//! 进程级可观测性钩子：丢弃通知与回调 panic 的统一上报口。
//!
//! # 设计背景（Why）
//! - 订阅关闭后到达的通知不属于错误，但对排障与指标极有价值；若各算子各自记录，
//!   语义必然碎片化。这里收敛为一个进程级钩子，默认以 `tracing` 低噪声输出。
//! - 用户回调 panic 由订阅者边界拦截，绝不允许穿越订阅边界；拦截后同样经由
//!   进程级钩子上报，宿主可按需改接告警或指标系统。
//!
//! # 实现要点（How）
//! - 钩子经 [`arc_swap::ArcSwap`] 发布：热路径读取完全无锁，安装则是一次指针交换；
//!   建议在进程启动期完成安装，运行期频繁替换并无收益。
//! - 通知值本身以 `&dyn Any` + 类型名的形式透出，钩子实现可按需向下转型。
//!
//! # 风险提示（Trade-offs）
//! - 钩子是进程全局的：并行测试若各自安装钩子会互相覆盖，用例应以单调计数器
//!   之类的累积断言规避竞争。

use std::any::Any;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;

use crate::error::StreamError;
use crate::notification::NotificationKind;

/// 一次“订阅关闭后仍有通知到达”的事件快照。
///
/// # 契约说明（What）
/// - `kind`：被丢弃通知的种类；
/// - `value`：`Next` 通知的元素（类型擦除），终止通知为 `None`；
/// - `value_type`：元素的编译期类型名，便于日志归类；
/// - `error`：被丢弃的错误（仅 `kind == Error` 时存在）；
/// - `stage`：产生丢弃的环节标签，如 `"subscriber"`、`"subject"`。
pub struct DroppedNotification<'a> {
    /// 通知种类。
    pub kind: NotificationKind,
    /// `Next` 通知携带的元素（类型擦除视图）。
    pub value: Option<&'a (dyn Any + Send)>,
    /// 元素的类型名。
    pub value_type: &'static str,
    /// 被丢弃的错误。
    pub error: Option<&'a StreamError>,
    /// 产生丢弃的环节。
    pub stage: &'static str,
}

/// 一次被订阅者边界拦截的回调 panic。
pub struct CallbackPanic<'a> {
    /// panic 负载中可提取的文本消息（若有）。
    pub message: Option<&'a str>,
    /// 发生 panic 的环节，如 `"subscriber.next"`、`"subscription.teardown"`。
    pub stage: &'static str,
}

struct DroppedHook(Box<dyn Fn(&DroppedNotification<'_>) + Send + Sync>);
struct PanicHook(Box<dyn Fn(&CallbackPanic<'_>) + Send + Sync>);

static DROPPED_HOOK: OnceLock<ArcSwap<DroppedHook>> = OnceLock::new();
static PANIC_HOOK: OnceLock<ArcSwap<PanicHook>> = OnceLock::new();

fn dropped_cell() -> &'static ArcSwap<DroppedHook> {
    DROPPED_HOOK.get_or_init(|| ArcSwap::from_pointee(DroppedHook(Box::new(default_dropped_hook))))
}

fn panic_cell() -> &'static ArcSwap<PanicHook> {
    PANIC_HOOK.get_or_init(|| ArcSwap::from_pointee(PanicHook(Box::new(default_panic_hook))))
}

fn default_dropped_hook(event: &DroppedNotification<'_>) {
    match event.error {
        Some(err) => tracing::debug!(
            kind = %event.kind,
            stage = event.stage,
            error = %err,
            "订阅已关闭，终止通知被丢弃"
        ),
        None => tracing::debug!(
            kind = %event.kind,
            stage = event.stage,
            value_type = event.value_type,
            "订阅已关闭，通知被丢弃"
        ),
    }
}

fn default_panic_hook(event: &CallbackPanic<'_>) {
    tracing::error!(
        stage = event.stage,
        message = event.message.unwrap_or("<非文本 panic 负载>"),
        "用户回调 panic，已在订阅者边界拦截"
    );
}

/// 安装进程级丢弃通知钩子，替换先前的实现。
///
/// # 使用指引（How）
/// - 在进程启动期调用一次；默认实现以 `tracing::debug!` 记录；
/// - 钩子运行在投递线程上，实现必须快速返回且不得再次进入同一订阅。
pub fn set_dropped_hook(hook: impl Fn(&DroppedNotification<'_>) + Send + Sync + 'static) {
    dropped_cell().store(Arc::new(DroppedHook(Box::new(hook))));
}

/// 安装进程级回调 panic 钩子，替换先前的实现。默认实现以 `tracing::error!` 记录。
pub fn set_panic_hook(hook: impl Fn(&CallbackPanic<'_>) + Send + Sync + 'static) {
    panic_cell().store(Arc::new(PanicHook(Box::new(hook))));
}

/// 热路径上报一次丢弃事件。读取钩子无锁。
pub(crate) fn emit_dropped(event: &DroppedNotification<'_>) {
    let hook = dropped_cell().load();
    (hook.0)(event);
}

/// 上报一次被拦截的回调 panic。
pub(crate) fn emit_panic(stage: &'static str, payload: &(dyn Any + Send)) {
    let message = panic_message(payload);
    let hook = panic_cell().load();
    (hook.0)(&CallbackPanic { message, stage });
}

/// 从 `catch_unwind` 的负载中提取文本消息。非文本负载返回 `None`。
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> Option<&str> {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        Some(text)
    } else {
        payload.downcast_ref::<String>().map(String::as_str)
    }
}
