use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// 稳定错误码命名空间，约定 `<域>.<语义>` 的二段式命名。
///
/// # 设计背景（Why）
/// - 流中的错误会穿越任意多层算子并广播给任意多个订阅者，若仅靠字符串消息
///   区分语义，重试、取消上报等自动化策略将无从下手；
/// - 错误码保持 `'static`，在日志与指标中可直接作为维度使用。
///
/// # 契约说明（What）
/// - 新增错误码必须沿用二段式命名并保持语义稳定；
/// - 业务扩展可自定义码值，但不应复用本模块已占用的前缀。
pub mod codes {
    /// 订阅上下文在执行期间被取消。
    pub const CONTEXT_CANCELLED: &str = "context.cancelled";
    /// 用户回调在投递过程中发生 panic，由订阅者边界拦截。
    pub const CALLBACK_PANICKED: &str = "callback.panicked";
    /// 定时算子无法创建后台线程。
    pub const TIMER_SPAWN_FAILED: &str = "timer.spawn_failed";
}

/// `StreamError` 是流内传播的统一错误值：稳定错误码 + 人类可读消息 + 可选根因。
///
/// # 设计背景（Why）
/// - 主题（Subject）会把同一个错误广播给全部订阅者，错误值因此必须可克隆；
///   根因以 `Arc` 共享，克隆成本为常数。
/// - 错误码承载机读语义，消息面向排障人员；两者分离可避免“解析消息推断语义”的反模式。
///
/// # 契约说明（What）
/// - `code`：遵循 [`codes`] 命名约定的稳定字符串；
/// - `message`：自然语言描述，不应包含敏感信息；
/// - `cause`：可选底层原因，经由 [`Error::source`] 暴露完整链路。
///
/// # 设计取舍（Trade-offs）
/// - 相等性比较只看 `code` 与 `message`，根因被有意忽略：测试断言与去重场景
///   关心的是语义标识，而根因往往不可比较。
#[derive(Clone)]
pub struct StreamError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<Arc<dyn Error + Send + Sync + 'static>>,
}

impl StreamError {
    /// 构造流错误。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带底层原因并返回新的错误值。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 构造一枚“上下文已取消”错误，供算子在检测到取消信号时统一使用。
    pub fn cancelled() -> Self {
        Self::new(codes::CONTEXT_CANCELLED, "订阅上下文已被取消")
    }

    /// 构造一枚“回调 panic”错误，消息来自订阅者边界捕获到的 panic 负载。
    pub fn callback_panicked(detail: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::CALLBACK_PANICKED, detail)
    }

    /// 读取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 读取错误消息。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 读取底层原因（若有）。
    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// 是否为上下文取消错误。下游汇聚器依据该判定区分“用户错误”与“主动取消”。
    pub fn is_cancellation(&self) -> bool {
        self.code == codes::CONTEXT_CANCELLED
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl fmt::Debug for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

impl PartialEq for StreamError {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message
    }
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}

/// 阻塞式汇聚器（`first`/`last` 等）的对外错误面。
///
/// # 契约说明（What）
/// - `Empty`：流在产生任何元素之前即正常完成；
/// - `Upstream`：上游以错误终止，原始 [`StreamError`] 经 `source` 链完整保留，
///   取消场景可用 [`StreamError::is_cancellation`] 判别。
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum DrainError {
    /// 流未产生任何元素即完成。
    #[error("流在产生任何元素之前即已完成")]
    Empty,
    /// 上游以错误终止。
    #[error("上游流以错误终止")]
    Upstream(#[source] StreamError),
}

impl DrainError {
    /// 若为上游错误，借出内部的 [`StreamError`]。
    pub fn upstream(&self) -> Option<&StreamError> {
        match self {
            DrainError::Upstream(err) => Some(err),
            DrainError::Empty => None,
        }
    }
}
