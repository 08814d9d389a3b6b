//! # ripple-core Prelude
//!
//! ## 教案级说明（Why）
//! - **统一导入面**：为上层 crate 提供稳定、浅路径的导入入口，业务代码无需
//!   记忆 `ripple_core::subject::...` 等深层路径；
//! - **范围控制**：仅收录跨模块高频依赖的类型与函数；边缘能力（测试桩、
//!   钩子安装）仍建议使用显式命名空间以保持可读性。
//!
//! ## 使用方式（How）
//! - `use ripple_core::prelude::*;` 即可获得可观察对象、主题、订阅与算子
//!   配置的常用组合包。

pub use crate::connectable::{Connectable, connectable};
pub use crate::context::{Cancellation, Context, ContextBuilder, Deadline};
pub use crate::error::{DrainError, StreamError, codes};
pub use crate::notification::{Notification, NotificationKind};
pub use crate::observable::Observable;
pub use crate::observer::{CallbackObserver, Observer};
pub use crate::operators::{
    BackoffPolicy, GroupedObservable, RetryConfig, ThrottleConfig, combine_latest, concat,
    interval, interval_with_clock, merge, timer, timer_with_clock, zip,
};
pub use crate::subject::{
    AsyncSubject, BehaviorSubject, PublishSubject, ReplaySubject, SubjectHandle, SubjectObserver,
};
pub use crate::subscriber::Subscriber;
pub use crate::subscription::{Subscription, Teardown, TeardownHandle};
pub use crate::time::{Clock, ManualClock, SleepOutcome, SystemClock};
