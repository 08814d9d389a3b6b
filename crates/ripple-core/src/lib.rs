#![deny(unsafe_code)]
#![doc = "ripple-core: 推送式响应流运行时的核心契约、主题与算子库。"]
#![doc = ""]
#![doc = "== 运行时模型 =="]
#![doc = "数据自上而下：订阅者对组合好的管道调用 `subscribe`，每一层包装下游观察者并向上游返回释放义务；"]
#![doc = "控制自下而上：生产者把通知推入最外层观察者，经各层转发抵达原始订阅者。"]
#![doc = "投递在调用方线程同步完成，订阅者互斥锁内的回调耗时即是对生产者的背压。"]
#![doc = ""]
#![doc = "== 并发与取消 =="]
#![doc = "定时算子为每个活跃订阅启动至多一个轻量线程；释放任一订阅即级联取消其整棵子树；"]
#![doc = "上下文携带取消与截止语义，循环型算子在迭代间检查取消并以 `context.cancelled` 错误收尾。"]

pub mod connectable;
pub mod context;
pub mod error;
pub mod hooks;
pub mod notification;
pub mod observable;
pub mod observer;
pub mod operators;
pub mod prelude;
pub mod subject;
pub mod subscriber;
pub mod subscription;
/// 测试桩命名空间，集中暴露官方维护的录制/空操作观察者，供集成测试与下游复用。
pub mod test_stubs;
pub mod time;

pub use connectable::{Connectable, connectable};
pub use context::{Cancellation, Context, ContextBuilder, Deadline};
pub use error::{DrainError, StreamError};
pub use notification::{Notification, NotificationKind};
pub use observable::Observable;
pub use observer::{CallbackObserver, Observer};
pub use operators::{
    BackoffPolicy, GroupedObservable, RetryConfig, ThrottleConfig, combine_latest, concat,
    interval, interval_with_clock, merge, timer, timer_with_clock, zip,
};
pub use subject::{
    AsyncSubject, BehaviorSubject, PublishSubject, ReplaySubject, SubjectHandle, SubjectObserver,
};
pub use subscriber::Subscriber;
pub use subscription::{Subscription, Teardown, TeardownHandle};
pub use time::{Clock, ManualClock, SleepOutcome, SystemClock};
