//! 算子库：`Observable<A> → Observable<B>` 的纯函数集合。
//!
//! # 设计背景（Why）
//! - 算子是“值 + 函数”，不是类型层级：组合只是从左到右的函数应用，
//!   在 [`Observable::pipe`](crate::observable::Observable::pipe) 或方法链上完成，
//!   订阅发生前不产生任何执行；
//! - 每个算子都必须守住上游交给它的三条不变式：下游互斥投递、终止闩锁、
//!   释放义务登记在输出订阅上（取消输出即级联取消全部内层订阅）。
//!
//! # 模块划分（Where）
//! - `basic`：映射/过滤/截取等逐元素算子；
//! - `merge_map`：受并发上限约束的内层流合并；
//! - `window` / `group_by`：以边界流或键函数切分子流；
//! - `retry` / `catch`：错误恢复；
//! - `time`：定时源与时间窗算子；
//! - `combine`：多源合并、拉链与最新值组合；
//! - `sink`：阻塞式汇聚驱动器。

mod basic;
mod catch;
mod combine;
mod group_by;
mod merge_map;
mod retry;
mod sink;
mod time;
mod window;

pub use combine::{combine_latest, concat, merge, zip};
pub use group_by::GroupedObservable;
pub use retry::{BackoffPolicy, RetryConfig};
pub use time::{ThrottleConfig, interval, interval_with_clock, timer, timer_with_clock};
