//! 定时算子测试：周期源、去抖、节流与取消桥接。

use std::sync::Arc;
use std::time::{Duration, Instant};

use ripple_core::prelude::*;
use ripple_core::test_stubs::Recording;

/// 轮询等待条件成立，超时返回 `false`。定时用例统一用它消化线程调度抖动。
fn eventually(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn interval_emits_monotonic_sequence() {
    let rec: Recording<u64> = Recording::new();
    interval(Duration::from_millis(20))
        .take(3)
        .subscribe(rec.observer());
    assert!(rec.wait_for_terminal(Duration::from_secs(5)));
    assert_eq!(rec.values(), vec![0, 1, 2]);
    assert!(rec.is_completed());
}

#[test]
fn interval_with_manual_clock_fires_on_virtual_time() {
    let clock = ManualClock::new();
    let rec: Recording<u64> = Recording::new();
    let subscription = interval_with_clock(Duration::from_millis(100), Arc::new(clock.clone()))
        .subscribe(rec.observer());
    assert!(rec.is_empty(), "虚拟时间未推进前不得发射");
    // 小步推进虚拟时间直至观察到两次发射；工作线程入睡时机不影响收敛。
    assert!(eventually(
        || {
            clock.advance(Duration::from_millis(20));
            rec.len() >= 2
        },
        Duration::from_secs(5)
    ));
    subscription.unsubscribe();
    let values = rec.values();
    assert!(values.starts_with(&[0, 1]), "序号必须从 0 单调递增：{values:?}");
}

#[test]
fn timer_fires_once_then_completes() {
    let rec: Recording<u64> = Recording::new();
    timer(Duration::from_millis(20)).subscribe(rec.observer());
    assert!(rec.wait_for_terminal(Duration::from_secs(5)));
    assert_eq!(
        rec.notifications(),
        vec![Notification::Next(0), Notification::Complete]
    );
}

#[test]
fn disposing_interval_cancels_pending_timer() {
    let rec: Recording<u64> = Recording::new();
    let subscription = interval(Duration::from_millis(20)).subscribe(rec.observer());
    assert!(eventually(|| rec.len() >= 2, Duration::from_secs(5)));
    subscription.unsubscribe();
    let settled = rec.len();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(rec.len(), settled, "退订后定时器不得再发射");
}

#[test]
fn debounce_emits_only_after_quiet_window() {
    let subject: PublishSubject<i32> = PublishSubject::new();
    let rec: Recording<i32> = Recording::new();
    subject
        .as_observable()
        .debounce(Duration::from_millis(50))
        .subscribe(rec.observer());
    let ctx = Context::background();
    subject.next(&ctx, 1);
    subject.next(&ctx, 2);
    subject.next(&ctx, 3);
    assert!(rec.is_empty(), "静默窗口内不得发射");
    assert!(eventually(|| rec.len() == 1, Duration::from_secs(2)));
    assert_eq!(rec.values(), vec![3], "只保留窗口内最后一个元素");
}

#[test]
fn debounce_flushes_pending_value_on_complete() {
    let subject: PublishSubject<i32> = PublishSubject::new();
    let rec: Recording<i32> = Recording::new();
    subject
        .as_observable()
        .debounce(Duration::from_millis(200))
        .subscribe(rec.observer());
    let ctx = Context::background();
    subject.next(&ctx, 7);
    subject.complete(&ctx);
    assert_eq!(
        rec.notifications(),
        vec![Notification::Next(7), Notification::Complete]
    );
}

#[test]
fn throttle_forwards_leading_edge_only() {
    let subject: PublishSubject<i32> = PublishSubject::new();
    let rec: Recording<i32> = Recording::new();
    subject
        .as_observable()
        .throttle(Duration::from_millis(50))
        .subscribe(rec.observer());
    let ctx = Context::background();
    subject.next(&ctx, 1);
    subject.next(&ctx, 2);
    subject.next(&ctx, 3);
    assert_eq!(rec.values(), vec![1], "冷却期内的元素被抑制");
    std::thread::sleep(Duration::from_millis(80));
    subject.next(&ctx, 4);
    assert_eq!(rec.values(), vec![1, 4]);
}

#[test]
fn throttle_trailing_emits_last_suppressed_value() {
    let subject: PublishSubject<i32> = PublishSubject::new();
    let rec: Recording<i32> = Recording::new();
    subject
        .as_observable()
        .throttle_with(ThrottleConfig::new(Duration::from_millis(50)).with_trailing())
        .subscribe(rec.observer());
    let ctx = Context::background();
    subject.next(&ctx, 1);
    subject.next(&ctx, 2);
    subject.next(&ctx, 3);
    assert_eq!(rec.values(), vec![1]);
    assert!(eventually(|| rec.len() == 2, Duration::from_secs(2)));
    assert_eq!(rec.values(), vec![1, 3], "尾沿补发冷却期内最后一个被抑制的元素");
}

#[test]
fn throw_on_context_cancel_surfaces_cancellation() {
    let cancellation = Cancellation::new();
    let ctx = Context::builder()
        .with_cancellation(cancellation.clone())
        .build();
    let rec: Recording<i32> = Recording::new();
    Observable::<i32>::never()
        .throw_on_context_cancel()
        .subscribe_with_context(ctx, rec.observer());
    assert!(rec.is_empty());
    cancellation.cancel();
    assert!(rec.wait_for_terminal(Duration::from_secs(2)));
    assert!(rec.error().expect("取消应转化为错误").is_cancellation());
}

#[test]
fn interval_errors_when_context_cancelled_mid_stream() {
    let cancellation = Cancellation::new();
    let ctx = Context::builder()
        .with_cancellation(cancellation.clone())
        .build();
    let rec: Recording<u64> = Recording::new();
    interval(Duration::from_millis(20)).subscribe_with_context(ctx, rec.observer());
    assert!(eventually(|| rec.len() >= 1, Duration::from_secs(5)));
    cancellation.cancel();
    assert!(rec.wait_for_terminal(Duration::from_secs(2)));
    assert!(rec.error().expect("循环算子应以取消错误收尾").is_cancellation());
}

#[test]
fn windows_rotate_under_real_timers() {
    let windows: Arc<parking_lot::Mutex<Vec<Recording<u64>>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let observer = {
        let windows = windows.clone();
        CallbackObserver::next(move |_ctx, window: Observable<u64>| {
            let rec: Recording<u64> = Recording::new();
            window.subscribe(rec.observer());
            windows.lock().push(rec);
        })
    };
    let subscription = interval(Duration::from_millis(30))
        .window_when(interval(Duration::from_millis(100)))
        .subscribe(observer);
    std::thread::sleep(Duration::from_millis(250));
    subscription.unsubscribe();
    let windows = windows.lock();
    // 250ms 内至少轮换出两个完整窗口，每个完整窗口收到 2~4 个元素。
    assert!(windows.len() >= 2, "实际窗口数 {}", windows.len());
    for rec in windows.iter().take(windows.len() - 1).skip(1) {
        let count = rec.values().len();
        assert!(
            (1..=4).contains(&count),
            "完整窗口内元素数异常：{count}"
        );
    }
}
