//! 主题状态机测试：四个变体的缓冲策略、迟到者语义与注册表守恒。

use std::sync::Arc;
use std::time::Duration;

use ripple_core::prelude::*;
use ripple_core::test_stubs::Recording;

#[test]
fn publish_subject_multicasts_in_emission_order() {
    let subject: PublishSubject<i32> = PublishSubject::new();
    let first: Recording<i32> = Recording::new();
    let second: Recording<i32> = Recording::new();
    subject.as_observable().subscribe(first.observer());
    subject.as_observable().subscribe(second.observer());
    let ctx = Context::background();
    subject.next(&ctx, 1);
    subject.next(&ctx, 2);
    subject.complete(&ctx);
    assert_eq!(
        first.notifications(),
        vec![
            Notification::Next(1),
            Notification::Next(2),
            Notification::Complete,
        ]
    );
    assert_eq!(first.notifications(), second.notifications());
}

#[test]
fn publish_subject_late_subscriber_misses_history() {
    let subject: PublishSubject<i32> = PublishSubject::new();
    let ctx = Context::background();
    subject.next(&ctx, 1);
    let late: Recording<i32> = Recording::new();
    subject.as_observable().subscribe(late.observer());
    subject.next(&ctx, 2);
    subject.complete(&ctx);
    assert_eq!(
        late.notifications(),
        vec![Notification::Next(2), Notification::Complete]
    );
}

#[test]
fn errored_subject_replays_error_synchronously() {
    let subject: PublishSubject<i32> = PublishSubject::new();
    let ctx = Context::background();
    subject.error(&ctx, StreamError::new("test.boom", "预期内错误"));
    let late: Recording<i32> = Recording::new();
    let subscription = subject.as_observable().subscribe(late.observer());
    // subscribe 返回前错误已同步补发，句柄处于关闭状态。
    assert_eq!(late.error().map(|e| e.code()), Some("test.boom"));
    assert!(subscription.is_closed());
    assert_eq!(subject.count_observers(), 0);
}

#[test]
fn emissions_after_terminal_are_invisible_to_subscribers() {
    let subject: PublishSubject<i32> = PublishSubject::new();
    let rec: Recording<i32> = Recording::new();
    subject.as_observable().subscribe(rec.observer());
    let ctx = Context::background();
    subject.complete(&ctx);
    subject.next(&ctx, 1);
    subject.error(&ctx, StreamError::new("test.boom", "预期内错误"));
    assert_eq!(rec.notifications(), vec![Notification::Complete]);
}

#[test]
fn observer_count_is_conserved() {
    let subject: PublishSubject<i32> = PublishSubject::new();
    let subscriptions: Vec<_> = (0..4)
        .map(|_| {
            subject
                .as_observable()
                .subscribe(CallbackObserver::next(|_ctx, _value: i32| {}))
        })
        .collect();
    assert_eq!(subject.count_observers(), 4);
    subscriptions[0].unsubscribe();
    subscriptions[1].unsubscribe();
    assert_eq!(subject.count_observers(), 2);
    subject.complete(&Context::background());
    assert_eq!(subject.count_observers(), 0);
}

#[test]
fn behavior_subject_replays_seed_then_latest() {
    let subject = BehaviorSubject::new(0);
    let ctx = Context::background();
    let first: Recording<i32> = Recording::new();
    subject.as_observable().subscribe(first.observer());
    assert_eq!(first.values(), vec![0]);
    subject.next(&ctx, 7);
    assert_eq!(subject.value(), 7);
    let late: Recording<i32> = Recording::new();
    subject.as_observable().subscribe(late.observer());
    assert_eq!(late.values(), vec![7]);
    subject.next(&ctx, 8);
    assert_eq!(first.values(), vec![0, 7, 8]);
    assert_eq!(late.values(), vec![7, 8]);
}

#[test]
fn behavior_subject_after_complete_replays_latest_then_completes() {
    let subject = BehaviorSubject::new(1);
    let ctx = Context::background();
    subject.next(&ctx, 2);
    subject.complete(&ctx);
    let late: Recording<i32> = Recording::new();
    subject.as_observable().subscribe(late.observer());
    assert_eq!(
        late.notifications(),
        vec![Notification::Next(2), Notification::Complete]
    );
}

#[test]
fn replay_subject_buffers_last_n() {
    let subject: ReplaySubject<i32> = ReplaySubject::new(2);
    let ctx = Context::background();
    subject.next(&ctx, 1);
    subject.next(&ctx, 2);
    subject.next(&ctx, 3);
    let rec: Recording<i32> = Recording::new();
    subject.as_observable().subscribe(rec.observer());
    assert_eq!(rec.values(), vec![2, 3]);
    subject.next(&ctx, 4);
    assert_eq!(rec.values(), vec![2, 3, 4]);
}

#[test]
fn replay_subject_honors_max_age() {
    let clock = ManualClock::new();
    let subject: ReplaySubject<i32> = ReplaySubject::with_clock(
        8,
        Some(Duration::from_millis(100)),
        Arc::new(clock.clone()),
    );
    let ctx = Context::background();
    subject.next(&ctx, 1);
    clock.advance(Duration::from_millis(150));
    subject.next(&ctx, 2);
    let rec: Recording<i32> = Recording::new();
    subject.as_observable().subscribe(rec.observer());
    // 超龄条目在补发前被剔除。
    assert_eq!(rec.values(), vec![2]);
}

#[test]
fn replay_subject_completed_still_replays_buffer() {
    let subject: ReplaySubject<i32> = ReplaySubject::new(3);
    let ctx = Context::background();
    subject.next(&ctx, 1);
    subject.next(&ctx, 2);
    subject.complete(&ctx);
    let late: Recording<i32> = Recording::new();
    subject.as_observable().subscribe(late.observer());
    assert_eq!(
        late.notifications(),
        vec![
            Notification::Next(1),
            Notification::Next(2),
            Notification::Complete,
        ]
    );
}

#[test]
fn async_subject_emits_only_last_value_on_complete() {
    let subject: AsyncSubject<i32> = AsyncSubject::new();
    let rec: Recording<i32> = Recording::new();
    subject.as_observable().subscribe(rec.observer());
    let ctx = Context::background();
    subject.next(&ctx, 1);
    subject.next(&ctx, 2);
    subject.next(&ctx, 3);
    assert!(rec.is_empty(), "完成前不得有任何发射");
    subject.complete(&ctx);
    assert_eq!(
        rec.notifications(),
        vec![Notification::Next(3), Notification::Complete]
    );
}

#[test]
fn async_subject_completes_empty_without_value() {
    let subject: AsyncSubject<i32> = AsyncSubject::new();
    let rec: Recording<i32> = Recording::new();
    subject.as_observable().subscribe(rec.observer());
    subject.complete(&Context::background());
    assert_eq!(rec.notifications(), vec![Notification::Complete]);
}

#[test]
fn async_subject_error_discards_stored_value() {
    let subject: AsyncSubject<i32> = AsyncSubject::new();
    let rec: Recording<i32> = Recording::new();
    subject.as_observable().subscribe(rec.observer());
    let ctx = Context::background();
    subject.next(&ctx, 9);
    subject.error(&ctx, StreamError::new("test.boom", "预期内错误"));
    assert_eq!(
        rec.notifications(),
        vec![Notification::Error(StreamError::new("test.boom", "预期内错误"))]
    );
}

#[test]
fn async_subject_late_subscriber_after_complete_gets_value() {
    let subject: AsyncSubject<i32> = AsyncSubject::new();
    let ctx = Context::background();
    subject.next(&ctx, 5);
    subject.complete(&ctx);
    let late: Recording<i32> = Recording::new();
    let subscription = subject.as_observable().subscribe(late.observer());
    assert_eq!(
        late.notifications(),
        vec![Notification::Next(5), Notification::Complete]
    );
    assert!(subscription.is_closed());
}

#[test]
fn subject_bridges_observable_into_multicast() {
    let subject: PublishSubject<i32> = PublishSubject::new();
    let first: Recording<i32> = Recording::new();
    let second: Recording<i32> = Recording::new();
    subject.as_observable().subscribe(first.observer());
    subject.as_observable().subscribe(second.observer());
    Observable::from_iter(vec![1, 2, 3]).subscribe(subject.observer());
    assert_eq!(first.values(), vec![1, 2, 3]);
    assert!(first.is_completed());
    assert_eq!(second.notifications(), first.notifications());
}

#[test]
fn connectable_shares_one_execution() {
    let executions = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let executions_probe = executions.clone();
    let source = Observable::from_iter(vec![1, 2, 3]).tap(move |_| {
        executions_probe.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });
    let connectable = connectable(source);
    let first: Recording<i32> = Recording::new();
    let second: Recording<i32> = Recording::new();
    connectable.observable().subscribe(first.observer());
    connectable.observable().subscribe(second.observer());
    assert!(first.is_empty(), "connect 之前不得有任何生产");
    let connection = connectable.connect();
    assert_eq!(first.values(), vec![1, 2, 3]);
    assert_eq!(second.values(), vec![1, 2, 3]);
    // tap 每个元素触发一次：单次执行恰好 3 次，双倍即说明源被执行了两遍。
    assert_eq!(executions.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert!(connection.is_closed(), "同步源完成后连接随之关闭");
}

#[test]
fn connectable_connect_is_idempotent_while_live() {
    let subject: PublishSubject<i32> = PublishSubject::new();
    let connectable = connectable(subject.as_observable());
    let first = connectable.connect();
    let second = connectable.connect();
    assert!(first.ptr_eq(&second), "活跃连接期间应返回同一句柄");
    first.unsubscribe();
    let third = connectable.connect();
    assert!(!third.ptr_eq(&first), "释放后重连应开启新的执行");
}
