//! 算子行为测试：合并、分组、窗口、重试、组合与汇聚。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ripple_core::prelude::*;
use ripple_core::test_stubs::Recording;

/// 构造一个异步内层源：订阅即占用一个并发槽，`delay` 后发射大写字母并完成。
fn delayed_uppercase(
    letter: char,
    delay: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
) -> Observable<char> {
    Observable::new(move |ctx, subscriber: Arc<Subscriber<char>>| {
        let current = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(current, Ordering::SeqCst);
        let worker_subscriber = subscriber.clone();
        let worker_ctx = ctx.clone();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            worker_subscriber.next(&worker_ctx, letter.to_ascii_uppercase());
            worker_subscriber.complete(&worker_ctx);
        });
        let active = active.clone();
        Teardown::from_fn(move || {
            active.fetch_sub(1, Ordering::SeqCst);
        })
    })
}

#[test]
fn merge_map_respects_concurrency_bound() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let rec: Recording<char> = Recording::new();
    let active_in_project = active.clone();
    let peak_in_project = peak.clone();
    Observable::from_iter(vec!['a', 'b', 'c'])
        .merge_map(
            move |letter| {
                delayed_uppercase(
                    letter,
                    Duration::from_millis(10),
                    active_in_project.clone(),
                    peak_in_project.clone(),
                )
            },
            2,
        )
        .subscribe(rec.observer());
    assert!(rec.wait_for_terminal(Duration::from_secs(5)));
    let mut values = rec.values();
    values.sort_unstable();
    assert_eq!(values, vec!['A', 'B', 'C']);
    assert!(rec.is_completed());
    assert!(
        peak.load(Ordering::SeqCst) <= 2,
        "活跃内层数不得超过并发上限"
    );
    // 终止先于释放义务送达下游，最后一个内层的回收在终止之后片刻完成。
    let deadline = Instant::now() + Duration::from_secs(1);
    while active.load(Ordering::SeqCst) != 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(active.load(Ordering::SeqCst), 0, "全部内层都应已释放");
}

#[test]
fn merge_map_with_unit_concurrency_preserves_order() {
    let rec: Recording<i32> = Recording::new();
    Observable::from_iter(vec![1, 2, 3])
        .merge_map(|value| Observable::from_iter(vec![value * 10, value * 10 + 1]), 1)
        .subscribe(rec.observer());
    assert_eq!(rec.values(), vec![10, 11, 20, 21, 30, 31]);
    assert!(rec.is_completed());
}

#[test]
fn merge_map_error_disposes_active_inners() {
    let inner_released = Arc::new(AtomicBool::new(false));
    let released_probe = inner_released.clone();
    let pending_inner = Observable::<i32>::new(move |_ctx, _subscriber| {
        let released = released_probe.clone();
        Teardown::from_fn(move || {
            released.store(true, Ordering::SeqCst);
        })
    });
    let failing_inner = Observable::<i32>::throw(StreamError::new("test.inner", "内层失败"));
    let rec: Recording<i32> = Recording::new();
    Observable::from_iter(vec![0usize, 1usize])
        .merge_map(
            move |index| {
                if index == 0 {
                    pending_inner.clone()
                } else {
                    failing_inner.clone()
                }
            },
            0,
        )
        .subscribe(rec.observer());
    assert_eq!(rec.error().map(|e| e.code()), Some("test.inner"));
    assert!(
        inner_released.load(Ordering::SeqCst),
        "下游终止必须级联退订仍然活跃的内层"
    );
}

#[test]
fn flat_map_merges_without_limit() {
    let rec: Recording<i32> = Recording::new();
    Observable::from_iter(vec![1, 2])
        .flat_map(|value| Observable::just(value * 100))
        .subscribe(rec.observer());
    assert_eq!(rec.values(), vec![100, 200]);
    assert!(rec.is_completed());
}

#[test]
fn group_by_routes_values_into_keyed_streams() {
    let groups: Arc<Mutex<Vec<(char, Recording<(char, i32)>)>>> = Arc::new(Mutex::new(Vec::new()));
    let observer = {
        let groups = groups.clone();
        CallbackObserver::next(move |_ctx, group: GroupedObservable<char, (char, i32)>| {
            let rec: Recording<(char, i32)> = Recording::new();
            group.observable().subscribe(rec.observer());
            groups.lock().push((*group.key(), rec));
        })
    };
    Observable::from_iter(vec![('x', 1), ('y', 2), ('x', 3)])
        .group_by(|(key, _)| *key)
        .subscribe(observer);
    let groups = groups.lock();
    assert_eq!(
        groups.iter().map(|(key, _)| *key).collect::<Vec<_>>(),
        vec!['x', 'y'],
        "分组按首次出现的顺序产出"
    );
    let (_, x_rec) = &groups[0];
    let (_, y_rec) = &groups[1];
    assert_eq!(x_rec.values(), vec![('x', 1), ('x', 3)]);
    assert!(x_rec.is_completed());
    assert_eq!(y_rec.values(), vec![('y', 2)]);
    assert!(y_rec.is_completed());
}

#[test]
fn group_by_with_duration_recreates_expired_groups() {
    let subject: PublishSubject<(char, i32)> = PublishSubject::new();
    let groups: Arc<Mutex<Vec<Recording<(char, i32)>>>> = Arc::new(Mutex::new(Vec::new()));
    let observer = {
        let groups = groups.clone();
        CallbackObserver::next(move |_ctx, group: GroupedObservable<char, (char, i32)>| {
            let rec: Recording<(char, i32)> = Recording::new();
            group.observable().subscribe(rec.observer());
            groups.lock().push(rec);
        })
    };
    subject
        .as_observable()
        .group_by_with_duration(|(key, _)| *key, Duration::from_millis(40))
        .subscribe(observer);
    let ctx = Context::background();
    subject.next(&ctx, ('x', 1));
    std::thread::sleep(Duration::from_millis(120));
    subject.next(&ctx, ('x', 2));
    let groups = groups.lock();
    assert_eq!(groups.len(), 2, "组到期后同键元素应开启新组");
    assert!(groups[0].is_completed(), "到期的组应独立完成");
    assert_eq!(groups[1].values(), vec![('x', 2)]);
}

struct WindowProbe {
    windows: Arc<Mutex<Vec<Recording<i32>>>>,
    completed: Arc<AtomicBool>,
}

impl WindowProbe {
    fn new() -> Self {
        Self {
            windows: Arc::new(Mutex::new(Vec::new())),
            completed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn observer(&self) -> CallbackObserver<Observable<i32>> {
        let windows = self.windows.clone();
        let completed = self.completed.clone();
        CallbackObserver::next(move |_ctx, window: Observable<i32>| {
            let rec: Recording<i32> = Recording::new();
            window.subscribe(rec.observer());
            windows.lock().push(rec);
        })
        .with_complete(move |_ctx| {
            completed.store(true, Ordering::SeqCst);
        })
    }
}

#[test]
fn window_when_rotates_on_boundary() {
    let source: PublishSubject<i32> = PublishSubject::new();
    let boundary: PublishSubject<u8> = PublishSubject::new();
    let probe = WindowProbe::new();
    source
        .as_observable()
        .window_when(boundary.as_observable())
        .subscribe(probe.observer());
    let ctx = Context::background();
    assert_eq!(probe.windows.lock().len(), 1, "订阅即开出首个窗口");
    source.next(&ctx, 1);
    source.next(&ctx, 2);
    boundary.next(&ctx, 0);
    source.next(&ctx, 3);
    source.complete(&ctx);
    let windows = probe.windows.lock();
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0].values(), vec![1, 2]);
    assert!(windows[0].is_completed(), "边界发射关闭当前窗口");
    assert_eq!(windows[1].values(), vec![3]);
    assert!(windows[1].is_completed(), "源完成关闭当前窗口");
    assert!(probe.completed.load(Ordering::SeqCst));
}

#[test]
fn window_when_boundary_error_propagates() {
    let source: PublishSubject<i32> = PublishSubject::new();
    let boundary: PublishSubject<u8> = PublishSubject::new();
    let rec: Recording<Observable<i32>> = Recording::new();
    source
        .as_observable()
        .window_when(boundary.as_observable())
        .subscribe(rec.observer());
    let ctx = Context::background();
    boundary.error(&ctx, StreamError::new("test.boundary", "边界失败"));
    assert_eq!(rec.error().map(|e| e.code()), Some("test.boundary"));
}

#[test]
fn buffer_when_collects_per_window() {
    let source: PublishSubject<i32> = PublishSubject::new();
    let boundary: PublishSubject<u8> = PublishSubject::new();
    let rec: Recording<Vec<i32>> = Recording::new();
    source
        .as_observable()
        .buffer_when(boundary.as_observable())
        .subscribe(rec.observer());
    let ctx = Context::background();
    source.next(&ctx, 1);
    source.next(&ctx, 2);
    boundary.next(&ctx, 0);
    source.next(&ctx, 3);
    source.complete(&ctx);
    assert_eq!(rec.values(), vec![vec![1, 2], vec![3]]);
    assert!(rec.is_completed());
}

#[test]
fn retry_exhaustion_forwards_final_error() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_probe = attempts.clone();
    let source = Observable::<i32>::new(move |ctx, subscriber| {
        attempts_probe.fetch_add(1, Ordering::SeqCst);
        subscriber.error(&ctx, StreamError::new("test.flaky", "总是失败"));
        Teardown::noop()
    });
    let rec: Recording<i32> = Recording::new();
    source.retry(3).subscribe(rec.observer());
    assert_eq!(attempts.load(Ordering::SeqCst), 4, "1 次原始订阅 + 3 次重试");
    assert_eq!(rec.error().map(|e| e.code()), Some("test.flaky"));
}

#[test]
fn retry_recovers_after_transient_failures() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_probe = attempts.clone();
    let source = Observable::<i32>::new(move |ctx, subscriber| {
        let attempt = attempts_probe.fetch_add(1, Ordering::SeqCst);
        if attempt < 2 {
            subscriber.error(&ctx, StreamError::new("test.flaky", "暂时失败"));
        } else {
            subscriber.next(&ctx, 42);
            subscriber.complete(&ctx);
        }
        Teardown::noop()
    });
    let rec: Recording<i32> = Recording::new();
    source.retry(5).subscribe(rec.observer());
    assert_eq!(rec.values(), vec![42]);
    assert!(rec.is_completed());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn retry_exponential_backoff_spaces_attempts() {
    let stamps: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let stamps_probe = stamps.clone();
    let source = Observable::<i32>::new(move |ctx, subscriber| {
        stamps_probe.lock().push(Instant::now());
        subscriber.error(&ctx, StreamError::new("test.flaky", "总是失败"));
        Teardown::noop()
    });
    let rec: Recording<i32> = Recording::new();
    source
        .retry_with_config(RetryConfig::new(3).with_backoff(BackoffPolicy::Exponential {
            base: Duration::from_millis(10),
            factor: 2.0,
            max_delay: Some(Duration::from_millis(100)),
        }))
        .subscribe(rec.observer());
    let stamps = stamps.lock();
    assert_eq!(stamps.len(), 4);
    // 等待语义是“至少”：各次重订阅间隔不小于 10ms、20ms、40ms。
    assert!(stamps[1] - stamps[0] >= Duration::from_millis(9));
    assert!(stamps[2] - stamps[1] >= Duration::from_millis(18));
    assert!(stamps[3] - stamps[2] >= Duration::from_millis(36));
    assert_eq!(rec.error().map(|e| e.code()), Some("test.flaky"));
}

#[test]
fn retry_cancel_during_backoff_stops_resubscription() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_probe = attempts.clone();
    let source = Observable::<i32>::new(move |ctx, subscriber: Arc<Subscriber<i32>>| {
        attempts_probe.fetch_add(1, Ordering::SeqCst);
        let worker_subscriber = subscriber.clone();
        let worker_ctx = ctx.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            worker_subscriber.error(&worker_ctx, StreamError::new("test.flaky", "异步失败"));
        });
        Teardown::noop()
    });
    let rec: Recording<i32> = Recording::new();
    let subscription = source
        .retry_with_config(RetryConfig::new(5).with_backoff(BackoffPolicy::Constant {
            delay: Duration::from_millis(300),
        }))
        .subscribe(rec.observer());
    std::thread::sleep(Duration::from_millis(60));
    // 此刻首次失败已进入退避等待；退订必须打断等待且不再重订阅。
    subscription.unsubscribe();
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(!rec.is_terminated(), "退订不产生终止通知");
}

#[test]
fn catch_switches_to_recovery_stream() {
    let rec: Recording<i32> = Recording::new();
    Observable::throw(StreamError::new("test.boom", "预期内错误"))
        .catch(|error| {
            assert_eq!(error.code(), "test.boom");
            Observable::just(42)
        })
        .subscribe(rec.observer());
    assert_eq!(
        rec.notifications(),
        vec![Notification::Next(42), Notification::Complete]
    );
}

#[test]
fn catch_passes_completion_through() {
    let rec: Recording<i32> = Recording::new();
    Observable::from_iter(vec![1, 2])
        .catch(|_error| Observable::just(99))
        .subscribe(rec.observer());
    assert_eq!(rec.values(), vec![1, 2]);
    assert!(rec.is_completed());
}

#[test]
fn on_error_resume_next_uses_fallback() {
    let rec: Recording<i32> = Recording::new();
    Observable::new(move |ctx, subscriber: Arc<Subscriber<i32>>| {
        subscriber.next(&ctx, 1);
        subscriber.error(&ctx, StreamError::new("test.boom", "预期内错误"));
        Teardown::noop()
    })
    .on_error_resume_next(Observable::from_iter(vec![7, 8]))
    .subscribe(rec.observer());
    assert_eq!(rec.values(), vec![1, 7, 8]);
    assert!(rec.is_completed());
}

#[test]
fn zip_pairs_heads_and_completes_on_exhausted_source() {
    let rec: Recording<Vec<i32>> = Recording::new();
    zip(vec![
        Observable::from_iter(vec![1, 2, 3]),
        Observable::from_iter(vec![10, 20]),
    ])
    .subscribe(rec.observer());
    assert_eq!(rec.values(), vec![vec![1, 10], vec![2, 20]]);
    assert!(rec.is_completed(), "已完成源的队列被弹空即终止");
}

#[test]
fn zip_of_empty_source_list_completes() {
    let rec: Recording<Vec<i32>> = Recording::new();
    zip(Vec::<Observable<i32>>::new()).subscribe(rec.observer());
    assert_eq!(rec.notifications(), vec![Notification::Complete]);
}

#[test]
fn combine_latest_emits_after_all_sources_seeded() {
    let first: PublishSubject<i32> = PublishSubject::new();
    let second: PublishSubject<i32> = PublishSubject::new();
    let rec: Recording<Vec<i32>> = Recording::new();
    combine_latest(vec![first.as_observable(), second.as_observable()])
        .subscribe(rec.observer());
    let ctx = Context::background();
    first.next(&ctx, 1);
    assert!(rec.is_empty(), "任一源未发射前不产出元组");
    second.next(&ctx, 10);
    first.next(&ctx, 2);
    first.complete(&ctx);
    second.next(&ctx, 20);
    second.complete(&ctx);
    assert_eq!(
        rec.values(),
        vec![vec![1, 10], vec![2, 10], vec![2, 20]]
    );
    assert!(rec.is_completed(), "全部源完成后才完成");
}

#[test]
fn combine_latest_errors_immediately() {
    let first: PublishSubject<i32> = PublishSubject::new();
    let second: PublishSubject<i32> = PublishSubject::new();
    let rec: Recording<Vec<i32>> = Recording::new();
    combine_latest(vec![first.as_observable(), second.as_observable()])
        .subscribe(rec.observer());
    let ctx = Context::background();
    first.next(&ctx, 1);
    second.error(&ctx, StreamError::new("test.boom", "预期内错误"));
    assert_eq!(rec.error().map(|e| e.code()), Some("test.boom"));
}

#[test]
fn merge_completes_when_all_sources_complete() {
    let rec: Recording<i32> = Recording::new();
    merge(
        vec![
            Observable::from_iter(vec![1, 2, 3]),
            Observable::from_iter(vec![10, 20, 30]),
        ],
        0,
    )
    .subscribe(rec.observer());
    let mut values = rec.values();
    values.sort_unstable();
    assert_eq!(values, vec![1, 2, 3, 10, 20, 30]);
    assert!(rec.is_completed());
}

#[test]
fn concat_subscribes_sources_in_order() {
    let second_subscribed_before_first_done = Arc::new(AtomicBool::new(false));
    let first_done = Arc::new(AtomicBool::new(false));
    let first_done_probe = first_done.clone();
    let order_probe = second_subscribed_before_first_done.clone();
    let first = Observable::new(move |ctx, subscriber: Arc<Subscriber<i32>>| {
        subscriber.next(&ctx, 1);
        subscriber.next(&ctx, 2);
        first_done_probe.store(true, Ordering::SeqCst);
        subscriber.complete(&ctx);
        Teardown::noop()
    });
    let first_done_in_second = first_done.clone();
    let second = Observable::new(move |ctx, subscriber: Arc<Subscriber<i32>>| {
        if !first_done_in_second.load(Ordering::SeqCst) {
            order_probe.store(true, Ordering::SeqCst);
        }
        subscriber.next(&ctx, 3);
        subscriber.complete(&ctx);
        Teardown::noop()
    });
    let rec: Recording<i32> = Recording::new();
    concat(vec![first, second]).subscribe(rec.observer());
    assert_eq!(rec.values(), vec![1, 2, 3]);
    assert!(rec.is_completed());
    assert!(
        !second_subscribed_before_first_done.load(Ordering::SeqCst),
        "后一个源必须等前一个完成后才被订阅"
    );
}

#[test]
fn collect_returns_items_and_terminal_error() {
    let (items, _ctx, error) = Observable::from_iter(vec![1, 2, 3]).collect(Context::background());
    assert_eq!(items, vec![1, 2, 3]);
    assert!(error.is_none());

    let (items, _ctx, error) =
        Observable::<i32>::throw(StreamError::new("test.boom", "预期内错误"))
            .collect(Context::background());
    assert!(items.is_empty());
    assert_eq!(error.map(|e| e.code()), Some("test.boom"));
}

#[test]
fn collect_honors_context_cancellation() {
    let cancellation = Cancellation::new();
    let ctx = Context::builder()
        .with_cancellation(cancellation.clone())
        .build();
    let canceller = cancellation.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        canceller.cancel();
    });
    let started = Instant::now();
    let (items, _ctx, error) = Observable::<i32>::never().collect(ctx);
    assert!(items.is_empty());
    assert!(error.expect("取消应表现为错误").is_cancellation());
    assert!(started.elapsed() < Duration::from_secs(2), "取消必须唤醒汇聚器");
}

#[test]
fn first_and_last_short_circuit() {
    assert_eq!(
        Observable::from_iter(vec![1, 2, 3]).first(Context::background()),
        Ok(1)
    );
    assert_eq!(
        Observable::from_iter(vec![1, 2, 3]).last(Context::background()),
        Ok(3)
    );
    assert!(matches!(
        Observable::<i32>::empty().first(Context::background()),
        Err(DrainError::Empty)
    ));
    assert!(matches!(
        Observable::<i32>::throw(StreamError::new("test.boom", "预期内错误"))
            .last(Context::background()),
        Err(DrainError::Upstream(_))
    ));
}

#[test]
fn take_zero_completes_without_subscribing_upstream() {
    let produced = Arc::new(AtomicBool::new(false));
    let produced_probe = produced.clone();
    let rec: Recording<i32> = Recording::new();
    Observable::<i32>::new(move |_ctx, _subscriber| {
        produced_probe.store(true, Ordering::SeqCst);
        Teardown::noop()
    })
    .take(0)
    .subscribe(rec.observer());
    assert_eq!(rec.notifications(), vec![Notification::Complete]);
    assert!(!produced.load(Ordering::SeqCst));
}

#[test]
fn skip_drops_leading_elements() {
    let rec: Recording<i32> = Recording::new();
    Observable::from_iter(vec![1, 2, 3, 4])
        .skip(2)
        .subscribe(rec.observer());
    assert_eq!(rec.values(), vec![3, 4]);
    assert!(rec.is_completed());
}
