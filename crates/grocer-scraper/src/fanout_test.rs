use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::*;

#[derive(Default)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    started: AtomicUsize,
}

impl Gauge {
    async fn hold(&self, delay: Duration) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn fanout(k: usize) -> BoundedFanout {
    BoundedFanout::new(RequestLimiter::new(k, CancellationToken::new()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_exceeds_bound() {
    for k in [1usize, 3, 8] {
        let gauge = Arc::new(Gauge::default());
        let g = Arc::clone(&gauge);
        let results = fanout(k)
            .collect_bounded(0..25usize, move |i| {
                let g = Arc::clone(&g);
                async move {
                    g.hold(Duration::from_millis(3)).await;
                    Ok::<usize, ScraperError>(i)
                }
            })
            .await;

        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!(peak <= k, "peak {peak} exceeded bound {k}");
        assert!(peak >= 1);
        assert_eq!(results.summary.completed, 25);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_unit_completes_exactly_once() {
    let results = fanout(4)
        .collect_bounded(0..40usize, |i| async move { Ok::<usize, ScraperError>(i) })
        .await;

    let mut outputs = results.outputs;
    outputs.sort_unstable();
    assert_eq!(outputs, (0..40).collect::<Vec<_>>());
    assert_eq!(
        results.summary,
        FanoutSummary {
            submitted: 40,
            completed: 40,
            skipped: 0,
            failed: 0,
        }
    );
}

#[tokio::test]
async fn failures_are_counted_not_propagated() {
    let results = fanout(2)
        .collect_bounded(0..9u32, |i| async move {
            if i % 3 == 0 {
                Err(ScraperError::UnexpectedStatus {
                    status: 500,
                    url: format!("https://example.com/page/{i}"),
                })
            } else {
                Ok(i)
            }
        })
        .await;

    assert_eq!(results.summary.failed, 3);
    assert_eq!(results.summary.completed, 6);
    assert_eq!(results.outputs.len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nested_fanouts_share_one_bound() {
    let k = 2;
    let outer = fanout(k);
    let gauge = Arc::new(Gauge::default());

    let inner = outer.clone();
    let g = Arc::clone(&gauge);
    let results = outer
        .run_unbounded(0..4usize, move |_category| {
            let inner = inner.clone();
            let g = Arc::clone(&g);
            async move {
                let pages = inner
                    .collect_bounded(0..6usize, move |page| {
                        let g = Arc::clone(&g);
                        async move {
                            g.hold(Duration::from_millis(2)).await;
                            Ok::<usize, ScraperError>(page)
                        }
                    })
                    .await;
                Ok::<usize, ScraperError>(pages.outputs.len())
            }
        })
        .await;

    assert!(gauge.peak.load(Ordering::SeqCst) <= k);
    assert_eq!(results.outputs.iter().sum::<usize>(), 24);
}

#[tokio::test]
async fn cancelled_before_start_skips_everything() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let gauge = Arc::new(Gauge::default());
    let g = Arc::clone(&gauge);
    let results = BoundedFanout::new(RequestLimiter::new(4, cancel))
        .collect_bounded(0..10usize, move |i| {
            let g = Arc::clone(&g);
            async move {
                g.hold(Duration::ZERO).await;
                Ok::<usize, ScraperError>(i)
            }
        })
        .await;

    assert_eq!(gauge.started.load(Ordering::SeqCst), 0);
    assert_eq!(results.summary.skipped, 10);
    assert!(results.outputs.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_mid_run_returns_early() {
    let cancel = CancellationToken::new();
    let fanout = BoundedFanout::new(RequestLimiter::new(1, cancel.clone()));

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let results = fanout
        .collect_bounded(0..20usize, |i| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<usize, ScraperError>(i)
        })
        .await;

    assert!(started.elapsed() < Duration::from_millis(800));
    let s = results.summary;
    assert!(s.completed < 20, "expected early stop, got {s:?}");
    assert_eq!(s.completed + s.skipped + s.failed, s.submitted);
}

#[tokio::test]
async fn limiter_run_yields_none_after_cancel() {
    let cancel = CancellationToken::new();
    let limiter = RequestLimiter::new(1, cancel.clone());
    assert_eq!(limiter.run(async { 5 }).await, Some(5));
    cancel.cancel();
    assert_eq!(limiter.run(async { 5 }).await, None);
}

#[tokio::test]
async fn limiter_capacity_is_at_least_one() {
    let limiter = RequestLimiter::new(0, CancellationToken::new());
    assert_eq!(limiter.capacity(), 1);
    assert_eq!(limiter.run(async { "ok" }).await, Some("ok"));
}

#[tokio::test]
async fn emitter_sends_whole_pages_until_cancelled() {
    let cancel = CancellationToken::new();
    let (emitter, mut rx) = record_channel::<u32>(cancel.clone());

    assert_eq!(emitter.emit_page(vec![1, 2, 3]), 3);
    cancel.cancel();
    assert_eq!(emitter.emit_page(vec![4, 5]), 0);
    drop(emitter);

    let mut received = Vec::new();
    while let Some(item) = rx.recv().await {
        received.push(item);
    }
    assert_eq!(received, vec![1, 2, 3]);
}
