//! Integration tests exercising the limiter the way hub callers do: many
//! tasks contending for a few named groups, including the single-flight
//! evaluation-channel pattern.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use toolhub_fifo::GroupLimiter;

#[tokio::test]
async fn concurrent_callers_all_complete() {
    const TASKS: usize = 20;

    let limiter = Arc::new(GroupLimiter::new());
    let completed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let completed = Arc::clone(&completed);
            tokio::spawn(async move {
                limiter.acquire("tools", 5).await;
                tokio::time::sleep(Duration::from_millis(5)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                limiter.release("tools");
            })
        })
        .collect();

    futures::future::join_all(handles).await;
    assert_eq!(completed.load(Ordering::SeqCst), TASKS);
}

#[tokio::test]
async fn single_flight_group_serializes_callers() {
    // The evaluation bridge uses a capacity-1 group so request/response
    // pairs on its shared channel can never overlap.
    const TASKS: usize = 8;

    let limiter = Arc::new(GroupLimiter::new());
    let in_flight = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let in_flight = Arc::clone(&in_flight);
            let overlaps = Arc::clone(&overlaps);
            tokio::spawn(async move {
                limiter.acquire("eval-channel", 1).await;
                if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                limiter.release("eval-channel");
            })
        })
        .collect();

    futures::future::join_all(handles).await;
    assert_eq!(overlaps.load(Ordering::SeqCst), 0, "callers must not overlap");
}

#[tokio::test]
async fn independent_groups_run_in_parallel() {
    let limiter = Arc::new(GroupLimiter::new());

    // Exhaust group "a"; group "b" must still admit immediately.
    limiter.acquire("a", 1).await;

    let limiter_b = Arc::clone(&limiter);
    let admitted = tokio::time::timeout(Duration::from_secs(1), async move {
        limiter_b.acquire("b", 1).await;
        limiter_b.release("b");
    })
    .await;
    assert!(admitted.is_ok(), "group b should not wait on group a");

    limiter.release("a");
}

#[tokio::test]
async fn timed_out_caller_does_not_disturb_the_queue() {
    let limiter = Arc::new(GroupLimiter::new());
    limiter.acquire("tools", 1).await;

    // This caller gives up while queued...
    let gave_up =
        tokio::time::timeout(Duration::from_millis(30), limiter.acquire("tools", 1)).await;
    assert!(gave_up.is_err());

    // ...and the permit still reaches a later caller.
    limiter.release("tools");
    let admitted =
        tokio::time::timeout(Duration::from_secs(1), limiter.acquire("tools", 1)).await;
    assert!(admitted.is_ok(), "permit must survive an abandoned waiter");
    limiter.release("tools");
}
