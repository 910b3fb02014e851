use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use agentdeck::error::{DeckError, Result};
use agentdeck::provider::llm_retry;
use agentdeck::utils::CancelFlag;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn three_failures_then_success_takes_seven_to_eight_seconds() {
    let cancel = CancelFlag::new();
    let attempts = AtomicUsize::new(0);
    let started = Instant::now();

    let value = llm_retry(&cancel, || {
        let n = attempts.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 3 {
                Err(DeckError::provider("Stub", format!("failure {n}")))
            } else {
                Ok(42u32)
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(value, 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(7), "too fast: {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(8), "too slow: {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn gaps_between_attempts_follow_the_backoff_schedule() {
    let cancel = CancelFlag::new();
    let stamps: std::sync::Mutex<Vec<Instant>> = std::sync::Mutex::new(Vec::new());

    let _: Result<u32> = llm_retry(&cancel, || {
        stamps.lock().unwrap().push(Instant::now());
        async { Err(DeckError::provider("Stub", "down")) }
    })
    .await;

    let stamps = stamps.into_inner().unwrap();
    assert_eq!(stamps.len(), 4);
    let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
    let expected = [1u64, 2, 4];
    for (gap, want) in gaps.iter().zip(expected) {
        assert!(
            *gap >= Duration::from_secs(want) && *gap <= Duration::from_secs(want + 1),
            "gap {gap:?}, wanted ~{want}s"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn mid_backoff_cancellation_surfaces_immediately() {
    let cancel = CancelFlag::new();
    let attempts = AtomicUsize::new(0);
    let canceller = cancel.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let result: Result<u32> = llm_retry(&cancel, || {
        attempts.fetch_add(1, Ordering::SeqCst);
        async { Err(DeckError::provider("Stub", "down")) }
    })
    .await;

    assert!(matches!(result, Err(DeckError::Cancelled)));
    // Cancellation arrived during the 2s backoff and cut it short.
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
