//! Bounded-concurrency batching for per-item upstream fetches.

use futures_util::future::join_all;

const LOG_TARGET: &str = "     batch";

/// Number of in-flight fetches per slice. Keeps a large account from
/// hammering the upstream's rate limits while still finishing in
/// `ceil(n / 5)` round trips instead of `n`.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Apply `op` to every item with at most `concurrency` fetches in flight.
///
/// The item list is partitioned into fixed-size slices; every fetch in a slice
/// settles before the next slice starts. A failed item contributes its type's
/// default value instead of aborting the batch, so one item's failure is
/// isolated from the rest. The output is index-aligned with the input.
pub async fn run_chunked<I, T, F, Fut>(items: &[I], concurrency: usize, op: F) -> Vec<T>
where
    I: Clone,
    T: Default,
    F: Fn(I) -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let concurrency = concurrency.max(1);
    let mut results = Vec::with_capacity(items.len());

    for slice in items.chunks(concurrency) {
        let settled = join_all(slice.iter().cloned().map(&op)).await;

        for outcome in settled {
            match outcome {
                Ok(value) => results.push(value),
                Err(e) => {
                    log::warn!(target: LOG_TARGET, "batch item failed, contributing empty result: {e:#}");
                    results.push(T::default());
                }
            }
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use core::time::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn failing_items_contribute_defaults_without_aborting() {
        let items: Vec<usize> = (0..12).collect();

        let results = run_chunked(&items, 5, |i| async move {
            if i == 3 || i == 7 {
                Err(ohno::app_err!("item {i} failed"))
            } else {
                Ok(i + 1)
            }
        })
        .await;

        assert_eq!(results.len(), 12);
        for (i, result) in results.iter().enumerate() {
            if i == 3 || i == 7 {
                assert_eq!(*result, 0, "failed item {i} should contribute the default");
            } else {
                assert_eq!(*result, i + 1);
            }
        }
    }

    #[tokio::test]
    async fn twelve_items_at_concurrency_five_settle_in_three_slices() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let high_water = Arc::new(AtomicUsize::new(0));
        let slices = Arc::new(AtomicUsize::new(0));
        let items: Vec<u32> = (0..12).collect();

        let results = run_chunked(&items, 5, |_| {
            let in_flight = Arc::clone(&in_flight);
            let high_water = Arc::clone(&high_water);
            let slices = Arc::clone(&slices);
            async move {
                // A slice drains completely before the next starts, so each
                // 0 -> 1 in-flight transition marks a new slice.
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                if now == 1 {
                    _ = slices.fetch_add(1, Ordering::SeqCst);
                }
                _ = high_water.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                _ = in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(1_u64)
            }
        })
        .await;

        assert_eq!(results.iter().sum::<u64>(), 12);
        assert_eq!(high_water.load(Ordering::SeqCst), 5, "full slices should run at the concurrency bound");
        assert_eq!(slices.load(Ordering::SeqCst), 3, "12 items at concurrency 5 should settle in ceil(12/5) slices");
    }

    #[tokio::test]
    async fn zero_concurrency_is_clamped() {
        let items = vec![1_u64, 2, 3];
        let results = run_chunked(&items, 0, |i| async move { Ok(i * 10) }).await;
        assert_eq!(results, vec![10, 20, 30]);
    }
}
