//! Bounded fan-out / fan-in over independent accounts.

use std::future::Future;

use tokio::task::JoinError;

/// Spawn `work` for every item and wait for all of them.
///
/// Outcomes come back in input order. A task that panics or is cancelled
/// surfaces as `Err(JoinError)` in its own slot and never affects its
/// siblings. Callers bound concurrency by the size of `items`.
pub async fn settle<T, R, F, Fut>(items: Vec<T>, mut work: F) -> Vec<Result<R, JoinError>>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    let handles: Vec<_> = items.into_iter().map(|item| tokio::spawn(work(item))).collect();
    futures::future::join_all(handles).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn outcomes_keep_input_order() {
        let results = settle(vec![30u64, 10, 20], |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ms * 2
        })
        .await;

        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![60, 20, 40]);
    }

    #[tokio::test]
    async fn panic_is_captured_per_slot() {
        let results = settle(vec![1, 2, 3], |n| async move {
            if n == 2 {
                panic!("account {n} exploded");
            }
            n
        })
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert!(results[1].as_ref().unwrap_err().is_panic());
        assert_eq!(*results[2].as_ref().unwrap(), 3);
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let results = settle(Vec::<u8>::new(), |n| async move { n }).await;
        assert!(results.is_empty());
    }
}
