//! Parallel per-shard execution with full error aggregation.
//!
//! Fan-out phases must observe every shard before reporting: a failure on
//! one shard never short-circuits the others, so the caller always learns
//! the complete set of failures and every task has quiesced by the time
//! the aggregate is returned. The executor does no I/O of its own and
//! provides no mutual exclusion; concurrency is bounded only by the shard
//! count.

use std::future::Future;

use futures::future::join_all;

use shrike_common::error::{AggregateError, ShrikeError, ShrikeResult};

/// Run `f` concurrently for every shard. Returns `Ok(())` iff every
/// invocation succeeded; otherwise an aggregate with one error per
/// failing shard, in unspecified order.
pub async fn for_all<S, Fut>(shards: &[S], f: impl Fn(S) -> Fut) -> ShrikeResult<()>
where
    S: Clone,
    Fut: Future<Output = ShrikeResult<()>>,
{
    let results = join_all(shards.iter().cloned().map(f)).await;
    let errors: Vec<ShrikeError> = results.into_iter().filter_map(Result::err).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AggregateError::new(errors).into())
    }
}

/// Like [`for_all`], but collects the per-shard outputs (in input order)
/// when every invocation succeeds.
pub async fn for_all_collect<S, T, Fut>(shards: &[S], f: impl Fn(S) -> Fut) -> ShrikeResult<Vec<T>>
where
    S: Clone,
    Fut: Future<Output = ShrikeResult<T>>,
{
    let results = join_all(shards.iter().cloned().map(f)).await;
    let mut outputs = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(value) => outputs.push(value),
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() {
        Ok(outputs)
    } else {
        Err(AggregateError::new(errors).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use shrike_common::error::ErrorKind;

    #[tokio::test]
    async fn test_all_success_returns_ok() {
        let shards = vec![1u32, 2, 3];
        let visited = AtomicUsize::new(0);
        let visited = &visited;
        for_all(&shards, |_shard| async move {
            visited.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(visited.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failures_do_not_short_circuit() {
        let shards = vec![1u32, 2, 3, 4];
        let visited = AtomicUsize::new(0);
        let visited = &visited;
        let err = for_all(&shards, |shard| async move {
            visited.fetch_add(1, Ordering::SeqCst);
            if shard % 2 == 0 {
                Err(ShrikeError::Precondition(format!("shard {shard} bad")))
            } else {
                Ok(())
            }
        })
        .await
        .unwrap_err();

        // Every shard ran even though two failed.
        assert_eq!(visited.load(Ordering::SeqCst), 4);
        assert_eq!(err.kind(), ErrorKind::Aggregate);
        let text = err.to_string();
        assert!(text.contains("shard 2 bad"));
        assert!(text.contains("shard 4 bad"));
    }

    #[tokio::test]
    async fn test_empty_input_is_ok() {
        let shards: Vec<u32> = Vec::new();
        for_all(&shards, |_shard| async { Ok(()) }).await.unwrap();
    }

    #[tokio::test]
    async fn test_collect_preserves_input_order() {
        let shards = vec!["a", "b", "c"];
        let outputs = for_all_collect(&shards, |shard| async move {
            Ok(shard.to_uppercase())
        })
        .await
        .unwrap();
        assert_eq!(outputs, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_collect_aggregates_all_failures() {
        let shards = vec![1u32, 2, 3];
        let err = for_all_collect(&shards, |shard| async move {
            if shard == 2 {
                Ok(shard)
            } else {
                Err(ShrikeError::Precondition(format!("no {shard}")))
            }
        })
        .await
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("no 1"));
        assert!(text.contains("no 3"));
    }
}
