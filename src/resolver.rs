//! Request coalescing in the style of a dataloader.
//!
//! A [`Resolver`] collects the requests issued while its batch window is open, removes
//! duplicate inputs, runs the [`BatchRunner`] once for the whole window, and hands every
//! waiter its own slice of the rows. The runner executes on a spawned task, so dropping one
//! waiter never cancels the batch for the others.
//!
//! Without a window delay, the request that opens a window leads it: the window closes only
//! after the leader's own task has yielded and no request joined across a further yield.
//! Every request submitted from the same task before it awaits (`tokio::join!`, `join_all`,
//! [`Resolver::execute_all`]) lands in one batch on any runtime flavor. Requests from
//! independent tasks merge when they arrive while the leader settles; set
//! [`Resolver::with_window`] when those must share a batch too.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sqlfx::prelude::*;
//!
//! # async fn demo(client: Client) -> Result<(), SqlFxError> {
//! let runner = client.batch_runner(|ids: Vec<i64>| {
//!     sql!("SELECT id, name FROM people WHERE id IN {}", array(ids)).into()
//! });
//! let people = Resolver::find_by_id(
//!     "people_by_id",
//!     runner,
//!     |row| row.get("id").and_then(Value::as_int),
//!     |row| Ok(row.try_get("name")?.as_text().unwrap_or_default().to_string()),
//! );
//! let (a, b) = tokio::join!(people.execute(1), people.execute(2));
//! # let _ = (a?, b?);
//! # Ok(())
//! # }
//! ```

mod distribute;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub use distribute::Distribute;

use crate::error::SqlFxError;
use crate::results::Row;

/// Runs one physical query for a whole batch of inputs.
pub type BatchRunner<I> =
    Arc<dyn Fn(Vec<I>) -> BoxFuture<'static, Result<Vec<Row>, SqlFxError>> + Send + Sync>;

type Reply<R> = Result<R, SqlFxError>;
type Waiters<I, R> = IndexMap<I, Vec<oneshot::Sender<Reply<R>>>>;
type Receivers<R> = Vec<oneshot::Receiver<Reply<R>>>;

/// Extra yields a leader spends waiting for a growing window to go quiet.
const SETTLE_YIELDS: usize = 8;

/// Batch window tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverOptions {
    /// How long a window stays open. `None` closes it once the leading request's task has
    /// yielded and the window stopped growing.
    pub window: Option<Duration>,
    /// Dispatch a window as soon as it holds this many distinct inputs.
    pub max_batch_size: Option<usize>,
    /// Keep successful results and answer repeated inputs without batching.
    pub cache: bool,
}

struct Window<I, R> {
    waiters: Waiters<I, R>,
    flush_scheduled: bool,
    /// Bumped on every enqueue.
    generation: u64,
}

struct State<I, R> {
    window: Mutex<Window<I, R>>,
    cache: Mutex<HashMap<I, R>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Coalesces concurrent requests of one kind into batched runner calls.
///
/// `R` is what a single request resolves to: the decoded row for [`ordered`](Self::ordered),
/// `Option` for [`find_by_id`](Resolver::find_by_id), `Vec` for
/// [`grouped`](Resolver::grouped), `()` for [`void`](Resolver::void).
pub struct Resolver<I, R> {
    tag: Arc<str>,
    runner: BatchRunner<I>,
    distribute: Distribute<I, R>,
    options: ResolverOptions,
    state: Arc<State<I, R>>,
}

impl<I, R> Clone for Resolver<I, R> {
    fn clone(&self) -> Self {
        Self {
            tag: Arc::clone(&self.tag),
            runner: Arc::clone(&self.runner),
            distribute: Arc::clone(&self.distribute),
            options: self.options,
            state: Arc::clone(&self.state),
        }
    }
}

impl<I, R> fmt::Debug for Resolver<I, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("tag", &self.tag)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<I, R> Resolver<I, R>
where
    I: Hash + Eq + Clone + Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    /// Resolver with a custom row distribution.
    pub fn new(
        tag: impl Into<Arc<str>>,
        runner: BatchRunner<I>,
        distribute: Distribute<I, R>,
    ) -> Self {
        Self {
            tag: tag.into(),
            runner,
            distribute,
            options: ResolverOptions::default(),
            state: Arc::new(State {
                window: Mutex::new(Window {
                    waiters: IndexMap::new(),
                    flush_scheduled: false,
                    generation: 0,
                }),
                cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Positional resolver: row `i` of the batch answers input `i`.
    ///
    /// A batch returning a different number of rows fails every request in it with
    /// `SqlFxError::ResultLengthMismatch`.
    pub fn ordered<D>(tag: impl Into<Arc<str>>, runner: BatchRunner<I>, decode: D) -> Self
    where
        D: Fn(&Row) -> Result<R, SqlFxError> + Send + Sync + 'static,
    {
        Self::new(tag, runner, distribute::ordered(decode))
    }

    #[must_use]
    pub fn with_options(mut self, options: ResolverOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.options.window = Some(window);
        self
    }

    #[must_use]
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.options.max_batch_size = Some(max.max(1));
        self
    }

    #[must_use]
    pub fn with_cache(mut self) -> Self {
        self.options.cache = true;
        self
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Resolve one input, batched with every other request in the current window.
    ///
    /// # Errors
    /// Returns the runner's error, a per-request decode error, or
    /// `SqlFxError::ResultLengthMismatch` for positional resolvers.
    pub async fn execute(&self, input: I) -> Result<R, SqlFxError> {
        if let Some(hit) = self.cached(&input) {
            return Ok(hit);
        }
        let (mut receivers, leader) = self.enqueue(vec![input]);
        if let Some(leader) = leader {
            leader.settle().await;
        }
        match receivers.pop() {
            Some(receiver) => self.wait(receiver).await,
            None => Err(self.aborted()),
        }
    }

    /// Submit `inputs` as one fan-out and return their results in input order.
    pub async fn execute_all(&self, inputs: impl IntoIterator<Item = I>) -> Vec<Result<R, SqlFxError>> {
        let mut hits = Vec::new();
        let mut misses = Vec::new();
        for input in inputs {
            let hit = self.cached(&input);
            if hit.is_none() {
                misses.push(input);
            }
            hits.push(hit);
        }

        let (receivers, leader) = self.enqueue(misses);
        if let Some(leader) = leader {
            leader.settle().await;
        }
        let mut receivers = receivers.into_iter();
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            results.push(match hit {
                Some(value) => Ok(value),
                None => match receivers.next() {
                    Some(receiver) => self.wait(receiver).await,
                    None => Err(self.aborted()),
                },
            });
        }
        results
    }

    /// Seed the cache. Has no effect unless caching is enabled.
    pub fn populate_cache(&self, input: I, value: R) {
        if self.options.cache {
            lock(&self.state.cache).insert(input, value);
        }
    }

    pub fn invalidate_cache(&self, input: &I) {
        lock(&self.state.cache).remove(input);
    }

    pub fn clear_cache(&self) {
        lock(&self.state.cache).clear();
    }

    fn cached(&self, input: &I) -> Option<R> {
        if !self.options.cache {
            return None;
        }
        lock(&self.state.cache).get(input).cloned()
    }

    fn aborted(&self) -> SqlFxError {
        SqlFxError::BatchAborted(format!(
            "batch for resolver \"{}\" ended without a result",
            self.tag
        ))
    }

    async fn wait(&self, receiver: oneshot::Receiver<Reply<R>>) -> Result<R, SqlFxError> {
        receiver.await.unwrap_or_else(|_| Err(self.aborted()))
    }

    fn generation(&self) -> u64 {
        lock(&self.state.window).generation
    }

    /// Add `inputs` to the open window. Returns a leader when this call opened the window
    /// and no delay is configured; the caller must settle it so the window gets flushed.
    fn enqueue(&self, inputs: Vec<I>) -> (Receivers<R>, Option<Leader<I, R>>) {
        if inputs.is_empty() {
            return (Vec::new(), None);
        }
        let mut receivers = Vec::with_capacity(inputs.len());
        let mut full = Vec::new();
        let schedule = {
            let mut window = lock(&self.state.window);
            window.generation = window.generation.wrapping_add(1);
            for input in inputs {
                let (sender, receiver) = oneshot::channel();
                window.waiters.entry(input).or_default().push(sender);
                receivers.push(receiver);
                if let Some(max) = self.options.max_batch_size
                    && window.waiters.len() >= max
                {
                    full.push(mem::take(&mut window.waiters));
                }
            }
            let schedule = !window.waiters.is_empty() && !window.flush_scheduled;
            if schedule {
                window.flush_scheduled = true;
            }
            schedule
        };

        for batch in full {
            tokio::spawn(self.clone().run_batch(batch));
        }
        if !schedule {
            return (receivers, None);
        }
        match self.options.window {
            Some(delay) => {
                let this = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    this.flush().await;
                });
                (receivers, None)
            }
            None => (
                receivers,
                Some(Leader {
                    resolver: Some(self.clone()),
                }),
            ),
        }
    }

    async fn flush(self) {
        let batch = {
            let mut window = lock(&self.state.window);
            window.flush_scheduled = false;
            mem::take(&mut window.waiters)
        };
        if !batch.is_empty() {
            self.run_batch(batch).await;
        }
    }

    async fn run_batch(self, batch: Waiters<I, R>) {
        let inputs: Vec<I> = batch.keys().cloned().collect();
        let waiting: usize = batch.values().map(Vec::len).sum();
        debug!(tag = %self.tag, inputs = inputs.len(), waiting, "dispatching batch");

        let outcomes = match (self.runner)(inputs.clone()).await {
            Ok(rows) => {
                let outcomes = (self.distribute)(&inputs, rows);
                if outcomes.len() == inputs.len() {
                    outcomes
                } else {
                    warn!(tag = %self.tag, "row distribution returned the wrong number of results");
                    inputs.iter().map(|_| Err(self.aborted())).collect()
                }
            }
            Err(err) => {
                warn!(tag = %self.tag, error = %err, "batch failed");
                inputs.iter().map(|_| Err(err.clone())).collect()
            }
        };

        for ((input, waiters), outcome) in batch.into_iter().zip(outcomes) {
            if self.options.cache
                && let Ok(value) = &outcome
            {
                lock(&self.state.cache).insert(input, value.clone());
            }
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
    }
}

/// Holds a window open for the request that opened it. Dropping it, whether after
/// [`settle`](Leader::settle) or because the leading request was cancelled, hands the window
/// to a spawned flush.
struct Leader<I, R>
where
    I: Hash + Eq + Clone + Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    resolver: Option<Resolver<I, R>>,
}

impl<I, R> Leader<I, R>
where
    I: Hash + Eq + Clone + Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    /// Yield until the rest of the submitting fan-out has enqueued and the window stopped
    /// growing, then flush.
    async fn settle(self) {
        let Some(resolver) = self.resolver.as_ref() else {
            return;
        };
        let mut seen = resolver.generation();
        tokio::task::yield_now().await;
        for _ in 0..SETTLE_YIELDS {
            let now = resolver.generation();
            if now == seen {
                break;
            }
            seen = now;
            tokio::task::yield_now().await;
        }
    }
}

impl<I, R> Drop for Leader<I, R>
where
    I: Hash + Eq + Clone + Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    fn drop(&mut self) {
        let Some(resolver) = self.resolver.take() else {
            return;
        };
        if let Ok(handle) = Handle::try_current() {
            handle.spawn(resolver.flush());
        } else {
            // No runtime to run the batch on; waiters observe `BatchAborted`.
            let mut window = lock(&resolver.state.window);
            window.flush_scheduled = false;
            window.waiters.clear();
        }
    }
}

impl<I, O> Resolver<I, Option<O>>
where
    I: Hash + Eq + Clone + Send + Sync + 'static,
    O: Clone + Send + 'static,
{
    /// Match rows to requests by the id `row_id` extracts. Requests without a row resolve
    /// to `None`; when several rows carry the same id the first one wins.
    pub fn find_by_id<K, D>(
        tag: impl Into<Arc<str>>,
        runner: BatchRunner<I>,
        row_id: K,
        decode: D,
    ) -> Self
    where
        K: Fn(&Row) -> Option<I> + Send + Sync + 'static,
        D: Fn(&Row) -> Result<O, SqlFxError> + Send + Sync + 'static,
    {
        Self::new(tag, runner, distribute::find_by_id(row_id, decode))
    }
}

impl<I, O> Resolver<I, Vec<O>>
where
    I: Hash + Eq + Clone + Send + Sync + 'static,
    O: Clone + Send + 'static,
{
    /// Every row whose key matches a request, in row order.
    pub fn grouped<K, D>(
        tag: impl Into<Arc<str>>,
        runner: BatchRunner<I>,
        row_key: K,
        decode: D,
    ) -> Self
    where
        K: Fn(&Row) -> Option<I> + Send + Sync + 'static,
        D: Fn(&Row) -> Result<O, SqlFxError> + Send + Sync + 'static,
    {
        Self::new(tag, runner, distribute::grouped(row_key, decode))
    }
}

impl<I> Resolver<I, ()>
where
    I: Hash + Eq + Clone + Send + Sync + 'static,
{
    /// Side effects only: the whole batch succeeds or fails together.
    pub fn void(tag: impl Into<Arc<str>>, runner: BatchRunner<I>) -> Self {
        Self::new(tag, runner, distribute::void())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::FutureExt;
    use futures_util::future::join_all;

    use super::*;
    use crate::types::Value;

    /// Runner echoing each input as an `id` row and recording every batch it sees.
    fn echo_runner(batches: Arc<Mutex<Vec<Vec<i64>>>>) -> BatchRunner<i64> {
        Arc::new(move |inputs: Vec<i64>| {
            batches.lock().unwrap().push(inputs.clone());
            async move {
                Ok::<Vec<Row>, SqlFxError>(
                    inputs
                        .into_iter()
                        .map(|id| Row::from_pairs([("id", Value::Int(id))]))
                        .collect(),
                )
            }
            .boxed()
        })
    }

    fn id(row: &Row) -> Result<i64, SqlFxError> {
        row.try_get("id")?
            .as_int()
            .ok_or_else(|| SqlFxError::DecodeError("id".into()))
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_requests_share_one_deduplicated_batch() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let resolver = Resolver::ordered("echo", echo_runner(batches.clone()), id);

        let results = join_all([1, 2, 1, 3].map(|i| resolver.execute(i))).await;

        let results: Vec<i64> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(results, vec![1, 2, 1, 3]);
        assert_eq!(*batches.lock().unwrap(), vec![vec![1, 2, 3]]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn joined_requests_share_one_batch_across_workers() {
        for _ in 0..200 {
            let batches = Arc::new(Mutex::new(Vec::new()));
            let resolver = Resolver::ordered("echo", echo_runner(batches.clone()), id);

            let (a, b, c) = tokio::join!(resolver.execute(1), resolver.execute(2), resolver.execute(3));

            assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (1, 2, 3));
            assert_eq!(batches.lock().unwrap().len(), 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn large_fan_out_is_one_batch_across_workers() {
        for _ in 0..100 {
            let batches = Arc::new(Mutex::new(Vec::new()));
            let resolver = Resolver::ordered("echo", echo_runner(batches.clone()), id);

            let results = join_all((0..50).map(|i| resolver.execute(i))).await;

            let results: Vec<i64> = results.into_iter().map(Result::unwrap).collect();
            assert_eq!(results, (0..50).collect::<Vec<_>>());
            let batches = batches.lock().unwrap();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].len(), 50);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_leader_still_flushes_the_window() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let resolver = Resolver::ordered("echo", echo_runner(batches.clone()), id);

        let mut leader = Box::pin(resolver.execute(1));
        assert!(futures_util::poll!(leader.as_mut()).is_pending());
        let mut follower = Box::pin(resolver.execute(2));
        assert!(futures_util::poll!(follower.as_mut()).is_pending());
        drop(leader);

        assert_eq!(follower.await.unwrap(), 2);
        assert_eq!(*batches.lock().unwrap(), vec![vec![1, 2]]);
    }

    #[tokio::test]
    async fn max_batch_size_splits_a_fan_out() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let resolver =
            Resolver::ordered("echo", echo_runner(batches.clone()), id).with_max_batch_size(2);

        let results = resolver.execute_all([1, 2, 3, 4, 5]).await;

        assert!(results.iter().all(Result::is_ok));
        let mut seen = batches.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[tokio::test]
    async fn runner_failure_reaches_every_waiter() {
        let runner: BatchRunner<i64> = Arc::new(|_inputs: Vec<i64>| {
            async { Err::<Vec<Row>, _>(SqlFxError::execution("database is down")) }.boxed()
        });
        let resolver = Resolver::void("writes", runner);

        let results = resolver.execute_all([1, 2]).await;
        assert_eq!(results.len(), 2);
        assert!(
            results
                .iter()
                .all(|r| matches!(r, Err(SqlFxError::ExecutionError { .. })))
        );
    }

    #[tokio::test]
    async fn cache_skips_batching_and_keeps_only_successes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let runner: BatchRunner<i64> = Arc::new(move |inputs: Vec<i64>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok::<Vec<Row>, SqlFxError>(
                    inputs
                        .into_iter()
                        .filter(|id| *id > 0)
                        .map(|id| Row::from_pairs([("id", Value::Int(id))]))
                        .collect(),
                )
            }
            .boxed()
        });
        let resolver = Resolver::find_by_id(
            "by_id",
            runner,
            |row| row.get("id").and_then(Value::as_int),
            id,
        )
        .with_cache();

        assert_eq!(resolver.execute(7).await.unwrap(), Some(7));
        assert_eq!(resolver.execute(7).await.unwrap(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        resolver.invalidate_cache(&7);
        resolver.execute(7).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        resolver.populate_cache(8, Some(80));
        assert_eq!(resolver.execute(8).await.unwrap(), Some(80));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_results_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let runner: BatchRunner<i64> = Arc::new(move |_inputs: Vec<i64>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<Vec<Row>, SqlFxError>(Vec::new()) }.boxed()
        });
        let resolver = Resolver::ordered("short", runner, id).with_cache();

        assert!(matches!(
            resolver.execute(1).await,
            Err(SqlFxError::ResultLengthMismatch {
                expected: 1,
                actual: 0
            })
        ));
        assert!(resolver.execute(1).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn window_delay_collects_staggered_requests() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let resolver = Resolver::ordered("echo", echo_runner(batches.clone()), id)
            .with_window(Duration::from_millis(50));

        let late = {
            let resolver = resolver.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                resolver.execute(2).await
            })
        };
        let first = resolver.execute(1).await.unwrap();
        let second = late.await.unwrap().unwrap();

        assert_eq!((first, second), (1, 2));
        assert_eq!(*batches.lock().unwrap(), vec![vec![1, 2]]);
    }
}
