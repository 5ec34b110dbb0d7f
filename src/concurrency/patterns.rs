//! Reusable concurrency patterns built on the primitives.
//!
//! Connection pool, worker pool, bounded parallel fan-out, and
//! retry-with-timeout. These are the shapes the dispatcher and the
//! backends compose; they carry no transport knowledge of their own.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore as TokioSemaphore};
use tokio::task::JoinSet;

use crate::concurrency::cancel::fail_after;
use crate::concurrency::primitives::CapacityLimiter;
use crate::concurrency::task::TaskGroup;
use crate::error::{PynectorError, Result};

/// A boxed, pinned, Send future used by the pool factories and handlers.
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A connection a [`ConnectionPool`] can manage.
#[async_trait]
pub trait PoolableConnection: Send {
    /// Release the connection's underlying resources.
    async fn close(&mut self);
}

/// Pool of reusable connections with a hard cap.
///
/// `acquire` reuses a released connection when one is idle, creates a new
/// one while under `max_connections`, and otherwise suspends until a
/// connection is released. Contending acquirers are served FIFO.
///
/// # Example
///
/// ```no_run
/// use pynector::concurrency::{ConnectionPool, PoolableConnection};
/// use async_trait::async_trait;
///
/// struct Conn;
///
/// #[async_trait]
/// impl PoolableConnection for Conn {
///     async fn close(&mut self) {}
/// }
///
/// # tokio_test::block_on(async {
/// let pool = ConnectionPool::new(2, || async { Ok(Conn) });
/// let conn = pool.acquire().await.unwrap();
/// pool.release(conn).await;
/// pool.close_all().await;
/// # });
/// ```
pub struct ConnectionPool<C: PoolableConnection> {
    factory: Box<dyn Fn() -> BoxFut<'static, Result<C>> + Send + Sync>,
    capacity: Arc<TokioSemaphore>,
    idle: AsyncMutex<VecDeque<C>>,
}

impl<C: PoolableConnection> ConnectionPool<C> {
    /// Create a pool producing at most `max_connections` live connections
    /// through `factory`.
    pub fn new<F, Fut>(max_connections: usize, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C>> + Send + 'static,
    {
        Self {
            factory: Box::new(move || Box::pin(factory())),
            capacity: Arc::new(TokioSemaphore::new(max_connections)),
            idle: AsyncMutex::new(VecDeque::new()),
        }
    }

    /// Take a connection, reusing an idle one when possible.
    pub async fn acquire(&self) -> Result<C> {
        let permit = self
            .capacity
            .acquire()
            .await
            .expect("pool capacity semaphore closed");
        // The permit travels with the checked-out connection; release()
        // or a factory failure puts it back.
        permit.forget();

        if let Some(conn) = self.idle.lock().await.pop_front() {
            return Ok(conn);
        }
        match (self.factory)().await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                self.capacity.add_permits(1);
                Err(err)
            }
        }
    }

    /// Return a connection to the pool, waking the oldest waiter.
    pub async fn release(&self, conn: C) {
        self.idle.lock().await.push_back(conn);
        self.capacity.add_permits(1);
    }

    /// Close every idle connection. Checked-out connections are the
    /// borrowers' responsibility.
    pub async fn close_all(&self) {
        let mut idle = self.idle.lock().await;
        while let Some(mut conn) = idle.pop_front() {
            conn.close().await;
        }
    }

    /// Number of idle connections currently pooled.
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }
}

type WorkerHandler<T> = Arc<dyn Fn(T) -> BoxFut<'static, ()> + Send + Sync>;

/// Fixed-size pool of workers draining a shared queue.
///
/// [`WorkerPool::start`] spawns the workers; [`WorkerPool::submit`]
/// enqueues an item; [`WorkerPool::stop`] closes the queue, lets the
/// workers drain it, and joins them.
pub struct WorkerPool<T: Send + 'static> {
    num_workers: usize,
    handler: WorkerHandler<T>,
    tx: Option<mpsc::UnboundedSender<T>>,
    workers: JoinSet<()>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create a pool of `num_workers` workers running `handler` per item.
    pub fn new<F, Fut>(num_workers: usize, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            num_workers,
            handler: Arc::new(move |item| Box::pin(handler(item))),
            tx: None,
            workers: JoinSet::new(),
        }
    }

    /// Spawn the workers. Idempotent while running.
    pub fn start(&mut self) {
        if self.tx.is_some() {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel::<T>();
        let rx = Arc::new(AsyncMutex::new(rx));
        for _ in 0..self.num_workers {
            let rx = Arc::clone(&rx);
            let handler = Arc::clone(&self.handler);
            self.workers.spawn(async move {
                loop {
                    let item = { rx.lock().await.recv().await };
                    match item {
                        Some(item) => handler(item).await,
                        None => break,
                    }
                }
            });
        }
        self.tx = Some(tx);
    }

    /// Enqueue an item for the workers.
    pub fn submit(&self, item: T) -> Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(item)
                .map_err(|_| PynectorError::Other("worker pool is stopped".into())),
            None => Err(PynectorError::Other("worker pool not started".into())),
        }
    }

    /// Close the queue, wait for the workers to drain it, and join them.
    pub async fn stop(&mut self) {
        self.tx = None;
        while self.workers.join_next().await.is_some() {}
    }
}

/// Run `f` over every item with bounded parallelism, preserving order.
///
/// One child task is spawned per item inside a task group; when
/// `max_concurrency` is set, a [`CapacityLimiter`] bounds in-flight work.
/// The first child error cancels the group and propagates.
pub async fn parallel_requests<T, R, F, Fut>(
    items: Vec<T>,
    f: F,
    max_concurrency: Option<usize>,
) -> Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let count = items.len();
    let results: Arc<std::sync::Mutex<Vec<Option<R>>>> = Arc::new(std::sync::Mutex::new(
        (0..count).map(|_| None).collect(),
    ));
    let limiter = max_concurrency.map(CapacityLimiter::new);

    let mut group = TaskGroup::new();
    for (index, item) in items.into_iter().enumerate() {
        let f = f.clone();
        let results = Arc::clone(&results);
        let limiter = limiter.clone();
        group.start_soon(async move {
            let _token = match &limiter {
                Some(limiter) => Some(limiter.acquire().await),
                None => None,
            };
            let value = f(item).await?;
            results.lock().expect("result slice poisoned")[index] = Some(value);
            Ok(())
        });
    }
    group.wait().await?;

    let slots = Arc::try_unwrap(results)
        .map_err(|_| PynectorError::Other("result slice still shared after join".into()))?
        .into_inner()
        .expect("result slice poisoned");
    slots
        .into_iter()
        .map(|slot| slot.ok_or_else(|| PynectorError::Other("unfilled result slot".into())))
        .collect()
}

/// Run `f` attempts under a per-attempt deadline, retrying with backoff.
///
/// Each attempt runs inside [`fail_after`]; on timeout or error the next
/// attempt starts after `100ms * 2^n`. At most `max_retries` attempts are
/// made (`0` is treated as one attempt); the last error propagates.
pub async fn retry_with_timeout<T, F, Fut>(
    mut f: F,
    max_retries: u32,
    timeout: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = max_retries.max(1);
    let mut last_error = PynectorError::Timeout(timeout.as_secs_f64());

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = Duration::from_millis(100) * 2u32.pow(attempt - 1);
            tokio::time::sleep(delay).await;
        }
        match fail_after(timeout, f()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => last_error = err,
            Err(timeout_err) => last_error = timeout_err,
        }
    }
    Err(last_error)
}
