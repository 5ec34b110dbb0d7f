//! Cooperative resource primitives with fair wakeup ordering.
//!
//! Lock, Semaphore, CapacityLimiter, Event, and Condition, built on
//! `tokio::sync`. Waiters are served FIFO. Every primitive is acquired
//! through an RAII guard, so a guarded region releases on all exit paths
//! including cancellation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{
    watch, Mutex as AsyncMutex, Notify, OwnedMutexGuard, OwnedSemaphorePermit,
    Semaphore as TokioSemaphore,
};

/// Exclusive async lock.
///
/// `acquire` suspends until the lock is free. The returned guard releases
/// on drop, which is synchronous.
///
/// # Example
///
/// ```
/// use pynector::concurrency::Lock;
///
/// # tokio_test::block_on(async {
/// let lock = Lock::new();
/// let guard = lock.acquire().await;
/// drop(guard); // release
/// # });
/// ```
#[derive(Clone, Default)]
pub struct Lock {
    inner: Arc<AsyncMutex<()>>,
}

/// Guard holding a [`Lock`]; dropping it releases the lock.
pub struct LockGuard {
    _guard: OwnedMutexGuard<()>,
}

impl Lock {
    /// Create an unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock, suspending until it is free.
    pub async fn acquire(&self) -> LockGuard {
        LockGuard {
            _guard: Arc::clone(&self.inner).lock_owned().await,
        }
    }

    /// Acquire the lock if it is free right now.
    pub fn try_acquire(&self) -> Option<LockGuard> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(|guard| LockGuard { _guard: guard })
    }
}

/// Counting semaphore.
///
/// `acquire` decrements, suspending at zero; dropping the guard increments
/// and wakes the longest-waiting acquirer.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<TokioSemaphore>,
}

/// Guard holding one semaphore permit.
pub struct SemaphoreGuard {
    _permit: OwnedSemaphorePermit,
}

impl Semaphore {
    /// Create a semaphore with `permits` initial permits.
    pub fn new(permits: usize) -> Self {
        Self {
            inner: Arc::new(TokioSemaphore::new(permits)),
        }
    }

    /// Acquire one permit, suspending until one is available.
    pub async fn acquire(&self) -> SemaphoreGuard {
        let permit = Arc::clone(&self.inner)
            .acquire_owned()
            .await
            .expect("semaphore closed");
        SemaphoreGuard { _permit: permit }
    }

    /// Number of permits currently available.
    pub fn available_permits(&self) -> usize {
        self.inner.available_permits()
    }
}

/// Semaphore with an accounting view, used to cap concurrent in-flight work.
///
/// Holding more than one token from the same task is a logic error; the
/// limiter does not police task identity.
///
/// # Example
///
/// ```
/// use pynector::concurrency::CapacityLimiter;
///
/// # tokio_test::block_on(async {
/// let limiter = CapacityLimiter::new(3);
/// let token = limiter.acquire().await;
/// assert_eq!(limiter.borrowed_tokens(), 1);
/// assert_eq!(limiter.available_tokens(), 2);
/// drop(token);
/// assert_eq!(limiter.borrowed_tokens(), 0);
/// # });
/// ```
#[derive(Clone)]
pub struct CapacityLimiter {
    inner: Arc<TokioSemaphore>,
    total: usize,
    borrowed: Arc<AtomicUsize>,
}

/// Token borrowed from a [`CapacityLimiter`]; dropping it returns the token.
pub struct CapacityToken {
    _permit: OwnedSemaphorePermit,
    borrowed: Arc<AtomicUsize>,
}

impl Drop for CapacityToken {
    fn drop(&mut self) {
        self.borrowed.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CapacityLimiter {
    /// Create a limiter with `total_tokens` tokens.
    pub fn new(total_tokens: usize) -> Self {
        Self {
            inner: Arc::new(TokioSemaphore::new(total_tokens)),
            total: total_tokens,
            borrowed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Borrow one token, suspending until one is available.
    pub async fn acquire(&self) -> CapacityToken {
        let permit = Arc::clone(&self.inner)
            .acquire_owned()
            .await
            .expect("capacity limiter closed");
        self.borrowed.fetch_add(1, Ordering::SeqCst);
        CapacityToken {
            _permit: permit,
            borrowed: Arc::clone(&self.borrowed),
        }
    }

    /// Total number of tokens.
    pub fn total_tokens(&self) -> usize {
        self.total
    }

    /// Tokens currently borrowed.
    pub fn borrowed_tokens(&self) -> usize {
        self.borrowed.load(Ordering::SeqCst)
    }

    /// Tokens currently available.
    pub fn available_tokens(&self) -> usize {
        self.total - self.borrowed_tokens()
    }
}

/// One-shot event.
///
/// `set` wakes all current and future waiters; once set, the event never
/// returns to unset.
#[derive(Clone)]
pub struct Event {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    /// Create an unset event.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the event, waking every waiter.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the event has been set.
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Suspend until the event is set. Returns immediately if already set.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Lock plus wait-set.
///
/// `wait` atomically releases the lock and suspends; `notify` moves up to
/// `n` waiters (FIFO) to the runnable set, `notify_all` moves all of them.
/// A waiter resumes by reacquiring the lock.
pub struct Condition {
    lock: Lock,
    waiters: std::sync::Mutex<VecDeque<Arc<Notify>>>,
}

/// Guard holding a [`Condition`]'s lock.
pub struct ConditionGuard {
    _guard: LockGuard,
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

impl Condition {
    /// Create a condition with a fresh internal lock.
    pub fn new() -> Self {
        Self {
            lock: Lock::new(),
            waiters: std::sync::Mutex::new(VecDeque::new()),
        }
    }

    /// Acquire the condition's lock.
    pub async fn lock(&self) -> ConditionGuard {
        ConditionGuard {
            _guard: self.lock.acquire().await,
        }
    }

    /// Release the lock, suspend until notified, then reacquire.
    ///
    /// The waiter is registered before the lock is released, so a
    /// notification between release and suspension is not lost.
    pub async fn wait(&self, guard: ConditionGuard) -> ConditionGuard {
        let waiter = Arc::new(Notify::new());
        self.waiters
            .lock()
            .expect("condition wait-set poisoned")
            .push_back(Arc::clone(&waiter));
        drop(guard);
        waiter.notified().await;
        self.lock().await
    }

    /// Wake up to `n` waiters, oldest first.
    pub fn notify(&self, n: usize) {
        let mut waiters = self.waiters.lock().expect("condition wait-set poisoned");
        for _ in 0..n {
            match waiters.pop_front() {
                Some(waiter) => waiter.notify_one(),
                None => break,
            }
        }
    }

    /// Wake every current waiter.
    pub fn notify_all(&self) {
        let mut waiters = self.waiters.lock().expect("condition wait-set poisoned");
        while let Some(waiter) = waiters.pop_front() {
            waiter.notify_one();
        }
    }

    /// Number of tasks currently in the wait-set.
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().expect("condition wait-set poisoned").len()
    }
}
