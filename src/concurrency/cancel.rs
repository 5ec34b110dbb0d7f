//! Cancel scopes and timeout helpers.
//!
//! A [`CancelScope`] carries an optional deadline and a manual cancel flag.
//! Running a future under a scope races it against cancellation: the body
//! either completes, or the scope absorbs the cancellation and the caller
//! decides what that means: [`move_on_after`] swallows it, [`fail_after`]
//! turns it into a timeout error.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::time::Instant;

use crate::concurrency::primitives::Event;
use crate::error::{PynectorError, Result};

struct ScopeInner {
    deadline: Option<Instant>,
    cancel_called: AtomicBool,
    cancelled_caught: AtomicBool,
    cancel_event: Event,
    children: Mutex<Vec<Weak<ScopeInner>>>,
}

impl ScopeInner {
    fn cancel(&self) {
        if !self.cancel_called.swap(true, Ordering::SeqCst) {
            self.cancel_event.set();
            let children = self.children.lock().expect("scope children poisoned");
            for child in children.iter() {
                if let Some(child) = child.upgrade() {
                    child.cancel();
                }
            }
        }
    }
}

/// A cancellable region with an optional deadline.
///
/// Scopes nest in a tree: cancelling a scope cancels all descendants
/// created via [`CancelScope::child`]. Cloning a scope yields another
/// handle to the same region.
///
/// # Example
///
/// ```
/// use pynector::concurrency::CancelScope;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let scope = CancelScope::with_timeout(Duration::from_millis(10));
/// let out = scope
///     .run(async { tokio::time::sleep(Duration::from_secs(5)).await })
///     .await;
/// assert!(out.is_none());
/// assert!(scope.cancel_called());
/// assert!(scope.cancelled_caught());
/// # });
/// ```
#[derive(Clone)]
pub struct CancelScope {
    inner: Arc<ScopeInner>,
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelScope {
    fn from_deadline(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                deadline,
                cancel_called: AtomicBool::new(false),
                cancelled_caught: AtomicBool::new(false),
                cancel_event: Event::new(),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a scope with no deadline.
    pub fn new() -> Self {
        Self::from_deadline(None)
    }

    /// Create a scope whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::from_deadline(Some(Instant::now() + timeout))
    }

    /// Create a scope with an absolute deadline.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::from_deadline(Some(deadline))
    }

    /// Create a child scope. Cancelling `self` cancels the child; the
    /// child may also be cancelled (or carry a deadline) independently.
    pub fn child(&self) -> CancelScope {
        self.child_with_deadline(None)
    }

    /// Create a child scope with its own deadline `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> CancelScope {
        self.child_with_deadline(Some(Instant::now() + timeout))
    }

    fn child_with_deadline(&self, deadline: Option<Instant>) -> CancelScope {
        let child = Self::from_deadline(deadline);
        self.inner
            .children
            .lock()
            .expect("scope children poisoned")
            .push(Arc::downgrade(&child.inner));
        if self.cancel_called() {
            child.inner.cancel();
        }
        child
    }

    /// Request cancellation of this scope and all descendants.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Whether `cancel` was called or the deadline fired.
    pub fn cancel_called(&self) -> bool {
        self.inner.cancel_called.load(Ordering::SeqCst)
    }

    /// Whether this scope absorbed a cancellation while running a body.
    pub fn cancelled_caught(&self) -> bool {
        self.inner.cancelled_caught.load(Ordering::SeqCst)
    }

    /// The scope's deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Resolves once this scope is cancelled, by flag or by deadline.
    /// Never resolves for an undeadlined, uncancelled scope.
    pub async fn cancelled(&self) {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.cancel_event.wait() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        self.inner.cancel();
                    }
                }
            }
            None => self.inner.cancel_event.wait().await,
        }
    }

    /// Run `fut` under this scope.
    ///
    /// Returns `Some(output)` when the body completes, `None` when the
    /// scope absorbed a cancellation first (`cancelled_caught` becomes
    /// true). A body that completes in the same poll as the cancellation
    /// wins the race, so an error exiting the body supersedes the
    /// cancellation.
    pub async fn run<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            out = fut => Some(out),
            _ = self.cancelled() => {
                self.inner.cancelled_caught.store(true, Ordering::SeqCst);
                None
            }
        }
    }
}

impl std::fmt::Debug for CancelScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelScope")
            .field("deadline", &self.inner.deadline)
            .field("cancel_called", &self.cancel_called())
            .field("cancelled_caught", &self.cancelled_caught())
            .finish()
    }
}

/// Run `fut` with a deadline, swallowing the cancellation.
///
/// Returns `None` when the deadline fired; code after the call continues
/// normally.
pub async fn move_on_after<F>(timeout: Duration, fut: F) -> Option<F::Output>
where
    F: Future,
{
    CancelScope::with_timeout(timeout).run(fut).await
}

/// Run `fut` with a deadline, surfacing [`PynectorError::Timeout`] when it
/// fires.
pub async fn fail_after<F, T>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    match move_on_after(timeout, fut).await {
        Some(out) => Ok(out),
        None => Err(PynectorError::Timeout(timeout.as_secs_f64())),
    }
}

/// Run `fut` shielded from outside cancellation.
///
/// The body is spawned onto the runtime, so dropping the `shield` future
/// (the outer scope cancelling) does not cancel the body; it runs to
/// completion. Any pending outer cancellation takes effect afterwards.
pub async fn shield<F>(fut: F) -> F::Output
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(out) => out,
        Err(err) => {
            if err.is_panic() {
                std::panic::resume_unwind(err.into_panic());
            }
            unreachable!("shielded task cannot be aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_scope_creation_flags_clear() {
        let scope = CancelScope::new();
        assert!(!scope.cancel_called());
        assert!(!scope.cancelled_caught());
        assert!(scope.deadline().is_none());
    }

    #[tokio::test]
    async fn test_manual_cancel_interrupts_body() {
        let scope = CancelScope::new();
        let handle = {
            let scope = scope.clone();
            tokio::spawn(async move {
                scope
                    .run(async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        scope.cancel();
        let out = handle.await.unwrap();
        assert!(out.is_none());
        assert!(scope.cancel_called());
        assert!(scope.cancelled_caught());
    }

    #[tokio::test]
    async fn test_deadline_sets_cancel_called() {
        let scope = CancelScope::with_timeout(Duration::from_millis(10));
        let out = scope
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
            })
            .await;
        assert!(out.is_none());
        assert!(scope.cancel_called());
        assert!(scope.cancelled_caught());
    }

    #[tokio::test]
    async fn test_body_completion_wins() {
        let scope = CancelScope::with_timeout(Duration::from_secs(30));
        let out = scope.run(async { 7 }).await;
        assert_eq!(out, Some(7));
        assert!(!scope.cancel_called());
        assert!(!scope.cancelled_caught());
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_children() {
        let parent = CancelScope::new();
        let child = parent.child();
        let grandchild = child.child();
        parent.cancel();
        assert!(child.cancel_called());
        assert!(grandchild.cancel_called());
    }

    #[tokio::test]
    async fn test_child_of_cancelled_parent_starts_cancelled() {
        let parent = CancelScope::new();
        parent.cancel();
        let child = parent.child();
        assert!(child.cancel_called());
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_touch_parent() {
        let parent = CancelScope::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.cancel_called());
    }

    #[tokio::test]
    async fn test_move_on_after_swallows() {
        let out = move_on_after(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            "done"
        })
        .await;
        assert!(out.is_none());
        // Execution continues normally after the scope.
    }

    #[tokio::test]
    async fn test_move_on_after_fast_body() {
        let out = move_on_after(Duration::from_secs(30), async { "done" }).await;
        assert_eq!(out, Some("done"));
    }

    #[tokio::test]
    async fn test_fail_after_raises_timeout() {
        let result: Result<()> = fail_after(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .await;
        assert!(matches!(result, Err(PynectorError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_shield_survives_outer_deadline() {
        let completed = Arc::new(AtomicUsize::new(0));
        let completed_inner = Arc::clone(&completed);
        let out = move_on_after(Duration::from_millis(20), async move {
            shield(async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                completed_inner.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        })
        .await;
        // The outer scope fired before shield finished awaiting.
        assert!(out.is_none());
        tokio::time::sleep(Duration::from_millis(80)).await;
        // But the shielded body still ran to completion.
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }
}
