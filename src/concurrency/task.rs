//! Task groups: a cancel scope that tracks spawned children.
//!
//! A group accepts fire-and-forget child tasks via [`TaskGroup::start_soon`]
//! and joins them all in [`TaskGroup::wait`]. The first child failure that
//! is not a cancellation cancels the group's scope; the remaining children
//! are still joined, and that first failure is surfaced.

use std::future::Future;

use tokio::task::JoinSet;

use crate::concurrency::cancel::CancelScope;
use crate::error::{PynectorError, Result};

/// A cancel scope augmented with a set of child tasks.
///
/// Children report results through shared state (the dispatcher uses an
/// index-addressed result slice); the group itself only tracks success,
/// failure, and cancellation.
///
/// # Example
///
/// ```
/// use pynector::concurrency::TaskGroup;
///
/// # tokio_test::block_on(async {
/// let mut group = TaskGroup::new();
/// for _ in 0..3 {
///     group.start_soon(async { Ok(()) });
/// }
/// group.wait().await.unwrap();
/// # });
/// ```
pub struct TaskGroup {
    scope: CancelScope,
    tasks: JoinSet<Result<()>>,
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGroup {
    /// Create a group with a fresh scope.
    pub fn new() -> Self {
        Self::with_scope(CancelScope::new())
    }

    /// Create a group running under an existing scope. Cancelling that
    /// scope (manually or by deadline) cancels every child.
    pub fn with_scope(scope: CancelScope) -> Self {
        Self {
            scope,
            tasks: JoinSet::new(),
        }
    }

    /// The group's cancel scope.
    pub fn scope(&self) -> &CancelScope {
        &self.scope
    }

    /// Number of children spawned and not yet joined.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the group has no outstanding children.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawn a child task. Fire-and-forget: the result surfaces at
    /// [`TaskGroup::wait`].
    ///
    /// The child body runs under the group scope; when the scope cancels,
    /// the body is dropped at its next suspension point and the child
    /// resolves to `Err(Cancelled)`.
    pub fn start_soon<F>(&mut self, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let scope = self.scope.clone();
        self.tasks.spawn(async move {
            match scope.run(fut).await {
                Some(result) => result,
                None => Err(PynectorError::Cancelled),
            }
        });
    }

    /// Join every child.
    ///
    /// Cancellations (`Err(Cancelled)`) are not failures. The first other
    /// error cancels the scope so siblings stop early, and is returned
    /// after all children have terminated.
    pub async fn wait(mut self) -> Result<()> {
        let mut first_error: Option<PynectorError> = None;
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(PynectorError::Cancelled)) => {}
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                        self.scope.cancel();
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error =
                            Some(PynectorError::Other(format!("task panicked: {join_err}")));
                        self.scope.cancel();
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// Dropping the group aborts outstanding children (JoinSet semantics), which
// is what collective cancellation needs when an outer deadline drops the
// in-flight `wait` future.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::cancel::move_on_after;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_children_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut group = TaskGroup::new();
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            group.start_soon(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        group.wait().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_first_error_cancels_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut group = TaskGroup::new();

        group.start_soon(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(PynectorError::Other("boom".into()))
        });
        for _ in 0..3 {
            let finished = Arc::clone(&finished);
            group.start_soon(async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let err = group.wait().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        // The slow siblings were cancelled, not completed.
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_a_failure() {
        let mut group = TaskGroup::new();
        let scope = group.scope().clone();
        group.start_soon(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        scope.cancel();
        // A group whose children were only cancelled reports success.
        group.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_outer_deadline_drops_group() {
        let finished = Arc::new(AtomicUsize::new(0));
        let scope = CancelScope::with_timeout(Duration::from_millis(20));
        let mut group = TaskGroup::with_scope(scope.clone());
        for _ in 0..3 {
            let finished = Arc::clone(&finished);
            group.start_soon(async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        let out = scope.run(group.wait()).await;
        assert!(out.is_none());
        assert!(scope.cancel_called());
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_soon_from_spawned_task() {
        // Children can hand work back through shared state while the group
        // is still open; spawning from inside a child goes through the
        // same scope clone.
        let counter = Arc::new(AtomicUsize::new(0));
        let mut group = TaskGroup::new();
        let scope = group.scope().clone();

        let inner_counter = Arc::clone(&counter);
        let inner_scope = scope.clone();
        group.start_soon(async move {
            // Simulate a child adding follow-up work under the same scope.
            let followup = inner_scope.run(async {
                inner_counter.fetch_add(1, Ordering::SeqCst);
            });
            followup.await;
            Ok(())
        });

        group.wait().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_group_waits_immediately() {
        let group = TaskGroup::new();
        assert!(group.is_empty());
        group.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_inside_move_on_after() {
        let mut group = TaskGroup::new();
        group.start_soon(async { Ok(()) });
        let out = move_on_after(Duration::from_secs(5), group.wait()).await;
        assert!(matches!(out, Some(Ok(()))));
    }
}
