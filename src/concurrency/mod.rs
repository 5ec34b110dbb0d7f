//! Structured concurrency: primitives, cancel scopes, task groups, and
//! reusable patterns.
//!
//! Cancellation is cooperative and scope-based. A [`CancelScope`] races a
//! body against its deadline or a manual cancel; a [`TaskGroup`] extends a
//! scope with child tasks and joins them on exit. The resource primitives
//! ([`Lock`], [`Semaphore`], [`CapacityLimiter`], [`Event`], [`Condition`])
//! release through RAII guards on every exit path, including cancellation.

pub mod cancel;
pub mod patterns;
pub mod primitives;
pub mod task;

pub use cancel::{fail_after, move_on_after, shield, CancelScope};
pub use patterns::{
    parallel_requests, retry_with_timeout, ConnectionPool, PoolableConnection, WorkerPool,
};
pub use primitives::{
    CapacityLimiter, CapacityToken, Condition, ConditionGuard, Event, Lock, LockGuard, Semaphore,
    SemaphoreGuard,
};
pub use task::TaskGroup;
