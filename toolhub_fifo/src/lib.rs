//! # FIFO Admission Control
//!
//! Fair concurrency limiting for the tool hub. Two layers:
//!
//! * [`Semaphore`]: a counting semaphore that grants permits strictly in
//!   arrival order. Unlike a plain counting semaphore, a released permit is
//!   transferred directly to the head waiter, so a burst of late arrivals can
//!   never starve an early one.
//! * [`GroupLimiter`]: a registry mapping a group name to a lazily-created
//!   `Semaphore`, used to bound simultaneous operations per logical group
//!   (for example, serializing access to a single shared evaluation channel).
//!
//! Cancellation follows tokio convention: dropping an in-flight `acquire`
//! future (via `tokio::time::timeout`, `select!`, or task abort) withdraws
//! the waiter from the queue without disturbing its neighbors.

pub mod group_limiter;
pub mod semaphore;

pub use group_limiter::GroupLimiter;
pub use semaphore::Semaphore;
