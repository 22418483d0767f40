//! Background Tasks Module
//!
//! Deferred execution for work the caller must not wait on, such as
//! stale-while-revalidate refreshes and fire-and-forget cache writes.

mod background;

pub use background::{BackgroundTasks, WaitUntil};
