//! Redis infrastructure for the helpdesk pipeline.
//!
//! - [`RedisTaskQueue`]: the durable ticket-id queue, with per-consumer
//!   in-flight lists for at-least-once delivery
//! - [`CachedUserDirectory`]: read-through user cache
//!
//! # Example
//!
//! ```no_run
//! use helpdesk_redis::{DEFAULT_QUEUE_NAME, RedisTaskQueue};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RedisTaskQueue::new("redis://127.0.0.1:6379", DEFAULT_QUEUE_NAME, "worker-0").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod queue;

pub use cache::{CacheError, CachedUserDirectory};
pub use queue::{DEFAULT_QUEUE_NAME, RedisTaskQueue};
