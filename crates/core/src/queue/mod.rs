//! Durable at-least-once work queue carrying job ids from intake to workers.

mod config;
mod sqlite_queue;
mod types;

pub use config::QueueConfig;
pub use sqlite_queue::SqliteWorkQueue;
pub use types::{Lease, QueueError, WorkQueue};
