//! Durable job queue with a status state machine and bounded retries.

pub mod job;
pub mod store;

pub use job::{ContentSource, JobPayload, JobStatus, QueueJob};
pub use store::{JobQueue, PgJobQueue};
