//! The recurring job pipeline: lock manager, job registry, scheduler core,
//! analysis runner and the job handlers tying them to webhook delivery.

pub mod analysis;
pub mod config;
pub mod handlers;
pub mod lock;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod scheduler;

pub use config::{ConfigError, WorkerConfig};
pub use lock::{LockHandle, LockManager};
pub use pipeline::Pipeline;
pub use queue::{JobQueue, QueueError};
pub use registry::{JobError, JobHandler, JobRegistry};
pub use scheduler::{RunReport, Scheduler, SchedulerConfig, SchedulerError};
