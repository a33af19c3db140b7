//! Concurrent synthetic-user load generation engine.
//!
//! A run is described by one or more [`UserProfile`]s (a wait-time policy and
//! a weighted set of tasks) and a [`RunConfig`]. The [`Scheduler`] ramps
//! virtual users up and down, each user loops over task-then-wait, and every
//! request lands in a shared [`StatsAggregator`].

pub mod client;
pub mod error;
pub mod request_log;
pub mod scheduler;
pub mod selector;
pub mod stats;
pub mod task;
pub mod user;
pub mod wait;

pub use client::{RequestOutcome, UserClient};
pub use error::{SwarmError, SwarmResult};
pub use request_log::RequestLogSink;
pub use scheduler::{RunConfig, Scheduler, Stage, UserDispatcher};
pub use selector::TaskSelector;
pub use stats::{EndpointReport, ErrorReport, StatsAggregator, StatsSnapshot};
pub use task::{RequestSpec, Task, TaskDef};
pub use user::{UserProfile, UserSession, VirtualUser};
pub use wait::WaitTime;
