//! Virtual user profiles and the per-user task loop.

use crate::client::UserClient;
use crate::error::{SwarmError, SwarmResult};
use crate::selector::TaskSelector;
use crate::task::{Task, TaskDef};
use crate::wait::WaitTime;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Declares how one class of virtual users behaves.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub name: String,
    /// Relative share of spawned users that get this profile.
    pub weight: u32,
    /// Target host, overriding the run-wide host.
    pub host: Option<String>,
    pub wait_time: WaitTime,
    pub tasks: Vec<TaskDef>,
}

impl UserProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight: 1,
            host: None,
            wait_time: WaitTime::default(),
            tasks: Vec::new(),
        }
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn wait_time(mut self, wait_time: WaitTime) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn task(mut self, task: TaskDef) -> Self {
        self.tasks.push(task);
        self
    }

    /// Look up a registered task by name.
    pub fn find_task(&self, name: &str) -> Option<&TaskDef> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn validate(&self) -> SwarmResult<()> {
        if self.name.is_empty() {
            return Err(SwarmError::config("user profile name must not be empty"));
        }
        self.wait_time.validate()?;
        self.selector().map(|_| ())
    }

    pub fn selector(&self) -> SwarmResult<TaskSelector> {
        let weights: Vec<u32> = self.tasks.iter().map(|t| t.weight).collect();
        TaskSelector::new(&weights).map_err(|e| {
            SwarmError::config(format!("user profile '{}': {}", self.name, e))
        })
    }
}

/// Mutable state owned by one running virtual user, handed to each task.
pub struct UserSession {
    pub user_id: usize,
    pub profile: String,
    pub client: UserClient,
    pub rng: StdRng,
}

impl UserSession {
    pub fn new(user_id: usize, profile: impl Into<String>, client: UserClient, rng: StdRng) -> Self {
        Self {
            user_id,
            profile: profile.into(),
            client,
            rng,
        }
    }
}

/// Drives one user's wait-then-task loop.
pub struct VirtualUser {
    profile: Arc<UserProfile>,
    selector: Arc<TaskSelector>,
    iterations: Option<u64>,
}

impl VirtualUser {
    pub fn new(profile: Arc<UserProfile>, selector: Arc<TaskSelector>, iterations: Option<u64>) -> Self {
        Self {
            profile,
            selector,
            iterations,
        }
    }

    /// Run until stopped or the iteration limit is hit. Returns tasks executed.
    ///
    /// The stop signal is observed between tasks and while waiting; a task
    /// already in flight runs to completion.
    pub async fn run(self, mut session: UserSession, mut stop: watch::Receiver<bool>) -> u64 {
        let mut executed = 0u64;
        debug!(user_id = session.user_id, profile = %self.profile.name, "User started");

        loop {
            if *stop.borrow() {
                break;
            }
            if self.iterations.is_some_and(|max| executed >= max) {
                break;
            }

            let def = &self.profile.tasks[self.selector.select(&mut session.rng)];
            let started = Instant::now();
            if let Err(e) = def.task.run(&mut session).await {
                warn!(
                    user_id = session.user_id,
                    task = %def.name,
                    error = %e,
                    "Task failed"
                );
                session
                    .client
                    .stats()
                    .record_task_error(&def.name, &e.to_string())
                    .await;
            }
            executed += 1;

            if self.iterations.is_some_and(|max| executed >= max) {
                break;
            }

            let wait = self.profile.wait_time.next(&mut session.rng, started.elapsed());
            if wait.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = sleep(wait) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        debug!(user_id = session.user_id, executed, "User stopped");
        executed
    }
}
