//! Spawns, ramps and stops virtual users.

use crate::client::{build_http_client, UserClient};
use crate::error::{SwarmError, SwarmResult};
use crate::request_log::RequestLogSink;
use crate::selector::TaskSelector;
use crate::stats::{StatsAggregator, StatsSnapshot};
use crate::user::{UserProfile, UserSession, VirtualUser};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

/// One segment of a load shape: move to `users` at `spawn_rate`, then hold.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Time budget for the stage, ramp included. `None` holds until shutdown.
    pub duration: Option<Duration>,
    pub users: usize,
    pub spawn_rate: f64,
}

/// Run-wide settings.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub host: String,
    pub users: usize,
    /// Users started (or stopped) per second.
    pub spawn_rate: f64,
    /// `None` runs until every user finishes its iterations or shutdown arrives.
    pub run_time: Option<Duration>,
    /// When non-empty, replaces `users` / `spawn_rate` / `run_time`.
    pub stages: Vec<Stage>,
    /// Tasks each user executes before exiting on its own.
    pub iterations: Option<u64>,
    /// Grace period for in-flight tasks after stop.
    pub stop_timeout: Duration,
    pub reset_stats_after_ramp: bool,
    pub seed: Option<u64>,
    pub request_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:3000".to_string(),
            users: 1,
            spawn_rate: 1.0,
            run_time: None,
            stages: Vec::new(),
            iterations: None,
            stop_timeout: Duration::ZERO,
            reset_stats_after_ramp: false,
            seed: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> SwarmResult<()> {
        if !(self.host.starts_with("http://") || self.host.starts_with("https://")) {
            return Err(SwarmError::config(format!(
                "host must be an http(s) URL, got '{}'",
                self.host
            )));
        }
        if self.stages.is_empty() {
            if self.users == 0 {
                return Err(SwarmError::config("users must be > 0"));
            }
            check_spawn_rate(self.spawn_rate)?;
        }
        for (i, stage) in self.stages.iter().enumerate() {
            check_spawn_rate(stage.spawn_rate)
                .map_err(|e| SwarmError::config(format!("stage {}: {}", i, e)))?;
        }
        if self.request_timeout.is_zero() {
            return Err(SwarmError::config("request_timeout must be > 0"));
        }
        Ok(())
    }

    /// The stages this run will walk through.
    pub fn plan(&self) -> Vec<Stage> {
        if !self.stages.is_empty() {
            return self.stages.clone();
        }
        vec![Stage {
            duration: self.run_time,
            users: self.users,
            spawn_rate: self.spawn_rate,
        }]
    }

    /// Highest concurrent user count the plan reaches.
    pub fn peak_users(&self) -> usize {
        self.plan().iter().map(|s| s.users).max().unwrap_or(0)
    }
}

fn check_spawn_rate(rate: f64) -> SwarmResult<()> {
    spawn_interval(rate).map(|_| ())
}

/// Time between two spawns (or stops) at `rate` users per second.
fn spawn_interval(rate: f64) -> SwarmResult<Duration> {
    if !(rate.is_finite() && rate > 0.0) {
        return Err(SwarmError::config(format!("spawn_rate must be > 0, got {}", rate)));
    }
    Duration::try_from_secs_f64(1.0 / rate).map_err(|_| {
        SwarmError::config(format!("spawn_rate {} is too small to schedule", rate))
    })
}

/// Assigns each spawned user to a profile, keeping the mix proportional to
/// profile weights at every point of the ramp.
///
/// After `n` assignments every profile holds within one user of its exact
/// share `n * w / sum(w)`. Only profiles still under their upper quota are
/// eligible, and among those the largest `w / (assigned + 1)` wins.
#[derive(Debug, Clone)]
pub struct UserDispatcher {
    weights: Vec<u64>,
    total: u64,
    assigned: Vec<u64>,
}

impl UserDispatcher {
    pub fn new(weights: &[u32]) -> SwarmResult<Self> {
        if weights.iter().all(|&w| w == 0) {
            return Err(SwarmError::config(
                "at least one user profile must have a weight greater than zero",
            ));
        }
        let weights: Vec<u64> = weights.iter().map(|&w| w as u64).collect();
        Ok(Self {
            total: weights.iter().sum(),
            assigned: vec![0; weights.len()],
            weights,
        })
    }

    /// Profile index for the next spawned user.
    pub fn next(&mut self) -> usize {
        let n = self.assigned.iter().sum::<u64>() + 1;
        let mut best: Option<usize> = None;
        for (i, &w) in self.weights.iter().enumerate() {
            // Eligible while assigned < n * w / total, i.e. one more stays within the upper quota
            if w == 0 || self.assigned[i] * self.total >= n * w {
                continue;
            }
            best = match best {
                Some(b) if w * (self.assigned[b] + 1) <= self.weights[b] * (self.assigned[i] + 1) => {
                    Some(b)
                }
                _ => Some(i),
            };
        }
        // Some profile is always below quota since the shares sum to n
        let idx = best.unwrap_or(0);
        self.assigned[idx] += 1;
        idx
    }

    /// Return a slot when a user of `idx` is stopped. Releasing in reverse
    /// spawn order restores the exact earlier state.
    pub fn release(&mut self, idx: usize) {
        if let Some(n) = self.assigned.get_mut(idx) {
            *n = n.saturating_sub(1);
        }
    }

    pub fn assigned(&self) -> &[u64] {
        &self.assigned
    }
}

struct ActiveUser {
    profile_idx: usize,
    stop: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

/// Live users plus the ones already told to stop.
struct Swarm {
    active: Vec<ActiveUser>,
    retiring: Vec<JoinHandle<u64>>,
    dispatcher: UserDispatcher,
    next_id: usize,
}

enum Pause {
    Elapsed,
    Deadline,
    Shutdown,
}

enum Hold {
    Deadline,
    Shutdown,
    AllFinished,
}

/// Orchestrates a full load test run.
pub struct Scheduler {
    config: RunConfig,
    profiles: Vec<Arc<UserProfile>>,
    selectors: Vec<Arc<TaskSelector>>,
    http: reqwest::Client,
    stats: Arc<StatsAggregator>,
    request_log: Option<RequestLogSink>,
}

impl Scheduler {
    pub fn new(config: RunConfig, profiles: Vec<UserProfile>) -> SwarmResult<Self> {
        config.validate()?;
        if profiles.is_empty() {
            return Err(SwarmError::config("at least one user profile is required"));
        }

        let mut selectors = Vec::with_capacity(profiles.len());
        for profile in &profiles {
            profile.validate()?;
            selectors.push(Arc::new(profile.selector()?));
        }
        // Reject all-zero profile weights up front
        UserDispatcher::new(&profiles.iter().map(|p| p.weight).collect::<Vec<_>>())?;

        let http = build_http_client(config.request_timeout, config.peak_users().max(1))?;

        Ok(Self {
            config,
            profiles: profiles.into_iter().map(Arc::new).collect(),
            selectors,
            http,
            stats: Arc::new(StatsAggregator::new()),
            request_log: None,
        })
    }

    pub fn with_request_log(mut self, sink: RequestLogSink) -> Self {
        self.request_log = Some(sink);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Shared stats, for live progress display while `run` is in progress.
    pub fn stats(&self) -> Arc<StatsAggregator> {
        self.stats.clone()
    }

    /// Execute the whole plan and return the final statistics.
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> SwarmResult<StatsSnapshot> {
        let mut shutdown = shutdown;
        let weights: Vec<u32> = self.profiles.iter().map(|p| p.weight).collect();
        let mut swarm = Swarm {
            active: Vec::new(),
            retiring: Vec::new(),
            dispatcher: UserDispatcher::new(&weights)?,
            next_id: 0,
        };
        let mut ramped = false;
        let plan = self.config.plan();
        let intervals = plan
            .iter()
            .map(|stage| spawn_interval(stage.spawn_rate))
            .collect::<SwarmResult<Vec<_>>>()?;

        self.stats.reset().await;
        info!(
            host = %self.config.host,
            profiles = self.profiles.len(),
            peak_users = self.config.peak_users(),
            "Starting load test"
        );

        'stages: for (i, stage) in plan.iter().enumerate() {
            let deadline = stage.duration.map(|d| Instant::now() + d);
            let interval = intervals[i];
            info!(
                stage = i,
                users = stage.users,
                spawn_rate = stage.spawn_rate,
                duration_secs = stage.duration.map(|d| d.as_secs_f64()),
                "Entering stage"
            );

            while swarm.active.len() != stage.users {
                if swarm.active.len() < stage.users {
                    self.spawn_user(&mut swarm);
                } else {
                    self.retire_user(&mut swarm);
                }
                self.stats.set_user_count(swarm.active.len());
                if swarm.active.len() == stage.users {
                    break;
                }

                match pause(interval, deadline, &mut shutdown).await {
                    Pause::Elapsed => {}
                    Pause::Deadline => continue 'stages,
                    Pause::Shutdown => break 'stages,
                }
            }

            if !ramped {
                ramped = true;
                info!(users = swarm.active.len(), "Ramp-up complete");
                if self.config.reset_stats_after_ramp {
                    self.stats.reset().await;
                    info!("Statistics reset after ramp-up");
                }
            }

            match self.hold(&swarm, deadline, &mut shutdown).await {
                Hold::Deadline => {}
                Hold::Shutdown => {
                    info!("Shutdown requested");
                    break 'stages;
                }
                Hold::AllFinished => {
                    info!("All users finished their iterations");
                    break 'stages;
                }
            }
        }

        self.stop_all(swarm).await;
        self.stats.set_user_count(0);

        if let Some(ref log) = self.request_log {
            log.flush().await?;
        }

        let snapshot = self.stats.snapshot().await;
        info!(
            requests = snapshot.total.requests,
            failures = snapshot.total.failures,
            duration_secs = snapshot.duration_secs,
            "Load test finished"
        );
        Ok(snapshot)
    }

    fn spawn_user(&self, swarm: &mut Swarm) {
        let profile_idx = swarm.dispatcher.next();
        let profile = self.profiles[profile_idx].clone();
        let selector = self.selectors[profile_idx].clone();
        let user_id = swarm.next_id;
        swarm.next_id += 1;

        let host = profile.host.clone().unwrap_or_else(|| self.config.host.clone());
        let client = UserClient::new(self.http.clone(), host, self.stats.clone())
            .with_request_log(self.request_log.clone());
        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(user_id as u64)),
            None => StdRng::from_entropy(),
        };
        let session = UserSession::new(user_id, profile.name.clone(), client, rng);

        let (stop, stop_rx) = watch::channel(false);
        debug!(user_id, profile = %profile.name, "Spawning user");
        let user = VirtualUser::new(profile, selector, self.config.iterations);
        let handle = tokio::spawn(user.run(session, stop_rx));

        swarm.active.push(ActiveUser {
            profile_idx,
            stop,
            handle,
        });
    }

    /// Stop the most recently spawned user.
    fn retire_user(&self, swarm: &mut Swarm) {
        if let Some(user) = swarm.active.pop() {
            swarm.dispatcher.release(user.profile_idx);
            let _ = user.stop.send(true);
            swarm.retiring.push(user.handle);
        }
    }

    async fn hold(
        &self,
        swarm: &Swarm,
        deadline: Option<Instant>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Hold {
        let mut tick = tokio::time::interval(Duration::from_millis(50));
        loop {
            tokio::select! {
                _ = wait_deadline(deadline) => return Hold::Deadline,
                _ = shutdown_signal(shutdown) => return Hold::Shutdown,
                _ = tick.tick() => {
                    if self.config.iterations.is_some()
                        && swarm.active.iter().all(|u| u.handle.is_finished())
                    {
                        return Hold::AllFinished;
                    }
                }
            }
        }
    }

    async fn stop_all(&self, swarm: Swarm) {
        let mut handles = swarm.retiring;
        for user in swarm.active {
            let _ = user.stop.send(true);
            handles.push(user.handle);
        }
        if handles.is_empty() {
            return;
        }

        let deadline = Instant::now() + self.config.stop_timeout;
        let mut aborted = 0usize;
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "Virtual user ended abnormally"),
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        if aborted > 0 && !self.config.stop_timeout.is_zero() {
            warn!(aborted, "Stop timeout elapsed, aborted remaining users");
        }
    }
}

async fn pause(
    interval: Duration,
    deadline: Option<Instant>,
    shutdown: &mut broadcast::Receiver<()>,
) -> Pause {
    tokio::select! {
        _ = sleep(interval) => Pause::Elapsed,
        _ = wait_deadline(deadline) => Pause::Deadline,
        _ = shutdown_signal(shutdown) => Pause::Shutdown,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// Resolves on a shutdown message. A dropped sender never fires.
async fn shutdown_signal(shutdown: &mut broadcast::Receiver<()>) {
    loop {
        match shutdown.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
