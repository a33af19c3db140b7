//! Load test orchestration: engine setup, live progress and results.

use crate::config::ScenarioConfig;
use crate::report::TestResults;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swarm::{RequestLogSink, RunConfig, Scheduler, StatsAggregator, UserProfile};
use tokio::sync::broadcast;
use tracing::info;

/// Executes a load test against one host.
pub struct LoadRunner {
    scenario_name: String,
    run: RunConfig,
    profiles: Vec<UserProfile>,
    request_log_dir: Option<PathBuf>,
    show_progress: bool,
}

impl LoadRunner {
    /// Create a new load runner.
    pub fn new(scenario_name: impl Into<String>, run: RunConfig, profiles: Vec<UserProfile>) -> Self {
        Self {
            scenario_name: scenario_name.into(),
            run,
            profiles,
            request_log_dir: None,
            show_progress: true,
        }
    }

    /// Create a runner for a YAML scenario.
    pub fn from_scenario(config: &ScenarioConfig, results_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let mut runner = Self::new(&config.name, config.run_config(), config.profiles()?);
        if config.log_requests {
            runner.request_log_dir = Some(results_dir.into());
        }
        Ok(runner)
    }

    pub fn with_request_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.request_log_dir = dir;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Total planned duration, when every stage is bounded.
    pub fn planned_duration(&self) -> Option<Duration> {
        self.run
            .plan()
            .iter()
            .map(|s| s.duration)
            .sum::<Option<Duration>>()
    }

    /// Run the load test.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> anyhow::Result<TestResults> {
        let planned = self.planned_duration();
        let mut scheduler = Scheduler::new(self.run.clone(), self.profiles)?;

        if let Some(ref dir) = self.request_log_dir {
            let sink = RequestLogSink::in_dir(dir, &self.scenario_name)?;
            info!(path = %sink.path().display(), "Logging requests");
            scheduler = scheduler.with_request_log(sink);
        }

        info!(
            scenario = %self.scenario_name,
            host = %self.run.host,
            users = self.run.users,
            spawn_rate = self.run.spawn_rate,
            stages = self.run.stages.len(),
            "Starting load test"
        );

        let progress = if self.show_progress {
            Some(spawn_progress(scheduler.stats(), planned))
        } else {
            None
        };

        let outcome = scheduler.run(shutdown).await;

        if let Some((pb, handle)) = progress {
            handle.abort();
            pb.finish_with_message("Complete!");
        }

        let stats = outcome?;
        Ok(TestResults {
            scenario_name: self.scenario_name,
            host: self.run.host.clone(),
            peak_users: self.run.peak_users(),
            stats,
        })
    }
}

fn spawn_progress(
    stats: Arc<StatsAggregator>,
    planned: Option<Duration>,
) -> (ProgressBar, tokio::task::JoinHandle<()>) {
    let pb = match planned {
        Some(d) => {
            let pb = ProgressBar::new(d.as_secs().max(1));
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}s {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("##-"),
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("[{elapsed_precise}] {spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb
        }
    };

    let bar = pb.clone();
    let handle = tokio::spawn(async move {
        let start = Instant::now();
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tick.tick().await;
            let snap = stats.snapshot().await;
            bar.set_position(start.elapsed().as_secs());
            bar.set_message(format!(
                "users: {} | reqs: {} | fails: {} | {:.1} req/s",
                stats.user_count(),
                snap.total.requests,
                snap.total.failures,
                snap.total.requests_per_second
            ));
            bar.tick();
        }
    });

    (pb, handle)
}
