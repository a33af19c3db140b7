//! Scenario configuration loading and management.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use swarm::{RequestSpec, RunConfig, Stage, TaskDef, UserProfile, WaitTime};

/// Main scenario configuration loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub host: String,
    #[serde(default = "default_users")]
    pub users: usize,
    #[serde(default = "default_spawn_rate")]
    pub spawn_rate: f64,
    #[serde(default)]
    pub run_time_secs: Option<u64>,
    #[serde(default)]
    pub iterations: Option<u64>,
    #[serde(default)]
    pub stop_timeout_secs: u64,
    #[serde(default)]
    pub reset_stats: bool, // Discard stats gathered during ramp-up
    #[serde(default)]
    pub seed: Option<u64>, // Optional RNG seed for reproducible tests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub log_requests: bool, // Log all requests to file for debugging
    pub user_classes: Vec<UserClassConfig>,
}

/// One step of a staged load shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(default)]
    pub duration_secs: Option<u64>,
    pub users: usize,
    #[serde(default = "default_spawn_rate")]
    pub spawn_rate: f64,
}

/// A class of simulated users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClassConfig {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub wait_time: WaitTime,
    pub tasks: Vec<TaskConfig>,
}

/// A declarative single-request task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub json: Option<serde_json::Value>,
    /// Groups requests under this name in the stats instead of the URL.
    #[serde(default)]
    pub stats_name: Option<String>,
}

fn default_users() -> usize {
    1
}

fn default_spawn_rate() -> f64 {
    1.0
}

fn default_request_timeout() -> u64 {
    30
}

fn default_weight() -> u32 {
    1
}

fn default_method() -> String {
    "GET".to_string()
}

impl ScenarioConfig {
    /// Load configuration from YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        let config: ScenarioConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse scenario {}", path.display()))?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.user_classes.is_empty() {
            anyhow::bail!("at least one user class must be specified");
        }
        if self.run_time_secs == Some(0) {
            anyhow::bail!("run_time_secs must be > 0");
        }
        if self.stages.is_empty() && self.run_time_secs.is_none() && self.iterations.is_none() {
            tracing::warn!(
                scenario = %self.name,
                "No run_time_secs, iterations or stages set; the test runs until interrupted"
            );
        }
        self.run_config().validate()?;
        for profile in self.profiles()? {
            profile.validate()?;
        }
        Ok(())
    }

    /// Apply command-line overrides. With stages the shape comes from the
    /// stages alone, so user count, spawn rate and run time are refused.
    pub fn apply_overrides(
        &mut self,
        host: Option<String>,
        users: Option<usize>,
        spawn_rate: Option<f64>,
        run_time_secs: Option<u64>,
    ) -> anyhow::Result<()> {
        if !self.stages.is_empty() && (users.is_some() || spawn_rate.is_some() || run_time_secs.is_some()) {
            anyhow::bail!(
                "scenario '{}' defines stages; --users, --spawn-rate and --run-time cannot override them",
                self.name
            );
        }
        if let Some(h) = host {
            self.host = h;
        }
        if let Some(u) = users {
            self.users = u;
        }
        if let Some(r) = spawn_rate {
            self.spawn_rate = r;
        }
        if let Some(t) = run_time_secs {
            self.run_time_secs = Some(t);
        }
        Ok(())
    }

    /// Engine settings for this scenario.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            host: self.host.clone(),
            users: self.users,
            spawn_rate: self.spawn_rate,
            run_time: self.run_time_secs.map(Duration::from_secs),
            stages: self
                .stages
                .iter()
                .map(|s| Stage {
                    duration: s.duration_secs.map(Duration::from_secs),
                    users: s.users,
                    spawn_rate: s.spawn_rate,
                })
                .collect(),
            iterations: self.iterations,
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            reset_stats_after_ramp: self.reset_stats,
            seed: self.seed,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    /// Build engine user profiles from the configured classes.
    pub fn profiles(&self) -> anyhow::Result<Vec<UserProfile>> {
        self.user_classes.iter().map(UserClassConfig::profile).collect()
    }
}

impl UserClassConfig {
    pub fn profile(&self) -> anyhow::Result<UserProfile> {
        let mut profile = UserProfile::new(&self.name)
            .weight(self.weight)
            .wait_time(self.wait_time.clone());
        if let Some(ref host) = self.host {
            profile = profile.host(host);
        }
        for task in &self.tasks {
            let spec = task
                .request_spec()
                .with_context(|| format!("user class '{}', task '{}'", self.name, task.name))?;
            profile = profile.task(TaskDef::request(&task.name, task.weight, spec));
        }
        Ok(profile)
    }
}

impl TaskConfig {
    pub fn request_spec(&self) -> anyhow::Result<RequestSpec> {
        let method = reqwest::Method::from_bytes(self.method.to_uppercase().as_bytes())
            .with_context(|| format!("invalid HTTP method '{}'", self.method))?;

        let mut spec = RequestSpec::new(method, &self.path);
        for (k, v) in &self.query {
            spec = spec.query(k, v);
        }
        for (k, v) in &self.headers {
            reqwest::header::HeaderName::from_bytes(k.as_bytes())
                .with_context(|| format!("invalid header name '{}'", k))?;
            reqwest::header::HeaderValue::from_str(v)
                .with_context(|| format!("invalid value for header '{}'", k))?;
            spec = spec.header(k, v);
        }
        if let Some(ref body) = self.json {
            spec = spec.json(body.clone());
        }
        if let Some(ref name) = self.stats_name {
            spec = spec.named(name);
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
name: Bookstore browse
description: Browse the catalogue
host: http://localhost:5000
users: 50
spawn_rate: 5
run_time_secs: 120
user_classes:
  - name: reader
    wait_time:
      type: between
      min_secs: 1
      max_secs: 5
    tasks:
      - name: browse_books
        weight: 3
        method: post
        path: /api/book/get
      - name: make_payment
        weight: 2
        method: POST
        path: /api/payment
        json:
          user_id: "123"
          amount: 500
"#;

    #[test]
    fn test_parse_and_convert() {
        let config: ScenarioConfig = serde_yaml::from_str(SCENARIO).unwrap();
        config.validate().unwrap();

        let run = config.run_config();
        assert_eq!(run.users, 50);
        assert_eq!(run.run_time, Some(Duration::from_secs(120)));
        assert_eq!(run.request_timeout, Duration::from_secs(30));

        let profiles = config.profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].wait_time, WaitTime::between(1.0, 5.0));

        let browse = profiles[0].find_task("browse_books").unwrap();
        assert_eq!(browse.weight, 3);
    }

    #[test]
    fn test_task_spec() {
        let config: ScenarioConfig = serde_yaml::from_str(SCENARIO).unwrap();
        let pay = config.user_classes[0].tasks[1].request_spec().unwrap();
        assert_eq!(pay.method, reqwest::Method::POST);
        assert_eq!(pay.json.unwrap()["amount"], 500);

        let browse = config.user_classes[0].tasks[0].request_spec().unwrap();
        assert_eq!(browse.method, reqwest::Method::POST);
        assert!(browse.json.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config: ScenarioConfig = serde_yaml::from_str(SCENARIO).unwrap();
        config.users = 0;
        assert!(config.validate().is_err());

        let mut config: ScenarioConfig = serde_yaml::from_str(SCENARIO).unwrap();
        config.user_classes.clear();
        assert!(config.validate().is_err());

        let mut config: ScenarioConfig = serde_yaml::from_str(SCENARIO).unwrap();
        config.user_classes[0].wait_time = WaitTime::between(5.0, 1.0);
        assert!(config.validate().is_err());

        let mut config: ScenarioConfig = serde_yaml::from_str(SCENARIO).unwrap();
        config.user_classes[0].tasks[0].method = "NOT A METHOD".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stages() {
        let yaml = r#"
name: ramp
host: http://localhost:5000
stages:
  - duration_secs: 60
    users: 20
    spawn_rate: 2
  - duration_secs: 30
    users: 5
user_classes:
  - name: reader
    tasks:
      - name: browse_books
        method: POST
        path: /api/book/get
"#;
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        let run = config.run_config();
        assert_eq!(run.stages.len(), 2);
        assert_eq!(run.stages[1].spawn_rate, 1.0);
        assert_eq!(run.peak_users(), 20);
    }

    #[test]
    fn test_invalid_headers_fail_validation() {
        let mut config: ScenarioConfig = serde_yaml::from_str(SCENARIO).unwrap();
        config.user_classes[0].tasks[0]
            .headers
            .insert("Accept".to_string(), "application/json".to_string());
        config.validate().unwrap();

        config.user_classes[0].tasks[0]
            .headers
            .insert("bad header".to_string(), "x".to_string());
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("invalid header name 'bad header'"));

        let mut config: ScenarioConfig = serde_yaml::from_str(SCENARIO).unwrap();
        config.user_classes[0].tasks[0]
            .headers
            .insert("X-Trace".to_string(), "line\nbreak".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_apply_without_stages() {
        let mut config: ScenarioConfig = serde_yaml::from_str(SCENARIO).unwrap();
        config
            .apply_overrides(Some("http://staging:5000".to_string()), Some(5), Some(2.5), Some(30))
            .unwrap();
        assert_eq!(config.host, "http://staging:5000");
        assert_eq!(config.users, 5);
        assert_eq!(config.spawn_rate, 2.5);
        assert_eq!(config.run_time_secs, Some(30));
    }

    #[test]
    fn test_overrides_refused_with_stages() {
        let mut config: ScenarioConfig = serde_yaml::from_str(SCENARIO).unwrap();
        config.stages.push(StageConfig {
            duration_secs: Some(10),
            users: 4,
            spawn_rate: 1.0,
        });

        assert!(config.apply_overrides(None, Some(5), None, None).is_err());
        assert!(config.apply_overrides(None, None, Some(2.0), None).is_err());
        assert!(config.apply_overrides(None, None, None, Some(60)).is_err());
        assert_eq!(config.users, 50);

        // Host is independent of the load shape
        config
            .apply_overrides(Some("http://other:5000".to_string()), None, None, None)
            .unwrap();
        assert_eq!(config.host, "http://other:5000");
    }

    #[test]
    fn test_unschedulable_values_fail_validation() {
        let mut config: ScenarioConfig = serde_yaml::from_str(SCENARIO).unwrap();
        config.user_classes[0].wait_time = WaitTime::constant(1e30);
        assert!(config.validate().is_err());

        let mut config: ScenarioConfig = serde_yaml::from_str(SCENARIO).unwrap();
        config.spawn_rate = 1e-20;
        assert!(config.validate().is_err());
    }
}
