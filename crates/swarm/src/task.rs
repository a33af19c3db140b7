//! Tasks a virtual user can execute.

use crate::error::SwarmResult;
use crate::user::UserSession;
use async_trait::async_trait;
use reqwest::Method;
use std::fmt;
use std::sync::Arc;

/// A unit of simulated user behaviour.
#[async_trait]
pub trait Task: Send + Sync {
    async fn run(&self, session: &mut UserSession) -> SwarmResult<()>;
}

/// Declarative single-request task.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
    /// Overrides the stats name, which otherwise is the path plus query.
    pub name: Option<String>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            json: None,
            name: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Key under which this request is reported.
    pub fn stats_name(&self) -> String {
        if let Some(ref name) = self.name {
            return name.clone();
        }
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let sep = if self.path.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.path, sep, query.join("&"))
    }
}

#[async_trait]
impl Task for RequestSpec {
    async fn run(&self, session: &mut UserSession) -> SwarmResult<()> {
        session.client.request(self).await;
        Ok(())
    }
}

/// A named, weighted task registered on a user profile.
#[derive(Clone)]
pub struct TaskDef {
    pub name: String,
    pub weight: u32,
    pub task: Arc<dyn Task>,
}

impl TaskDef {
    pub fn new(name: impl Into<String>, weight: u32, task: impl Task + 'static) -> Self {
        Self {
            name: name.into(),
            weight,
            task: Arc::new(task),
        }
    }

    /// Task that issues a single request.
    pub fn request(name: impl Into<String>, weight: u32, spec: RequestSpec) -> Self {
        Self::new(name, weight, spec)
    }
}

impl fmt::Debug for TaskDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDef")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_name() {
        assert_eq!(RequestSpec::post("/api/book/get").stats_name(), "/api/book/get");
        assert_eq!(
            RequestSpec::get("/api/recommendations")
                .query("user_id", "123")
                .stats_name(),
            "/api/recommendations?user_id=123"
        );
        assert_eq!(
            RequestSpec::get("/search?q=a").query("page", "2").stats_name(),
            "/search?q=a&page=2"
        );
        assert_eq!(
            RequestSpec::get("/api/book/42").named("/api/book/[id]").stats_name(),
            "/api/book/[id]"
        );
    }

    #[test]
    fn test_builder() {
        let spec = RequestSpec::post("/api/payment")
            .header("x-test", "1")
            .json(serde_json::json!({ "amount": 500 }));
        assert_eq!(spec.method, Method::POST);
        assert_eq!(spec.headers, vec![("x-test".to_string(), "1".to_string())]);
        assert!(spec.json.is_some());
    }
}
