//! HTTP client wrapper that times requests and reports them.

use crate::error::SwarmResult;
use crate::request_log::RequestLogSink;
use crate::stats::StatsAggregator;
use crate::task::RequestSpec;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of a single HTTP request as seen by the stats.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub method: String,
    /// Stats key: an explicit name, or the path with its query string.
    pub name: String,
    pub url: String,
    /// 0 when no response was received.
    pub status: u16,
    pub latency_us: u64,
    pub bytes: usize,
    pub error: Option<String>,
    pub timestamp: Instant,
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Build the shared connection pool used by every virtual user.
pub fn build_http_client(timeout: Duration, max_idle_per_host: usize) -> SwarmResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(max_idle_per_host)
        .build()?;
    Ok(client)
}

/// Per-user view of the HTTP client, bound to one target host.
#[derive(Clone)]
pub struct UserClient {
    http: reqwest::Client,
    host: String,
    stats: Arc<StatsAggregator>,
    request_log: Option<RequestLogSink>,
}

impl UserClient {
    pub fn new(http: reqwest::Client, host: impl Into<String>, stats: Arc<StatsAggregator>) -> Self {
        Self {
            http,
            host: host.into().trim_end_matches('/').to_string(),
            stats,
            request_log: None,
        }
    }

    pub fn with_request_log(mut self, sink: Option<RequestLogSink>) -> Self {
        self.request_log = sink;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// Absolute URL for a path on the bound host.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.host, path)
        } else {
            format!("{}/{}", self.host, path)
        }
    }

    /// Build the `reqwest::Request` a spec describes, without sending it.
    pub fn build_request(&self, spec: &RequestSpec) -> SwarmResult<reqwest::Request> {
        let mut builder = self
            .http
            .request(spec.method.clone(), self.url_for(&spec.path));

        if !spec.query.is_empty() {
            builder = builder.query(&spec.query);
        }
        for (key, value) in &spec.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(ref body) = spec.json {
            builder = builder.json(body);
        }

        Ok(builder.build()?)
    }

    /// Send a request, record it, and return the outcome.
    pub async fn request(&self, spec: &RequestSpec) -> RequestOutcome {
        let name = spec.stats_name();
        let method = spec.method.as_str().to_string();

        let outcome = match self.build_request(spec) {
            Ok(request) => self.execute(request, method, name).await,
            Err(e) => RequestOutcome {
                method,
                name,
                url: self.url_for(&spec.path),
                status: 0,
                latency_us: 0,
                bytes: 0,
                error: Some(e.to_string()),
                timestamp: Instant::now(),
            },
        };

        self.stats.record(&outcome).await;
        if let Some(ref log) = self.request_log {
            log.write(&outcome).await;
        }
        outcome
    }

    pub async fn get(&self, path: &str) -> RequestOutcome {
        self.request(&RequestSpec::get(path)).await
    }

    pub async fn post(&self, path: &str) -> RequestOutcome {
        self.request(&RequestSpec::post(path)).await
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> RequestOutcome {
        self.request(&RequestSpec::post(path).json(body)).await
    }

    async fn execute(&self, request: reqwest::Request, method: String, name: String) -> RequestOutcome {
        let url = request.url().to_string();
        let start = Instant::now();

        match self.http.execute(request).await {
            Ok(response) => {
                let status = response.status().as_u16();
                let (bytes, body_error) = match response.bytes().await {
                    Ok(b) => (b.len(), None),
                    Err(e) => (0, Some(e.to_string())),
                };
                let latency_us = start.elapsed().as_micros() as u64;

                let error = if status >= 400 {
                    Some(format!("HTTP {}", status))
                } else {
                    body_error
                };
                if let Some(ref err) = error {
                    debug!(%method, %url, status, error = %err, "Request failed");
                }

                RequestOutcome {
                    method,
                    name,
                    url,
                    status,
                    latency_us,
                    bytes,
                    error,
                    timestamp: start,
                }
            }
            Err(e) => {
                debug!(%method, %url, error = %e, "Request error");
                RequestOutcome {
                    method,
                    name,
                    url,
                    status: 0,
                    latency_us: start.elapsed().as_micros() as u64,
                    bytes: 0,
                    error: Some(e.to_string()),
                    timestamp: start,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(host: &str) -> UserClient {
        UserClient::new(reqwest::Client::new(), host, Arc::new(StatsAggregator::new()))
    }

    #[test]
    fn test_url_for_joins_cleanly() {
        let c = client("http://localhost:3000/");
        assert_eq!(c.url_for("/api/book/get"), "http://localhost:3000/api/book/get");
        assert_eq!(c.url_for("api/book/get"), "http://localhost:3000/api/book/get");
    }

    #[test]
    fn test_post_without_body() {
        let c = client("http://localhost:3000");
        let req = c.build_request(&RequestSpec::post("/api/book/get")).unwrap();
        assert_eq!(req.method(), reqwest::Method::POST);
        assert_eq!(req.url().as_str(), "http://localhost:3000/api/book/get");
        assert!(req.body().is_none());
    }

    #[test]
    fn test_query_and_json_body() {
        let c = client("http://localhost:3000");
        let spec = RequestSpec::get("/api/recommendations").query("user_id", "123");
        let req = c.build_request(&spec).unwrap();
        assert_eq!(req.url().query(), Some("user_id=123"));

        let spec = RequestSpec::post("/api/payment").json(serde_json::json!({ "amount": 500 }));
        let req = c.build_request(&spec).unwrap();
        let body = req.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, br#"{"amount":500}"#);
        assert_eq!(
            req.headers().get("content-type").unwrap(),
            "application/json"
        );
    }
}
