//! Results reporting and formatting.

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::{Deserialize, Serialize};
use swarm::{EndpointReport, StatsSnapshot};

/// Final test results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResults {
    pub scenario_name: String,
    pub host: String,
    pub peak_users: usize,
    pub stats: StatsSnapshot,
}

impl TestResults {
    /// Percentage of requests that succeeded.
    pub fn success_rate(&self) -> f64 {
        100.0 - self.stats.total.failure_rate()
    }

    pub fn has_failures(&self) -> bool {
        self.stats.total.failures > 0
    }

    /// Error out when requests failed, unless failures are allowed.
    pub fn check_failures(&self, allow_failures: bool) -> anyhow::Result<()> {
        if self.has_failures() && !allow_failures {
            anyhow::bail!(
                "{} of {} requests failed ({:.1}% success)",
                self.stats.total.failures,
                self.stats.total.requests,
                self.success_rate()
            );
        }
        Ok(())
    }
}

/// Formats test results for output.
pub struct ResultsReport;

impl ResultsReport {
    /// Format results as console tables: summary, per-endpoint, errors.
    pub fn format_table(results: &TestResults) -> String {
        let stats = &results.stats;

        let mut summary = Table::new();
        summary
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![format!("Load Test Results: {}", results.scenario_name)]);
        summary.add_row(vec!["Host:", results.host.as_str()]);
        summary.add_row(vec!["Duration:", &format!("{:.1}s", stats.duration_secs)]);
        summary.add_row(vec!["Peak Users:", &format!("{}", results.peak_users)]);
        summary.add_row(vec!["Total Requests:", &format!("{}", stats.total.requests)]);
        summary.add_row(vec!["Success Rate:", &format!("{:.1}%", results.success_rate())]);
        summary.add_row(vec![
            "Requests/sec:",
            &format!("{:.1}", stats.total.requests_per_second),
        ]);

        let mut endpoints = Table::new();
        endpoints
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                "Type", "Name", "# reqs", "# fails", "Avg", "Min", "Max", "Med", "p90", "p95",
                "p99", "req/s", "fail/s",
            ]);
        for row in stats.entries.iter().chain(std::iter::once(&stats.total)) {
            endpoints.add_row(Self::endpoint_cells(row));
        }

        let mut out = format!("{}\n\nLatency in ms\n{}", summary, endpoints);

        if !stats.errors.is_empty() {
            let mut errors = Table::new();
            errors
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["# occurrences", "Type", "Name", "Error"]);
            for err in &stats.errors {
                errors.add_row(vec![
                    err.occurrences.to_string(),
                    err.method.clone(),
                    err.name.clone(),
                    err.error.clone(),
                ]);
            }
            out.push_str(&format!("\n\nErrors\n{}", errors));
        }

        out
    }

    fn endpoint_cells(row: &EndpointReport) -> Vec<String> {
        vec![
            row.method.clone(),
            row.name.clone(),
            row.requests.to_string(),
            format!("{} ({:.1}%)", row.failures, row.failure_rate()),
            format!("{:.1}", row.latency_avg),
            format!("{:.1}", row.latency_min),
            format!("{:.1}", row.latency_max),
            format!("{:.1}", row.latency_p50),
            format!("{:.1}", row.latency_p90),
            format!("{:.1}", row.latency_p95),
            format!("{:.1}", row.latency_p99),
            format!("{:.2}", row.requests_per_second),
            format!("{:.2}", row.failures_per_second),
        ]
    }

    /// Format results as JSON.
    pub fn format_json(results: &TestResults) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(results)?)
    }

    /// Format results as CSV rows, one per endpoint plus the aggregate.
    pub fn format_csv(results: &TestResults) -> String {
        let stats = &results.stats;
        stats
            .entries
            .iter()
            .chain(std::iter::once(&stats.total))
            .map(|r| {
                format!(
                    "{},{},{},{},{:.1},{:.1},{:.1},{:.1},{:.1},{:.2},{:.2},{:.1},{:.1},{:.1},{:.1},{:.1},{:.1},{:.1},{:.1},{:.1},{:.1}",
                    csv_field(&r.method),
                    csv_field(&r.name),
                    r.requests,
                    r.failures,
                    r.latency_p50,
                    r.latency_avg,
                    r.latency_min,
                    r.latency_max,
                    r.avg_bytes,
                    r.requests_per_second,
                    r.failures_per_second,
                    r.latency_p50,
                    r.latency_p66,
                    r.latency_p75,
                    r.latency_p80,
                    r.latency_p90,
                    r.latency_p95,
                    r.latency_p98,
                    r.latency_p99,
                    r.latency_p999,
                    r.latency_max,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// CSV header row.
    pub fn csv_header() -> &'static str {
        "type,name,requests,failures,median_ms,avg_ms,min_ms,max_ms,avg_bytes,rps,failures_per_sec,p50,p66,p75,p80,p90,p95,p98,p99,p99.9,p100"
    }

    /// Error table as CSV, header included.
    pub fn format_failures_csv(results: &TestResults) -> String {
        let mut out = String::from("method,name,error,occurrences");
        for err in &results.stats.errors {
            out.push_str(&format!(
                "\n{},{},{},{}",
                csv_field(&err.method),
                csv_field(&err.name),
                csv_field(&err.error),
                err.occurrences
            ));
        }
        out
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm::ErrorReport;

    fn row(method: &str, name: &str, requests: u64, failures: u64) -> EndpointReport {
        EndpointReport {
            method: method.to_string(),
            name: name.to_string(),
            requests,
            failures,
            bytes: requests * 10,
            avg_bytes: 10.0,
            requests_per_second: 2.0,
            failures_per_second: 0.0,
            latency_avg: 12.0,
            latency_min: 5.0,
            latency_max: 40.0,
            latency_p50: 11.0,
            latency_p66: 13.0,
            latency_p75: 14.0,
            latency_p80: 15.0,
            latency_p90: 20.0,
            latency_p95: 25.0,
            latency_p98: 30.0,
            latency_p99: 35.0,
            latency_p999: 40.0,
        }
    }

    fn results() -> TestResults {
        TestResults {
            scenario_name: "bookstore".to_string(),
            host: "http://localhost:5000".to_string(),
            peak_users: 10,
            stats: StatsSnapshot {
                started_at: "2026-01-01T00:00:00Z".to_string(),
                timestamp: "2026-01-01T00:01:00Z".to_string(),
                duration_secs: 60.0,
                user_count: 0,
                entries: vec![
                    row("POST", "/api/book/get", 90, 0),
                    row("GET", "/api/recommendations?user_id=123", 10, 2),
                ],
                total: row("", "Aggregated", 100, 2),
                errors: vec![ErrorReport {
                    method: "GET".to_string(),
                    name: "/api/recommendations?user_id=123".to_string(),
                    error: "HTTP 404".to_string(),
                    occurrences: 2,
                }],
            },
        }
    }

    #[test]
    fn test_table_lists_endpoints_and_errors() {
        let table = ResultsReport::format_table(&results());
        assert!(table.contains("/api/book/get"));
        assert!(table.contains("Aggregated"));
        assert!(table.contains("HTTP 404"));
        assert!(table.contains("98.0%"));
    }

    #[test]
    fn test_csv_rows() {
        let csv = ResultsReport::format_csv(&results());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("POST,/api/book/get,90,0,"));
        assert!(lines[2].starts_with(",Aggregated,100,2,"));

        let columns = ResultsReport::csv_header().split(',').count();
        assert!(lines.iter().all(|l| l.split(',').count() == columns));
    }

    #[test]
    fn test_failures_csv_quotes() {
        let mut r = results();
        r.stats.errors[0].error = "error sending request, connection refused".to_string();
        let csv = ResultsReport::format_failures_csv(&r);
        assert!(csv.contains("\"error sending request, connection refused\""));
    }

    #[test]
    fn test_json_round_trip_fields() {
        let json = ResultsReport::format_json(&results()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["stats"]["total"]["requests"], 100);
        assert_eq!(value["peak_users"], 10);
    }

    #[test]
    fn test_check_failures() {
        let mut results = results();
        let err = results.check_failures(false).unwrap_err();
        assert_eq!(err.to_string(), "2 of 100 requests failed (98.0% success)");
        assert!(results.check_failures(true).is_ok());

        results.stats.total.failures = 0;
        assert!(results.check_failures(false).is_ok());
    }
}
