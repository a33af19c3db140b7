//! Load testing tool for the bookstore API.
//!
//! This crate provides tools to:
//! - Run the built-in bookstore user against a live backend
//! - Describe other user mixes and load shapes in YAML scenarios
//! - Output results in multiple formats (console, JSON, CSV)

pub mod bookstore;
pub mod config;
pub mod report;
pub mod runner;

pub use bookstore::BookstoreProfile;
pub use config::{ScenarioConfig, StageConfig, TaskConfig, UserClassConfig};
pub use report::{ResultsReport, TestResults};
pub use runner::LoadRunner;
