//! Built-in bookstore user.
//!
//! A reader of the book marketplace API waits 1-5 s between actions and
//! browses the catalogue with `POST /api/book/get`. Recommendation and
//! payment traffic is off by default and only registered with
//! [`BookstoreProfile::Full`].

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use swarm::{RequestSpec, TaskDef, UserProfile, WaitTime};

/// Where the bookstore backend listens by default.
pub const DEFAULT_HOST: &str = "http://localhost:5000";

pub const USER_NAME: &str = "bookstore_user";
pub const MIN_WAIT_SECS: f64 = 1.0;
pub const MAX_WAIT_SECS: f64 = 5.0;

pub const BROWSE_BOOKS_PATH: &str = "/api/book/get";
pub const RECOMMENDATIONS_PATH: &str = "/api/recommendations";
pub const PAYMENT_PATH: &str = "/api/payment";

/// Which task set the bookstore user runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookstoreProfile {
    /// Catalogue browsing only.
    #[default]
    Browse,
    /// Browsing plus recommendations and payments.
    Full,
}

/// `POST /api/book/get` with no body, weight 3.
pub fn browse_books() -> TaskDef {
    TaskDef::request("browse_books", 3, RequestSpec::post(BROWSE_BOOKS_PATH))
}

/// `GET /api/recommendations?user_id=123`, weight 1.
pub fn view_recommendations() -> TaskDef {
    TaskDef::request(
        "view_recommendations",
        1,
        RequestSpec::get(RECOMMENDATIONS_PATH).query("user_id", "123"),
    )
}

/// `POST /api/payment` with a fixed Khalti payment, weight 2.
pub fn make_payment() -> TaskDef {
    TaskDef::request(
        "make_payment",
        2,
        RequestSpec::post(PAYMENT_PATH).json(payment_payload()),
    )
}

pub fn payment_payload() -> serde_json::Value {
    serde_json::json!({
        "user_id": "123",
        "amount": 500,
        "method": "Khalti",
        "book_id": "456"
    })
}

/// The bookstore user profile.
pub fn user_profile(kind: BookstoreProfile) -> UserProfile {
    let profile = UserProfile::new(USER_NAME)
        .wait_time(WaitTime::between(MIN_WAIT_SECS, MAX_WAIT_SECS))
        .task(browse_books());

    match kind {
        BookstoreProfile::Browse => profile,
        BookstoreProfile::Full => profile.task(view_recommendations()).task(make_payment()),
    }
}
