pub mod export;
pub mod streams;
pub mod webhooks;
pub mod ws;

use chrono::Duration;

/// Time range query values accepted by the metrics endpoints.
pub(crate) fn range_to_duration(range: &str) -> Duration {
    match range {
        "3min" | "3m" => Duration::minutes(3),
        "30min" | "30m" => Duration::minutes(30),
        "3h" => Duration::hours(3),
        "8h" => Duration::hours(8),
        "2d" => Duration::days(2),
        "4d" => Duration::days(4),
        _ => Duration::minutes(3),
    }
}
