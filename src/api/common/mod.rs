//! Helpers shared by the API handlers.

pub mod tracing;
pub mod utils;

/// Missing or non-positive `?page=` values select the first page.
pub fn page_or_first(page: Option<i64>) -> i64 {
    page.unwrap_or(1).max(1)
}
