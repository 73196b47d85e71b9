//! Span and event hooks for `TraceLayer`.

use axum::http::{HeaderMap, Request, Response};
use std::time::Duration;
use tower_http::classify::ServerErrorsFailureClass;
use tracing::{info_span, Span};

const REDACTED_HEADERS: [&str; 3] = ["authorization", "cookie", "set-cookie"];

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

/// Header names and values with credentials blanked out.
fn loggable_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if REDACTED_HEADERS.contains(&name.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[binary]").to_string()
            };
            (name.to_string(), value)
        })
        .collect()
}

pub fn make_span<B>(request: &Request<B>) -> Span {
    let headers = request.headers();
    info_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path(),
        query = request.uri().query().unwrap_or(""),
        request_id = header_str(headers, "x-request-id"),
        user_agent = header_str(headers, "user-agent"),
    )
}

pub fn on_request<B>(request: &Request<B>, _span: &Span) {
    tracing::debug!(headers = ?loggable_headers(request.headers()), "Incoming HTTP request");
}

pub fn on_response<B>(response: &Response<B>, latency: Duration, _span: &Span) {
    let status = response.status();
    let latency_ms = latency.as_millis();

    if status.is_server_error() {
        tracing::error!(status = %status, latency_ms, "HTTP request completed with server error");
    } else if status.is_client_error() {
        tracing::warn!(status = %status, latency_ms, "HTTP request completed with client error");
    } else {
        tracing::info!(status = %status, latency_ms, "HTTP request completed");
    }
}

pub fn on_failure(error: ServerErrorsFailureClass, latency: Duration, _span: &Span) {
    tracing::error!(
        error = %error,
        latency_ms = latency.as_millis(),
        "HTTP request failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn credentials_are_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("session=abc"));
        headers.insert("accept", HeaderValue::from_static("application/json"));

        let logged = loggable_headers(&headers);
        assert!(logged.contains(&("cookie".to_string(), "[REDACTED]".to_string())));
        assert!(logged.contains(&("accept".to_string(), "application/json".to_string())));
    }
}
