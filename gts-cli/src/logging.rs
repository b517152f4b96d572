use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Request log line: method, path, status and latency at INFO; response
/// bodies stay out of the logs (use DEBUG tracing in the library for
/// validation details).
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let start = Instant::now();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    tracing::info!(
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_ms = format!("{:.1}", elapsed.as_secs_f64() * 1000.0),
        "handled request"
    );

    response
}
