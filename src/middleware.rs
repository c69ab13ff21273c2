use axum::{
    body::Body,
    middleware::Next,
    response::Response,
    http::Request,
};
use std::time::Instant;
use log::debug;

pub async fn logging(
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let path = req.uri().path().to_owned();
    let method = req.method().clone();

    let response = next.run(req).await;

    debug!(
        method:% = method,
        path = path.as_str(),
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64;
        "proxied request"
    );

    response
}
