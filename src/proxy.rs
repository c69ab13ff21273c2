use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Uri},
    middleware::from_fn,
    response::Response,
    Router,
};
use log::{debug, error};
use reqwest::{redirect::Policy, Client, Url};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::detect::{LocalMaxima, PeakDetector};
use crate::error::{AppError, ConfigError, PipelineError};
use crate::models::QueryRangeResponse;
use crate::peaks::detect_peaks;
use crate::transport;

const QUERY_RANGE: &str = "query_range";

const HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Single-upstream reverse proxy that rewrites `query_range` bodies.
pub struct PeakProxy {
    target: Url,
    client: Client,
    iterations: u32,
    detector: Arc<dyn PeakDetector>,
}

impl PeakProxy {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Self::with_detector(&config.target_uri, config.iterations, Arc::new(LocalMaxima))
    }

    pub fn with_detector(
        target_uri: &str,
        iterations: u32,
        detector: Arc<dyn PeakDetector>,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidTarget {
            uri: target_uri.to_string(),
            reason,
        };
        let target = Url::parse(target_uri).map_err(|e| invalid(e.to_string()))?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", target.scheme())));
        }
        if target.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }

        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            target,
            client,
            iterations,
            detector,
        })
    }

    pub fn router(self) -> Router {
        Router::new()
            .fallback(forward)
            .layer(from_fn(crate::middleware::logging))
            .with_state(Arc::new(self))
    }

    fn upstream_url(&self, uri: &Uri) -> Url {
        let mut url = self.target.clone();
        url.set_path(&join_path(self.target.path(), uri.path()));
        let query = match (self.target.query().unwrap_or(""), uri.query().unwrap_or("")) {
            ("", "") => None,
            (q, "") | ("", q) => Some(q.to_string()),
            (target, request) => Some(format!("{}&{}", target, request)),
        };
        url.set_query(query.as_deref());
        url
    }

    /// Response hook. Bodies of anything but `query_range` come back
    /// untouched; otherwise the body is rewritten and the framing headers
    /// are updated to match.
    pub fn modify_response(
        &self,
        path: &str,
        headers: &mut HeaderMap,
        body: Bytes,
    ) -> Result<Bytes, PipelineError> {
        if endpoint(path) != QUERY_RANGE {
            debug!("only query_range endpoints are transformed; passing {} through", path);
            return Ok(body);
        }

        self.transform(headers, &body).map_err(|err| {
            error!(kind = err.kind(), cause:% = err; "error occurred");
            err
        })
    }

    fn transform(&self, headers: &mut HeaderMap, body: &[u8]) -> Result<Bytes, PipelineError> {
        let compressed = transport::is_compressed(headers);
        let decoded;
        let json = if compressed {
            decoded = transport::decode(body)?;
            decoded.as_slice()
        } else {
            body
        };

        let mut response = QueryRangeResponse::decode(json)?;
        detect_peaks(&mut response, self.iterations, self.detector.as_ref())?;
        let encoded = response.encode()?;

        let body = if compressed {
            transport::encode(&encoded)?
        } else {
            encoded
        };
        transport::set_content_encoding(headers, compressed);
        transport::set_content_length(headers, body.len());
        Ok(Bytes::from(body))
    }
}

pub async fn forward(
    State(proxy): State<Arc<PeakProxy>>,
    req: Request,
) -> Result<Response, AppError> {
    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await?;

    let url = proxy.upstream_url(&parts.uri);
    debug!("forwarding {} {} to {}", parts.method, parts.uri, url);

    let mut headers = parts.headers;
    strip_hop_headers(&mut headers);
    // The client's Host names this proxy; the upstream gets its own authority
    // from `url` so virtual-hosted Prometheus endpoints resolve.
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    if let Some(addr) = client_addr {
        append_forwarded_for(&mut headers, addr);
    }

    let mut request = proxy.client.request(parts.method, url).headers(headers);
    if !body.is_empty() {
        request = request.body(body);
    }
    let upstream = request.send().await.map_err(|err| {
        error!(kind = "failed to reach upstream", cause:% = err; "error occurred");
        err
    })?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    let body = upstream.bytes().await.map_err(|err| {
        let err = PipelineError::ReadBody(err);
        error!(kind = err.kind(), cause:% = err; "error occurred");
        err
    })?;

    strip_hop_headers(&mut headers);
    let (headers, body) = run_hook(proxy, parts.uri.path().to_owned(), headers, body).await?;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Runs `modify_response`. `query_range` bodies are decoded, detected and
/// re-encoded on the blocking pool so large responses do not stall the
/// runtime workers.
async fn run_hook(
    proxy: Arc<PeakProxy>,
    path: String,
    mut headers: HeaderMap,
    body: Bytes,
) -> Result<(HeaderMap, Bytes), PipelineError> {
    if endpoint(&path) != QUERY_RANGE {
        let body = proxy.modify_response(&path, &mut headers, body)?;
        return Ok((headers, body));
    }

    tokio::task::spawn_blocking(move || -> Result<_, PipelineError> {
        let body = proxy.modify_response(&path, &mut headers, body)?;
        Ok((headers, body))
    })
    .await
    .map_err(|err| {
        let err = PipelineError::Worker(err);
        error!(kind = err.kind(), cause:% = err; "error occurred");
        err
    })?
}

/// Final path segment, ignoring trailing slashes.
fn endpoint(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

fn join_path(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

fn strip_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_HEADERS {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, addr: SocketAddr) {
    let prior: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let value = if prior.is_empty() {
        addr.ip().to_string()
    } else {
        format!("{}, {}", prior.join(", "), addr.ip())
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}
