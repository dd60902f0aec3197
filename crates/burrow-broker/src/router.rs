//! HTTP routing through a node's SOCKS endpoint.
//!
//! `/route/{node_name}/{path}` replays the incoming request against the
//! node's local service. The upstream URL always targets `localhost` on the
//! node's registered service port; the SOCKS proxy makes that hostname
//! resolve on the node's side of the tunnel.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, Response, Uri};
use bytes::Bytes;
use tracing::debug;

use crate::error::BrokerError;
use crate::AppState;

/// Hop-by-hop headers that must not be replayed in either direction.
const SKIPPED_HEADERS: [&str; 4] = ["host", "connection", "content-length", "transfer-encoding"];

fn is_forwardable(name: &str) -> bool {
    !SKIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

/// Proxy one request to a node's local service.
#[utoipa::path(
    get,
    path = "/route/{node_name}/{path}",
    params(
        ("node_name" = String, Path, description = "Registered node to route to"),
        ("path" = String, Path, description = "Path on the node's local service"),
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Response from the node's local service"),
        (status = 404, description = "Node unknown or not connected", body = burrow_proto::ErrorResponse),
        (status = 502, description = "Node's local service unreachable", body = burrow_proto::ErrorResponse),
    ),
    tag = "routing",
)]
pub(crate) async fn route_request(
    State(state): State<Arc<AppState>>,
    Path((node_name, path)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response<axum::body::Body>, BrokerError> {
    let node = state
        .store
        .get(&node_name)
        .await?
        .filter(|node| node.connection_valid)
        .ok_or_else(|| BrokerError::RouteNotFound(node_name.clone()))?;

    let proxy_port = node
        .proxy_port
        .ok_or_else(|| BrokerError::RouteNotFound(node_name.clone()))?;

    let mut url = format!("http://localhost:{}/{}", node.service_port, path);
    if let Some(query) = uri.query() {
        url.push('?');
        url.push_str(query);
    }
    debug!(node = %node_name, %method, %url, proxy_port, "routing request");

    // socks5h so the hostname resolves on the node's side of the tunnel.
    let proxy = reqwest::Proxy::all(format!("socks5h://127.0.0.1:{proxy_port}"))?;
    let client = reqwest::Client::builder()
        .proxy(proxy)
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let mut upstream = client.request(method, url);
    for (name, value) in &headers {
        if is_forwardable(name.as_str()) {
            upstream = upstream.header(name, value);
        }
    }
    if !body.is_empty() {
        upstream = upstream.body(body);
    }

    let upstream_response = upstream.send().await?;
    let status = upstream_response.status();
    let mut response = Response::builder().status(status);
    for (name, value) in upstream_response.headers() {
        if is_forwardable(name.as_str()) {
            response = response.header(name, value);
        }
    }
    let bytes = upstream_response.bytes().await?;
    response
        .body(axum::body::Body::from(bytes))
        .map_err(|err| BrokerError::Internal(format!("response assembly: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn hop_by_hop_headers_are_skipped() {
        assert!(!is_forwardable("Host"));
        assert!(!is_forwardable("content-length"));
        assert!(!is_forwardable("Transfer-Encoding"));
        assert!(is_forwardable("x-request-id"));
        assert!(is_forwardable("content-type"));
    }

    #[test]
    fn status_codes_pass_through_untouched() {
        assert_eq!(StatusCode::from_u16(418).unwrap().as_u16(), 418);
    }
}
