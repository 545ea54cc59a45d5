//! Firewall middleware.
//! Buffers each request, hands it to [`Firewall::admit`], and answers
//! `406 Not Acceptable` on rejection.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::security::{AdmissionRequest, Firewall};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// State shared by every invocation of [`firewall_middleware`].
#[derive(Clone)]
pub struct FirewallLayerState {
    pub firewall: Arc<Firewall>,
    /// Trust forwarding headers for the client address.
    pub behind_proxy: bool,
    /// Largest body buffered for inspection.
    pub max_body_bytes: usize,
}

pub async fn firewall_middleware(
    State(state): State<FirewallLayerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(req.headers(), peer.ip(), state.behind_proxy);
    let is_file_request = is_file_request(req.headers());

    let (parts, body) = req.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(ip = %ip, error = %e, "Request body rejected");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(map)| map)
        .unwrap_or_default();
    let raw_query = parts.uri.query().unwrap_or("");

    let admitted = state.firewall.admit(&AdmissionRequest {
        ip: &ip,
        raw_query,
        body: &body,
        is_file_request,
        query: &query,
    });

    if !admitted {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }

    next.run(Request::from_parts(parts, Body::from(body))).await
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// peer. Headers are ignored unless `behind_proxy`.
pub fn client_ip(headers: &HeaderMap, peer: IpAddr, behind_proxy: bool) -> String {
    if behind_proxy {
        let forwarded = headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        let real_ip = headers
            .get(X_REAL_IP)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = real_ip {
            return ip.to_string();
        }
    }
    peer.to_string()
}

/// Uploads skip body keyword screening.
pub fn is_file_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}
