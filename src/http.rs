//! HTTP 辅助工具：WebDAV 能力头、CORS 与客户端 IP 解析。

use axum::body::Body as AxumBody;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use std::net::IpAddr;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

const DAV_METHODS: &str = "PROPPATCH,PROPFIND,OPTIONS,DELETE,UNLOCK,COPY,LOCK,MOVE,HEAD,POST,PUT,GET";
const DAV_ALLOW_HEADERS: &str = "Authorization, Depth, Content-Type";
const DAV_EXPOSE_HEADERS: &str = "DAV, Content-Length, Allow";

/// 开启 CORS 时直接应答 OPTIONS，附带 DAV 能力与跨域头。
pub async fn dav_options(req: Request<AxumBody>, next: middleware::Next) -> Response {
    if req.method() != Method::OPTIONS {
        return next.run(req).await;
    }
    (StatusCode::OK, dav_capability_headers()).into_response()
}

pub fn dav_capability_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("dav", HeaderValue::from_static("1,2"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(DAV_ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(DAV_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(DAV_EXPOSE_HEADERS),
    );
    headers.insert("ms-author-via", HeaderValue::from_static("DAV"));
    headers
}

/// 构建 CORS Layer（逗号分隔的来源列表），用于非 OPTIONS 请求的跨域头。
pub fn build_cors_layer(cors_origins: Option<&str>) -> Option<CorsLayer> {
    let origins = cors_origins?
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();

    if origins.is_empty() {
        return None;
    }

    let methods = DAV_METHODS
        .split(',')
        .filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
        .collect::<Vec<_>>();
    let allow_headers = [header::AUTHORIZATION, HeaderName::from_static("depth"), header::CONTENT_TYPE];
    let expose_headers = [HeaderName::from_static("dav"), header::CONTENT_LENGTH, header::ALLOW];
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(methods)
            .allow_headers(allow_headers)
            .expose_headers(expose_headers)
            .allow_credentials(true),
    )
}

/// 综合 `x-forwarded-for` 与连接信息计算客户端 IP。
pub fn resolve_client_ip(headers: &HeaderMap, connect_ip: Option<IpAddr>) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
        .or(connect_ip)
}
