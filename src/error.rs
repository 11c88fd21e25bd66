//! WebDAV 请求的 HTTP 错误类型与转换。

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::auth::AUTH_REALM;
use crate::users::Privilege;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
    /// 缺少或错误的 Basic 凭据。
    Unauthorized,
    Forbidden(Privilege),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, HeaderValue::from_static(AUTH_REALM))],
                "unauthorized",
            )
                .into_response(),
            ApiError::Forbidden(privilege) => (
                StatusCode::FORBIDDEN,
                format!("permission denied: {privilege:?} required"),
            )
                .into_response(),
        }
    }
}
