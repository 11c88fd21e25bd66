//! WebDAV Basic 认证与按方法的权限校验。

use axum::extract::Extension;
use axum::http::{Method, Request};
use axum::{body::Body as AxumBody, middleware};
use axum_extra::extract::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Basic};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::users::{Privilege, UserStore};

pub const AUTH_REALM: &str = r#"Basic realm="Default realm""#;

/// 已认证的 WebDAV 用户，写入请求扩展供后续处理器使用。
#[derive(Clone, Debug)]
pub struct CurrentUser(pub Arc<crate::users::User>);

/// 每种 WebDAV 方法所需的权限，`None` 表示无需额外权限。
pub fn required_privilege(method: &Method) -> Option<Privilege> {
    match method.as_str() {
        "GET" | "HEAD" => Some(Privilege::CanReadContent),
        "PROPFIND" => Some(Privilege::CanReadProperties),
        "LOCK" | "UNLOCK" => Some(Privilege::CanWriteLocks),
        "PUT" | "POST" => Some(Privilege::CanWriteContent),
        "PROPPATCH" => Some(Privilege::CanWriteProperties),
        "MKCOL" | "DELETE" | "MOVE" | "COPY" => Some(Privilege::CanWrite),
        _ => None,
    }
}

/// 认证中间件：校验 Basic 凭据与方法权限。
pub async fn auth_middleware(
    Extension(users): Extension<Arc<UserStore>>,
    auth_header: Option<TypedHeader<Authorization<Basic>>>,
    mut req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<axum::response::Response, ApiError> {
    let Some(TypedHeader(auth_header)) = auth_header else {
        return Err(ApiError::Unauthorized);
    };
    let Some(user) = users
        .authenticate(auth_header.username(), auth_header.password())
        .await
    else {
        warn!(username = auth_header.username(), "webdav authentication failed");
        return Err(ApiError::Unauthorized);
    };

    if let Some(privilege) = required_privilege(req.method())
        && !user.can(privilege)
    {
        warn!(
            username = %user.username,
            method = %req.method(),
            ?privilege,
            "webdav privilege denied"
        );
        return Err(ApiError::Forbidden(privilege));
    }

    debug!(username = %user.username, "webdav request authenticated");
    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_methods_need_read_privileges() {
        assert_eq!(required_privilege(&Method::GET), Some(Privilege::CanReadContent));
        let propfind = Method::from_bytes(b"PROPFIND").expect("method");
        assert_eq!(required_privilege(&propfind), Some(Privilege::CanReadProperties));
        assert_eq!(required_privilege(&Method::OPTIONS), None);
    }

    #[test]
    fn mutating_methods_need_write_privileges() {
        let mkcol = Method::from_bytes(b"MKCOL").expect("method");
        assert_eq!(required_privilege(&mkcol), Some(Privilege::CanWrite));
        assert_eq!(required_privilege(&Method::PUT), Some(Privilege::CanWriteContent));
    }
}
