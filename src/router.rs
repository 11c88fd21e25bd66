//! WebDAV 请求路由：路径规范化、GET 重定向与直连播放头注入。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{HeaderValue, Method, Request, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use clap::ValueEnum;
use dav_server::fakels::FakeLs;
use dav_server::{DavConfig, DavHandler};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::CurrentUser;
use crate::davfs::{DriveFs, split_parent};
use crate::drive::FileEntry;
use crate::error::ApiError;
use crate::proxy::{ProxyUrls, resolve_raw_url};
use crate::users::User;

pub const MOUNT_SEGMENT: &str = "webdav";
const SEGMENT_DENYLIST: [&str; 5] = [".ini", ".inf", "127.0.0.1", "http", "SystemResources"];

/// GET 命中云盘文件时的播放策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PlaybackStrategy {
    /// 302 跳转到云盘直链。
    Redirect,
    /// 由 WebDAV 层转发文件内容。
    Direct,
}

/// 最近一次解析出的播放地址。
#[derive(Clone, Debug, PartialEq)]
pub struct RedirectState {
    pub file_id: String,
    pub url: String,
    pub name: String,
}

/// 规范化路径段：补齐挂载段、按集合去重、剔除黑名单片段。
pub fn normalize_segments<S: AsRef<str>>(segments: &[S]) -> Vec<String> {
    let mut ordered: Vec<&str> = segments
        .iter()
        .map(AsRef::as_ref)
        .filter(|segment| !segment.is_empty())
        .collect();
    if ordered.first() != Some(&MOUNT_SEGMENT) {
        ordered.insert(0, MOUNT_SEGMENT);
    }

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .filter(|segment| seen.insert(*segment))
        .filter(|segment| {
            *segment == MOUNT_SEGMENT
                || !SEGMENT_DENYLIST
                    .iter()
                    .any(|unwanted| segment.contains(unwanted))
        })
        .map(str::to_string)
        .collect()
}

/// 用配置的主机与端口重建请求 URI。
pub fn canonical_uri(host: &str, port: u16, segments: &[String], query: Option<&str>) -> String {
    let host = if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    let mut uri = format!("http://{host}:{port}/{}", segments.join("/"));
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        uri.push('?');
        uri.push_str(query);
    }
    uri
}

pub struct WebDavRouter {
    dav: DavHandler,
    fs: DriveFs,
    proxy: ProxyUrls,
    account_id: String,
    strategy: PlaybackStrategy,
    host: String,
    port: u16,
    redirect: Mutex<Option<RedirectState>>,
}

impl WebDavRouter {
    pub fn new(
        fs: DriveFs,
        proxy: ProxyUrls,
        account_id: &str,
        strategy: PlaybackStrategy,
        host: &str,
        port: u16,
    ) -> Self {
        let dav = DavHandler::builder()
            .strip_prefix(format!("/{MOUNT_SEGMENT}"))
            .locksystem(FakeLs::new())
            .build_handler();
        Self {
            dav,
            fs,
            proxy,
            account_id: account_id.to_string(),
            strategy,
            host: host.to_string(),
            port,
            redirect: Mutex::new(None),
        }
    }

    pub async fn redirect_state(&self) -> Option<RedirectState> {
        self.redirect.lock().await.clone()
    }

    /// 处理一次 WebDAV 请求。
    pub async fn handle(
        &self,
        user: Arc<User>,
        mut req: Request<AxumBody>,
    ) -> Result<Response, ApiError> {
        let raw: Vec<&str> = req.uri().path().split('/').collect();
        let segments = normalize_segments(&raw);
        let canonical = canonical_uri(&self.host, self.port, &segments, req.uri().query());
        *req.uri_mut() = canonical
            .parse::<Uri>()
            .map_err(|_| ApiError::BadRequest("invalid request path".into()))?;

        if req.method() != Method::GET {
            return Ok(self.delegate(user, req).await);
        }

        let path = format!(
            "/{}",
            segments[1..]
                .iter()
                .map(|segment| decode_segment(segment))
                .collect::<Vec<_>>()
                .join("/")
        );
        let Some((parent, name)) = split_parent(&path) else {
            return Ok(self.delegate(user, req).await);
        };
        let Some(file) = self.fs.cache().find_file(&parent, &user.username, &name).await else {
            debug!(path, "get target not cached, delegating");
            return Ok(self.delegate(user, req).await);
        };

        match self.strategy {
            PlaybackStrategy::Redirect => match self.redirect_url(&file).await {
                Some(url) => redirect_response(&url),
                None => Ok(self.delegate(user, req).await),
            },
            PlaybackStrategy::Direct => {
                let mut response = self.delegate(user, req).await;
                let mime = file.mime();
                if mime.contains("video") {
                    inject_stream_headers(&mut response, &mime, file.size);
                }
                Ok(response)
            }
        }
    }

    /// 返回与该文件匹配的跳转地址，缓存不匹配时重新解析。
    async fn redirect_url(&self, file: &FileEntry) -> Option<String> {
        let cached = self.redirect.lock().await.clone();
        if let Some(state) = cached.filter(|state| state.file_id == file.file_id) {
            return Some(state.url);
        }

        match resolve_raw_url(self.fs.api().as_ref(), &self.proxy, &self.account_id, file).await {
            Ok(url) => {
                info!(file_id = %file.file_id, name = %file.name, "redirect url resolved");
                let state = RedirectState {
                    file_id: file.file_id.clone(),
                    url: url.clone(),
                    name: file.name.clone(),
                };
                *self.redirect.lock().await = Some(state);
                Some(url)
            }
            Err(err) => {
                warn!(file_id = %file.file_id, error = %err, "redirect url resolution failed");
                None
            }
        }
    }

    async fn delegate(&self, user: Arc<User>, req: Request<AxumBody>) -> Response {
        let config = DavConfig::new()
            .filesystem(self.fs.for_user(user.clone()))
            .principal(user.username.clone());
        self.dav.handle_with(config, req).await.into_response()
    }
}

fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

fn redirect_response(url: &str) -> Result<Response, ApiError> {
    let location = HeaderValue::from_str(url)
        .map_err(|_| ApiError::Internal("无效的重定向地址".into()))?;
    Ok((
        StatusCode::FOUND,
        [
            (header::LOCATION, location),
            (
                header::HeaderName::from_static("keep-alive"),
                HeaderValue::from_static("true"),
            ),
        ],
    )
        .into_response())
}

fn inject_stream_headers(response: &mut Response, mime: &str, size: u64) {
    let status = response.status();
    let headers = response.headers_mut();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Ok(value) = HeaderValue::from_str(mime) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if status == StatusCode::OK {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    }
}

/// 代理 WebDAV 请求到路由器。
pub async fn webdav_handler(
    Extension(router): Extension<Arc<WebDavRouter>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    req: Request<AxumBody>,
) -> Result<Response, ApiError> {
    router.handle(user, req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use url::Url;

    use crate::cache::StructCache;
    use crate::davfs::tests::{FakeDrive, sample_drive, user};
    use crate::drive::EntryKind;

    fn router(drive: Arc<FakeDrive>, strategy: PlaybackStrategy) -> WebDavRouter {
        let cache = Arc::new(StructCache::new(Duration::from_secs(60)));
        let fs = DriveFs::new(drive, cache, "d");
        let proxy = ProxyUrls::new(Url::parse("http://127.0.0.1:9871").expect("url"));
        WebDavRouter::new(fs, proxy, "account", strategy, "127.0.0.1", 5050)
    }

    async fn warm(router: &WebDavRouter, user: &Arc<User>, dir: &str) {
        router.fs.for_user(user.clone()).list(dir).await.expect("list");
    }

    fn get(path: &str) -> Request<AxumBody> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(AxumBody::empty())
            .expect("request")
    }

    fn location(response: &Response) -> Option<&str> {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
    }

    #[test]
    fn mount_segment_is_prepended_once() {
        let segments = normalize_segments(&["", "TV", "Show", "TV", "a.mkv"]);
        assert_eq!(segments, ["webdav", "TV", "Show", "a.mkv"]);

        let segments = normalize_segments(&["webdav", "TV", "webdav"]);
        assert_eq!(segments, ["webdav", "TV"]);
    }

    #[test]
    fn denylisted_segments_are_dropped_in_order() {
        let segments = normalize_segments(&[
            "webdav",
            "desktop.ini",
            "Movies",
            "127.0.0.1:5050",
            "autorun.inf",
            "http:",
            "SystemResources",
            "Film.mp4",
        ]);
        assert_eq!(segments, ["webdav", "Movies", "Film.mp4"]);
    }

    #[test]
    fn canonical_uri_uses_configured_host() {
        let segments = vec!["webdav".to_string(), "TV".to_string()];
        assert_eq!(
            canonical_uri("127.0.0.1", 5050, &segments, Some("a=1")),
            "http://127.0.0.1:5050/webdav/TV?a=1"
        );
        assert_eq!(
            canonical_uri("::1", 5050, &segments, None),
            "http://[::1]:5050/webdav/TV"
        );
    }

    #[tokio::test]
    async fn redirect_never_reuses_another_files_url() {
        let drive = sample_drive();
        let router = router(drive.clone(), PlaybackStrategy::Redirect);
        let alice = user("alice", "/");
        warm(&router, &alice, "/TV").await;

        let first = router
            .handle(alice.clone(), get("/webdav/TV/Show.S01E01.mkv"))
            .await
            .unwrap_or_else(|_| panic!("first request failed"));
        assert_eq!(first.status(), StatusCode::FOUND);
        assert_eq!(location(&first), Some("https://cdn.example/ep1"));
        assert_eq!(
            first.headers().get("keep-alive").and_then(|v| v.to_str().ok()),
            Some("true")
        );

        let second = router
            .handle(alice.clone(), get("/TV/Show.S01E02.mkv"))
            .await
            .unwrap_or_else(|_| panic!("second request failed"));
        assert_eq!(location(&second), Some("https://cdn.example/ep2"));
        assert_eq!(
            router.redirect_state().await.map(|s| s.file_id),
            Some("ep2".to_string())
        );

        *drive.fail_urls.lock().unwrap() = true;
        let third = router
            .handle(alice, get("/webdav/TV/Show.S01E01.mkv"))
            .await
            .unwrap_or_else(|_| panic!("third request failed"));
        assert_ne!(third.status(), StatusCode::FOUND);
        assert_eq!(location(&third), None);
        assert_eq!(
            router.redirect_state().await.map(|s| s.file_id),
            Some("ep2".to_string())
        );
    }

    #[tokio::test]
    async fn cached_redirect_is_reused_for_same_file() {
        let drive = sample_drive();
        let router = router(drive.clone(), PlaybackStrategy::Redirect);
        let alice = user("alice", "/");
        warm(&router, &alice, "/TV").await;

        for _ in 0..2 {
            let response = router
                .handle(alice.clone(), get("/webdav/TV/Show.S01E01.mkv"))
                .await
                .unwrap_or_else(|_| panic!("request failed"));
            assert_eq!(response.status(), StatusCode::FOUND);
        }
        let resolutions = drive.calls().iter().filter(|c| c.starts_with("url:")).count();
        assert_eq!(resolutions, 1);
    }

    #[tokio::test]
    async fn direct_strategy_keeps_library_body() {
        let drive = sample_drive();
        let router = router(drive, PlaybackStrategy::Direct);
        let alice = user("alice", "/");
        warm(&router, &alice, "/TV").await;

        let response = router
            .handle(alice, get("/webdav/TV/Show.S01E01.mkv"))
            .await
            .unwrap_or_else(|_| panic!("request failed"));
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(headers[header::CONTENT_TYPE], "video/x-matroska");
        assert_eq!(headers[header::CONTENT_LENGTH], "10");

        let body = response.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(&body[..], b"0123456789");
    }

    #[tokio::test]
    async fn direct_strategy_leaves_other_files_to_the_library() {
        let drive = sample_drive();
        drive.add(
            "movies",
            FileEntry {
                file_id: "n1".into(),
                drive_id: "d".into(),
                parent_file_id: "movies".into(),
                name: "notes.txt".into(),
                kind: EntryKind::File,
                mime_type: Some("application/x-drive-note".into()),
                size: 5,
                ..FileEntry::default()
            },
        );
        drive
            .content
            .lock()
            .unwrap()
            .insert("n1".into(), b"hello".to_vec());
        let router = router(drive, PlaybackStrategy::Direct);
        let alice = user("alice", "/");
        warm(&router, &alice, "/Movies").await;

        let response = router
            .handle(alice, get("/webdav/Movies/notes.txt"))
            .await
            .unwrap_or_else(|_| panic!("request failed"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let body = response.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn uncached_get_is_delegated() {
        let drive = sample_drive();
        let router = router(drive.clone(), PlaybackStrategy::Redirect);
        let response = router
            .handle(user("alice", "/"), get("/webdav/Movies/Missing.mp4"))
            .await
            .unwrap_or_else(|_| panic!("request failed"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!drive.calls().iter().any(|c| c.starts_with("url:")));
    }
}
