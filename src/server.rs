//! WebDAV 服务封装：组装路由、监听端口与幂等停止。

use axum::extract::{Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::{Router, middleware};
use axum_server::Handle;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, info_span, warn};

use crate::auth::auth_middleware;
use crate::http::{build_cors_layer, dav_options, resolve_client_ip};
use crate::router::{WebDavRouter, webdav_handler};
use crate::users::UserStore;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("请先添加用户")]
    NoUsers,
    #[error("端口{0}已被占用")]
    PortInUse(u16),
    #[error("WebDAV 服务已在运行")]
    AlreadyRunning,
    #[error("无效的监听地址: {0}")]
    InvalidHost(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub cors: bool,
    pub cors_origins: Option<String>,
}

struct Running {
    handle: Handle,
    task: JoinHandle<std::io::Result<()>>,
    addr: SocketAddr,
}

pub struct WebDavServer {
    options: ServerOptions,
    users: Arc<UserStore>,
    router: Arc<WebDavRouter>,
    running: Mutex<Option<Running>>,
}

impl WebDavServer {
    pub fn new(options: ServerOptions, users: Arc<UserStore>, router: Arc<WebDavRouter>) -> Self {
        Self {
            options,
            users,
            router,
            running: Mutex::new(None),
        }
    }

    /// 构建完整的 axum 应用（认证、OPTIONS、追踪与 CORS）。
    pub fn app(&self) -> Router {
        let mut app = Router::new()
            .fallback(webdav_handler)
            .layer(middleware::from_fn(auth_middleware));
        if self.options.cors {
            app = app.layer(middleware::from_fn(dav_options));
        }
        app = app
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(|request: &Request<_>| {
                        let connect_ip = request
                            .extensions()
                            .get::<ConnectInfo<SocketAddr>>()
                            .map(|ConnectInfo(addr)| addr.ip());
                        let client_ip = resolve_client_ip(request.headers(), connect_ip)
                            .map(|ip| ip.to_string())
                            .unwrap_or_else(|| "unknown".to_string());
                        info_span!(
                            env!("CARGO_CRATE_NAME"),
                            client_ip = %client_ip,
                            method = ?request.method(),
                            path = ?request.uri().path(),
                        )
                    })
                    .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                    .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
            )
            .layer(Extension(self.users.clone()))
            .layer(Extension(self.router.clone()));
        if self.options.cors
            && let Some(cors_layer) = build_cors_layer(self.options.cors_origins.as_deref())
        {
            app = app.layer(cors_layer);
        }
        app
    }

    /// 启动监听；没有用户或端口被占用时返回对应错误。
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        if self.users.is_empty().await {
            error!("webdav server start refused: no users configured");
            return Err(ServerError::NoUsers);
        }
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let host = self
            .options
            .host
            .parse::<IpAddr>()
            .map_err(|_| ServerError::InvalidHost(self.options.host.clone()))?;
        let listener = match TcpListener::bind(SocketAddr::new(host, self.options.port)) {
            Ok(listener) => listener,
            Err(err) if err.kind() == ErrorKind::AddrInUse => {
                warn!(port = self.options.port, "webdav port already in use");
                return Err(ServerError::PortInUse(self.options.port));
            }
            Err(err) => return Err(err.into()),
        };
        if let Err(err) = listener.set_nonblocking(true) {
            drop(listener);
            return Err(err.into());
        }
        let addr = listener.local_addr()?;

        let handle = Handle::new();
        let server = axum_server::from_tcp(listener)
            .handle(handle.clone())
            .serve(self.app().into_make_service_with_connect_info::<SocketAddr>());
        let task = tokio::spawn(server);
        info!("🚀 WebDAV server listening at http://{}/webdav", addr);

        *running = Some(Running { handle, task, addr });
        Ok(addr)
    }

    /// 停止服务：未运行返回 `false`，关闭失败也只返回 `false`。
    pub async fn stop(&self) -> bool {
        let Some(Running { handle, task, addr }) = self.running.lock().await.take() else {
            return false;
        };
        handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        match task.await {
            Ok(Ok(())) => {
                info!(%addr, "webdav server stopped");
                true
            }
            Ok(Err(err)) => {
                warn!(%addr, error = %err, "webdav server exited with error");
                false
            }
            Err(err) => {
                warn!(%addr, error = %err, "webdav server task failed");
                false
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}
