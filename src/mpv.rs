//! mpv JSON IPC 控制通道。
//!
//! 一条连接上同时承载命令应答与事件：读取任务把事件行解析为
//! [`PlayerEvent`] 并按到达顺序发送到无界 `mpsc` 通道，命令应答按
//! `request_id` 交给等待中的调用方。读取任务从不等待事件消费方，
//! 否则高频的 `time-pos` 会把应答堵在管道里。

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

#[cfg(windows)]
pub const MPV_SOCKET: &str = r"\\.\pipe\mpvserver";
#[cfg(not(windows))]
pub const MPV_SOCKET: &str = "/tmp/mpvserver.sock";

const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_INTERVAL: Duration = Duration::from_millis(100);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

const OBSERVED_PROPERTIES: [(u64, &str); 3] =
    [(1, "playlist-pos"), (2, "time-pos"), (3, "idle-active")];

#[derive(Debug, Error)]
pub enum MpvError {
    #[error("MPV 播放器已在运行")]
    AlreadyRunning,
    #[error("无法启动 MPV: {0}")]
    Spawn(io::Error),
    #[error("无法连接 MPV 控制通道")]
    Connect,
    #[error("MPV 命令失败: {0}")]
    Command(String),
    #[error("MPV 控制通道已关闭")]
    Closed,
    #[error("MPV 命令超时")]
    Timeout,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 播放器状态事件。
#[derive(Clone, Debug, PartialEq)]
pub enum PlayerEvent {
    /// 播放列表位置变化，`-1` 表示没有当前条目。
    PlaylistPos(i64),
    TimePos(f64),
    /// 文件已加载并开始播放。
    Started,
    /// 播放结束进入空闲。
    Stopped,
    Quit,
}

#[derive(Debug, PartialEq)]
enum Incoming {
    Event(PlayerEvent),
    Reply {
        request_id: u64,
        result: Result<Value, String>,
    },
    Ignored,
}

fn parse_line(line: &str) -> Incoming {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Incoming::Ignored;
    };
    if let Some(request_id) = value.get("request_id").and_then(Value::as_u64) {
        let error = value.get("error").and_then(Value::as_str).unwrap_or("success");
        let result = if error == "success" {
            Ok(value.get("data").cloned().unwrap_or(Value::Null))
        } else {
            Err(error.to_string())
        };
        return Incoming::Reply { request_id, result };
    }

    let event = match value.get("event").and_then(Value::as_str) {
        Some("file-loaded") => PlayerEvent::Started,
        Some("shutdown") => PlayerEvent::Quit,
        Some("property-change") => {
            let data = value.get("data");
            match value.get("name").and_then(Value::as_str) {
                Some("playlist-pos") => match data.and_then(Value::as_i64) {
                    Some(pos) => PlayerEvent::PlaylistPos(pos),
                    None => return Incoming::Ignored,
                },
                Some("time-pos") => match data.and_then(Value::as_f64) {
                    Some(pos) => PlayerEvent::TimePos(pos),
                    None => return Incoming::Ignored,
                },
                Some("idle-active") if data.and_then(Value::as_bool) == Some(true) => {
                    PlayerEvent::Stopped
                }
                _ => return Incoming::Ignored,
            }
        }
        _ => return Incoming::Ignored,
    };
    Incoming::Event(event)
}

/// 会话对播放器的控制接口。
#[async_trait]
pub trait PlayerControl: Send + Sync {
    async fn seek_absolute(&self, seconds: f64) -> Result<(), MpvError>;
    async fn add_subtitle(&self, url: &str, title: &str) -> Result<(), MpvError>;
    async fn quit(&self) -> Result<(), MpvError>;
}

trait IpcStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> IpcStream for T {}

#[cfg(unix)]
async fn connect_stream(path: &str) -> io::Result<Box<dyn IpcStream>> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    Ok(Box::new(stream))
}

#[cfg(windows)]
async fn connect_stream(path: &str) -> io::Result<Box<dyn IpcStream>> {
    let client = tokio::net::windows::named_pipe::ClientOptions::new().open(path)?;
    Ok(Box::new(client))
}

type PendingReplies = Arc<StdMutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

pub struct MpvClient {
    writer: Mutex<WriteHalf<Box<dyn IpcStream>>>,
    pending: PendingReplies,
    next_id: AtomicU64,
}

impl MpvClient {
    /// 以空闲模式启动 mpv 并连接控制通道。
    ///
    /// 通道已有进程应答时返回 [`MpvError::AlreadyRunning`]。
    pub async fn launch(
        program: &str,
        args: &[String],
        socket: &str,
        events: mpsc::UnboundedSender<PlayerEvent>,
    ) -> Result<(Self, Child), MpvError> {
        if connect_stream(socket).await.is_ok() {
            return Err(MpvError::AlreadyRunning);
        }
        #[cfg(unix)]
        if Path::new(socket).exists() {
            let _ = tokio::fs::remove_file(socket).await;
        }

        let mut child = Command::new(program)
            .args(args)
            .arg("--idle")
            .arg(format!("--input-ipc-server={socket}"))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(MpvError::Spawn)?;
        info!(program, pid = ?child.id(), "mpv started");

        let stream = match Self::wait_for_socket(&mut child, socket).await {
            Ok(stream) => stream,
            Err(err) => {
                let _ = child.start_kill();
                return Err(err);
            }
        };
        let client = Self::attach(stream, events);
        for (id, name) in OBSERVED_PROPERTIES {
            client.command(json!(["observe_property", id, name])).await?;
        }
        Ok((client, child))
    }

    async fn wait_for_socket(child: &mut Child, socket: &str) -> Result<Box<dyn IpcStream>, MpvError> {
        for _ in 0..CONNECT_ATTEMPTS {
            if let Ok(stream) = connect_stream(socket).await {
                return Ok(stream);
            }
            if let Some(status) = child.try_wait()? {
                warn!(%status, "mpv exited before ipc was ready");
                return Err(MpvError::Connect);
            }
            tokio::time::sleep(CONNECT_INTERVAL).await;
        }
        Err(MpvError::Connect)
    }

    fn attach(stream: Box<dyn IpcStream>, events: mpsc::UnboundedSender<PlayerEvent>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let pending: PendingReplies = Arc::default();
        tokio::spawn(read_loop(BufReader::new(reader), pending.clone(), events));
        Self {
            writer: Mutex::new(writer),
            pending,
            next_id: AtomicU64::new(1),
        }
    }

    /// 发送命令并等待对应 `request_id` 的应答。
    pub async fn command(&self, command: Value) -> Result<Value, MpvError> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(request_id, tx);

        let mut line = serde_json::to_vec(&json!({ "command": command, "request_id": request_id }))
            .map_err(|err| MpvError::Command(err.to_string()))?;
        line.push(b'\n');
        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(&line).await {
                Ok(()) => writer.flush().await,
                Err(err) => Err(err),
            }
        };
        if let Err(err) = written {
            self.lock_pending().remove(&request_id);
            return Err(err.into());
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(message))) => Err(MpvError::Command(message)),
            Ok(Err(_)) => Err(MpvError::Closed),
            Err(_) => {
                self.lock_pending().remove(&request_id);
                Err(MpvError::Timeout)
            }
        }
    }

    fn lock_pending(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Result<Value, String>>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn load_list(&self, path: &Path) -> Result<(), MpvError> {
        self.command(json!(["loadlist", path.to_string_lossy(), "replace"]))
            .await
            .map(drop)
    }

    pub async fn play(&self) -> Result<(), MpvError> {
        self.command(json!(["set_property", "pause", false]))
            .await
            .map(drop)
    }
}

#[async_trait]
impl PlayerControl for MpvClient {
    async fn seek_absolute(&self, seconds: f64) -> Result<(), MpvError> {
        self.command(json!(["seek", seconds, "absolute"]))
            .await
            .map(drop)
    }

    async fn add_subtitle(&self, url: &str, title: &str) -> Result<(), MpvError> {
        self.command(json!(["sub-add", url, "select", title]))
            .await
            .map(drop)
    }

    async fn quit(&self) -> Result<(), MpvError> {
        match self.command(json!(["quit"])).await {
            Ok(_) | Err(MpvError::Closed) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

async fn read_loop<R>(
    mut reader: BufReader<R>,
    pending: PendingReplies,
    events: mpsc::UnboundedSender<PlayerEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "mpv ipc read failed");
                break;
            }
        }
        match parse_line(line.trim_end()) {
            Incoming::Reply { request_id, result } => {
                let waiter = pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(&request_id);
                if let Some(waiter) = waiter {
                    let _ = waiter.send(result);
                }
            }
            Incoming::Event(PlayerEvent::Quit) => break,
            Incoming::Event(event) => {
                if events.send(event).is_err() {
                    debug!("player event receiver dropped");
                    return;
                }
            }
            Incoming::Ignored => {}
        }
    }
    pending
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clear();
    let _ = events.send(PlayerEvent::Quit);
}
