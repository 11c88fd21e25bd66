//! 外部播放器启动：参数构建、播放列表与进度跟踪。

use clap::ValueEnum;
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::drive::{DriveApi, DriveError, EncType, FileEntry, PlayCursor, VideoPreview};
use crate::mpv::{MpvClient, MpvError, PlayerControl};
use crate::playlist::{CurrentItem, PlaylistFile, PlaylistFormat};
use crate::proxy::{ProxyInfo, ProxyInfoStore, ProxyUrls, expires_time, resolve_raw_url};
use crate::session::{PlaybackSession, SessionContext, SessionOptions, run_session};

const OPEN_API_REFERER: &str = "https://openapi.alipan.com/";
const WEB_REFERER: &str = "https://www.alipan.com/";
const ORIGIN_QUALITY: &str = "Origin";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const MPV_BASE_ARGS: [&str; 9] = [
    "--force-window=immediate",
    "--hwdec=auto",
    "--geometry=80%",
    "--autofit-larger=100%x100%",
    "--autofit-smaller=640",
    "--audio-pitch-correction=yes",
    "--keep-open-pause=no",
    "--alang=[en,eng,zh,chi,chs,sc,zho]",
    "--slang=[zh,chi,chs,sc,zho,en,eng]",
];

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("启动失败，找不到文件, {0}")]
    BinaryNotFound(String),
    #[error("播放失败，重复运行MPV播放器")]
    AlreadyRunning,
    #[error("播放失败，{0}")]
    Launch(String),
    #[error("云盘请求失败: {0}")]
    Drive(#[from] DriveError),
}

impl From<MpvError> for PlayerError {
    fn from(err: MpvError) -> Self {
        match err {
            MpvError::AlreadyRunning => PlayerError::AlreadyRunning,
            other => PlayerError::Launch(other.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerKind {
    Mpv,
    PotPlayer,
    Other,
}

impl PlayerKind {
    pub fn detect(binary: &str) -> Self {
        let lower = binary.to_lowercase();
        if lower.contains("mpv") {
            PlayerKind::Mpv
        } else if lower.contains("potplayer") {
            PlayerKind::PotPlayer
        } else {
            PlayerKind::Other
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SubtitleMode {
    #[default]
    Auto,
    Off,
}

/// 云盘账号信息。
#[derive(Clone, Debug)]
pub struct TokenInfo {
    pub user_id: String,
    pub open_api_enable: bool,
}

#[derive(Clone, Debug, Default)]
pub struct PlayerSettings {
    pub playlist: bool,
    pub history: bool,
    pub exit_on_finish: bool,
    pub auto_color: bool,
    pub subtitle_mode: SubtitleMode,
    /// 逗号分隔的 mpv 附加参数。
    pub extra_params: String,
}

/// 一次播放请求。
#[derive(Clone, Debug, Default)]
pub struct LaunchRequest {
    pub file: FileEntry,
    pub subtitle_file: Option<FileEntry>,
    pub cursor: PlayCursor,
    pub preview: Option<VideoPreview>,
    pub quality: String,
    /// 当前目录列表，文件不属于合集时作为播放列表来源。
    pub file_list: Vec<FileEntry>,
}

/// 待执行的播放器命令。
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl PlayerCommand {
    pub fn for_binary(binary: &str) -> Self {
        if cfg!(target_os = "macos") {
            let mut args = vec!["-a".to_string(), binary.to_string()];
            if binary.contains("mpv.app") {
                args.push("--args".into());
            }
            Self {
                program: "open".into(),
                args,
            }
        } else {
            Self {
                program: binary.to_string(),
                args: Vec::new(),
            }
        }
    }

    /// 便于日志查看的命令行文本。
    pub fn to_shell_string(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|arg| quote_arg(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn quote_arg(arg: &str) -> String {
    let plain = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:%,[]".contains(c));
    if plain && !arg.is_empty() {
        arg.to_string()
    } else if cfg!(windows) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// 播放请求使用的 Referer。
pub fn referer_for(open_api_enable: bool) -> &'static str {
    if open_api_enable {
        OPEN_API_REFERER
    } else {
        WEB_REFERER
    }
}

/// 秒数格式化为 `HH:MM:SS`。
pub fn format_resume_position(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, total % 3600 / 60, total % 60)
}

/// 按播放器类型构建参数，保持首次出现顺序去重。
pub fn player_args(
    kind: PlayerKind,
    title: &str,
    referer: &str,
    resume: Option<f64>,
    subtitle_url: Option<&str>,
    extra_params: &str,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    match kind {
        PlayerKind::PotPlayer => {
            args.extend([
                "/new".to_string(),
                "/autoplay".to_string(),
                format!("/referer={referer}"),
                format!("/title={title}"),
            ]);
            if let Some(seconds) = resume {
                args.push(format!("/seek={}", format_resume_position(seconds)));
            }
            if let Some(url) = subtitle_url {
                args.push(format!("/sub={url}"));
            }
        }
        PlayerKind::Mpv => {
            args.extend(MPV_BASE_ARGS.iter().map(|arg| arg.to_string()));
            args.extend([
                format!("--force-media-title={title}"),
                format!("--referrer={referer}"),
                format!("--title={title}"),
            ]);
            if let Some(seconds) = resume {
                args.push(format!("--start={}", format_resume_position(seconds)));
            }
            if let Some(url) = subtitle_url {
                args.push(format!("--sub-file={url}"));
            }
            let extra: String = extra_params.chars().filter(|c| !c.is_whitespace()).collect();
            args.extend(
                extra
                    .split(',')
                    .filter(|param| !param.is_empty())
                    .map(str::to_string),
            );
        }
        PlayerKind::Other => {}
    }

    let mut seen = HashSet::new();
    args.retain(|arg| seen.insert(arg.clone()));
    args
}

/// 从转码信息中挑选播放地址与内嵌字幕。
fn select_from_preview(preview: &VideoPreview, quality: &str) -> (Option<String>, Option<String>) {
    let play_url = preview
        .qualities
        .iter()
        .find(|q| q.quality == quality)
        .or_else(|| preview.qualities.first())
        .map(|q| q.url.clone());
    let subtitle_url = (quality != ORIGIN_QUALITY)
        .then(|| {
            preview
                .subtitles
                .iter()
                .find(|sub| sub.language == "chi")
                .or_else(|| preview.subtitles.first())
                .map(|sub| sub.url.clone())
        })
        .flatten()
        .filter(|url| !url.is_empty());
    (play_url, subtitle_url)
}

/// 正在运行的播放器，完成时已清理临时播放列表。
pub struct PlaybackHandle {
    task: JoinHandle<Option<PlaybackSession>>,
    control: Option<Arc<dyn PlayerControl>>,
}

impl PlaybackHandle {
    /// 等待播放器退出；mpv 控制模式下返回最终会话。
    pub async fn wait(&mut self) -> Option<PlaybackSession> {
        match (&mut self.task).await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "player task failed");
                None
            }
        }
    }

    /// 中途退出：受控的 mpv 先关闭并保存进度，独立启动的播放器保持运行。
    pub async fn shutdown(mut self) -> Option<PlaybackSession> {
        let Some(control) = self.control.take() else {
            self.task.abort();
            return None;
        };
        if let Err(err) = control.quit().await {
            warn!(error = %err, "failed to quit player");
        }
        let finished = tokio::time::timeout(SHUTDOWN_GRACE, self.wait()).await;
        match finished {
            Ok(session) => session,
            Err(_) => {
                warn!("player did not exit in time");
                self.task.abort();
                None
            }
        }
    }
}

pub struct Launcher {
    api: Arc<dyn DriveApi>,
    proxy: ProxyUrls,
    proxy_store: ProxyInfoStore,
    settings: PlayerSettings,
    socket: String,
}

impl Launcher {
    pub fn new(
        api: Arc<dyn DriveApi>,
        proxy: ProxyUrls,
        proxy_store: ProxyInfoStore,
        settings: PlayerSettings,
        socket: &str,
    ) -> Self {
        Self {
            api,
            proxy,
            proxy_store,
            settings,
            socket: socket.to_string(),
        }
    }

    /// 启动播放器；失败时临时播放列表随错误一同释放。
    pub async fn start_player(
        &self,
        token: &TokenInfo,
        binary: &str,
        request: LaunchRequest,
    ) -> Result<PlaybackHandle, PlayerError> {
        if (cfg!(windows) || cfg!(target_os = "macos")) && !Path::new(binary).exists() {
            return Err(PlayerError::BinaryNotFound(binary.to_string()));
        }
        let kind = PlayerKind::detect(binary);
        let mut command = PlayerCommand::for_binary(binary);
        let file = &request.file;
        let enc_type = EncType::from_description(&file.description);
        let referer = referer_for(token.open_api_enable);

        let (preview_url, mut subtitle_url) = match &request.preview {
            Some(preview) => select_from_preview(preview, &request.quality),
            None => (None, None),
        };
        if let Some(subtitle) = &request.subtitle_file {
            match resolve_raw_url(self.api.as_ref(), &self.proxy, &token.user_id, subtitle).await {
                Ok(url) => subtitle_url = Some(url),
                Err(err) => warn!(file_id = %subtitle.file_id, error = %err, "subtitle url unavailable"),
            }
        }

        let resume = (self.settings.history && request.cursor.play_cursor > 0.0)
            .then_some(request.cursor.play_cursor);
        let mut args = player_args(
            kind,
            &file.name,
            referer,
            resume,
            subtitle_url.as_deref(),
            &self.settings.extra_params,
        );

        let mut file_list = Vec::new();
        let mut playlist_items = Vec::new();
        let mut playlist_file = None;
        if self.settings.playlist {
            file_list = self.folder_files(&request).await?;
            playlist_items = file_list
                .iter()
                .filter(|entry| entry.is_video())
                .cloned()
                .collect::<Vec<_>>();
            let format = if kind == PlayerKind::PotPlayer {
                PlaylistFormat::Dpl
            } else {
                PlaylistFormat::M3u
            };
            let current = CurrentItem {
                file_id: file.file_id.clone(),
                duration: request.cursor.play_duration,
                play_cursor: request.cursor.play_cursor,
            };
            let playlist = PlaylistFile::create(
                format,
                &self.proxy,
                &token.user_id,
                &request.quality,
                &playlist_items,
                &current,
            )
            .map_err(|err| PlayerError::Launch(err.to_string()))?;
            let index = playlist_items
                .iter()
                .position(|entry| entry.file_id == file.file_id)
                .unwrap_or(0);
            if kind == PlayerKind::Mpv {
                args.push(format!("--playlist-start={index}"));
            } else {
                args.insert(0, playlist.path().to_string_lossy().into_owned());
            }
            playlist_file = Some(playlist);
        } else {
            let play_url = match &preview_url {
                Some(url) => url.clone(),
                None => resolve_raw_url(self.api.as_ref(), &self.proxy, &token.user_id, file).await?,
            };
            args.insert(0, play_url);
        }

        if let Some(play_url) = preview_url.as_deref()
            && !enc_type.is_encrypted()
        {
            let info = ProxyInfo {
                user_id: token.user_id.clone(),
                drive_id: file.drive_id.clone(),
                file_id: file.file_id.clone(),
                file_size: file.size,
                enc_type,
                video_quality: request.quality.clone(),
                expires_time: expires_time(play_url),
                proxy_url: play_url.to_string(),
                subtitle_url: subtitle_url.clone().unwrap_or_default(),
            };
            if let Err(err) = self.proxy_store.save(&info).await {
                warn!(error = %err, "failed to save proxy info");
            }
        }

        command.args.extend(args);
        info!(command = %command.to_shell_string(), "starting player");

        if kind == PlayerKind::Mpv && (self.settings.playlist || self.settings.history) {
            let session = PlaybackSession::new(&token.user_id, file, playlist_items);
            let ctx = SessionContext {
                api: self.api.clone(),
                proxy: self.proxy.clone(),
                proxy_store: self.proxy_store.clone(),
                file_list,
            };
            self.start_mpv(command, session, ctx, playlist_file).await
        } else {
            spawn_detached(command, playlist_file)
        }
    }

    /// 播放列表来源：合集读取所在目录，否则使用调用方提供的列表。
    async fn folder_files(&self, request: &LaunchRequest) -> Result<Vec<FileEntry>, DriveError> {
        let file = &request.file;
        if file.compilation_id.as_deref().is_none_or(str::is_empty) {
            return Ok(request.file_list.clone());
        }
        let mut files: Vec<FileEntry> = self
            .api
            .list_dir(&file.drive_id, &file.parent_file_id)
            .await?
            .into_iter()
            .filter(|entry| !entry.is_dir())
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn start_mpv(
        &self,
        command: PlayerCommand,
        session: PlaybackSession,
        ctx: SessionContext,
        playlist: Option<PlaylistFile>,
    ) -> Result<PlaybackHandle, PlayerError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (client, mut child) =
            MpvClient::launch(&command.program, &command.args, &self.socket, events_tx).await?;
        let client = Arc::new(client);
        if let Some(playlist) = &playlist {
            let loaded = match client.load_list(playlist.path()).await {
                Ok(()) => client.play().await,
                Err(err) => Err(err),
            };
            if let Err(err) = loaded {
                let _ = client.quit().await;
                return Err(err.into());
            }
        }

        let options = SessionOptions {
            playlist_mode: playlist.is_some(),
            history: self.settings.history,
            auto_color: self.settings.auto_color,
            auto_subtitle: self.settings.subtitle_mode == SubtitleMode::Auto,
            exit_on_finish: self.settings.exit_on_finish,
        };
        let control: Arc<dyn PlayerControl> = client;
        let session_control = control.clone();
        let task = tokio::spawn(async move {
            let session = run_session(session, ctx, options, session_control, events_rx).await;
            if let Err(err) = child.wait().await {
                warn!(error = %err, "failed to wait for mpv");
            }
            drop(playlist);
            Some(session)
        });
        Ok(PlaybackHandle {
            task,
            control: Some(control),
        })
    }
}

fn spawn_detached(
    command: PlayerCommand,
    playlist: Option<PlaylistFile>,
) -> Result<PlaybackHandle, PlayerError> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| PlayerError::Launch(err.to_string()))?;
    debug!(pid = ?child.id(), "player spawned");
    let task = tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => info!(%status, "player exited"),
            Err(err) => warn!(error = %err, "failed to wait for player"),
        }
        drop(playlist);
        None
    });
    Ok(PlaybackHandle {
        task,
        control: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use url::Url;

    use crate::davfs::tests::{FakeDrive, sample_drive, video};
    use crate::drive::{QualityUrl, SubtitleTrack};
    use crate::mpv::PlayerEvent;

    fn launcher(drive: Arc<FakeDrive>, dir: &Path, settings: PlayerSettings) -> Launcher {
        Launcher::new(
            drive,
            ProxyUrls::new(Url::parse("http://127.0.0.1:9871").expect("url")),
            ProxyInfoStore::new(dir.to_path_buf()),
            settings,
            "/tmp/pan-bridge-test.sock",
        )
    }

    #[test]
    fn detects_player_kind() {
        assert_eq!(PlayerKind::detect("/usr/bin/mpv"), PlayerKind::Mpv);
        assert_eq!(
            PlayerKind::detect(r"C:\Program Files\DAUM\PotPlayer\PotPlayerMini64.exe"),
            PlayerKind::PotPlayer
        );
        assert_eq!(PlayerKind::detect("/usr/bin/vlc"), PlayerKind::Other);
    }

    #[test]
    fn resume_position_is_clock_formatted() {
        assert_eq!(format_resume_position(0.0), "00:00:00");
        assert_eq!(format_resume_position(3725.9), "01:02:05");
    }

    #[test]
    fn mpv_args_follow_fixed_order_and_dedupe() {
        let args = player_args(
            PlayerKind::Mpv,
            "Film.mp4",
            WEB_REFERER,
            Some(90.0),
            Some("https://sub/1.srt"),
            " --hwdec=auto , --volume=50,",
        );
        assert_eq!(args[..MPV_BASE_ARGS.len()], MPV_BASE_ARGS);
        assert_eq!(
            args[MPV_BASE_ARGS.len()..],
            [
                "--force-media-title=Film.mp4",
                "--referrer=https://www.alipan.com/",
                "--title=Film.mp4",
                "--start=00:01:30",
                "--sub-file=https://sub/1.srt",
                "--volume=50",
            ]
        );
    }

    #[test]
    fn potplayer_args() {
        let args = player_args(
            PlayerKind::PotPlayer,
            "Film.mp4",
            OPEN_API_REFERER,
            None,
            None,
            "--ignored",
        );
        assert_eq!(
            args,
            [
                "/new",
                "/autoplay",
                "/referer=https://openapi.alipan.com/",
                "/title=Film.mp4"
            ]
        );
    }

    #[test]
    fn preview_prefers_requested_quality_and_chinese_subtitles() {
        let preview = VideoPreview {
            qualities: vec![
                QualityUrl {
                    quality: "SD".into(),
                    url: "https://v/sd".into(),
                },
                QualityUrl {
                    quality: "FHD".into(),
                    url: "https://v/fhd".into(),
                },
            ],
            subtitles: vec![
                SubtitleTrack {
                    language: "eng".into(),
                    url: "https://s/eng".into(),
                },
                SubtitleTrack {
                    language: "chi".into(),
                    url: "https://s/chi".into(),
                },
            ],
        };
        assert_eq!(
            select_from_preview(&preview, "FHD"),
            (Some("https://v/fhd".into()), Some("https://s/chi".into()))
        );
        assert_eq!(
            select_from_preview(&preview, "Origin"),
            (Some("https://v/sd".into()), None)
        );
    }

    #[test]
    fn shell_string_quotes_spaces() {
        let command = PlayerCommand {
            program: "/usr/bin/mpv".into(),
            args: vec!["--title=My Film".into(), "--hwdec=auto".into()],
        };
        let rendered = command.to_shell_string();
        if cfg!(windows) {
            assert_eq!(rendered, r#"/usr/bin/mpv "--title=My Film" --hwdec=auto"#);
        } else {
            assert_eq!(rendered, "/usr/bin/mpv '--title=My Film' --hwdec=auto");
        }
    }

    #[tokio::test]
    async fn compilation_files_come_from_parent_folder() {
        let drive = sample_drive();
        let dir = tempfile::tempdir().expect("tempdir");
        let launcher = launcher(drive.clone(), dir.path(), PlayerSettings::default());
        let mut file = video("ep2", "tv", "Show.S01E02.mkv", 20);
        file.compilation_id = Some("c1".into());
        let request = LaunchRequest {
            file,
            file_list: vec![video("x", "other", "Other.mkv", 1)],
            ..LaunchRequest::default()
        };
        let names: Vec<String> = launcher
            .folder_files(&request)
            .await
            .expect("files")
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, ["Show.S01E01.mkv", "Show.S01E02.mkv"]);
        assert!(drive.calls().contains(&"list:tv".to_string()));

        let plain = LaunchRequest {
            file: video("ep2", "tv", "Show.S01E02.mkv", 20),
            file_list: vec![video("x", "other", "Other.mkv", 1)],
            ..LaunchRequest::default()
        };
        let names: Vec<String> = launcher
            .folder_files(&plain)
            .await
            .expect("files")
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, ["Other.mkv"]);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn missing_binary_fails_to_launch() {
        let drive = sample_drive();
        let dir = tempfile::tempdir().expect("tempdir");
        let launcher = launcher(drive, dir.path(), PlayerSettings::default());
        let token = TokenInfo {
            user_id: "u1".into(),
            open_api_enable: true,
        };
        let request = LaunchRequest {
            file: video("ep1", "tv", "Show.S01E01.mkv", 10),
            ..LaunchRequest::default()
        };
        let err = launcher
            .start_player(&token, "/nonexistent/vlc-player", request)
            .await
            .err()
            .expect("launch error");
        assert!(err.to_string().starts_with("播放失败，"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn playlist_launch_does_not_need_a_download_url() {
        let drive = sample_drive();
        *drive.fail_urls.lock().unwrap() = true;
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = PlayerSettings {
            playlist: true,
            ..PlayerSettings::default()
        };
        let launcher = launcher(drive.clone(), dir.path(), settings);
        let token = TokenInfo {
            user_id: "u1".into(),
            open_api_enable: true,
        };
        let request = LaunchRequest {
            file: video("ep1", "tv", "Show.S01E01.mkv", 10),
            file_list: vec![
                video("ep1", "tv", "Show.S01E01.mkv", 10),
                video("ep2", "tv", "Show.S01E02.mkv", 20),
            ],
            ..LaunchRequest::default()
        };
        let mut handle = launcher
            .start_player(&token, "/bin/true", request)
            .await
            .expect("playlist launch");
        assert!(handle.wait().await.is_none());
        assert!(!drive.calls().iter().any(|call| call.starts_with("url:")));
    }

    struct QuitOnRequest(mpsc::UnboundedSender<PlayerEvent>);

    #[async_trait]
    impl PlayerControl for QuitOnRequest {
        async fn seek_absolute(&self, _seconds: f64) -> Result<(), MpvError> {
            Ok(())
        }

        async fn add_subtitle(&self, _url: &str, _title: &str) -> Result<(), MpvError> {
            Ok(())
        }

        async fn quit(&self) -> Result<(), MpvError> {
            self.0.send(PlayerEvent::Quit).map_err(|_| MpvError::Closed)
        }
    }

    #[tokio::test]
    async fn shutdown_quits_player_and_saves_position() {
        let drive = sample_drive();
        let dir = tempfile::tempdir().expect("tempdir");
        let file = video("ep1", "tv", "Show.S01E01.mkv", 10);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        events_tx.send(PlayerEvent::Started).expect("send");
        events_tx.send(PlayerEvent::TimePos(33.0)).expect("send");

        let control: Arc<dyn PlayerControl> = Arc::new(QuitOnRequest(events_tx));
        let session = PlaybackSession::new("u1", &file, Vec::new());
        let ctx = SessionContext {
            api: drive.clone(),
            proxy: ProxyUrls::new(Url::parse("http://127.0.0.1:9871").expect("url")),
            proxy_store: ProxyInfoStore::new(dir.path().to_path_buf()),
            file_list: Vec::new(),
        };
        let options = SessionOptions {
            history: true,
            ..SessionOptions::default()
        };
        let session_control = control.clone();
        let handle = PlaybackHandle {
            task: tokio::spawn(async move {
                Some(run_session(session, ctx, options, session_control, events_rx).await)
            }),
            control: Some(control),
        };

        let session = handle.shutdown().await.expect("session");
        assert_eq!(session.current_time, 33.0);
        assert!(drive.calls().contains(&"time:ep1:33".to_string()));
    }
}
