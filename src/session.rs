//! 播放会话：顺序消费播放器事件，记录进度并回写云盘。

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::drive::{DriveApi, FileEntry, PlayCursor};
use crate::mpv::{PlayerControl, PlayerEvent};
use crate::proxy::{ProxyInfoStore, ProxyUrls, resolve_raw_url};
use crate::subtitle::pick_subtitle;

/// 已看完文件的颜色标记。
pub const WATCHED_MARKER: &str = "ce74c3c";

#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackSession {
    pub user_id: String,
    pub drive_id: String,
    pub current_file_id: Option<String>,
    pub current_time: f64,
    pub playlist: Vec<FileEntry>,
}

impl PlaybackSession {
    pub fn new(user_id: &str, file: &FileEntry, playlist: Vec<FileEntry>) -> Self {
        Self {
            user_id: user_id.to_string(),
            drive_id: file.drive_id.clone(),
            current_file_id: Some(file.file_id.clone()),
            current_time: 0.0,
            playlist,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SessionOptions {
    pub playlist_mode: bool,
    pub history: bool,
    pub auto_color: bool,
    pub auto_subtitle: bool,
    pub exit_on_finish: bool,
}

/// 会话处理所需的外部依赖。
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub api: Arc<dyn DriveApi>,
    pub proxy: ProxyUrls,
    pub proxy_store: ProxyInfoStore,
    /// 当前目录的全部文件，用于匹配字幕。
    pub file_list: Vec<FileEntry>,
}

/// 处理事件直到播放器退出，返回最终会话状态。
///
/// 以 `--idle` 启动的 mpv 在载入文件前就会报告空闲，只有文件开始播放后
/// 再进入空闲才算播放结束。
pub async fn run_session(
    mut session: PlaybackSession,
    ctx: SessionContext,
    options: SessionOptions,
    control: Arc<dyn PlayerControl>,
    mut events: mpsc::UnboundedReceiver<PlayerEvent>,
) -> PlaybackSession {
    let mut pending_start: Option<usize> = None;
    let mut playing = false;
    while let Some(event) = events.recv().await {
        match event {
            PlayerEvent::PlaylistPos(pos) if options.playlist_mode => {
                let Ok(index) = usize::try_from(pos) else {
                    continue;
                };
                if index >= session.playlist.len() {
                    debug!(index, "playlist position out of range");
                    continue;
                }
                switch_item(&mut session, &ctx, options, index).await;
                pending_start = Some(index);
            }
            PlayerEvent::PlaylistPos(_) => {}
            PlayerEvent::TimePos(pos) => session.current_time = pos,
            PlayerEvent::Started => {
                playing = true;
                if let Some(index) = pending_start.take() {
                    on_item_started(&session, &ctx, options, control.as_ref(), index).await;
                }
            }
            PlayerEvent::Stopped if !playing => {
                debug!("player idle before playback, ignored");
            }
            PlayerEvent::Stopped if options.exit_on_finish => {
                playing = false;
                info!("playback finished, closing player");
                persist_position(&session, &ctx).await;
                if let Err(err) = control.quit().await {
                    warn!(error = %err, "failed to quit player");
                }
            }
            PlayerEvent::Stopped => playing = false,
            PlayerEvent::Quit => {
                persist_position(&session, &ctx).await;
                break;
            }
        }
    }
    info!(file_id = ?session.current_file_id, "playback session ended");
    session
}

async fn persist_position(session: &PlaybackSession, ctx: &SessionContext) {
    let Some(file_id) = session.current_file_id.as_deref() else {
        return;
    };
    if let Err(err) = ctx
        .api
        .update_video_time(&session.drive_id, file_id, session.current_time)
        .await
    {
        warn!(file_id, error = %err, "failed to save play position");
    }
}

async fn switch_item(
    session: &mut PlaybackSession,
    ctx: &SessionContext,
    options: SessionOptions,
    index: usize,
) {
    if session.current_time > 0.0 {
        persist_position(session, ctx).await;
    }
    let item = &mut session.playlist[index];
    session.current_file_id = Some(item.file_id.clone());
    session.current_time = 0.0;
    debug!(file_id = %item.file_id, index, "playlist item changed");

    if options.auto_color && !item.description.contains(WATCHED_MARKER) {
        let description = if item.description.is_empty() {
            WATCHED_MARKER.to_string()
        } else {
            format!("{},{WATCHED_MARKER}", item.description)
        };
        match ctx
            .api
            .update_description(&item.drive_id, &item.file_id, &description)
            .await
        {
            Ok(()) => item.description = description,
            Err(err) => warn!(file_id = %item.file_id, error = %err, "failed to tag file"),
        }
    }
}

async fn on_item_started(
    session: &PlaybackSession,
    ctx: &SessionContext,
    options: SessionOptions,
    control: &dyn PlayerControl,
    index: usize,
) {
    let item = &session.playlist[index];
    if options.history {
        match ctx.api.file_info(&session.drive_id, &item.file_id).await {
            Ok(info) => {
                let cursor = PlayCursor::from_entry(&info);
                if cursor.play_cursor > 0.0
                    && let Err(err) = control.seek_absolute(cursor.play_cursor).await
                {
                    warn!(file_id = %item.file_id, error = %err, "resume seek failed");
                }
            }
            Err(err) => warn!(file_id = %item.file_id, error = %err, "failed to read play cursor"),
        }
    }

    if !options.auto_subtitle {
        return;
    }
    if let Some((url, title)) = subtitle_for(session, ctx, item).await
        && let Err(err) = control.add_subtitle(&url, &title).await
    {
        warn!(file_id = %item.file_id, error = %err, "failed to add subtitle");
    }
}

/// 优先使用最近代理信息中的字幕，否则在目录中匹配同名字幕。
async fn subtitle_for(
    session: &PlaybackSession,
    ctx: &SessionContext,
    item: &FileEntry,
) -> Option<(String, String)> {
    match ctx.proxy_store.load().await {
        Ok(Some(info)) if !info.subtitle_url.is_empty() => {
            return Some((info.subtitle_url, item.name.clone()));
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "failed to read proxy info"),
    }

    let subtitle = pick_subtitle(&item.name, &ctx.file_list)?;
    match resolve_raw_url(ctx.api.as_ref(), &ctx.proxy, &session.user_id, subtitle).await {
        Ok(url) => Some((url, subtitle.name.clone())),
        Err(err) => {
            warn!(file_id = %subtitle.file_id, error = %err, "failed to resolve subtitle url");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use url::Url;

    use crate::davfs::tests::{FakeDrive, sample_drive};
    use crate::drive::EntryKind;
    use crate::mpv::MpvError;
    use crate::proxy::ProxyInfo;

    #[derive(Default)]
    struct RecordingControl {
        commands: Mutex<Vec<String>>,
    }

    impl RecordingControl {
        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlayerControl for RecordingControl {
        async fn seek_absolute(&self, seconds: f64) -> Result<(), MpvError> {
            self.commands.lock().unwrap().push(format!("seek:{seconds}"));
            Ok(())
        }

        async fn add_subtitle(&self, url: &str, title: &str) -> Result<(), MpvError> {
            self.commands.lock().unwrap().push(format!("sub:{url}:{title}"));
            Ok(())
        }

        async fn quit(&self) -> Result<(), MpvError> {
            self.commands.lock().unwrap().push("quit".into());
            Ok(())
        }
    }

    fn context(drive: Arc<FakeDrive>, data_dir: &std::path::Path) -> SessionContext {
        let file_list = drive.folders.lock().unwrap().get("tv").cloned().unwrap_or_default();
        SessionContext {
            api: drive,
            proxy: ProxyUrls::new(Url::parse("http://127.0.0.1:9871").expect("url")),
            proxy_store: ProxyInfoStore::new(data_dir.to_path_buf()),
            file_list,
        }
    }

    fn playlist(drive: &FakeDrive) -> Vec<FileEntry> {
        drive.folders.lock().unwrap()["tv"]
            .iter()
            .filter(|f| f.is_video())
            .cloned()
            .collect()
    }

    async fn run(
        drive: Arc<FakeDrive>,
        options: SessionOptions,
        events: Vec<PlayerEvent>,
        data_dir: &std::path::Path,
    ) -> (PlaybackSession, Arc<RecordingControl>) {
        let items = playlist(&drive);
        let session = PlaybackSession::new("u1", &items[0], items.clone());
        let control = Arc::new(RecordingControl::default());
        let (tx, rx) = mpsc::unbounded_channel();
        for event in events {
            tx.send(event).expect("send");
        }
        drop(tx);
        let ctx = context(drive, data_dir);
        let session = run_session(session, ctx, options, control.clone(), rx).await;
        (session, control)
    }

    #[tokio::test]
    async fn position_change_persists_previous_file_first() {
        let drive = sample_drive();
        let dir = tempfile::tempdir().expect("tempdir");
        let options = SessionOptions {
            playlist_mode: true,
            auto_color: true,
            ..SessionOptions::default()
        };
        let (session, _) = run(
            drive.clone(),
            options,
            vec![
                PlayerEvent::PlaylistPos(0),
                PlayerEvent::TimePos(42.0),
                PlayerEvent::PlaylistPos(1),
                PlayerEvent::TimePos(7.5),
                PlayerEvent::Quit,
            ],
            dir.path(),
        )
        .await;

        assert_eq!(session.current_file_id.as_deref(), Some("ep2"));
        let writes: Vec<String> = drive
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("time:") || c.starts_with("desc:"))
            .collect();
        assert_eq!(
            writes,
            [
                format!("desc:ep1:{WATCHED_MARKER}"),
                "time:ep1:42".to_string(),
                format!("desc:ep2:{WATCHED_MARKER}"),
                "time:ep2:7.5".to_string(),
            ]
        );
        assert!(session.playlist[1].description.contains(WATCHED_MARKER));
    }

    #[tokio::test]
    async fn started_seeks_to_history_and_matches_subtitle() {
        let drive = sample_drive();
        {
            let mut folders = drive.folders.lock().unwrap();
            let tv = folders.get_mut("tv").expect("tv");
            tv[1].play_cursor = Some("120".into());
            tv.push(FileEntry {
                file_id: "s1".into(),
                drive_id: "d".into(),
                name: "Show.S01E01.srt".into(),
                kind: EntryKind::File,
                ..FileEntry::default()
            });
            tv.push(FileEntry {
                file_id: "s2".into(),
                drive_id: "d".into(),
                name: "Show.S01E02.srt".into(),
                kind: EntryKind::File,
                ..FileEntry::default()
            });
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let options = SessionOptions {
            playlist_mode: true,
            history: true,
            auto_subtitle: true,
            ..SessionOptions::default()
        };
        let (_, control) = run(
            drive,
            options,
            vec![PlayerEvent::PlaylistPos(1), PlayerEvent::Started, PlayerEvent::Quit],
            dir.path(),
        )
        .await;

        assert_eq!(
            control.commands(),
            ["seek:120", "sub:https://cdn.example/s2:Show.S01E02.srt"]
        );
    }

    #[tokio::test]
    async fn proxy_info_subtitle_takes_priority() {
        let drive = sample_drive();
        let dir = tempfile::tempdir().expect("tempdir");
        ProxyInfoStore::new(dir.path().to_path_buf())
            .save(&ProxyInfo {
                subtitle_url: "https://sub.example/chi.vtt".into(),
                ..ProxyInfo::default()
            })
            .await
            .expect("save");
        let options = SessionOptions {
            playlist_mode: true,
            auto_subtitle: true,
            ..SessionOptions::default()
        };
        let (_, control) = run(
            drive,
            options,
            vec![PlayerEvent::PlaylistPos(0), PlayerEvent::Started, PlayerEvent::Quit],
            dir.path(),
        )
        .await;
        assert_eq!(
            control.commands(),
            ["sub:https://sub.example/chi.vtt:Show.S01E01.mkv"]
        );
    }

    #[tokio::test]
    async fn stream_end_quits_when_configured() {
        let drive = sample_drive();
        let dir = tempfile::tempdir().expect("tempdir");
        let options = SessionOptions {
            exit_on_finish: true,
            ..SessionOptions::default()
        };
        let (session, control) = run(
            drive.clone(),
            options,
            vec![
                PlayerEvent::Started,
                PlayerEvent::TimePos(19.0),
                PlayerEvent::Stopped,
                PlayerEvent::Quit,
            ],
            dir.path(),
        )
        .await;
        assert_eq!(control.commands(), ["quit"]);
        assert_eq!(session.current_time, 19.0);
        let times: Vec<String> = drive
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("time:"))
            .collect();
        assert_eq!(times, ["time:ep1:19", "time:ep1:19"]);
    }

    #[tokio::test]
    async fn idle_before_first_file_is_not_stream_end() {
        let drive = sample_drive();
        let dir = tempfile::tempdir().expect("tempdir");
        let options = SessionOptions {
            playlist_mode: true,
            exit_on_finish: true,
            ..SessionOptions::default()
        };
        let (session, control) = run(
            drive.clone(),
            options,
            vec![
                PlayerEvent::PlaylistPos(-1),
                PlayerEvent::Stopped,
                PlayerEvent::PlaylistPos(1),
                PlayerEvent::Started,
                PlayerEvent::TimePos(5.0),
                PlayerEvent::Quit,
            ],
            dir.path(),
        )
        .await;

        assert!(control.commands().is_empty());
        assert_eq!(session.current_file_id.as_deref(), Some("ep2"));
        let times: Vec<String> = drive
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("time:"))
            .collect();
        assert_eq!(times, ["time:ep2:5"]);
    }

    #[tokio::test]
    async fn playlist_events_ignored_outside_playlist_mode() {
        let drive = sample_drive();
        let dir = tempfile::tempdir().expect("tempdir");
        let (session, control) = run(
            drive,
            SessionOptions::default(),
            vec![PlayerEvent::PlaylistPos(1), PlayerEvent::Started, PlayerEvent::Quit],
            dir.path(),
        )
        .await;
        assert_eq!(session.current_file_id.as_deref(), Some("ep1"));
        assert!(control.commands().is_empty());
    }
}
