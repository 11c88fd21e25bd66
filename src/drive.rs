//! 云盘开放接口客户端：文件列表、下载地址、转码信息与观看记录。

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, RANGE, REFERER};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_API_BASE: &str = "https://openapi.alipan.com";
const LIST_PAGE_LIMIT: u32 = 100;
const DOWNLOAD_URL_EXPIRE_SECS: u64 = 4 * 60 * 60;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("云盘请求失败: {0}")]
    Http(#[from] reqwest::Error),
    #[error("云盘接口返回错误 {status}: {message}")]
    Api { status: u16, message: String },
    #[error("文件不存在: {0}")]
    NotFound(String),
    #[error("接口未返回可用地址")]
    EmptyUrl,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    File,
    Folder,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct VideoMediaMetadata {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub duration: f64,
}

/// 云盘文件条目。
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct FileEntry {
    pub file_id: String,
    pub drive_id: String,
    #[serde(default)]
    pub parent_file_id: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub file_extension: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub play_cursor: Option<String>,
    #[serde(default)]
    pub user_meta: Option<String>,
    #[serde(default)]
    pub video_media_metadata: Option<VideoMediaMetadata>,
    #[serde(default)]
    pub compilation_id: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Folder
    }

    pub fn is_video(&self) -> bool {
        self.category.contains("video")
    }

    /// 文件扩展名（小写），接口未返回时从文件名推断。
    pub fn ext(&self) -> String {
        if !self.file_extension.is_empty() {
            return self.file_extension.to_lowercase();
        }
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default()
    }

    /// 返回 MIME 类型，接口缺失时按文件名猜测。
    pub fn mime(&self) -> String {
        match self.mime_type.as_deref() {
            Some(mime) if !mime.is_empty() => mime.to_string(),
            _ => mime_guess::from_path(&self.name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        }
    }
}

/// 由文件描述推导的加密类型。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncType {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "xbyEncrypt1")]
    Encrypt1,
    #[serde(rename = "xbyEncrypt2")]
    Encrypt2,
}

impl EncType {
    pub fn from_description(description: &str) -> Self {
        if description.contains("xbyEncrypt1") {
            EncType::Encrypt1
        } else if description.contains("xbyEncrypt2") {
            EncType::Encrypt2
        } else {
            EncType::None
        }
    }

    pub fn is_encrypted(self) -> bool {
        self != EncType::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EncType::None => "",
            EncType::Encrypt1 => "xbyEncrypt1",
            EncType::Encrypt2 => "xbyEncrypt2",
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DownloadUrl {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QualityUrl {
    pub quality: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubtitleTrack {
    pub language: String,
    pub url: String,
}

/// 转码播放信息（画质列表与内嵌字幕）。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VideoPreview {
    pub qualities: Vec<QualityUrl>,
    pub subtitles: Vec<SubtitleTrack>,
}

/// 播放进度与时长（秒）。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlayCursor {
    pub play_duration: f64,
    pub play_cursor: f64,
}

impl PlayCursor {
    /// 从文件信息读取进度，接近结尾时回退 10 秒以免直接跳到片尾。
    pub fn from_entry(entry: &FileEntry) -> Self {
        let meta: Option<Value> = entry
            .user_meta
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        let meta_number = |key: &str| {
            meta.as_ref().and_then(|meta| match meta.get(key)? {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
        };

        let play_duration = entry
            .video_media_metadata
            .as_ref()
            .map(|m| m.duration)
            .filter(|d| *d > 0.0)
            .or_else(|| meta_number("duration"))
            .unwrap_or(0.0);
        let mut play_cursor = entry
            .play_cursor
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|c| *c > 0.0)
            .or_else(|| meta_number("play_cursor"))
            .unwrap_or(0.0);

        if play_duration > 0.0 && play_cursor >= play_duration - 10.0 {
            play_cursor = (play_duration - 10.0).max(0.0);
        }
        Self {
            play_duration,
            play_cursor,
        }
    }
}

/// 云盘接口抽象，便于替换实现与测试。
#[async_trait]
pub trait DriveApi: Send + Sync + fmt::Debug {
    async fn list_dir(&self, drive_id: &str, parent_file_id: &str)
    -> Result<Vec<FileEntry>, DriveError>;
    async fn file_info(&self, drive_id: &str, file_id: &str) -> Result<FileEntry, DriveError>;
    async fn download_url(&self, drive_id: &str, file_id: &str)
    -> Result<DownloadUrl, DriveError>;
    async fn video_preview(&self, drive_id: &str, file_id: &str)
    -> Result<VideoPreview, DriveError>;
    async fn update_video_time(
        &self,
        drive_id: &str,
        file_id: &str,
        play_cursor: f64,
    ) -> Result<(), DriveError>;
    async fn update_description(
        &self,
        drive_id: &str,
        file_id: &str,
        description: &str,
    ) -> Result<(), DriveError>;
    async fn create_folder(
        &self,
        drive_id: &str,
        parent_file_id: &str,
        name: &str,
    ) -> Result<FileEntry, DriveError>;
    async fn trash(&self, drive_id: &str, file_id: &str) -> Result<(), DriveError>;
    async fn rename(&self, drive_id: &str, file_id: &str, name: &str) -> Result<(), DriveError>;
    async fn move_file(
        &self,
        drive_id: &str,
        file_id: &str,
        to_parent_file_id: &str,
        new_name: Option<&str>,
    ) -> Result<(), DriveError>;
    /// 读取下载地址上 `[start, end]` 闭区间的字节。
    async fn fetch_range(&self, url: &str, start: u64, end: u64) -> Result<Bytes, DriveError>;
}

/// 基于 reqwest 的开放接口实现。
#[derive(Clone, Debug)]
pub struct HttpDrive {
    client: reqwest::Client,
    base: String,
    access_token: String,
    referer: String,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<FileEntry>,
    #[serde(default)]
    next_marker: String,
}

#[derive(Deserialize)]
struct PreviewResponse {
    video_preview_play_info: Option<PreviewPlayInfo>,
}

#[derive(Deserialize)]
struct PreviewPlayInfo {
    #[serde(default)]
    live_transcoding_task_list: Vec<PreviewTask>,
    #[serde(default)]
    live_transcoding_subtitle_task_list: Vec<PreviewSubtitle>,
}

#[derive(Deserialize)]
struct PreviewTask {
    template_id: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct PreviewSubtitle {
    #[serde(default)]
    language: String,
    #[serde(default)]
    url: String,
}

impl HttpDrive {
    pub fn new(base: &str, access_token: &str, referer: &str) -> Result<Self, DriveError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            referer: referer.to_string(),
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, DriveError> {
        let url = format!("{}{}", self.base, path);
        debug!(url, "drive api request");
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text);
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(DriveError::NotFound(message));
            }
            return Err(DriveError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl DriveApi for HttpDrive {
    async fn list_dir(
        &self,
        drive_id: &str,
        parent_file_id: &str,
    ) -> Result<Vec<FileEntry>, DriveError> {
        let mut items = Vec::new();
        let mut marker = String::new();
        loop {
            let page: ListResponse = self
                .post(
                    "/adrive/v1.0/openFile/list",
                    json!({
                        "drive_id": drive_id,
                        "parent_file_id": parent_file_id,
                        "limit": LIST_PAGE_LIMIT,
                        "marker": marker,
                        "order_by": "name",
                        "order_direction": "ASC",
                    }),
                )
                .await?;
            items.extend(page.items);
            if page.next_marker.is_empty() {
                break;
            }
            marker = page.next_marker;
        }
        Ok(items)
    }

    async fn file_info(&self, drive_id: &str, file_id: &str) -> Result<FileEntry, DriveError> {
        self.post(
            "/adrive/v1.0/openFile/get",
            json!({ "drive_id": drive_id, "file_id": file_id }),
        )
        .await
    }

    async fn download_url(
        &self,
        drive_id: &str,
        file_id: &str,
    ) -> Result<DownloadUrl, DriveError> {
        let data: DownloadUrl = self
            .post(
                "/adrive/v1.0/openFile/getDownloadUrl",
                json!({
                    "drive_id": drive_id,
                    "file_id": file_id,
                    "expire_sec": DOWNLOAD_URL_EXPIRE_SECS,
                }),
            )
            .await?;
        if data.url.is_empty() {
            return Err(DriveError::EmptyUrl);
        }
        Ok(data)
    }

    async fn video_preview(
        &self,
        drive_id: &str,
        file_id: &str,
    ) -> Result<VideoPreview, DriveError> {
        let data: PreviewResponse = self
            .post(
                "/adrive/v1.0/openFile/getVideoPreviewPlayInfo",
                json!({
                    "drive_id": drive_id,
                    "file_id": file_id,
                    "category": "live_transcoding",
                }),
            )
            .await?;
        let Some(info) = data.video_preview_play_info else {
            return Ok(VideoPreview::default());
        };
        Ok(VideoPreview {
            qualities: info
                .live_transcoding_task_list
                .into_iter()
                .filter(|task| task.status.is_empty() || task.status == "finished")
                .filter(|task| !task.url.is_empty())
                .map(|task| QualityUrl {
                    quality: task.template_id,
                    url: task.url,
                })
                .collect(),
            subtitles: info
                .live_transcoding_subtitle_task_list
                .into_iter()
                .filter(|sub| !sub.url.is_empty())
                .map(|sub| SubtitleTrack {
                    language: sub.language,
                    url: sub.url,
                })
                .collect(),
        })
    }

    async fn update_video_time(
        &self,
        drive_id: &str,
        file_id: &str,
        play_cursor: f64,
    ) -> Result<(), DriveError> {
        let _: Value = self
            .post(
                "/adrive/v1.0/openFile/video/updateRecord",
                json!({
                    "drive_id": drive_id,
                    "file_id": file_id,
                    "play_cursor": format!("{play_cursor:.3}"),
                }),
            )
            .await?;
        Ok(())
    }

    async fn update_description(
        &self,
        drive_id: &str,
        file_id: &str,
        description: &str,
    ) -> Result<(), DriveError> {
        let _: Value = self
            .post(
                "/adrive/v1.0/openFile/update",
                json!({ "drive_id": drive_id, "file_id": file_id, "description": description }),
            )
            .await?;
        Ok(())
    }

    async fn create_folder(
        &self,
        drive_id: &str,
        parent_file_id: &str,
        name: &str,
    ) -> Result<FileEntry, DriveError> {
        self.post(
            "/adrive/v1.0/openFile/create",
            json!({
                "drive_id": drive_id,
                "parent_file_id": parent_file_id,
                "name": name,
                "type": "folder",
                "check_name_mode": "refuse",
            }),
        )
        .await
    }

    async fn trash(&self, drive_id: &str, file_id: &str) -> Result<(), DriveError> {
        let _: Value = self
            .post(
                "/adrive/v1.0/openFile/recyclebin/trash",
                json!({ "drive_id": drive_id, "file_id": file_id }),
            )
            .await?;
        Ok(())
    }

    async fn rename(&self, drive_id: &str, file_id: &str, name: &str) -> Result<(), DriveError> {
        let _: Value = self
            .post(
                "/adrive/v1.0/openFile/update",
                json!({
                    "drive_id": drive_id,
                    "file_id": file_id,
                    "name": name,
                    "check_name_mode": "refuse",
                }),
            )
            .await?;
        Ok(())
    }

    async fn move_file(
        &self,
        drive_id: &str,
        file_id: &str,
        to_parent_file_id: &str,
        new_name: Option<&str>,
    ) -> Result<(), DriveError> {
        let mut body = json!({
            "drive_id": drive_id,
            "file_id": file_id,
            "to_parent_file_id": to_parent_file_id,
            "check_name_mode": "refuse",
        });
        if let Some(name) = new_name {
            body["new_name"] = Value::String(name.to_string());
        }
        let _: Value = self.post("/adrive/v1.0/openFile/move", body).await?;
        Ok(())
    }

    async fn fetch_range(&self, url: &str, start: u64, end: u64) -> Result<Bytes, DriveError> {
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={start}-{end}"))
            .header(REFERER, &self.referer)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), start, end, "range read rejected");
            return Err(DriveError::Api {
                status: status.as_u16(),
                message: "range read failed".into(),
            });
        }
        Ok(response.bytes().await?)
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    })
}
