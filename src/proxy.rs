//! 本地播放代理地址构建与“最近代理信息”持久化。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::atomic::AtomicFile;
use crate::drive::{DriveApi, DriveError, EncType, FileEntry};

const PROXY_INFO_FILE: &str = "proxy_info.json";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("状态文件读写失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("状态文件格式错误: {0}")]
    Format(#[from] serde_json::Error),
}

/// 本地流媒体代理的地址构建器。
#[derive(Clone, Debug)]
pub struct ProxyUrls {
    base: Url,
}

impl ProxyUrls {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    /// 生成某个文件经本地代理播放的地址。
    pub fn for_file(&self, user_id: &str, file: &FileEntry, quality: &str) -> String {
        let mut url = self.base.clone();
        url.set_path("/proxy");
        url.query_pairs_mut()
            .append_pair("user_id", user_id)
            .append_pair("drive_id", &file.drive_id)
            .append_pair("file_id", &file.file_id)
            .append_pair("file_size", &file.size.to_string())
            .append_pair(
                "weifa",
                if file.icon.as_deref() == Some("weifa") {
                    "1"
                } else {
                    "0"
                },
            )
            .append_pair("encType", EncType::from_description(&file.description).as_str())
            .append_pair("quality", quality);
        url.into()
    }
}

/// 解析可直接播放的地址：加密文件走本地代理，其余使用云盘下载地址。
pub async fn resolve_raw_url(
    api: &dyn DriveApi,
    proxy: &ProxyUrls,
    user_id: &str,
    file: &FileEntry,
) -> Result<String, DriveError> {
    let enc_type = EncType::from_description(&file.description);
    if enc_type.is_encrypted() {
        debug!(file_id = %file.file_id, ?enc_type, "encrypted file served through proxy");
        return Ok(proxy.for_file(user_id, file, "Origin"));
    }
    let data = api.download_url(&file.drive_id, &file.file_id).await?;
    if data.url.is_empty() {
        return Err(DriveError::EmptyUrl);
    }
    Ok(data.url)
}

/// 最近一次播放使用的代理信息，用于无需重定向的续播。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyInfo {
    pub user_id: String,
    pub drive_id: String,
    pub file_id: String,
    pub file_size: u64,
    #[serde(rename = "encType")]
    pub enc_type: EncType,
    #[serde(rename = "videoQuality")]
    pub video_quality: String,
    pub expires_time: i64,
    pub proxy_url: String,
    pub subtitle_url: String,
}

#[derive(Clone, Debug)]
pub struct ProxyInfoStore {
    path: PathBuf,
}

impl ProxyInfoStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            path: data_dir.join(PROXY_INFO_FILE),
        }
    }

    pub async fn save(&self, info: &ProxyInfo) -> Result<(), StateError> {
        let data = serde_json::to_vec_pretty(info)?;
        AtomicFile::new(&self.path).await?.write_all(&data).await?;
        info!(file_id = %info.file_id, "proxy info saved");
        Ok(())
    }

    /// 读取最近代理信息，文件不存在时返回 `None`。
    pub async fn load(&self) -> Result<Option<ProxyInfo>, StateError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// 从带签名的下载地址中读取过期时间（毫秒时间戳），读取失败返回 0。
pub fn expires_time(url: &str) -> i64 {
    let Ok(parsed) = Url::parse(url) else {
        return 0;
    };
    parsed
        .query_pairs()
        .find(|(key, _)| key == "x-oss-expires" || key == "auth_key")
        .and_then(|(key, value)| {
            let raw = if key == "auth_key" {
                value.split('-').next().map(str::to_string)?
            } else {
                value.into_owned()
            };
            raw.parse::<i64>().ok()
        })
        .map(|secs| secs * 1000)
        .unwrap_or(0)
}
