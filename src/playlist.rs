//! 临时播放列表（扩展 M3U 与 PotPlayer DPL）。

use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::Path;
use tempfile::TempPath;
use tracing::debug;

use crate::drive::FileEntry;
use crate::proxy::ProxyUrls;

const CRLF: &str = "\r\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaylistFormat {
    M3u,
    Dpl,
}

impl PlaylistFormat {
    fn suffix(self) -> &'static str {
        match self {
            PlaylistFormat::M3u => ".m3u",
            PlaylistFormat::Dpl => ".dpl",
        }
    }
}

/// 当前播放文件的续播信息，写入 DPL 对应条目。
#[derive(Clone, Debug, Default)]
pub struct CurrentItem {
    pub file_id: String,
    pub duration: f64,
    pub play_cursor: f64,
}

pub fn render_m3u(items: &[FileEntry], urls: &[String]) -> String {
    let mut out = String::new();
    out.push_str("#EXTM3U");
    out.push_str(CRLF);
    out.push_str("#EXT-X-ALLOW-CACHE:NO");
    out.push_str(CRLF);
    for (item, url) in items.iter().zip(urls) {
        let _ = write!(out, "#EXTINF:0,{}{CRLF}{url}{CRLF}", item.name);
    }
    out.push_str("#EXT-X-ENDLIST");
    out.push_str(CRLF);
    out
}

pub fn render_dpl(items: &[FileEntry], urls: &[String], current: &CurrentItem) -> String {
    let mut playname = String::new();
    let mut list = String::new();
    for (index, (item, url)) in items.iter().zip(urls).enumerate() {
        let n = index + 1;
        let title = clean_title(item.name.trim());
        let _ = write!(
            list,
            "{n}*file*{url}{CRLF}{n}*title*{title}{CRLF}{n}*played*0{CRLF}"
        );
        if item.file_id == current.file_id {
            playname = format!("playname={url}");
            if current.duration > 0.0 {
                let _ = write!(list, "{n}*duration2*{}{CRLF}", current.duration);
            }
            if current.play_cursor > 0.0 {
                let _ = write!(list, "{n}*start*{}{CRLF}", current.play_cursor);
            }
        }
    }
    format!(
        "DAUMPLAYLIST{CRLF}{playname}{CRLF}playtime={}{CRLF}topindex=0{CRLF}saveplaypos=0{CRLF}{list}",
        current.play_cursor
    )
}

/// 去掉会破坏命令行或列表格式的字符。
fn clean_title(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '"' | '\'' | '*' | '\r' | '\n' | '`' | '$'))
        .collect()
}

/// 临时播放列表文件，析构时删除。
#[derive(Debug)]
pub struct PlaylistFile {
    path: TempPath,
}

impl PlaylistFile {
    /// 为每个条目生成代理地址并写入临时文件。
    pub fn create(
        format: PlaylistFormat,
        proxy: &ProxyUrls,
        user_id: &str,
        quality: &str,
        items: &[FileEntry],
        current: &CurrentItem,
    ) -> io::Result<Self> {
        let urls: Vec<String> = items
            .iter()
            .map(|item| proxy.for_file(user_id, item, quality))
            .collect();
        let content = match format {
            PlaylistFormat::M3u => render_m3u(items, &urls),
            PlaylistFormat::Dpl => render_dpl(items, &urls, current),
        };
        let mut file = tempfile::Builder::new()
            .prefix("play_list")
            .suffix(format.suffix())
            .tempfile()?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        let path = file.into_temp_path();
        debug!(path = %path.display(), items = items.len(), "playlist written");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
