//! 云盘到 WebDAV 的文件系统适配层。
//!
//! 每个请求按认证用户构建一个 [`DriveFs`]，路径相对用户根目录解析，
//! 目录列表经 [`StructCache`] 缓存，读取通过下载地址的 Range 请求完成。

use bytes::{Buf, Bytes};
use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsResult, FsStream,
    OpenOptions, ReadDirMeta,
};
use futures_util::{FutureExt, stream};
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::cache::{StructCache, normalize_parent};
use crate::drive::{DriveApi, DriveError, FileEntry};
use crate::users::User;

pub const DRIVE_ROOT_ID: &str = "root";
const DRIVE_SCOPE: &str = "*";
const READ_AHEAD: u64 = 4 * 1024 * 1024;

/// 绑定到某个用户的云盘文件系统。
#[derive(Clone, Debug)]
pub struct DriveFs {
    api: Arc<dyn DriveApi>,
    cache: Arc<StructCache>,
    drive_id: String,
    user: Option<Arc<User>>,
}

impl DriveFs {
    pub fn new(api: Arc<dyn DriveApi>, cache: Arc<StructCache>, drive_id: &str) -> Self {
        Self {
            api,
            cache,
            drive_id: drive_id.to_string(),
            user: None,
        }
    }

    /// 生成限定在用户根目录内的文件系统实例。
    pub fn for_user(&self, user: Arc<User>) -> Box<Self> {
        Box::new(Self {
            user: Some(user),
            ..self.clone()
        })
    }

    pub fn cache(&self) -> &Arc<StructCache> {
        &self.cache
    }

    pub fn api(&self) -> &Arc<dyn DriveApi> {
        &self.api
    }

    fn username(&self) -> &str {
        self.user.as_deref().map(|u| u.username.as_str()).unwrap_or(DRIVE_SCOPE)
    }

    fn root_path(&self) -> &str {
        self.user.as_deref().map(|u| u.root_path.as_str()).unwrap_or("/")
    }

    async fn list_cached(
        &self,
        visible: &str,
        scope: &str,
        folder_id: &str,
    ) -> FsResult<Arc<Vec<FileEntry>>> {
        if let Some(hit) = self.cache.get_struct(visible, scope).await {
            return Ok(hit);
        }
        let entries = self
            .api
            .list_dir(&self.drive_id, folder_id)
            .await
            .map_err(fs_error)?;
        debug!(path = visible, scope, count = entries.len(), "directory listed");
        Ok(self.cache.set_struct(visible, scope, folder_id, entries).await)
    }

    /// 沿目录名逐级向下查找文件夹 ID。
    async fn walk(
        &self,
        scope: &str,
        mut folder_id: String,
        segments: &[String],
    ) -> FsResult<String> {
        let mut current = String::from("/");
        for segment in segments {
            let entries = self.list_cached(&current, scope, &folder_id).await?;
            let next = entries
                .iter()
                .find(|entry| entry.is_dir() && entry.name == *segment)
                .ok_or(FsError::NotFound)?;
            folder_id = next.file_id.clone();
            current = join_path(&current, segment);
        }
        Ok(folder_id)
    }

    async fn root_folder_id(&self) -> FsResult<String> {
        let segments = split_segments(self.root_path());
        if segments.is_empty() {
            return Ok(DRIVE_ROOT_ID.to_string());
        }
        self.walk(DRIVE_SCOPE, DRIVE_ROOT_ID.to_string(), &segments)
            .await
    }

    async fn folder_id(&self, visible_dir: &str) -> FsResult<String> {
        let root = self.root_folder_id().await?;
        self.walk(self.username(), root, &split_segments(visible_dir))
            .await
    }

    /// 列出用户可见目录，优先使用缓存。
    pub async fn list(&self, visible_dir: &str) -> FsResult<Arc<Vec<FileEntry>>> {
        let visible_dir = normalize_parent(visible_dir);
        if let Some(hit) = self.cache.get_struct(&visible_dir, self.username()).await {
            return Ok(hit);
        }
        let folder_id = self.folder_id(&visible_dir).await?;
        self.list_cached(&visible_dir, self.username(), &folder_id)
            .await
    }

    async fn lookup(&self, path: &str) -> FsResult<Option<FileEntry>> {
        let Some((parent, name)) = split_parent(path) else {
            return Ok(None);
        };
        let entries = self.list(&parent).await?;
        entries
            .iter()
            .find(|entry| entry.name == name)
            .cloned()
            .map(Some)
            .ok_or(FsError::NotFound)
    }
}

impl DavFileSystem for DriveFs {
    fn open<'a>(
        &'a self,
        path: &'a DavPath,
        options: OpenOptions,
    ) -> FsFuture<'a, Box<dyn DavFile>> {
        async move {
            if options.write || options.append || options.create || options.create_new {
                return Err(FsError::NotImplemented);
            }
            let Some(entry) = self.lookup(&dav_path(path)).await? else {
                return Err(FsError::Forbidden);
            };
            if entry.is_dir() {
                return Err(FsError::Forbidden);
            }
            debug!(file_id = %entry.file_id, name = %entry.name, "open remote file");
            Ok(Box::new(RemoteFile::new(self.api.clone(), entry)) as Box<dyn DavFile>)
        }
        .boxed()
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        async move {
            let entries = self.list(&dav_path(path)).await?;
            let items: Vec<FsResult<Box<dyn DavDirEntry>>> = entries
                .iter()
                .map(|entry| Ok(Box::new(RemoteEntry(entry.clone())) as Box<dyn DavDirEntry>))
                .collect();
            Ok(Box::pin(stream::iter(items)) as FsStream<Box<dyn DavDirEntry>>)
        }
        .boxed()
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        async move {
            let meta = match self.lookup(&dav_path(path)).await? {
                Some(entry) => EntryMeta::from_entry(&entry),
                None => EntryMeta::root(),
            };
            Ok(Box::new(meta) as Box<dyn DavMetaData>)
        }
        .boxed()
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            let path = dav_path(path);
            let (parent, name) = split_parent(&path).ok_or(FsError::Forbidden)?;
            let entries = self.list(&parent).await?;
            if entries.iter().any(|entry| entry.name == name) {
                return Err(FsError::Exists);
            }
            let parent_id = self.folder_id(&parent).await?;
            self.api
                .create_folder(&self.drive_id, &parent_id, &name)
                .await
                .map_err(fs_error)?;
            self.cache.invalidate(&parent_id).await;
            Ok(())
        }
        .boxed()
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        self.remove(path, true).boxed()
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        self.remove(path, false).boxed()
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            let from = dav_path(from);
            let to = dav_path(to);
            let entry = self.lookup(&from).await?.ok_or(FsError::Forbidden)?;
            let (from_parent, _) = split_parent(&from).ok_or(FsError::Forbidden)?;
            let (to_parent, to_name) = split_parent(&to).ok_or(FsError::Forbidden)?;
            let from_parent_id = self.folder_id(&from_parent).await?;

            let target_id = if from_parent == to_parent {
                self.api
                    .rename(&self.drive_id, &entry.file_id, &to_name)
                    .await
                    .map_err(fs_error)?;
                None
            } else {
                let target_id = self.folder_id(&to_parent).await?;
                let new_name = (to_name != entry.name).then_some(to_name.as_str());
                self.api
                    .move_file(&self.drive_id, &entry.file_id, &target_id, new_name)
                    .await
                    .map_err(fs_error)?;
                Some(target_id)
            };
            if entry.is_dir() {
                self.cache.clear().await;
                return Ok(());
            }
            self.cache.invalidate(&from_parent_id).await;
            if let Some(target_id) = target_id {
                self.cache.invalidate(&target_id).await;
            }
            Ok(())
        }
        .boxed()
    }
}

impl DriveFs {
    async fn remove(&self, path: &DavPath, expect_dir: bool) -> FsResult<()> {
        let path = dav_path(path);
        let entry = self.lookup(&path).await?.ok_or(FsError::Forbidden)?;
        if entry.is_dir() != expect_dir {
            return Err(FsError::Forbidden);
        }
        let (parent, _) = split_parent(&path).ok_or(FsError::Forbidden)?;
        let parent_id = self.folder_id(&parent).await?;
        self.api
            .trash(&self.drive_id, &entry.file_id)
            .await
            .map_err(fs_error)?;
        if expect_dir {
            self.cache.clear().await;
        } else {
            self.cache.invalidate(&parent_id).await;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct EntryMeta {
    len: u64,
    modified: SystemTime,
    is_dir: bool,
    etag: Option<String>,
}

impl EntryMeta {
    fn from_entry(entry: &FileEntry) -> Self {
        let modified = entry
            .updated_at
            .map(SystemTime::from)
            .unwrap_or(UNIX_EPOCH);
        let etag = entry
            .content_hash
            .clone()
            .filter(|hash| !hash.is_empty())
            .or_else(|| {
                entry
                    .updated_at
                    .map(|ts| format!("{}-{}", entry.file_id, ts.timestamp()))
            });
        Self {
            len: entry.size,
            modified,
            is_dir: entry.is_dir(),
            etag,
        }
    }

    fn root() -> Self {
        Self {
            len: 0,
            modified: UNIX_EPOCH,
            is_dir: true,
            etag: None,
        }
    }
}

impl DavMetaData for EntryMeta {
    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> FsResult<SystemTime> {
        Ok(self.modified)
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn etag(&self) -> Option<String> {
        self.etag.clone()
    }
}

#[derive(Debug)]
struct RemoteEntry(FileEntry);

impl DavDirEntry for RemoteEntry {
    fn name(&self) -> Vec<u8> {
        self.0.name.as_bytes().to_vec()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = EntryMeta::from_entry(&self.0);
        async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) }.boxed()
    }
}

/// 只读远程文件：按需获取下载地址，带预读缓冲的 Range 读取。
#[derive(Debug)]
struct RemoteFile {
    api: Arc<dyn DriveApi>,
    entry: FileEntry,
    url: Option<String>,
    pos: u64,
    buffer: Bytes,
    buffer_start: u64,
}

impl RemoteFile {
    fn new(api: Arc<dyn DriveApi>, entry: FileEntry) -> Self {
        Self {
            api,
            entry,
            url: None,
            pos: 0,
            buffer: Bytes::new(),
            buffer_start: 0,
        }
    }

    fn buffered(&self, count: usize) -> Option<Bytes> {
        let end = self.buffer_start + self.buffer.len() as u64;
        if self.pos < self.buffer_start || self.pos >= end {
            return None;
        }
        let offset = (self.pos - self.buffer_start) as usize;
        let len = count.min(self.buffer.len() - offset);
        Some(self.buffer.slice(offset..offset + len))
    }

    async fn read_chunk(&mut self, count: usize) -> FsResult<Bytes> {
        let size = self.entry.size;
        if count == 0 || self.pos >= size {
            return Ok(Bytes::new());
        }
        if let Some(chunk) = self.buffered(count) {
            self.pos += chunk.len() as u64;
            return Ok(chunk);
        }

        let url = match &self.url {
            Some(url) => url.clone(),
            None => {
                let data = self
                    .api
                    .download_url(&self.entry.drive_id, &self.entry.file_id)
                    .await
                    .map_err(fs_error)?;
                self.url = Some(data.url.clone());
                data.url
            }
        };
        let want = (count as u64).max(READ_AHEAD);
        let end = (self.pos + want - 1).min(size - 1);
        self.buffer = self
            .api
            .fetch_range(&url, self.pos, end)
            .await
            .map_err(fs_error)?;
        self.buffer_start = self.pos;

        let chunk = self.buffered(count).unwrap_or_default();
        self.pos += chunk.len() as u64;
        Ok(chunk)
    }
}

impl DavFile for RemoteFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = EntryMeta::from_entry(&self.entry);
        async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) }.boxed()
    }

    fn write_buf(&mut self, _buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        async move { Err(FsError::NotImplemented) }.boxed()
    }

    fn write_bytes(&mut self, _buf: Bytes) -> FsFuture<'_, ()> {
        async move { Err(FsError::NotImplemented) }.boxed()
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        self.read_chunk(count).boxed()
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        let size = self.entry.size as i64;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset as i64),
            SeekFrom::Current(delta) => (self.pos as i64).checked_add(delta),
            SeekFrom::End(delta) => size.checked_add(delta),
        };
        let result = match target {
            Some(target) if target >= 0 => {
                self.pos = target as u64;
                Ok(self.pos)
            }
            _ => Err(FsError::GeneralFailure),
        };
        async move { result }.boxed()
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        async move { Ok(()) }.boxed()
    }
}

fn fs_error(err: DriveError) -> FsError {
    match err {
        DriveError::NotFound(_) => FsError::NotFound,
        DriveError::Api { status: 403, .. } => FsError::Forbidden,
        other => {
            warn!(error = %other, "drive request failed");
            FsError::GeneralFailure
        }
    }
}

fn dav_path(path: &DavPath) -> String {
    String::from_utf8_lossy(path.as_bytes()).into_owned()
}

fn split_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// 拆分为 (父目录, 名称)，根目录返回 `None`。
pub fn split_parent(path: &str) -> Option<(String, String)> {
    let mut segments = split_segments(path);
    let name = segments.pop()?;
    Some((format!("/{}", segments.join("/")), name))
}
