//! 按 (父目录, 用户) 缓存的目录结构，过期即失效。
//!
//! 路径键相对各用户根目录，同一云盘目录在不同用户下可能有不同的键，
//! 因此失效按目录 ID 进行。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::drive::FileEntry;

#[derive(Debug)]
struct CachedDir {
    folder_id: String,
    entries: Arc<Vec<FileEntry>>,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct StructCache {
    dirs: Mutex<HashMap<(String, String), CachedDir>>,
    ttl: Duration,
}

impl StructCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            dirs: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// 返回未过期的目录结构，过期条目会被移除。
    pub async fn get_struct(&self, parent: &str, user: &str) -> Option<Arc<Vec<FileEntry>>> {
        let key = cache_key(parent, user);
        let mut dirs = self.dirs.lock().await;
        match dirs.get(&key) {
            Some(cached) if cached.expires_at > Instant::now() => Some(cached.entries.clone()),
            Some(_) => {
                dirs.remove(&key);
                None
            }
            None => None,
        }
    }

    pub async fn set_struct(
        &self,
        parent: &str,
        user: &str,
        folder_id: &str,
        entries: Vec<FileEntry>,
    ) -> Arc<Vec<FileEntry>> {
        let entries = Arc::new(entries);
        let mut dirs = self.dirs.lock().await;
        dirs.insert(
            cache_key(parent, user),
            CachedDir {
                folder_id: folder_id.to_string(),
                entries: entries.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        entries
    }

    /// 在缓存的目录结构中按名称查找文件（不访问云盘）。
    pub async fn find_file(&self, parent: &str, user: &str, name: &str) -> Option<FileEntry> {
        let entries = self.get_struct(parent, user).await?;
        entries.iter().find(|entry| entry.name == name).cloned()
    }

    /// 使某云盘目录在所有用户下的缓存失效。
    pub async fn invalidate(&self, folder_id: &str) {
        let mut dirs = self.dirs.lock().await;
        dirs.retain(|_, cached| cached.folder_id != folder_id);
    }

    /// 目录被移动或删除后，其下各级路径键都已失效。
    pub async fn clear(&self) {
        self.dirs.lock().await.clear();
    }

    /// 清理过期条目，返回清理数量。
    pub async fn prune_expired(&self) -> usize {
        let mut dirs = self.dirs.lock().await;
        let before = dirs.len();
        let now = Instant::now();
        dirs.retain(|_, cached| cached.expires_at > now);
        before - dirs.len()
    }
}

fn cache_key(parent: &str, user: &str) -> (String, String) {
    (normalize_parent(parent), user.to_string())
}

/// 统一目录键：以 `/` 开头、不以 `/` 结尾（根目录为 `/`）。
pub fn normalize_parent(parent: &str) -> String {
    let trimmed = parent.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}
