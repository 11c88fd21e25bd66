//! 目录缓存过期清理的后台任务。

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::StructCache;
use crate::config::CACHE_PRUNE_INTERVAL_SECS;

/// 启动后台任务（定期清理过期的目录结构缓存）。
pub fn spawn_background_tasks(cache: Arc<StructCache>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CACHE_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let removed = cache.prune_expired().await;
            if removed > 0 {
                debug!(removed, "expired directory cache entries pruned");
            }
        }
    })
}
