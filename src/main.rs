//! pan-bridge binary.
//!
//! Exposes a cloud drive through a local WebDAV bridge (`serve`) and launches
//! external media players for remote videos while tracking the play position
//! (`play`).

mod atomic;
mod auth;
mod background;
mod cache;
mod config;
mod davfs;
mod drive;
mod error;
mod http;
mod logging;
mod mpv;
mod player;
mod playlist;
mod proxy;
mod router;
mod server;
mod session;
mod subtitle;
mod users;

use anyhow::Context;
use clap::Parser;
use shadow_rs::shadow;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use url::Url;

use crate::background::spawn_background_tasks;
use crate::cache::StructCache;
use crate::config::{Cli, Commands, DriveArgs, PlayArgs, ServeArgs};
use crate::davfs::DriveFs;
use crate::drive::{DriveApi, FileEntry, HttpDrive, PlayCursor};
use crate::player::{LaunchRequest, Launcher, PlayerSettings, TokenInfo, referer_for};
use crate::proxy::{ProxyInfoStore, ProxyUrls};
use crate::router::WebDavRouter;
use crate::server::{ServerOptions, WebDavServer};
use crate::users::{Privilege, UserMutation, UserStore};

shadow!(build);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level);

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Play(args) => play(args).await,
    }
}

fn drive_client(drive: &DriveArgs) -> anyhow::Result<Arc<dyn DriveApi>> {
    let client = HttpDrive::new(
        &drive.api_base,
        &drive.access_token,
        referer_for(drive.open_api),
    )
    .context("failed to build drive client")?;
    Ok(Arc::new(client))
}

fn proxy_urls(drive: &DriveArgs) -> anyhow::Result<ProxyUrls> {
    let base = Url::parse(&drive.proxy_base)
        .with_context(|| format!("invalid proxy base url: {}", drive.proxy_base))?;
    Ok(ProxyUrls::new(base))
}

async fn load_users(args: &ServeArgs) -> anyhow::Result<Arc<UserStore>> {
    let users = Arc::new(UserStore::new());
    if let Some(path) = &args.users_file {
        let count = users
            .load_file(path)
            .await
            .with_context(|| format!("failed to load users from {}", path.display()))?;
        info!(count, path = %path.display(), "users loaded");
    }
    if let (Some(username), Some(password)) = (&args.auth_user, &args.auth_pass) {
        let mode = if users.get_user(username).await.is_some() {
            UserMutation::Modify
        } else {
            UserMutation::Add
        };
        users
            .set_user(username, password, "/", &[Privilege::All], mode, true)
            .await?;
    }
    let names: Vec<String> = users
        .all_users()
        .await
        .iter()
        .map(|user| user.username.clone())
        .collect();
    info!(?names, "webdav users ready");
    Ok(users)
}

/// Runs the WebDAV bridge until a termination signal arrives.
async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let api = drive_client(&args.drive)?;
    let users = load_users(&args).await?;
    let cache = Arc::new(StructCache::new(Duration::from_secs(args.cache_ttl_secs)));
    let prune_task = spawn_background_tasks(cache.clone());

    let fs = DriveFs::new(api, cache, &args.drive.drive_id);
    let router = Arc::new(WebDavRouter::new(
        fs,
        proxy_urls(&args.drive)?,
        &args.drive.account_id,
        args.strategy,
        &args.host,
        args.port,
    ));
    let server = WebDavServer::new(
        ServerOptions {
            host: args.host.clone(),
            port: args.port,
            cors: args.cors,
            cors_origins: args.cors_origins.clone(),
        },
        users,
        router,
    );
    server.start().await?;

    shutdown_signal().await;
    if !server.stop().await {
        warn!("webdav server did not stop cleanly");
    }
    prune_task.abort();
    Ok(())
}

/// Launches a player for one file and waits for it to exit.
async fn play(args: PlayArgs) -> anyhow::Result<()> {
    let drive = &args.drive;
    let api = drive_client(drive)?;
    let file = api
        .file_info(&drive.drive_id, &args.file_id)
        .await
        .context("failed to read file info")?;
    let subtitle_file = match &args.subtitle_file_id {
        Some(id) => Some(
            api.file_info(&drive.drive_id, id)
                .await
                .context("failed to read subtitle file info")?,
        ),
        None => None,
    };
    let preview = if args.transcode {
        Some(
            api.video_preview(&drive.drive_id, &file.file_id)
                .await
                .context("failed to read transcode info")?,
        )
    } else {
        None
    };
    let file_list = folder_listing(api.as_ref(), &file).await;

    let launcher = Launcher::new(
        api.clone(),
        proxy_urls(drive)?,
        ProxyInfoStore::new(drive.data_dir.clone()),
        PlayerSettings {
            playlist: args.playlist,
            history: args.history,
            exit_on_finish: args.exit_on_finish,
            auto_color: args.auto_color,
            subtitle_mode: args.subtitle_mode,
            extra_params: args.player_params.clone(),
        },
        mpv::MPV_SOCKET,
    );
    let token = TokenInfo {
        user_id: drive.account_id.clone(),
        open_api_enable: drive.open_api,
    };
    let request = LaunchRequest {
        cursor: PlayCursor::from_entry(&file),
        file,
        subtitle_file,
        preview,
        quality: args.quality.clone(),
        file_list,
    };

    let mut handle = launcher.start_player(&token, &args.player, request).await?;
    let finished = tokio::select! {
        session = handle.wait() => Some(session),
        _ = shutdown_signal() => None,
    };
    let session = match finished {
        Some(session) => session,
        None => handle.shutdown().await,
    };
    if let Some(session) = session {
        info!(
            file_id = ?session.current_file_id,
            position = session.current_time,
            "playback finished"
        );
    }
    Ok(())
}

/// Files of the video's folder sorted by name; an empty list if it cannot be read.
async fn folder_listing(api: &dyn DriveApi, file: &FileEntry) -> Vec<FileEntry> {
    match api.list_dir(&file.drive_id, &file.parent_file_id).await {
        Ok(entries) => {
            let mut files: Vec<FileEntry> = entries.into_iter().filter(|e| !e.is_dir()).collect();
            files.sort_by(|a, b| a.name.cmp(&b.name));
            files
        }
        Err(err) => {
            warn!(error = %err, "failed to list folder, playlist disabled");
            Vec::new()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
}
