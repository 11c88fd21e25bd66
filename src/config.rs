//! CLI arguments and configuration defaults.

use clap::{Args, Parser, Subcommand};
use shadow_rs::formatcp;
use std::path::PathBuf;

use crate::build;
use crate::player::SubtitleMode;
use crate::router::PlaybackStrategy;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_PORT: u16 = 5050;
pub const DEFAULT_PROXY_BASE: &str = "http://127.0.0.1:9871";
pub const DEFAULT_DATA_DIR: &str = ".pan-bridge";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;
pub const CACHE_PRUNE_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_QUALITY: &str = "Origin";

/// CLI arguments and environment configuration.
#[derive(Parser, Debug)]
#[command(name = "pan-bridge", version = VERSION_INFO, about = "Cloud drive WebDAV bridge and player launcher")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "PAN_LOG_LEVEL",
        default_value = "info",
        help = "Default log filter when RUST_LOG is unset"
    )]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the drive over WebDAV until interrupted.
    Serve(ServeArgs),
    /// Launch a media player for one remote video.
    Play(PlayArgs),
}

/// Drive account settings shared by all subcommands.
#[derive(Args, Debug, Clone)]
pub struct DriveArgs {
    #[arg(long, env = "PAN_DRIVE_ID", help = "Drive id to expose")]
    pub drive_id: String,
    #[arg(long, env = "PAN_ACCESS_TOKEN", hide_env_values = true, help = "Open API access token")]
    pub access_token: String,
    #[arg(long, env = "PAN_ACCOUNT_ID", default_value = "", help = "Account (user) id")]
    pub account_id: String,
    #[arg(
        long,
        env = "PAN_API_BASE",
        default_value = crate::drive::DEFAULT_API_BASE,
        help = "Drive open API base URL"
    )]
    pub api_base: String,
    #[arg(
        long,
        env = "PAN_OPEN_API",
        default_value_t = true,
        action = clap::ArgAction::Set,
        help = "Whether the open API is in use (selects the referer)"
    )]
    pub open_api: bool,
    #[arg(
        long,
        env = "PAN_PROXY_BASE",
        default_value = DEFAULT_PROXY_BASE,
        help = "Base URL of the local streaming proxy"
    )]
    pub proxy_base: String,
    #[arg(
        long,
        env = "PAN_DATA_DIR",
        default_value = DEFAULT_DATA_DIR,
        help = "Directory for persisted state"
    )]
    pub data_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub drive: DriveArgs,
    #[arg(long, env = "PAN_USERS_FILE", help = "JSON file with WebDAV users")]
    pub users_file: Option<PathBuf>,
    #[arg(long, env = "PAN_AUTH_USER", help = "Admin username for WebDAV")]
    pub auth_user: Option<String>,
    #[arg(long, env = "PAN_AUTH_PASS", hide_env_values = true, help = "Admin password for WebDAV")]
    pub auth_pass: Option<String>,
    #[arg(
        short = 'b',
        long,
        env = "PAN_BIND",
        default_value = "127.0.0.1",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "PAN_PORT",
        default_value_t = DEFAULT_PORT,
        help = "WebDAV port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "PAN_STRATEGY",
        value_enum,
        default_value_t = PlaybackStrategy::Redirect,
        help = "How GET requests for cached files are answered"
    )]
    pub strategy: PlaybackStrategy,
    #[arg(long, env = "PAN_CORS", help = "Answer OPTIONS with DAV/CORS headers")]
    pub cors: bool,
    #[arg(long, env = "PAN_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "PAN_CACHE_TTL_SECS",
        default_value_t = DEFAULT_CACHE_TTL_SECS,
        help = "Directory listing cache lifetime in seconds"
    )]
    pub cache_ttl_secs: u64,
}

#[derive(Args, Debug)]
pub struct PlayArgs {
    #[command(flatten)]
    pub drive: DriveArgs,
    #[arg(long, env = "PAN_PLAYER", help = "Player binary (or .app on macOS)")]
    pub player: String,
    #[arg(long, help = "File id of the video to play")]
    pub file_id: String,
    #[arg(long, help = "File id of a subtitle to load")]
    pub subtitle_file_id: Option<String>,
    #[arg(long, env = "PAN_QUALITY", default_value = DEFAULT_QUALITY, help = "Preferred transcode quality")]
    pub quality: String,
    #[arg(long, env = "PAN_TRANSCODE", help = "Play the transcoded stream")]
    pub transcode: bool,
    #[arg(long, env = "PAN_PLAYLIST", help = "Play the whole folder as a playlist")]
    pub playlist: bool,
    #[arg(long, env = "PAN_HISTORY", help = "Resume and record the play position")]
    pub history: bool,
    #[arg(long, env = "PAN_EXIT_ON_FINISH", help = "Quit the player when playback ends")]
    pub exit_on_finish: bool,
    #[arg(long, env = "PAN_AUTO_COLOR", help = "Tag watched files")]
    pub auto_color: bool,
    #[arg(
        long,
        env = "PAN_SUBTITLE_MODE",
        value_enum,
        default_value_t = SubtitleMode::Auto,
        help = "Subtitle loading for playlist items"
    )]
    pub subtitle_mode: SubtitleMode,
    #[arg(long, env = "PAN_PLAYER_PARAMS", default_value = "", help = "Extra mpv params, comma separated")]
    pub player_params: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from([
            "pan-bridge",
            "serve",
            "--drive-id",
            "d1",
            "--access-token",
            "t",
        ])
        .expect("parse");
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, DEFAULT_PORT);
        assert_eq!(args.strategy, PlaybackStrategy::Redirect);
        assert!(args.drive.open_api);
        assert!(!args.cors);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn play_flags() {
        let cli = Cli::try_parse_from([
            "pan-bridge",
            "play",
            "--drive-id",
            "d1",
            "--access-token",
            "t",
            "--open-api",
            "false",
            "--player",
            "/usr/bin/mpv",
            "--file-id",
            "f1",
            "--playlist",
            "--subtitle-mode",
            "off",
        ])
        .expect("parse");
        let Commands::Play(args) = cli.command else {
            panic!("expected play");
        };
        assert!(args.playlist);
        assert!(!args.history);
        assert!(!args.drive.open_api);
        assert_eq!(args.subtitle_mode, SubtitleMode::Off);
        assert_eq!(args.quality, DEFAULT_QUALITY);
    }
}
