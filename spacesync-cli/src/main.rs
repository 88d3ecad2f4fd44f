use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use spacesync_core::core_crypto::EncryptionManager;
use spacesync_core::core_engine::{Invite, InviteUri, DEFAULT_INVITE_TTL};
use spacesync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use spacesync_core::EngineConfig;

#[derive(Parser, Debug)]
#[command(name = "spacesync")]
#[command(author, version, about = "Operator tool for spacesync spaces", long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Engine data directory, defaults to the configured one
    #[arg(short, long)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the device keys for a space
    Keys {
        /// Space identifier
        space: String,
    },
    /// Mint an invite URI for a space
    Invite {
        /// Space identifier
        space: String,
    },
    /// Parse and validate an invite URI against local key material
    InspectInvite {
        /// The spacesync:// URI
        uri: String,
    },
    /// Print the space key as hex for out-of-band delivery
    ExportKey {
        /// Space identifier
        space: String,
    },
    /// Install a space key received out-of-band
    ImportKey {
        /// Space identifier
        space: String,
        /// 64 hex characters
        hex_key: String,
    },
    /// Validate the engine configuration file
    CheckConfig {
        /// Path to a TOML configuration file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = LogLevel::parse(&args.log_level).unwrap_or_else(|| {
        eprintln!("Invalid log level '{}', using 'warn'", args.log_level);
        LogLevel::Warn
    });
    init_logging_with_config(LogConfig::new(log_level).json_format(args.json_logs))?;

    let data_dir = match &args.data_dir {
        Some(dir) => PathBuf::from(shellexpand::tilde(dir).into_owned()),
        None => EngineConfig::from_env()?.engine.data_dir,
    };

    match args.command {
        Command::Keys { space } => {
            let crypto = open_space_keys(&data_dir, &space).await?;
            let output = json!({
                "space": space,
                "signing_key": crypto.device_public_key().await,
                "exchange_key": crypto.device_exchange_key().await,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Invite { space } => {
            let crypto = open_space_keys(&data_dir, &space).await?;
            let invite = Invite::new(space.clone(), DEFAULT_INVITE_TTL);
            let blob = crypto.encrypt_invite(&invite).await?;
            println!("{}", InviteUri { space_id: space, blob }.encode());
        }
        Command::InspectInvite { uri } => {
            let parsed = InviteUri::parse(&uri).context("failed to parse invite uri")?;
            let crypto = open_space_keys(&data_dir, &parsed.space_id).await?;
            let invite: Invite = crypto
                .decrypt_invite(&parsed.blob)
                .await
                .context("invite does not open with the local space key")?;
            let output = json!({
                "space": invite.space_id,
                "created_at_ms": invite.created_at_ms,
                "expires_at_ms": invite.expires_at_ms,
                "expired": invite.is_expired(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::ExportKey { space } => {
            let crypto = open_space_keys(&data_dir, &space).await?;
            println!("{}", crypto.export_space_key().await);
        }
        Command::ImportKey { space, hex_key } => {
            let crypto = open_space_keys(&data_dir, &space).await?;
            crypto.import_space_key(&hex_key).await?;
            info!(%space, "space key imported");
            println!("ok");
        }
        Command::CheckConfig { path } => {
            let config = EngineConfig::from_file(&path)?;
            config.validate()?;
            println!("{} is valid", path.display());
        }
    }

    Ok(())
}

async fn open_space_keys(data_dir: &PathBuf, space: &str) -> Result<EncryptionManager> {
    let dir = data_dir.join("spaces").join(space);
    EncryptionManager::initialize(dir)
        .await
        .with_context(|| format!("failed to open key material for space {space}"))
}
