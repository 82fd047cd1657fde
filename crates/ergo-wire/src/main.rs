//! Operator tool for the Ergo P2P wire protocol.
//!
//! Decodes payloads and frames through the standard message registry, lists
//! codec size ceilings and prints the effective configuration.

use anyhow::{bail, Context, Result};
use bytes::{Bytes, BytesMut};
use clap::{Parser, Subcommand};
use ergo_network::{FrameCodec, MessageRegistry};
use std::path::PathBuf;
use tokio_util::codec::Decoder;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

mod config;

use config::WireConfig;

/// Ergo P2P wire inspector.
#[derive(Parser, Debug)]
#[command(name = "ergo-wire")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ergo-wire.toml")]
    config: PathBuf,

    /// Network whose magic frames carry (mainnet, testnet)
    #[arg(short, long)]
    network: Option<String>,

    /// Override the Inv / RequestModifier item limit
    #[arg(long)]
    max_inv_objects: Option<usize>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a message payload given its code and hex bytes
    Decode { code: u8, hex: String },
    /// Decode a complete frame (magic, code, length, checksum, payload)
    Frame { hex: String },
    /// List message codes with their size ceilings
    Limits,
    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = WireConfig::load(&args.config, &args)?;
    debug!(config = %args.config.display(), "Configuration loaded");
    let registry = MessageRegistry::standard(&config.network)?;

    match args.command {
        Command::Decode { code, ref hex } => {
            let payload = decode_hex(hex)?;
            let message = registry
                .decode(code, payload)
                .with_context(|| format!("Failed to decode message {}", code))?;
            println!("{:#?}", message);
        }
        Command::Frame { ref hex } => {
            let mut buf = BytesMut::from(&decode_hex(hex)?[..]);
            let mut codec = FrameCodec::from_settings(&config.network);
            let Some(frame) = codec.decode(&mut buf).context("Invalid frame")? else {
                bail!("Incomplete frame");
            };
            if !buf.is_empty() {
                debug!(trailing = buf.len(), "Bytes after frame ignored");
            }
            let message = registry
                .decode(frame.code, frame.payload)
                .with_context(|| format!("Failed to decode message {}", frame.code))?;
            println!("{:#?}", message);
        }
        Command::Limits => {
            println!("{:>4}  {:<22}  {:>10}", "code", "message", "max bytes");
            for info in registry.specs() {
                println!(
                    "{:>4}  {:<22}  {:>10}",
                    info.code.as_u8(),
                    info.name,
                    info.max_size
                );
            }
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
        }
    }
    Ok(())
}

fn decode_hex(input: &str) -> Result<Bytes> {
    let trimmed = input.trim().trim_start_matches("0x");
    Ok(Bytes::from(hex::decode(trimmed).context("Invalid hex input")?))
}
