//! DyberVPN CLI: key and configuration tooling

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dybervpn_wgcfg::{Config, PrivateKey, SystemResolver};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// DyberVPN: WireGuard-compatible tunnel configuration tools
#[derive(Parser)]
#[command(name = "dybervpn")]
#[command(author = "Dyber, Inc.")]
#[command(version)]
#[command(about = "WireGuard-compatible tunnel configuration tools", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new private key (base64)
    Genkey,

    /// Derive public key from private key (reads from stdin)
    Pubkey,

    /// Validate configuration file
    Check {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,

        /// Output the parsed configuration as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Print the control protocol text that applies a configuration file
    Uapi {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Genkey => cmd_genkey(),
        Commands::Pubkey => cmd_pubkey(),
        Commands::Check { config, json } => cmd_check(&config, json),
        Commands::Uapi { config } => cmd_uapi(&config),
    }
}

/// Generate a new private key
fn cmd_genkey() -> Result<()> {
    let key = PrivateKey::generate();
    println!("{}", key.to_base64());
    Ok(())
}

/// Derive public key from private key
fn cmd_pubkey() -> Result<()> {
    use std::io::{self, Read};

    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;

    let private_key = PrivateKey::from_base64(input.trim()).context("Invalid private key")?;
    println!("{}", private_key.public_key().to_base64());

    Ok(())
}

fn load_config(config_path: &Path) -> Result<Config> {
    Config::from_file(config_path)
        .with_context(|| format!("Failed to load config file {}", config_path.display()))
}

/// Validate configuration file
fn cmd_check(config_path: &Path, json: bool) -> Result<()> {
    let config = load_config(config_path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("✓ Configuration is valid");
    println!();
    println!("Summary:");
    println!("  Device: {}", config.name);
    println!("  Public Key: {}", config.private_key.public_key());
    for address in &config.addresses {
        println!("  Address: {}", address);
    }
    if config.listen_port > 0 {
        println!("  Listen Port: {}", config.listen_port);
    }
    println!("  MTU: {}", config.effective_mtu());
    println!("  Peers: {}", config.peers.len());
    for peer in &config.peers {
        println!("    {} {}", peer.public_key.short_string(), peer.endpoints_string());
    }

    Ok(())
}

/// Print the control protocol text for a configuration file
fn cmd_uapi(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    tracing::debug!("Resolving endpoints for {} peers", config.peers.len());

    let text = config
        .to_uapi(&SystemResolver)
        .context("Failed to encode configuration")?;
    print!("{}", text);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_check_args() {
        let cli = Cli::try_parse_from(["dybervpn", "check", "-c", "wg0.conf", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Check { json: true, .. }));
    }
}
