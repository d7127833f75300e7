//! asu-build - Build custom OpenWrt images with the Attended SysUpgrade service
//!
//! Resolves the image builder revision for a target, requests a build with
//! the chosen packages, waits for it and downloads the resulting images.

mod commands;
mod config;
mod output;
mod progress;

use anyhow::{Context, Result};
use asu_client::{AsuClient, ClientConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::BuildArgs;
use crate::config::{Config, MergedConfig};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "asu-build")]
#[command(author, version, about = "Build custom OpenWrt firmware images")]
struct Cli {
    /// OpenWrt release
    #[arg(value_name = "VERSION", default_value = "24.10.0")]
    release: String,

    /// Target platform
    #[arg(default_value = "x86")]
    target: String,

    /// Sub-target of the platform
    #[arg(default_value = "64")]
    sub_target: String,

    /// Device profile
    #[arg(default_value = "generic")]
    profile: String,

    /// Build service URL [default: https://sysupgrade.openwrt.org/]
    #[arg(short, long)]
    base_url: Option<String>,

    /// Package to include (repeatable) [default: tailscale]
    #[arg(short, long = "package", value_name = "NAME")]
    packages: Vec<String>,

    /// First-boot script file (uci-defaults)
    #[arg(short, long, value_name = "FILE")]
    defaults: Option<PathBuf>,

    /// Root filesystem size in MB
    #[arg(long, value_name = "MB")]
    rootfs_size_mb: Option<u32>,

    /// Download root directory [default: downloads]
    #[arg(short = 'O', long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(
        cli.base_url.as_deref(),
        cli.output_dir.as_deref(),
        &cli.packages,
        cli.no_color,
    );

    debug!(
        "Using {} (output root {}, poll every {}ms)",
        merged.base_url,
        merged.output_dir.display(),
        merged.poll_interval_ms
    );

    let ctx = OutputContext::new(cli.output, merged.no_color, cli.quiet);

    let defaults = cli
        .defaults
        .as_ref()
        .map(|path| {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read defaults script: {}", path.display()))
        })
        .transpose()?;

    let client = create_client(&merged)?;
    let args = BuildArgs {
        version: cli.release,
        target: cli.target,
        sub_target: cli.sub_target,
        profile: cli.profile,
        packages: merged.packages,
        defaults,
        rootfs_size_mb: cli.rootfs_size_mb,
        output_root: merged.output_dir,
    };

    commands::build(&client, &args, &ctx).await?;

    Ok(())
}

/// Create an ASU client for the merged configuration
fn create_client(merged: &MergedConfig) -> Result<AsuClient> {
    let config = ClientConfig::builder(merged.base_url.as_str())
        .poll_interval_ms(merged.poll_interval_ms)
        .build();
    AsuClient::with_config(config).context("Failed to create ASU client")
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
    fn test_positional_defaults() {
        let cli = Cli::parse_from(["asu-build"]);
        assert_eq!(cli.release, "24.10.0");
        assert_eq!(cli.target, "x86");
        assert_eq!(cli.sub_target, "64");
        assert_eq!(cli.profile, "generic");
        assert!(cli.packages.is_empty());
        assert_eq!(cli.output, OutputFormat::Text);
    }

    #[test]
    fn test_repeated_packages() {
        let cli = Cli::parse_from([
            "asu-build",
            "23.05.5",
            "ramips",
            "mt7621",
            "xiaomi_mi-router-4a-gigabit",
            "-p",
            "luci",
            "--package",
            "wireguard-tools",
            "--rootfs-size-mb",
            "128",
            "-O",
            "/tmp/images",
        ]);
        assert_eq!(cli.release, "23.05.5");
        assert_eq!(cli.profile, "xiaomi_mi-router-4a-gigabit");
        assert_eq!(cli.packages, vec!["luci", "wireguard-tools"]);
        assert_eq!(cli.rootfs_size_mb, Some(128));
        assert_eq!(cli.output_dir, Some(PathBuf::from("/tmp/images")));
    }
}
