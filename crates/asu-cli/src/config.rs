//! Configuration file handling for asu-build

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Download root used when neither the CLI nor the config file names one
pub const DEFAULT_OUTPUT_DIR: &str = "downloads";

/// Packages requested when none are given
pub const DEFAULT_PACKAGES: &[&str] = &["tailscale"];

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default build service URL
    pub base_url: Option<String>,
    /// Root directory for downloaded images
    pub output_dir: Option<PathBuf>,
    /// Delay between build status polls
    pub poll_interval_ms: Option<u64>,
    /// Packages added to every build
    pub packages: Option<Vec<String>>,
    /// Disable colored output
    pub no_color: Option<bool>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("asu-build");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    ///
    /// An empty `packages` slice means "not given on the command line".
    pub fn merge_with_args(
        &self,
        base_url: Option<&str>,
        output_dir: Option<&Path>,
        packages: &[String],
        no_color: bool,
    ) -> MergedConfig {
        let packages = if packages.is_empty() {
            self.packages.clone().unwrap_or_else(|| {
                DEFAULT_PACKAGES.iter().map(|p| p.to_string()).collect()
            })
        } else {
            packages.to_vec()
        };

        MergedConfig {
            base_url: base_url
                .map(String::from)
                .or_else(|| self.base_url.clone())
                .unwrap_or_else(|| asu_client::config::DEFAULT_BASE_URL.to_string()),
            output_dir: output_dir
                .map(Path::to_path_buf)
                .or_else(|| self.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            poll_interval_ms: self
                .poll_interval_ms
                .unwrap_or(asu_client::config::DEFAULT_POLL_INTERVAL_MS),
            packages,
            no_color: no_color || self.no_color.unwrap_or(false),
        }
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub base_url: String,
    pub output_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub packages: Vec<String>,
    pub no_color: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let merged = Config::default().merge_with_args(None, None, &[], false);

        assert_eq!(merged.base_url, "https://sysupgrade.openwrt.org/");
        assert_eq!(merged.output_dir, PathBuf::from("downloads"));
        assert_eq!(merged.poll_interval_ms, 5000);
        assert_eq!(merged.packages, vec!["tailscale".to_string()]);
        assert!(!merged.no_color);
    }

    #[test]
    fn test_args_override_file() {
        let config: Config = toml::from_str(
            r#"
            base_url = "https://asu.example.org/"
            output_dir = "/srv/images"
            poll_interval_ms = 1000
            packages = ["luci", "htop"]
            "#,
        )
        .unwrap();

        let from_file = config.merge_with_args(None, None, &[], false);
        assert_eq!(from_file.base_url, "https://asu.example.org/");
        assert_eq!(from_file.output_dir, PathBuf::from("/srv/images"));
        assert_eq!(from_file.poll_interval_ms, 1000);
        assert_eq!(from_file.packages, vec!["luci", "htop"]);

        let packages = vec!["tcpdump".to_string()];
        let from_args = config.merge_with_args(
            Some("http://localhost:8000/"),
            Some(Path::new("out")),
            &packages,
            true,
        );
        assert_eq!(from_args.base_url, "http://localhost:8000/");
        assert_eq!(from_args.output_dir, PathBuf::from("out"));
        assert_eq!(from_args.packages, packages);
        assert!(from_args.no_color);
    }

    #[test]
    fn test_empty_package_list_in_file() {
        let config: Config = toml::from_str("packages = []").unwrap();
        let merged = config.merge_with_args(None, None, &[], false);
        assert!(merged.packages.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "base_url = \"http://10.0.0.1:8000/\"\nno_color = true\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://10.0.0.1:8000/"));
        assert_eq!(config.no_color, Some(true));

        std::fs::write(&path, "base_url = [").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
