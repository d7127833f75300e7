//! Output formatting for asu-build (text, json)

use asu_client::DownloadedImage;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human readable text and tables (default)
    #[default]
    Text,
    /// JSON summary on stdout
    Json,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Whether progress bars and informational text should be drawn
    pub fn interactive(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Text
    }

    /// Print a success message (text mode, not quiet)
    pub fn success(&self, msg: &str) {
        if self.interactive() {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (text mode, not quiet)
    pub fn info(&self, msg: &str) {
        if self.interactive() {
            println!("{}", msg);
        }
    }

    /// Print a warning message
    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print key-value pairs
    pub fn print_kv(&self, pairs: &[(&str, String)]) {
        if self.interactive() {
            for (key, value) in pairs {
                println!("{}: {}", key.bold(), value);
            }
        }
    }

    /// Print a captured build log stream under a heading
    pub fn print_stream(&self, heading: &str, content: Option<&str>) {
        eprintln!("{}", heading.bold());
        eprintln!("{}", content.unwrap_or_default().trim_end());
    }

    /// Print the final summary in the configured format
    pub fn print_summary(&self, summary: &BuildSummary) {
        match self.format {
            OutputFormat::Text => {
                if self.quiet {
                    for image in &summary.images {
                        println!("{}", image.path);
                    }
                } else if summary.images.is_empty() {
                    println!("No images");
                } else {
                    println!("{}", Table::new(&summary.images));
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
    }
}

// =============================================================================
// Display types
// =============================================================================

/// Result of a build run as printed to the user
#[derive(Debug, Serialize)]
pub struct BuildSummary {
    pub request_hash: String,
    pub output_dir: String,
    pub images: Vec<ImageRow>,
}

/// One downloaded image
#[derive(Debug, Tabled, Serialize)]
pub struct ImageRow {
    #[tabled(rename = "File")]
    pub path: String,
    #[tabled(rename = "Size")]
    pub size: String,
    #[tabled(rename = "SHA-256")]
    pub sha256: String,
    #[tabled(skip)]
    pub bytes: u64,
}

impl From<&DownloadedImage> for ImageRow {
    fn from(image: &DownloadedImage) -> Self {
        Self {
            path: image.path.display().to_string(),
            size: format_size(image.bytes),
            sha256: image.sha256.clone(),
            bytes: image.bytes,
        }
    }
}

/// Format a byte count with a binary unit suffix
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(12 * 1024 * 1024), "12.0 MiB");
    }

    #[test]
    fn test_image_row_from_download() {
        let image = DownloadedImage {
            path: PathBuf::from("downloads/img.bin"),
            bytes: 2048,
            sha256: "ab".repeat(32),
        };
        let row = ImageRow::from(&image);
        assert_eq!(row.path, "downloads/img.bin");
        assert_eq!(row.size, "2.0 KiB");
        assert_eq!(row.bytes, 2048);

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["bytes"], 2048);
    }
}
