//! Terminal progress for a running build

use std::time::Duration;

use asu_client::BuildEvent;
use indicatif::{ProgressBar, ProgressStyle};

use crate::output::format_size;

/// Spinner while the build is pending, byte bar per download
pub struct BuildProgress {
    visible: bool,
    spinner: ProgressBar,
    download: Option<ProgressBar>,
}

impl BuildProgress {
    pub fn new(visible: bool) -> Self {
        let spinner = if visible {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_chars("|/-\\ "),
            );
            pb.enable_steady_tick(Duration::from_millis(250));
            pb
        } else {
            ProgressBar::hidden()
        };
        spinner.set_message("Submitting build request...");

        Self {
            visible,
            spinner,
            download: None,
        }
    }

    pub fn handle(&mut self, event: BuildEvent<'_>) {
        match event {
            BuildEvent::Submitted {
                request_hash,
                cached,
            } => {
                if cached {
                    self.spinner
                        .set_message(format!("Build {} served from cache", request_hash));
                } else {
                    self.spinner
                        .set_message(format!("Build {} queued", request_hash));
                }
            }
            BuildEvent::Pending {
                queue_position,
                detail,
                ..
            } => {
                let status = detail.unwrap_or("building");
                match queue_position {
                    Some(position) if position > 0 => self
                        .spinner
                        .set_message(format!("Waiting... {} (queue position {})", status, position)),
                    _ => self.spinner.set_message(format!("Waiting... {}", status)),
                }
            }
            BuildEvent::Finished {
                imagebuilder_status,
            } => {
                self.spinner.finish_with_message(format!(
                    "Build finished: {}",
                    imagebuilder_status.unwrap_or("done")
                ));
            }
            BuildEvent::Downloading {
                image,
                progress: None,
            } => {
                let pb = self.download_bar();
                pb.set_message(image.name.clone());
                self.download = Some(pb);
            }
            BuildEvent::Downloading {
                image,
                progress: Some(progress),
            } => {
                if let Some(pb) = &self.download {
                    if let Some(total) = progress.total_bytes {
                        pb.set_length(total);
                    }
                    pb.set_position(progress.bytes_written);
                    if let Some(percent) = progress.percent() {
                        pb.set_message(format!("{} {:>3.0}%", image.name, percent));
                    }
                }
            }
            BuildEvent::Downloaded { image, file } => {
                if let Some(pb) = self.download.take() {
                    pb.finish_with_message(format!("{} ({})", image.name, format_size(file.bytes)));
                }
            }
            BuildEvent::Complete => {}
        }
    }

    /// Clear any bar left running after an error
    pub fn abandon(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.abandon();
        }
        if let Some(pb) = self.download.take() {
            pb.abandon();
        }
    }

    fn download_bar(&self) -> ProgressBar {
        if !self.visible {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::no_length();
        pb.set_style(
            ProgressStyle::with_template(
                "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
        );
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asu_client::{DownloadProgress, DownloadedImage, ImageArtifact};
    use std::path::PathBuf;

    #[test]
    fn test_download_bar_lifecycle() {
        let image = ImageArtifact {
            name: "img.bin".into(),
            sha256: None,
            image_type: None,
            filesystem: None,
        };
        let file = DownloadedImage {
            path: PathBuf::from("img.bin"),
            bytes: 4,
            sha256: String::new(),
        };

        let mut progress = BuildProgress::new(false);
        progress.handle(BuildEvent::Finished {
            imagebuilder_status: Some("done"),
        });
        progress.handle(BuildEvent::Downloading {
            image: &image,
            progress: None,
        });
        assert!(progress.download.is_some());

        progress.handle(BuildEvent::Downloading {
            image: &image,
            progress: Some(DownloadProgress {
                bytes_written: 4,
                total_bytes: Some(4),
            }),
        });
        progress.handle(BuildEvent::Downloaded {
            image: &image,
            file: &file,
        });
        assert!(progress.download.is_none());
    }
}
