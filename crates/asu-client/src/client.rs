//! ASU HTTP client implementation

use std::path::Path;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{AsuClientError, Result};
use crate::poll::PollPolicy;
use crate::types::*;

/// ASU REST API client
///
/// Every call is a single request awaited to completion; the client never
/// issues requests in parallel.
#[derive(Debug, Clone)]
pub struct AsuClient {
    client: Client,
    base_url: Url,
    config: ClientConfig,
}

impl AsuClient {
    /// Create a new ASU client with default timeouts and polling
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the build service (e.g., "https://sysupgrade.openwrt.org/")
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_config(ClientConfig::builder(base_url).build())
    }

    /// Create a new ASU client from configuration
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.connection.user_agent.as_str())
            .build()?;

        let base_url = Url::parse(&config.connection.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase.into());
        }

        debug!("ASU client created for {}", base_url);

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// Create a client from a YAML config file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(ClientConfig::from_yaml_file(path)?)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Get the configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // =========================================================================
    // Version Discovery
    // =========================================================================

    /// Fetch the latest release of each branch
    #[instrument(skip(self))]
    pub async fn get_latest_versions(&self) -> Result<LatestVersions> {
        let url = self.build_url(&["api", "v1", "latest"])?;
        debug!("Fetching latest versions from {}", url);

        let response = self.client.get(url).send().await?;
        self.handle_response(response).await
    }

    /// Fetch the image builder revision for a version and target
    #[instrument(skip(self))]
    pub async fn get_revision(
        &self,
        version: &str,
        target: &str,
        sub_target: &str,
    ) -> Result<Revision> {
        let url = self.build_url(&["api", "v1", "revision", version, target, sub_target])?;
        debug!("Fetching revision from {}", url);

        let response = self.client.get(url).send().await?;
        self.handle_response(response).await
    }

    // =========================================================================
    // Build Jobs
    // =========================================================================

    /// Submit a build request
    ///
    /// Returns whatever status the service answered with: 200 when the
    /// image is already cached, 202 when the job was queued, anything else
    /// for validation or server failures. Only 200 and 202 replies are
    /// expected to carry a `request_hash`.
    #[instrument(skip(self, request), fields(version = %request.version, target = %request.target_path(), profile = %request.profile))]
    pub async fn post_build(&self, request: &BuildRequest) -> Result<BuildReply> {
        let url = self.build_url(&["api", "v1", "build"])?;
        info!(
            "Requesting build of {} with {} packages",
            request.profile,
            request.packages.len()
        );

        let response = self.client.post(url).json(&request.body()).send().await?;
        let reply = self.handle_build_reply(response).await?;

        debug!("Build request answered with {}", reply.status);
        Ok(reply)
    }

    /// Get the status of a submitted build
    ///
    /// 202 means the job is still queued or building, 200 means it finished
    /// (check `imagebuilder_status`), anything else is a terminal error.
    #[instrument(skip(self))]
    pub async fn get_build_status(&self, request_hash: &str) -> Result<BuildReply> {
        let url = self.build_url(&["api", "v1", "build", request_hash])?;
        debug!("Getting build status from {}", url);

        let response = self.client.get(url).send().await?;
        self.handle_build_reply(response).await
    }

    /// Poll until the build leaves the pending state
    ///
    /// Uses the poll policy from the client configuration. The callback is
    /// invoked with the attempt number for every pending reply.
    pub async fn poll_build_complete<F>(
        &self,
        request_hash: &str,
        on_pending: Option<F>,
    ) -> Result<BuildReply>
    where
        F: FnMut(u32, &BuildReply),
    {
        self.poll_build_complete_with_policy(request_hash, self.config.poll_policy(), on_pending)
            .await
    }

    /// Poll with an explicit policy
    ///
    /// Returns the first reply whose status is not 202, whatever it is.
    /// Fails with [`AsuClientError::Timeout`] once the policy is exhausted.
    #[instrument(skip(self, on_pending))]
    pub async fn poll_build_complete_with_policy<F>(
        &self,
        request_hash: &str,
        policy: PollPolicy,
        mut on_pending: Option<F>,
    ) -> Result<BuildReply>
    where
        F: FnMut(u32, &BuildReply),
    {
        let mut state = policy.start();

        loop {
            let attempt = state.record_attempt();
            let reply = self.get_build_status(request_hash).await?;

            if !reply.is_pending() {
                info!(
                    "Build {} finished with status {} after {} polls",
                    request_hash, reply.status, attempt
                );
                return Ok(reply);
            }

            if let Some(ref mut callback) = on_pending {
                callback(attempt, &reply);
            }

            if !state.may_retry() {
                warn!("Giving up on build {} after {} polls", request_hash, attempt);
                return Err(AsuClientError::Timeout {
                    attempts: state.attempts(),
                });
            }

            debug!(
                "Build {} pending (queue position: {:?})",
                request_hash, reply.body.queue_position
            );
            tokio::time::sleep(state.interval()).await;
        }
    }

    /// Simple poll without callback
    pub async fn poll_build_complete_simple(&self, request_hash: &str) -> Result<BuildReply> {
        self.poll_build_complete::<fn(u32, &BuildReply)>(request_hash, None)
            .await
    }

    // =========================================================================
    // Artifact Downloads
    // =========================================================================

    /// Download one build artifact into `output_dir`
    ///
    /// The directory is created if missing and an existing file of the same
    /// name is overwritten. The body is streamed to disk chunk by chunk and
    /// `on_progress` sees the running byte count after each chunk. If the
    /// connection drops mid-transfer the partially written file is left in
    /// place.
    #[instrument(skip(self, output_dir, on_progress), fields(output_dir = %output_dir.as_ref().display()))]
    pub async fn download_build<F>(
        &self,
        request_hash: &str,
        file_name: &str,
        output_dir: impl AsRef<Path>,
        mut on_progress: Option<F>,
    ) -> Result<DownloadedImage>
    where
        F: FnMut(DownloadProgress),
    {
        validate_file_name(file_name)?;
        let output_dir = output_dir.as_ref();

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| AsuClientError::filesystem(output_dir, e))?;

        let url = self.build_url(&["store", request_hash, file_name])?;
        info!("Downloading {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.extract_error(response, status).await);
        }

        let path = output_dir.join(file_name);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| AsuClientError::filesystem(&path, e))?;

        let mut hasher = Sha256::new();
        let mut progress = DownloadProgress {
            bytes_written: 0,
            total_bytes: response.content_length(),
        };

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(
                        "Download of {} interrupted after {} bytes",
                        file_name, progress.bytes_written
                    );
                    // Partial file stays on disk
                    let _ = file.flush().await;
                    return Err(e.into());
                }
            };
            file.write_all(&chunk)
                .await
                .map_err(|e| AsuClientError::filesystem(&path, e))?;
            hasher.update(&chunk);

            progress.bytes_written += chunk.len() as u64;
            if let Some(ref mut callback) = on_progress {
                callback(progress);
            }
        }

        file.flush()
            .await
            .map_err(|e| AsuClientError::filesystem(&path, e))?;

        info!("Wrote {} bytes to {}", progress.bytes_written, path.display());

        Ok(DownloadedImage {
            path,
            bytes: progress.bytes_written,
            sha256: hex::encode(hasher.finalize()),
        })
    }

    // =========================================================================
    // High-Level Operations
    // =========================================================================

    /// Build and download all images for a request
    ///
    /// 1. Submit the request
    /// 2. Poll while the service reports 202
    /// 3. Download every image into `output_dir`, checking published digests
    ///
    /// A submit answered with anything but 200 or 202 fails immediately.
    /// Images already downloaded stay on disk when a later one fails.
    #[instrument(skip(self, request, output_dir, on_event), fields(profile = %request.profile))]
    pub async fn request_images<F>(
        &self,
        request: &BuildRequest,
        output_dir: impl AsRef<Path>,
        mut on_event: Option<F>,
    ) -> Result<BuildOutcome>
    where
        F: FnMut(BuildEvent<'_>),
    {
        let output_dir = output_dir.as_ref();

        let submitted = self.post_build(request).await?;
        if !submitted.is_pending() && submitted.status != StatusCode::OK {
            warn!("Build request rejected with {}", submitted.status);
            return Err(submitted.into_failure());
        }

        let request_hash = submitted.request_hash()?.to_string();
        emit(
            &mut on_event,
            BuildEvent::Submitted {
                request_hash: &request_hash,
                cached: !submitted.is_pending(),
            },
        );

        let finished = if submitted.is_pending() {
            let on_pending = |attempt: u32, reply: &BuildReply| {
                emit(
                    &mut on_event,
                    BuildEvent::Pending {
                        attempt,
                        queue_position: reply.body.queue_position,
                        detail: reply.body.detail.as_deref(),
                    },
                )
            };
            self.poll_build_complete(&request_hash, Some(on_pending))
                .await?
        } else {
            submitted
        };

        let finished = finished.into_result()?;
        emit(
            &mut on_event,
            BuildEvent::Finished {
                imagebuilder_status: finished.body.imagebuilder_status.as_deref(),
            },
        );

        let mut downloaded = Vec::with_capacity(finished.body.images.len());
        for image in finished.images()? {
            emit(&mut on_event, BuildEvent::Downloading { image, progress: None });

            let on_progress = |progress: DownloadProgress| {
                emit(
                    &mut on_event,
                    BuildEvent::Downloading {
                        image,
                        progress: Some(progress),
                    },
                )
            };
            let file = self
                .download_build(&request_hash, &image.name, output_dir, Some(on_progress))
                .await?;

            if let Some(expected) = &image.sha256 {
                if !expected.eq_ignore_ascii_case(&file.sha256) {
                    return Err(AsuClientError::ChecksumMismatch {
                        file: image.name.clone(),
                        expected: expected.clone(),
                        actual: file.sha256,
                    });
                }
            }

            emit(&mut on_event, BuildEvent::Downloaded { image, file: &file });
            downloaded.push(file);
        }

        emit(&mut on_event, BuildEvent::Complete);

        Ok(BuildOutcome {
            request_hash,
            reply: finished,
            images: downloaded,
        })
    }

    // =========================================================================
    // Helper Methods
    // =========================================================================

    /// Append path segments to the base URL, percent-encoding each one
    fn build_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Handle response and deserialize JSON
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            let body = response.bytes().await?;
            serde_json::from_slice(&body).map_err(|e| AsuClientError::Decode(e.to_string()))
        } else {
            Err(self.extract_error(response, status).await)
        }
    }

    /// Decode a submit/status response regardless of its status code
    async fn handle_build_reply(&self, response: reqwest::Response) -> Result<BuildReply> {
        let status = response.status();
        let body = response.bytes().await?;

        match serde_json::from_slice::<BuildResponse>(&body) {
            Ok(body) => Ok(BuildReply { status, body }),
            Err(e) if status.is_success() => Err(AsuClientError::Decode(e.to_string())),
            Err(_) => Err(AsuClientError::server_error(
                status.as_u16(),
                error_message(status, &body),
            )),
        }
    }

    async fn extract_error(
        &self,
        response: reqwest::Response,
        status: StatusCode,
    ) -> AsuClientError {
        let message = match response.bytes().await {
            Ok(body) => error_message(status, &body),
            Err(_) => format!("HTTP {}", status),
        };

        match status {
            StatusCode::NOT_FOUND => AsuClientError::NotFound(message),
            _ => AsuClientError::server_error(status.as_u16(), message),
        }
    }
}

/// Pull a readable message out of an error body
///
/// The service reports errors as `{"detail": ...}`; anything else is passed
/// through as text.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        return match value.get("detail") {
            Some(serde_json::Value::String(detail)) => detail.clone(),
            Some(detail) => detail.to_string(),
            None => value.to_string(),
        };
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        format!("HTTP {}", status)
    } else {
        text.to_string()
    }
}

fn emit<F>(callback: &mut Option<F>, event: BuildEvent<'_>)
where
    F: FnMut(BuildEvent<'_>),
{
    if let Some(callback) = callback {
        callback(event);
    }
}

/// Progress of [`AsuClient::request_images`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BuildEvent<'a> {
    /// Service accepted the request
    Submitted { request_hash: &'a str, cached: bool },
    /// Job is still queued or building
    Pending {
        attempt: u32,
        queue_position: Option<u64>,
        detail: Option<&'a str>,
    },
    /// Image builder finished successfully
    Finished { imagebuilder_status: Option<&'a str> },
    /// An image download started (`progress: None`) or advanced
    Downloading {
        image: &'a ImageArtifact,
        progress: Option<DownloadProgress>,
    },
    /// An image was written and verified
    Downloaded {
        image: &'a ImageArtifact,
        file: &'a DownloadedImage,
    },
    /// All images downloaded
    Complete,
}

impl std::fmt::Display for BuildEvent<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submitted { request_hash, .. } => write!(f, "Submitted {}", request_hash),
            Self::Pending { attempt, .. } => write!(f, "Building (poll {})", attempt),
            Self::Finished { .. } => write!(f, "Finished"),
            Self::Downloading { image, .. } => write!(f, "Downloading {}", image.name),
            Self::Downloaded { image, .. } => write!(f, "Downloaded {}", image.name),
            Self::Complete => write!(f, "Complete"),
        }
    }
}

/// Result of a successful [`AsuClient::request_images`] run
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub request_hash: String,
    /// Final reply from the service
    pub reply: BuildReply,
    /// Downloaded files, in the order the service listed them
    pub images: Vec<DownloadedImage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = AsuClient::new("https://sysupgrade.openwrt.org/");
        assert!(client.is_ok());
    }

    #[test]
    fn test_invalid_url() {
        assert!(AsuClient::new("not a url").is_err());
        assert!(AsuClient::new("mailto:builds@example.org").is_err());
    }

    #[test]
    fn test_build_url_trailing_slash() {
        let client = AsuClient::new("http://test/").unwrap();
        let url = client
            .build_url(&["api", "v1", "revision", "24.10.0", "x86", "64"])
            .unwrap();
        assert_eq!(url.as_str(), "http://test/api/v1/revision/24.10.0/x86/64");
    }

    #[test]
    fn test_build_url_with_prefix() {
        let with_slash = AsuClient::new("http://test/asu/").unwrap();
        let without_slash = AsuClient::new("http://test/asu").unwrap();
        assert_eq!(
            with_slash.build_url(&["store", "H1", "img.bin"]).unwrap(),
            without_slash.build_url(&["store", "H1", "img.bin"]).unwrap()
        );
        assert_eq!(
            with_slash
                .build_url(&["store", "H1", "img.bin"])
                .unwrap()
                .as_str(),
            "http://test/asu/store/H1/img.bin"
        );
    }

    #[test]
    fn test_build_url_encodes_segments() {
        let client = AsuClient::new("http://test/").unwrap();
        let url = client
            .build_url(&["api", "v1", "revision", "SNAPSHOT", "a/b", "64"])
            .unwrap();
        assert_eq!(url.as_str(), "http://test/api/v1/revision/SNAPSHOT/a%2Fb/64");
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, br#"{"detail":"Unsupported profile"}"#),
            "Unsupported profile"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, b"  upstream down\n"),
            "upstream down"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, b""),
            "HTTP 502 Bad Gateway"
        );
    }
}
