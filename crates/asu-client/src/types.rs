//! Request and response types for the ASU REST API

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{AsuClientError, Result};

/// Distribution name sent with every build request
pub const DISTRO: &str = "openwrt";

/// Identifier of this client sent with every build request
pub const CLIENT_ID: &str = "desktop-builder/0.0.0";

/// Default root filesystem size in megabytes
pub const DEFAULT_ROOTFS_SIZE_MB: u32 = 256;

// =============================================================================
// Version Discovery
// =============================================================================

/// Response from `api/v1/latest`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatestVersions {
    /// Latest release of each supported branch
    #[serde(default)]
    pub latest: Vec<String>,

    /// Any other keys reported by the service
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Response from `api/v1/revision/{version}/{target}/{sub_target}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    /// Source control revision of the image builder for that target
    pub revision: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// =============================================================================
// Build Submission
// =============================================================================

/// A build request for one device profile
///
/// Created with [`BuildRequest::new`] and refined with the builder-style
/// setters. Each request owns its own package, repository and key lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub version: String,
    /// Resolved revision, sent as `version_code`
    pub revision: String,
    pub target: String,
    pub sub_target: String,
    pub profile: String,
    pub packages: Vec<String>,
    /// Inline first-boot script (uci-defaults)
    pub defaults: Option<String>,
    pub rootfs_size_mb: u32,
    pub repositories: BTreeMap<String, String>,
    pub repository_keys: Vec<String>,
}

impl BuildRequest {
    pub fn new(
        version: impl Into<String>,
        revision: impl Into<String>,
        target: impl Into<String>,
        sub_target: impl Into<String>,
        profile: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            revision: revision.into(),
            target: target.into(),
            sub_target: sub_target.into(),
            profile: profile.into(),
            packages: Vec::new(),
            defaults: None,
            rootfs_size_mb: DEFAULT_ROOTFS_SIZE_MB,
            repositories: BTreeMap::new(),
            repository_keys: Vec::new(),
        }
    }

    /// Replace the package list
    pub fn packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages = packages.into_iter().map(Into::into).collect();
        self
    }

    /// Append a single package
    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.packages.push(package.into());
        self
    }

    pub fn defaults(mut self, script: impl Into<String>) -> Self {
        self.defaults = Some(script.into());
        self
    }

    pub fn rootfs_size_mb(mut self, size: u32) -> Self {
        self.rootfs_size_mb = size;
        self
    }

    /// Add an extra package repository
    pub fn repository(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.repositories.insert(name.into(), url.into());
        self
    }

    /// Add a signing key for the extra repositories
    pub fn repository_key(mut self, key: impl Into<String>) -> Self {
        self.repository_keys.push(key.into());
        self
    }

    /// Target as sent on the wire (`target/sub_target`)
    pub fn target_path(&self) -> String {
        format!("{}/{}", self.target, self.sub_target)
    }

    /// Conventional download directory for this request
    ///
    /// `{root}/openwrt-{version}-{target}-{sub_target}-{profile}`
    pub fn output_dir(&self, root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(format!(
            "{}-{}-{}-{}-{}",
            DISTRO, self.version, self.target, self.sub_target, self.profile
        ))
    }

    /// JSON body for `POST api/v1/build`
    pub fn body(&self) -> BuildRequestBody<'_> {
        BuildRequestBody {
            distro: DISTRO,
            version: &self.version,
            version_code: &self.revision,
            target: self.target_path(),
            profile: &self.profile,
            packages: &self.packages,
            packages_versions: BTreeMap::new(),
            diff_packages: false,
            defaults: self.defaults.as_deref(),
            rootfs_size_mb: self.rootfs_size_mb,
            repositories: &self.repositories,
            repository_keys: &self.repository_keys,
            client: CLIENT_ID,
        }
    }
}

/// Wire form of a [`BuildRequest`]
#[derive(Debug, Serialize)]
pub struct BuildRequestBody<'a> {
    pub distro: &'static str,
    pub version: &'a str,
    pub version_code: &'a str,
    pub target: String,
    pub profile: &'a str,
    pub packages: &'a [String],
    /// Always empty: versions are never pinned
    pub packages_versions: BTreeMap<String, String>,
    /// Always false: the package list is absolute
    pub diff_packages: bool,
    pub defaults: Option<&'a str>,
    pub rootfs_size_mb: u32,
    pub repositories: &'a BTreeMap<String, String>,
    pub repository_keys: &'a [String],
    pub client: &'static str,
}

// =============================================================================
// Build Status
// =============================================================================

/// Body returned by the submit and status endpoints
///
/// The service sends different subsets of these fields depending on the
/// job state, so everything is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildResponse {
    #[serde(default)]
    pub request_hash: Option<String>,

    /// Outcome of the image builder run
    #[serde(default)]
    pub imagebuilder_status: Option<String>,

    /// Human readable status or error message
    ///
    /// Validation errors carry a structured list here; it is kept as JSON
    /// text.
    #[serde(default, deserialize_with = "detail_text")]
    pub detail: Option<String>,

    /// Position in the build queue while pending
    #[serde(default)]
    pub queue_position: Option<u64>,

    #[serde(default)]
    pub stdout: Option<String>,

    #[serde(default)]
    pub stderr: Option<String>,

    #[serde(default)]
    pub images: Vec<ImageArtifact>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn detail_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(detail)) => Some(detail),
        Some(other) => Some(other.to_string()),
    })
}

/// One produced firmware image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    /// Remote object key and local file name
    pub name: String,

    /// SHA-256 digest published by the service (hex)
    #[serde(default)]
    pub sha256: Option<String>,

    #[serde(default, rename = "type")]
    pub image_type: Option<String>,

    #[serde(default)]
    pub filesystem: Option<String>,
}

/// Status code and decoded body of a submit or status call
#[derive(Debug, Clone)]
pub struct BuildReply {
    pub status: StatusCode,
    pub body: BuildResponse,
}

impl BuildReply {
    /// HTTP 202: the job is queued or building
    pub fn is_pending(&self) -> bool {
        self.status == StatusCode::ACCEPTED
    }

    /// HTTP 200 and the image builder did not report a failure
    pub fn is_success(&self) -> bool {
        self.status == StatusCode::OK
            && !imagebuilder_failed(self.body.imagebuilder_status.as_deref())
    }

    /// Request hash, required for polling and downloads
    pub fn request_hash(&self) -> Result<&str> {
        match self.body.request_hash.as_deref() {
            Some(hash) if !hash.is_empty() => Ok(hash),
            _ => Err(AsuClientError::Decode(format!(
                "response with status {} has no request_hash",
                self.status.as_u16()
            ))),
        }
    }

    /// Artifacts of a finished build, with their names validated
    pub fn images(&self) -> Result<&[ImageArtifact]> {
        for image in &self.body.images {
            validate_file_name(&image.name)?;
        }
        Ok(&self.body.images)
    }

    /// Convert a terminal reply into an error unless it succeeded
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_failure())
        }
    }

    /// Build failure carrying the diagnostics from this reply
    pub fn into_failure(self) -> AsuClientError {
        let body = self.body;
        AsuClientError::BuildFailed {
            status: self.status.as_u16(),
            imagebuilder_status: body.imagebuilder_status,
            detail: body.detail,
            stdout: body.stdout,
            stderr: body.stderr,
        }
    }
}

fn imagebuilder_failed(status: Option<&str>) -> bool {
    match status {
        Some(s) => {
            let s = s.to_ascii_lowercase();
            s.starts_with("fail") || s.starts_with("error")
        }
        None => false,
    }
}

/// Reject names that would escape the output directory
pub(crate) fn validate_file_name(name: &str) -> Result<()> {
    let path = Path::new(name);
    let plain = !name.is_empty()
        && !name.contains(['/', '\\'])
        && path.file_name().map(|f| f == path.as_os_str()).unwrap_or(false);
    if plain {
        Ok(())
    } else {
        Err(AsuClientError::Decode(format!("invalid image name {:?}", name)))
    }
}

// =============================================================================
// Downloads
// =============================================================================

/// Progress of a single artifact download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes written to disk so far
    pub bytes_written: u64,
    /// Content-Length, when the server sent one
    pub total_bytes: Option<u64>,
}

impl DownloadProgress {
    pub fn percent(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(100.0),
            Some(total) => Some(self.bytes_written as f64 / total as f64 * 100.0),
            None => None,
        }
    }
}

/// A completed artifact download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedImage {
    pub path: PathBuf,
    pub bytes: u64,
    /// SHA-256 of the written bytes (hex)
    pub sha256: String,
}
