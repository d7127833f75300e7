//! Build command - request, wait for and download a custom image

use std::path::PathBuf;

use anyhow::{Context, Result};
use asu_client::{AsuClient, AsuClientError, BuildEvent, BuildOutcome, BuildRequest};

use crate::output::{BuildSummary, ImageRow, OutputContext};
use crate::progress::BuildProgress;

/// What to build and where to put it
#[derive(Debug, Clone)]
pub struct BuildArgs {
    pub version: String,
    pub target: String,
    pub sub_target: String,
    pub profile: String,
    pub packages: Vec<String>,
    /// Contents of the first-boot script
    pub defaults: Option<String>,
    pub rootfs_size_mb: Option<u32>,
    /// Root under which the per-build directory is created
    pub output_root: PathBuf,
}

/// Build an image and download every artifact
pub async fn build(
    client: &AsuClient,
    args: &BuildArgs,
    ctx: &OutputContext,
) -> Result<BuildOutcome> {
    let latest = client
        .get_latest_versions()
        .await
        .context("Failed to fetch latest versions")?;

    if !latest.latest.is_empty() && !latest.latest.contains(&args.version) && ctx.interactive() {
        ctx.warn(&format!(
            "{} is not a latest release ({})",
            args.version,
            latest.latest.join(", ")
        ));
    }

    let revision = client
        .get_revision(&args.version, &args.target, &args.sub_target)
        .await
        .with_context(|| {
            format!(
                "Failed to resolve revision for {} {}/{}",
                args.version, args.target, args.sub_target
            )
        })?;

    ctx.print_kv(&[
        ("Latest versions", latest.latest.join(", ")),
        ("Version", args.version.clone()),
        (
            "Target",
            format!("{}/{} ({})", args.target, args.sub_target, args.profile),
        ),
        ("Revision", revision.revision.clone()),
        ("Packages", args.packages.join(" ")),
    ]);

    let mut request = BuildRequest::new(
        &args.version,
        revision.revision,
        &args.target,
        &args.sub_target,
        &args.profile,
    )
    .packages(args.packages.iter().cloned());
    if let Some(script) = &args.defaults {
        request = request.defaults(script.as_str());
    }
    if let Some(size) = args.rootfs_size_mb {
        request = request.rootfs_size_mb(size);
    }

    let output_dir = request.output_dir(&args.output_root);
    ctx.info(&format!("Images will be saved to {}", output_dir.display()));

    let mut progress = BuildProgress::new(ctx.interactive());
    let result = client
        .request_images(
            &request,
            &output_dir,
            Some(|event: BuildEvent<'_>| progress.handle(event)),
        )
        .await;
    progress.abandon();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            if let AsuClientError::BuildFailed { stdout, stderr, .. } = &err {
                ctx.print_stream("STDOUT:", stdout.as_deref());
                ctx.print_stream("STDERR:", stderr.as_deref());
            }
            return Err(err.into());
        }
    };

    ctx.success(&format!(
        "Downloaded {} image(s) to {}",
        outcome.images.len(),
        output_dir.display()
    ));
    ctx.print_summary(&BuildSummary {
        request_hash: outcome.request_hash.clone(),
        output_dir: output_dir.display().to_string(),
        images: outcome.images.iter().map(ImageRow::from).collect(),
    });

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use asu_client::testing::{MockBuildService, TestServer};
    use serde_json::json;

    fn quiet() -> OutputContext {
        OutputContext::new(OutputFormat::Json, true, true)
    }

    fn args(output_root: PathBuf) -> BuildArgs {
        BuildArgs {
            version: "24.10.0".into(),
            target: "x86".into(),
            sub_target: "64".into(),
            profile: "generic".into(),
            packages: vec!["tailscale".into()],
            defaults: None,
            rootfs_size_mb: None,
            output_root,
        }
    }

    #[tokio::test]
    async fn test_build_downloads_images() {
        let mock = MockBuildService::new()
            .with_revision("24.10.0", "x86", "64", "abc123")
            .with_submit(202, json!({"request_hash": "H1"}))
            .with_pending_polls(1)
            .with_final(
                200,
                json!({"imagebuilder_status": "success", "images": [{"name": "img.bin"}]}),
            )
            .with_artifact("H1", "img.bin", &b"DATA"[..]);
        let server = TestServer::start(mock.router()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let outcome = build(server.client(), &args(dir.path().to_path_buf()), &quiet())
            .await
            .unwrap();

        let image = dir
            .path()
            .join("openwrt-24.10.0-x86-64-generic")
            .join("img.bin");
        assert_eq!(outcome.images[0].path, image);
        assert_eq!(std::fs::read(image).unwrap(), b"DATA");

        let body = &mock.submitted()[0];
        assert_eq!(body["version_code"], "abc123");
        assert_eq!(body["packages"], json!(["tailscale"]));
        assert_eq!(body["rootfs_size_mb"], 256);
    }

    #[tokio::test]
    async fn test_build_failure_reports_and_skips_download() {
        let mock = MockBuildService::new()
            .with_revision("24.10.0", "x86", "64", "abc123")
            .with_final(500, json!({"stdout": "...", "stderr": "boom"}))
            .with_artifact("H1", "img.bin", &b"DATA"[..]);
        let server = TestServer::start(mock.router()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = build(server.client(), &args(dir.path().to_path_buf()), &quiet())
            .await
            .unwrap_err();

        match err.downcast_ref::<AsuClientError>() {
            Some(AsuClientError::BuildFailed { status, stderr, .. }) => {
                assert_eq!(*status, 500);
                assert_eq!(stderr.as_deref(), Some("boom"));
            }
            other => panic!("expected BuildFailed, got {:?}", other),
        }
        assert_eq!(mock.download_requests(), 0);
        assert!(!dir.path().join("openwrt-24.10.0-x86-64-generic").exists());
    }

    #[tokio::test]
    async fn test_build_options_reach_request() {
        let mock = MockBuildService::new().with_revision("23.05.5", "ath79", "generic", "r24106");
        let server = TestServer::start(mock.router()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let args = BuildArgs {
            version: "23.05.5".into(),
            target: "ath79".into(),
            sub_target: "generic".into(),
            profile: "tplink_archer-c7-v2".into(),
            packages: vec!["luci".into(), "-ppp".into()],
            defaults: Some("uci commit\n".into()),
            rootfs_size_mb: Some(64),
            output_root: dir.path().to_path_buf(),
        };
        let outcome = build(server.client(), &args, &quiet()).await.unwrap();
        assert!(outcome.images.is_empty());

        let body = &mock.submitted()[0];
        assert_eq!(body["target"], "ath79/generic");
        assert_eq!(body["profile"], "tplink_archer-c7-v2");
        assert_eq!(body["packages"], json!(["luci", "-ppp"]));
        assert_eq!(body["defaults"], "uci commit\n");
        assert_eq!(body["rootfs_size_mb"], 64);
    }

    #[tokio::test]
    async fn test_build_unknown_target() {
        let mock = MockBuildService::new();
        let server = TestServer::start(mock.router()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = build(server.client(), &args(dir.path().to_path_buf()), &quiet())
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<AsuClientError>(),
            Some(AsuClientError::NotFound(_))
        ));
        assert!(mock.submitted().is_empty());
    }
}
