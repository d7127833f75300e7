//! ASU Client Library
//!
//! Typed HTTP client for the OpenWrt Attended SysUpgrade (ASU) image build
//! service: look up releases and revisions, request a custom image, wait for
//! the build and download the resulting files.
//!
//! # Example
//!
//! ```rust,no_run
//! use asu_client::{AsuClient, BuildEvent, BuildRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), asu_client::AsuClientError> {
//!     let client = AsuClient::new("https://sysupgrade.openwrt.org/")?;
//!
//!     let revision = client.get_revision("24.10.0", "x86", "64").await?;
//!     let request = BuildRequest::new("24.10.0", revision.revision, "x86", "64", "generic")
//!         .package("tailscale");
//!
//!     let outcome = client
//!         .request_images(
//!             &request,
//!             request.output_dir("downloads"),
//!             Some(|event: BuildEvent<'_>| println!("{}", event)),
//!         )
//!         .await?;
//!
//!     for image in &outcome.images {
//!         println!("{} ({} bytes)", image.path.display(), image.bytes);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Lower-level calls
//!
//! Each REST endpoint is also exposed on its own. The build endpoints return
//! the raw status code with the decoded body so callers can drive the
//! 202-poll loop themselves:
//!
//! ```rust,ignore
//! let reply = client.post_build(&request).await?;
//! let hash = reply.request_hash()?.to_string();
//! let done = client.poll_build_complete_simple(&hash).await?.into_result()?;
//! for image in done.images()? {
//!     client
//!         .download_build(&hash, &image.name, "out", None::<fn(asu_client::DownloadProgress)>)
//!         .await?;
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module provides a mock build service and server harness:
//!
//! ```rust,ignore
//! use asu_client::testing::{MockBuildService, TestServer};
//!
//! let mock = MockBuildService::new().with_pending_polls(2);
//! let server = TestServer::start(mock.router()).await?;
//! let reply = server.client.poll_build_complete_simple("H1").await?;
//! assert_eq!(mock.status_requests(), 3);
//! ```

mod client;
pub mod config;
mod error;
pub mod poll;
pub mod testing;
mod types;

pub use client::{AsuClient, BuildEvent, BuildOutcome};
pub use config::{ClientConfig, ConfigError};
pub use error::{AsuClientError, Result};
pub use poll::PollPolicy;
pub use types::*;
