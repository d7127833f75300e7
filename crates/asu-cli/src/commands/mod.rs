//! Command implementations for asu-build

pub mod build;

pub use build::{build, BuildArgs};
