//! Thin, fakeable wrapper around the revision-control client used to fetch
//! dependency sources. Mirrors the shape of `oci-cli-wrapper`'s command-line
//! tool wrapper: a located binary on a search path, a trait over its
//! operations, and a `snafu` error enum describing each way invoking it can fail.

mod cli;
pub mod error;
mod git;

pub use git::{RcsClient, RealGitClient, WorkingTreeStatus};

pub type Result<T> = std::result::Result<T, error::Error>;
