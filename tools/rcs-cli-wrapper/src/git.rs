use async_trait::async_trait;
use snafu::ResultExt;
use std::fmt::Debug;
use std::path::Path;

use crate::cli::CommandLine;
use crate::{error, Result};

/// Working tree state as reported by the revision-control backend (spec 4.C,
/// GLOSSARY "clean"/"dirty").
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WorkingTreeStatus {
    /// The clone directory does not exist.
    Missing,
    /// No local modifications relative to `HEAD`.
    Clean,
    /// Local modifications, untracked files, or an index in a non-default state.
    Dirty,
    /// The directory exists but is not a working tree the backend recognizes
    /// (e.g. not a git repository at all).
    Obstructed,
}

/// Revision-control operations the planner and build executor need. Abstracted
/// behind a trait so tests can substitute a fake implementation instead of
/// shelling out to a real `git` binary (spec 8, "Test design").
#[async_trait]
pub trait RcsClient: Debug + Send + Sync + 'static {
    /// Clones `url` into `dest`, which must not already exist. `git_ref`, when
    /// given a branch or tag name, is passed through so the clone lands on it
    /// directly. `shallow` requests `--depth 1` when the backend supports it.
    async fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        git_ref: Option<&str>,
        shallow: bool,
    ) -> Result<()>;

    /// Checks out `git_ref` (branch, tag, or commit) in an already-cloned `dir`.
    async fn checkout(&self, dir: &Path, git_ref: &str) -> Result<()>;

    /// Resolves `git_ref` against the remote `url` without cloning, returning the
    /// commit it points at, or `None` if the remote has no matching ref.
    async fn ls_remote(&self, url: &str, git_ref: &str) -> Result<Option<String>>;

    /// The commit checked out in `dir`.
    async fn rev_parse_head(&self, dir: &Path) -> Result<String>;

    /// Resolves an arbitrary revision expression against the repository in `dir`.
    async fn rev_parse(&self, dir: &Path, rev: &str) -> Result<String>;

    /// Classifies the working tree at `dir`.
    async fn status(&self, dir: &Path) -> Result<WorkingTreeStatus>;
}

/// `RcsClient` backed by an on-`PATH` `git` binary.
#[derive(Debug)]
pub struct RealGitClient {
    cli: CommandLine,
}

impl RealGitClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            cli: CommandLine::located()?,
        })
    }
}

#[async_trait]
impl RcsClient for RealGitClient {
    async fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        git_ref: Option<&str>,
        shallow: bool,
    ) -> Result<()> {
        let dest_str = dest.to_string_lossy().into_owned();
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        let mut args = vec!["clone"];
        if shallow {
            args.push("--depth");
            args.push("1");
        }
        if let Some(git_ref) = git_ref {
            args.push("--branch");
            args.push(git_ref);
        }
        args.push(url);
        args.push(&dest_str);
        self.cli.spawn(parent, &args).await
    }

    async fn checkout(&self, dir: &Path, git_ref: &str) -> Result<()> {
        self.cli.spawn(dir, &["checkout", git_ref]).await
    }

    async fn ls_remote(&self, url: &str, git_ref: &str) -> Result<Option<String>> {
        let cwd = std::env::temp_dir();
        let stdout = self.cli.output(&cwd, &["ls-remote", url, git_ref]).await?;
        let text = String::from_utf8(stdout).context(error::NotUtf8Snafu)?;
        Ok(text
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().next())
            .map(str::to_owned))
    }

    async fn rev_parse_head(&self, dir: &Path) -> Result<String> {
        self.rev_parse(dir, "HEAD").await
    }

    async fn rev_parse(&self, dir: &Path, rev: &str) -> Result<String> {
        let stdout = self.cli.output(dir, &["rev-parse", rev]).await?;
        let text = String::from_utf8(stdout).context(error::NotUtf8Snafu)?;
        Ok(text.trim().to_owned())
    }

    async fn status(&self, dir: &Path) -> Result<WorkingTreeStatus> {
        if !dir.exists() {
            return Ok(WorkingTreeStatus::Missing);
        }
        if self
            .cli
            .output(dir, &["rev-parse", "--is-inside-work-tree"])
            .await
            .is_err()
        {
            return Ok(WorkingTreeStatus::Obstructed);
        }
        let stdout = self.cli.output(dir, &["status", "--porcelain"]).await?;
        if stdout.iter().all(u8::is_ascii_whitespace) {
            Ok(WorkingTreeStatus::Clean)
        } else {
            Ok(WorkingTreeStatus::Dirty)
        }
    }
}
