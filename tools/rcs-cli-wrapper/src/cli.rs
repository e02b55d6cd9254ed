use snafu::{ensure, ResultExt};
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::{error, Result};

/// A located `git` binary, invoked with an explicit working directory per call.
pub(crate) struct CommandLine {
    pub(crate) path: PathBuf,
}

impl CommandLine {
    pub(crate) fn located() -> Result<Self> {
        Ok(Self {
            path: which::which("git").context(error::NotFoundSnafu)?,
        })
    }

    /// Runs `git <args>` in `cwd`, returning stdout on success.
    pub(crate) async fn output(&self, cwd: &Path, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.path)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .context(error::CommandFailedSnafu {
                args: args_owned(args),
            })?;
        ensure!(
            output.status.success(),
            error::OperationFailedSnafu {
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
                args: args_owned(args),
            }
        );
        Ok(output.stdout)
    }

    /// Runs `git <args>` in `cwd` without capturing output, for operations whose
    /// progress the user should see directly (clone, checkout).
    pub(crate) async fn spawn(&self, cwd: &Path, args: &[&str]) -> Result<()> {
        let status = Command::new(&self.path)
            .args(args)
            .current_dir(cwd)
            .spawn()
            .context(error::CommandFailedSnafu {
                args: args_owned(args),
            })?
            .wait()
            .await
            .context(error::CommandFailedSnafu {
                args: args_owned(args),
            })?;
        ensure!(
            status.success(),
            error::OperationFailedSnafu {
                message: format!("exit status {status}"),
                args: args_owned(args),
            }
        );
        Ok(())
    }
}

fn args_owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}
