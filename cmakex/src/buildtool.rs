//! The native build tool is out of scope for this crate (spec 1, "Out of scope")
//! and is invoked only as an opaque subprocess. This module defines the narrow
//! trait the build executor drives it through, so tests can substitute a fake
//! implementation (spec 8, "Test design") instead of shelling out to a real
//! `cmake` binary.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use cmakex_config::ConfigurationName;

use crate::error::Result;
use crate::process::{self, OutputCapture};

#[async_trait]
pub trait NativeBuildTool: std::fmt::Debug + Send + Sync {
    async fn configure(
        &self,
        source_dir: &Path,
        binary_dir: &Path,
        args: &[String],
        log_path: &Path,
    ) -> Result<bool>;

    async fn build(
        &self,
        binary_dir: &Path,
        config: &ConfigurationName,
        log_path: &Path,
    ) -> Result<bool>;

    async fn install(
        &self,
        binary_dir: &Path,
        config: &ConfigurationName,
        prefix: &Path,
        log_path: &Path,
    ) -> Result<bool>;
}

/// Drives a real `cmake` binary located on the search path.
#[derive(Debug)]
pub struct CmakeBuildTool {
    cmake: std::path::PathBuf,
}

impl CmakeBuildTool {
    pub fn located() -> Result<Self> {
        let cmake = which::which("cmake").map_err(|_| crate::error::CmakexError::LaunchFailed {
            program: "cmake".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "cmake not found on PATH"),
        })?;
        Ok(Self { cmake })
    }

    async fn run(&self, args: &[String], log_path: &Path) -> Result<bool> {
        let capture: Arc<OutputCapture> = OutputCapture::new(false);
        let status = process::exec(&self.cmake, args, None, &capture).await?;
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(
            log_path,
            format!("{}\n{}", capture.stdout_text(), capture.stderr_text()),
        );
        Ok(status.success())
    }
}

#[async_trait]
impl NativeBuildTool for CmakeBuildTool {
    async fn configure(
        &self,
        source_dir: &Path,
        binary_dir: &Path,
        args: &[String],
        log_path: &Path,
    ) -> Result<bool> {
        let mut full_args = vec![
            "-S".to_string(),
            source_dir.display().to_string(),
            "-B".to_string(),
            binary_dir.display().to_string(),
        ];
        full_args.extend_from_slice(args);
        self.run(&full_args, log_path).await
    }

    async fn build(
        &self,
        binary_dir: &Path,
        config: &ConfigurationName,
        log_path: &Path,
    ) -> Result<bool> {
        let args = vec![
            "--build".to_string(),
            binary_dir.display().to_string(),
            "--config".to_string(),
            config.canonical().to_string(),
        ];
        self.run(&args, log_path).await
    }

    async fn install(
        &self,
        binary_dir: &Path,
        config: &ConfigurationName,
        prefix: &Path,
        log_path: &Path,
    ) -> Result<bool> {
        let args = vec![
            "--install".to_string(),
            binary_dir.display().to_string(),
            "--config".to_string(),
            config.canonical().to_string(),
            "--prefix".to_string(),
            prefix.display().to_string(),
        ];
        self.run(&args, log_path).await
    }
}
