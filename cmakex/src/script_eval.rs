//! Invokes the external wrapper project that executes a dependency script and
//! reports the `add_pkg` calls it issued (spec 4.F).
//!
//! The wrapper project's content is hashed with a header-line-plus-stable-body
//! contract: the materialized file always begins with a comment line carrying the
//! sha256 of the body that follows, so a subsequent run can skip rewriting it by
//! comparing headers instead of re-hashing the whole file (spec 9, "Open
//! question" — the chosen resolution is documented in the repository design notes).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;
use sha2::{Digest, Sha256};

use cmakex_config::ConfigurationName;

use crate::configure_args::ConfigureFlag;
use crate::error::{CmakexError, Result};
use crate::process::{self, OutputCapture};

const WRAPPER_BODY: &str = include_str!("../assets/deps_script_executor/CMakeLists.txt.in");
const HASH_HEADER_PREFIX: &str = "# cmakex-generated, body-sha256=";
const OUTPUT_FILENAME: &str = "add_pkg_output.tsv";

fn wrapper_body_hash() -> String {
    hex::encode(Sha256::digest(WRAPPER_BODY.as_bytes()))
}

fn wrapper_content() -> String {
    format!("{HASH_HEADER_PREFIX}{}\n{WRAPPER_BODY}", wrapper_body_hash())
}

/// One `add_pkg(...)` invocation reported by the script evaluator, in parsed form
/// (spec 6, "Script evaluator output").
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AddPkgLine {
    pub name: String,
    pub git_repository: Option<String>,
    pub git_tag: Option<String>,
    pub git_shallow: bool,
    pub source_dir: Option<String>,
    pub depends: Vec<String>,
    pub cmake_args: Vec<String>,
    pub configs: Vec<ConfigurationName>,
}

impl AddPkgLine {
    fn parse(line: &str) -> Result<Self> {
        let mut fields = line.split('\t');
        let name = fields
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CmakexError::ScriptEvaluationFailed {
                script: PathBuf::new(),
                message: format!("empty package name in line: {line:?}"),
            })?
            .to_string();

        let mut out = AddPkgLine {
            name,
            git_repository: None,
            git_tag: None,
            git_shallow: true,
            source_dir: None,
            depends: Vec::new(),
            cmake_args: Vec::new(),
            configs: Vec::new(),
        };

        for field in fields {
            let mut words = field.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };
            let rest: Vec<&str> = words.collect();
            match keyword {
                "GIT_REPOSITORY" => out.git_repository = rest.first().map(|s| s.to_string()),
                "GIT_TAG" => out.git_tag = rest.first().map(|s| s.to_string()),
                "GIT_SHALLOW" => out.git_shallow = rest.first() != Some(&"OFF"),
                "SOURCE_DIR" => out.source_dir = rest.first().map(|s| s.to_string()),
                "DEPENDS" => out.depends = rest.into_iter().map(|s| s.to_string()).collect(),
                "CMAKE_ARGS" => out.cmake_args = rest.into_iter().map(|s| s.to_string()).collect(),
                "CONFIGS" => {
                    out.configs = rest.into_iter().map(ConfigurationName::new).collect()
                }
                other => warn!("ignoring unrecognized add_pkg keyword group '{other}'"),
            }
        }

        Ok(out)
    }
}

/// Drives the wrapper project: materializes it (skipping the write when its
/// content-hash already matches what's on disk), configures it once per planning
/// run, and re-invokes cmake once per script to collect its `add_pkg` lines.
pub struct ScriptEvaluator {
    executor_dir: PathBuf,
    log_dir: PathBuf,
    cmake: PathBuf,
    configured: bool,
}

impl ScriptEvaluator {
    pub fn new(executor_dir: PathBuf, log_dir: PathBuf, cmake: PathBuf) -> Self {
        Self {
            executor_dir,
            log_dir,
            cmake,
            configured: false,
        }
    }

    fn cmakelists_path(&self) -> PathBuf {
        self.executor_dir.join("CMakeLists.txt")
    }

    fn output_path(&self) -> PathBuf {
        self.executor_dir.join(OUTPUT_FILENAME)
    }

    /// Writes the wrapper project if its hash header doesn't already match.
    fn materialize(&self) -> Result<()> {
        std::fs::create_dir_all(&self.executor_dir).map_err(|source| CmakexError::Filesystem {
            path: self.executor_dir.clone(),
            source,
        })?;
        let path = self.cmakelists_path();
        let expected_header = format!("{HASH_HEADER_PREFIX}{}", wrapper_body_hash());
        if let Ok(existing) = std::fs::read_to_string(&path) {
            if existing.lines().next() == Some(expected_header.as_str()) {
                return Ok(());
            }
        }
        std::fs::write(&path, wrapper_content()).map_err(|source| CmakexError::Filesystem {
            path,
            source,
        })
    }

    /// Configures the wrapper project with the main project's singleton flags
    /// (generator, toolset, architecture), once per planning run.
    pub async fn ensure_configured(&mut self, singleton_flags: &[ConfigureFlag]) -> Result<()> {
        if self.configured {
            return Ok(());
        }
        self.materialize()?;

        let mut args = vec![
            "-S".to_string(),
            self.executor_dir.display().to_string(),
            "-B".to_string(),
            self.executor_dir.display().to_string(),
        ];
        for flag in singleton_flags {
            args.push(flag.to_string());
        }
        args.push(format!("-DDEPS_SCRIPT={}", self.executor_dir.display()));
        args.push(format!("-DADD_PKG_OUTPUT={}", self.output_path().display()));

        self.run_cmake(&args, "configure").await?;
        self.configured = true;
        Ok(())
    }

    /// Runs the wrapper against `script`, returning the `add_pkg` invocations it
    /// produced.
    pub async fn evaluate(&self, script: &Path) -> Result<Vec<AddPkgLine>> {
        let output_path = self.output_path();
        std::fs::write(&output_path, "").map_err(|source| CmakexError::Filesystem {
            path: output_path.clone(),
            source,
        })?;

        let args = vec![
            "-S".to_string(),
            self.executor_dir.display().to_string(),
            "-B".to_string(),
            self.executor_dir.display().to_string(),
            format!("-DDEPS_SCRIPT={}", script.display()),
            format!("-DADD_PKG_OUTPUT={}", output_path.display()),
        ];
        self.run_cmake(&args, "evaluate").await?;

        let text = std::fs::read_to_string(&output_path).map_err(|source| CmakexError::Filesystem {
            path: output_path,
            source,
        })?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(AddPkgLine::parse)
            .collect()
    }

    async fn run_cmake(&self, args: &[String], phase: &str) -> Result<()> {
        let capture: Arc<OutputCapture> = OutputCapture::new(false);
        let status = process::exec(&self.cmake, args, None, &capture).await?;
        if !status.success() {
            let log_path = self.log_dir.join(format!("deps_script_executor-{phase}.log"));
            let _ = std::fs::create_dir_all(&self.log_dir);
            let _ = std::fs::write(
                &log_path,
                format!("{}\n{}", capture.stdout_text(), capture.stderr_text()),
            );
            return Err(CmakexError::ScriptEvaluationFailed {
                script: self.executor_dir.clone(),
                message: format!("wrapper project {phase} failed, see {}", log_path.display()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_a_full_add_pkg_line() {
        let line = "foo\tGIT_REPOSITORY https://example.invalid/foo.git\tGIT_TAG v1.0\tSOURCE_DIR sub\tDEPENDS bar baz\tCMAKE_ARGS -DFOO=1 -DBAR=2\tCONFIGS Debug Release";
        let parsed = AddPkgLine::parse(line).unwrap();
        assert_eq!(parsed.name, "foo");
        assert_eq!(parsed.git_repository.as_deref(), Some("https://example.invalid/foo.git"));
        assert_eq!(parsed.git_tag.as_deref(), Some("v1.0"));
        assert_eq!(parsed.source_dir.as_deref(), Some("sub"));
        assert_eq!(parsed.depends, vec!["bar", "baz"]);
        assert_eq!(parsed.cmake_args, vec!["-DFOO=1", "-DBAR=2"]);
        assert_eq!(
            parsed.configs,
            vec![ConfigurationName::new("Debug"), ConfigurationName::new("Release")]
        );
        assert!(parsed.git_shallow);
    }

    #[test]
    fn git_shallow_off_is_honored() {
        let line = "foo\tGIT_SHALLOW OFF";
        let parsed = AddPkgLine::parse(line).unwrap();
        assert!(!parsed.git_shallow);
    }

    #[test]
    fn bare_name_with_no_groups_parses() {
        let parsed = AddPkgLine::parse("foo").unwrap();
        assert_eq!(parsed.name, "foo");
        assert!(parsed.depends.is_empty());
    }

    #[test]
    fn materialize_skips_rewrite_when_hash_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = ScriptEvaluator::new(dir.path().to_path_buf(), dir.path().to_path_buf(), "cmake".into());
        evaluator.materialize().unwrap();
        let first_write_time = std::fs::metadata(evaluator.cmakelists_path()).unwrap().modified().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        evaluator.materialize().unwrap();
        let second_write_time = std::fs::metadata(evaluator.cmakelists_path()).unwrap().modified().unwrap();
        assert_eq!(first_write_time, second_write_time);
    }
}
