//! `cmakex` — a meta build driver that resolves, fetches, configures, builds and
//! installs a project's transitive dependencies against a shared prefix.
//!
//! The binary crate target (`src/main.rs`) is a thin driver over this library;
//! splitting the two lets integration tests under `tests/` exercise the planner
//! and executor directly, against fake [`buildtool::NativeBuildTool`] and
//! [`rcs_cli_wrapper::RcsClient`] implementations, without spawning real
//! subprocesses (SPEC_FULL §8).

pub mod buildtool;
pub mod cli;
pub mod cmakex_cache;
pub mod configure_args;
pub mod error;
pub mod executor;
pub mod installdb;
pub mod planner;
pub mod process;
pub mod script_eval;

use std::path::PathBuf;
use std::sync::Arc;

use env_logger::Builder;
use log::LevelFilter;

use cmakex_config::{ConfigurationName, Layout};

use crate::buildtool::{CmakeBuildTool, NativeBuildTool};
use crate::cli::{parse_verb, Args};
use crate::cmakex_cache::CmakexCache;
use crate::configure_args::{self, ConfigureFlag};
use crate::error::Result;
use crate::executor::Executor;
use crate::installdb::InstallDb;
use crate::planner::{BuildParams, CloneParams, PackageRequest, Planner};
use crate::script_eval::ScriptEvaluator;
use rcs_cli_wrapper::{RcsClient, RealGitClient};

const DEFAULT_LEVEL_FILTER: LevelFilter = LevelFilter::Info;

/// Initializes `env_logger`: an explicit `--log-level` flag takes priority, then
/// `RUST_LOG`, then a crate-scoped default of `Info` (SPEC_FULL §2, "Logging",
/// mirroring `twoliter::cmd::init_logger`).
pub fn init_logger(level: Option<LevelFilter>) {
    match (std::env::var(env_logger::DEFAULT_FILTER_ENV).ok(), level) {
        (Some(_), None) => {
            Builder::from_default_env().init();
        }
        _ => {
            Builder::new()
                .filter(Some(env!("CARGO_CRATE_NAME")), level.unwrap_or(DEFAULT_LEVEL_FILTER))
                .init();
        }
    }
}

/// Entry point driven by `main.rs`: resolves the cache, runs Phase 1, then
/// Phase 2, against the real `git` and `cmake` backends.
pub async fn run(args: Args) -> anyhow::Result<()> {
    use anyhow::Context;

    let verb = parse_verb(&args.verb, args.configs.as_deref())
        .map_err(anyhow::Error::new)
        .context("parsing the cmakex verb")?;

    let binary_dir = args.binary_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    let source_dir = args.source_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    let layout = Layout::new(&binary_dir);

    let cmakex_prefix_path: Vec<String> = std::env::var(cmakex_config::CMAKEX_PREFIX_PATH_VAR)
        .ok()
        .map(|s| s.split(':').map(str::to_string).collect())
        .unwrap_or_default();

    let cache = CmakexCache::resolve(
        &layout,
        args.generator.clone(),
        args.toolset.clone(),
        args.architecture.clone(),
        args.per_config_bin_dirs,
        cmakex_prefix_path,
    )
    .context("resolving the cmakex cache")?;

    let requested_configs: std::collections::BTreeSet<ConfigurationName> =
        verb.configs.iter().cloned().collect();
    let top_level_flags = configure_args::parse_flags(&args.cmake_args)
        .map_err(anyhow::Error::new)
        .context("parsing -- cmake-args")?;

    let requested_deps: Vec<PackageRequest> = if args.deps {
        Vec::new()
    } else {
        vec![PackageRequest {
            name: main_project_name(&source_dir),
            clone: CloneParams {
                url: String::new(),
                git_ref: String::new(),
                shallow: true,
            },
            build: BuildParams {
                source_subdir: None,
                flags: top_level_flags,
                configs: requested_configs.clone(),
            },
            depends: std::collections::BTreeSet::new(),
        }]
    };

    let install_db = InstallDb::new(layout.installed_db_dir());
    let rcs: Arc<dyn RcsClient> = Arc::new(RealGitClient::new().context("locating the git binary")?);
    let build_tool: Arc<dyn NativeBuildTool> =
        Arc::new(CmakeBuildTool::located().context("locating the cmake binary")?);
    let script_evaluator = ScriptEvaluator::new(
        layout.script_executor_dir(),
        layout.log_dir(),
        which::which("cmake").context("locating the cmake binary")?,
    );

    let singleton_flags: Vec<ConfigureFlag> = cache.singleton_flags();
    let planner = Planner::new(
        &layout,
        &install_db,
        rcs,
        script_evaluator,
        args.strict_commit(),
        singleton_flags,
    );

    let plan = planner
        .plan(&source_dir, requested_deps, &requested_configs, None)
        .await
        .context("planning the dependency build order")?;

    let executor = Executor::new(
        &layout,
        &install_db,
        build_tool,
        cache.generator.clone(),
        cache.per_config_bin_dirs,
    );
    executor
        .run(&plan, verb.steps)
        .await
        .context("executing the build plan")?;

    Ok(())
}

fn main_project_name(source_dir: &std::path::Path) -> String {
    source_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string())
}
