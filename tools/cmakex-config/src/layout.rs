use crate::{
    multiconfig, ConfigurationName, CMAKEX_DIRNAME, DEPS_DIRNAME, DEPS_INSTALL_DIRNAME,
    INSTALLED_DIRNAME, LOG_DIRNAME, SCRIPT_EXECUTOR_DIRNAME, TMP_DIRNAME,
};
use std::path::{Path, PathBuf};

/// Pure function from (root binary directory, package name, configuration name,
/// generator identity) to filesystem paths (spec 4.A). Holds no mutable state; every
/// method is a deterministic computation over `root` and its arguments.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `_deps/` subtree root.
    pub fn deps_root(&self) -> PathBuf {
        self.root.join(DEPS_DIRNAME)
    }

    /// `_deps/<name>` clone directory.
    pub fn pkg_clone_dir(&self, name: &str) -> PathBuf {
        self.deps_root().join(name)
    }

    /// `_deps/<name>-build` binary directory, optionally suffixed with
    /// `/<NoConfig|config>` when per-configuration binary directories are in effect.
    ///
    /// `per_config_requested` is the user's raw request; the generator determines
    /// whether that request is honored (multi-config generators force it off — see
    /// [`crate::needs_per_config_binary_dirs`]).
    pub fn pkg_binary_dir(
        &self,
        name: &str,
        config: &ConfigurationName,
        generator: &str,
        per_config_requested: bool,
    ) -> PathBuf {
        let base = self.deps_root().join(format!("{name}-build"));
        if multiconfig::needs_per_config_binary_dirs(per_config_requested, generator) {
            base.join(config.canonical())
        } else {
            base
        }
    }

    /// `_deps/<name>-install` per-package install prefix.
    pub fn pkg_install_dir(&self, name: &str) -> PathBuf {
        self.deps_root().join(format!("{name}-install"))
    }

    /// `_deps-install/` cross-package shared install prefix. The sole writer is the
    /// build executor (spec 2, "Control flow").
    pub fn shared_install_prefix(&self) -> PathBuf {
        self.root.join(DEPS_INSTALL_DIRNAME)
    }

    /// `_cmakex/` scratch/log/database subtree root.
    pub fn cmakex_dir(&self) -> PathBuf {
        self.root.join(CMAKEX_DIRNAME)
    }

    /// `_cmakex/installed/` install-database directory.
    pub fn installed_db_dir(&self) -> PathBuf {
        self.cmakex_dir().join(INSTALLED_DIRNAME)
    }

    /// `_cmakex/log/` subprocess capture directory.
    pub fn log_dir(&self) -> PathBuf {
        self.cmakex_dir().join(LOG_DIRNAME)
    }

    /// `_cmakex/tmp/` scratch directory.
    pub fn tmp_dir(&self) -> PathBuf {
        self.cmakex_dir().join(TMP_DIRNAME)
    }

    /// `_cmakex/deps_script_executor_project/` wrapper project directory.
    pub fn script_executor_dir(&self) -> PathBuf {
        self.cmakex_dir().join(SCRIPT_EXECUTOR_DIRNAME)
    }

    /// Path of the persistent recursion-guard stack file.
    pub fn recursion_guard_path(&self) -> PathBuf {
        self.tmp_dir().join("dependency_stack.txt")
    }

    /// Path of the persisted cmakex cache (generator/toolset/architecture singletons).
    pub fn cmakex_cache_path(&self) -> PathBuf {
        self.cmakex_dir().join("cmakex_cache.json")
    }
}
