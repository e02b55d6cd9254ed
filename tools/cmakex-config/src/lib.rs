//! Shared, dependency-light types used by both the `cmakex` binary crate and
//! `rcs-cli-wrapper`: the configuration-name value type, the pure path & layout
//! service (spec component 4.A), and the multi-config generator coordinator
//! (spec component 4.I).
//!
//! Nothing in this crate performs I/O or owns mutable state; every function here
//! is a pure computation over its arguments, mirroring the role `buildsys-config`
//! plays for `twoliter` and `buildsys`.

mod config_name;
mod layout;
mod multiconfig;

pub use config_name::ConfigurationName;
pub use layout::Layout;
pub use multiconfig::{is_multi_config, needs_per_config_binary_dirs};

/// Name of the per-package clone/build/install subtree under the root binary directory.
pub const DEPS_DIRNAME: &str = "_deps";
/// Name of the cross-package shared install prefix under the root binary directory.
pub const DEPS_INSTALL_DIRNAME: &str = "_deps-install";
/// Name of the scratch/log/database subtree under the root binary directory.
pub const CMAKEX_DIRNAME: &str = "_cmakex";
/// Name of the install-database directory, under [`CMAKEX_DIRNAME`].
pub const INSTALLED_DIRNAME: &str = "installed";
/// Name of the subprocess log directory, under [`CMAKEX_DIRNAME`].
pub const LOG_DIRNAME: &str = "log";
/// Name of the scratch directory (script evaluator output, recursion-guard stack),
/// under [`CMAKEX_DIRNAME`].
pub const TMP_DIRNAME: &str = "tmp";
/// Name of the script evaluator's wrapper project directory, under [`CMAKEX_DIRNAME`].
pub const SCRIPT_EXECUTOR_DIRNAME: &str = "deps_script_executor_project";
/// Filename of a package's dependency script, if present in its source tree.
pub const DEPS_SCRIPT_FILENAME: &str = "deps.cmake";
/// Environment variable naming an extra search prefix for packages found outside the
/// managed tree (spec 6, "Environment contract").
pub const CMAKEX_PREFIX_PATH_VAR: &str = "CMAKEX_PREFIX_PATH";
