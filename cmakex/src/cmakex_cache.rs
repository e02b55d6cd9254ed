//! The persisted `cmakex` cache: generator/toolset/architecture singletons and the
//! derived multi-config flags, written once per root binary directory and reused
//! by subsequent invocations that don't re-specify `-G`/`-T`/`-A` (SPEC_FULL §3,
//! grounded on `cmakex_cache_t` in `examples/original_source/src/cmakex/cmakex-types.h`).

use serde::{Deserialize, Serialize};

use crate::configure_args::ConfigureFlag;
use crate::error::{CmakexError, Result};
use cmakex_config::Layout;

/// Generator identity, the multi-config/per-config-binary-dirs flags derived from
/// it, and the extra search prefixes from `CMAKEX_PREFIX_PATH`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CmakexCache {
    pub generator: String,
    pub toolset: Option<String>,
    pub architecture: Option<String>,
    pub multiconfig_generator: bool,
    pub per_config_bin_dirs: bool,
    pub cmakex_prefix_path: Vec<String>,
}

impl CmakexCache {
    /// Builds a fresh cache from the singletons given on the command line and the
    /// user's per-config-binary-dirs request; the multi-config flag is derived, not
    /// requested (spec 4.A, "Effective per-configuration flag").
    pub fn new(generator: String, toolset: Option<String>, architecture: Option<String>, per_config_requested: bool, cmakex_prefix_path: Vec<String>) -> Self {
        let multiconfig_generator = cmakex_config::is_multi_config(&generator);
        let per_config_bin_dirs =
            cmakex_config::needs_per_config_binary_dirs(per_config_requested, &generator);
        Self {
            generator,
            toolset,
            architecture,
            multiconfig_generator,
            per_config_bin_dirs,
            cmakex_prefix_path,
        }
    }

    /// The singleton configure flags this cache pins for every invocation
    /// (generator, toolset, architecture), consumed by the planner and the script
    /// evaluator adapter so every package and the wrapper project agree.
    pub fn singleton_flags(&self) -> Vec<ConfigureFlag> {
        let mut flags = vec![configure_flag_generator(&self.generator)];
        if let Some(toolset) = &self.toolset {
            flags.push(configure_flag_toolset(toolset));
        }
        if let Some(arch) = &self.architecture {
            flags.push(configure_flag_architecture(arch));
        }
        flags
    }

    /// Reads the cache at `layout.cmakex_cache_path()`, if present.
    pub fn load(layout: &Layout) -> Result<Option<Self>> {
        let path = layout.cmakex_cache_path();
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|source| CmakexError::Filesystem {
            path: path.clone(),
            source,
        })?;
        let cache: Self = serde_json::from_str(&text).map_err(|source| CmakexError::CorruptRecord {
            name: "cmakex_cache".to_string(),
            path,
            source,
        })?;
        Ok(Some(cache))
    }

    /// Atomically writes the cache to `layout.cmakex_cache_path()`.
    pub fn save(&self, layout: &Layout) -> Result<()> {
        let path = layout.cmakex_cache_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CmakexError::Filesystem {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(self).expect("CmakexCache always serializes");
        std::fs::write(&tmp_path, text).map_err(|source| CmakexError::Filesystem {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|source| CmakexError::Filesystem { path, source })
    }

    /// Resolves the effective cache for this invocation: an explicitly-specified
    /// generator/toolset/architecture always wins and is persisted; otherwise the
    /// previously persisted cache is reused unchanged (spec "Configuration").
    pub fn resolve(
        layout: &Layout,
        generator: Option<String>,
        toolset: Option<String>,
        architecture: Option<String>,
        per_config_requested: bool,
        cmakex_prefix_path: Vec<String>,
    ) -> Result<Self> {
        match (generator, Self::load(layout)?) {
            (Some(generator), _) => {
                let cache = Self::new(generator, toolset, architecture, per_config_requested, cmakex_prefix_path);
                cache.save(layout)?;
                Ok(cache)
            }
            (None, Some(existing)) => Ok(existing),
            (None, None) => Err(CmakexError::Filesystem {
                path: layout.cmakex_cache_path(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no generator specified and no cmakex cache exists yet; pass -G on first run",
                ),
            }),
        }
    }
}

fn configure_flag_generator(value: &str) -> ConfigureFlag {
    ConfigureFlag::Singleton {
        class: crate::configure_args::SingletonClass::Generator,
        value: value.to_string(),
    }
}

fn configure_flag_toolset(value: &str) -> ConfigureFlag {
    ConfigureFlag::Singleton {
        class: crate::configure_args::SingletonClass::Toolset,
        value: value.to_string(),
    }
}

fn configure_flag_architecture(value: &str) -> ConfigureFlag {
    ConfigureFlag::Singleton {
        class: crate::configure_args::SingletonClass::Architecture,
        value: value.to_string(),
    }
}
