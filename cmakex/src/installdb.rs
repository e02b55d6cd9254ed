//! Persistent per-package, per-configuration install records (spec 4.E). One JSON
//! file per package lives under the database directory; writes are atomic
//! replaces (write to a sibling temp file, then rename).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::configure_args::{self, ConfigureFlag};
use crate::error::{CmakexError, Result};
use cmakex_config::ConfigurationName;

/// A single package's state in one configuration, as installed by Phase 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledConfigurationRecord {
    pub configuration: ConfigurationName,
    pub url: String,
    pub resolved_commit: String,
    pub source_subdir: Option<String>,
    /// The flags exactly as given in the request that produced this install.
    pub requested_flags: Vec<ConfigureFlag>,
    /// The flags actually passed to the configure step, after planner augmentation
    /// (install prefix, prefix path, etc. are added by the planner, not the request).
    pub final_flags: Vec<ConfigureFlag>,
    /// dependency name -> configuration -> that dependency's fingerprint at install time.
    pub dependency_fingerprints: BTreeMap<String, BTreeMap<ConfigurationName, String>>,
}

/// A package's full installed state: one [`InstalledConfigurationRecord`] per
/// configuration it has been built in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstalledPackageRecord {
    pub name: String,
    pub direct_dependencies: BTreeSet<String>,
    pub configurations: BTreeMap<ConfigurationName, InstalledConfigurationRecord>,
}

impl InstalledPackageRecord {
    /// A stable hash over the sorted per-configuration entries, including every
    /// dependency fingerprint (spec 4.E, GLOSSARY "Fingerprint"). `BTreeMap`
    /// iteration order and `serde_json`'s field order make the serialized bytes
    /// deterministic across processes.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).expect("InstalledPackageRecord always serializes");
        let digest = Sha256::digest(&bytes);
        hex::encode(digest)
    }
}

/// Result of comparing a package request against its installed state (spec 4.E).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EvaluateStatus {
    Satisfied,
    MissingConfigs(BTreeSet<ConfigurationName>),
    NotInstalled,
    NotCompatible(Vec<ConfigureFlag>),
}

/// One JSON file per package under a database directory.
#[derive(Debug, Clone)]
pub struct InstallDb {
    dir: PathBuf,
}

impl InstallDb {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Reads the record for `name`, if present. A record that fails to parse is a
    /// fatal [`CmakexError::CorruptRecord`] (spec 4.E).
    pub fn try_get(&self, name: &str) -> Result<Option<InstalledPackageRecord>> {
        let path = self.record_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|source| CmakexError::Filesystem {
            path: path.clone(),
            source,
        })?;
        let record: InstalledPackageRecord =
            serde_json::from_str(&text).map_err(|source| CmakexError::CorruptRecord {
                name: name.to_string(),
                path: path.clone(),
                source,
            })?;
        Ok(Some(record))
    }

    /// Atomically replaces the on-disk record for `record.name`.
    pub fn put(&self, record: &InstalledPackageRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|source| CmakexError::Filesystem {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.record_path(&record.name);
        let tmp_path = self.dir.join(format!(".{}.tmp", record.name));
        let text =
            serde_json::to_string_pretty(record).expect("InstalledPackageRecord always serializes");
        std::fs::write(&tmp_path, text).map_err(|source| CmakexError::Filesystem {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|source| CmakexError::Filesystem {
            path: path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Compares a request's canonical flags and requested configurations against
    /// whatever is installed for `name`.
    pub fn evaluate(
        &self,
        name: &str,
        requested_configs: &BTreeSet<ConfigurationName>,
        canonical_flags: &[ConfigureFlag],
    ) -> Result<EvaluateStatus> {
        let Some(record) = self.try_get(name)? else {
            return Ok(EvaluateStatus::NotInstalled);
        };

        // The package is installed under a single consistent canonical flag set
        // across all of its configurations; any one configuration's final flags
        // represents it.
        if let Some(existing) = record.configurations.values().next() {
            let diff = configure_args::incompatible(canonical_flags, &existing.final_flags);
            if !diff.is_empty() {
                return Ok(EvaluateStatus::NotCompatible(diff));
            }
        }

        let installed: BTreeSet<ConfigurationName> = record.configurations.keys().cloned().collect();
        let missing: BTreeSet<ConfigurationName> =
            requested_configs.difference(&installed).cloned().collect();
        if missing.is_empty() {
            Ok(EvaluateStatus::Satisfied)
        } else {
            Ok(EvaluateStatus::MissingConfigs(missing))
        }
    }
}
