//! Build executor (spec 4.H): iterates the planner's topological build order and,
//! for each package and configuration marked with at least one build reason,
//! drives configure/build/install through the native build tool trait, then
//! records the resulting install record.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use cmakex_config::{ConfigurationName, Layout};
use log::info;

use crate::buildtool::NativeBuildTool;
use crate::error::{CmakexError, Result};
use crate::installdb::{InstallDb, InstalledConfigurationRecord, InstalledPackageRecord};
use crate::planner::Plan;

/// Which steps to run for every marked configuration (spec 6, CLI surface's step
/// letters map onto this).
#[derive(Debug, Clone, Copy)]
pub struct Steps {
    pub configure: bool,
    pub build: bool,
    pub install: bool,
}

impl Steps {
    pub fn all() -> Self {
        Self {
            configure: true,
            build: true,
            install: true,
        }
    }
}

/// Drives Phase 2 over a [`Plan`] produced by the planner.
pub struct Executor<'a> {
    layout: &'a Layout,
    install_db: &'a InstallDb,
    build_tool: Arc<dyn NativeBuildTool>,
    generator: String,
    per_config_requested: bool,
}

impl<'a> Executor<'a> {
    pub fn new(
        layout: &'a Layout,
        install_db: &'a InstallDb,
        build_tool: Arc<dyn NativeBuildTool>,
        generator: String,
        per_config_requested: bool,
    ) -> Self {
        Self {
            layout,
            install_db,
            build_tool,
            generator,
            per_config_requested,
        }
    }

    /// Runs `steps` for every package in `plan.order`, for every configuration the
    /// planner marked with build reasons. Aborts the whole plan on the first
    /// configure/build/install failure (spec 4.H, "does not roll back").
    pub async fn run(&self, plan: &Plan, steps: Steps) -> Result<()> {
        for name in &plan.order {
            let entry = plan.workspace.get(name).expect("planner entry for ordered package");
            let configs_to_build: Vec<ConfigurationName> = entry
                .per_config
                .iter()
                .filter(|(_, plan)| !plan.reasons.is_empty())
                .map(|(config, _)| config.clone())
                .collect();
            if configs_to_build.is_empty() {
                continue;
            }

            info!("building {name}");
            let source_dir = match &entry.request.build.source_subdir {
                Some(sub) => self.layout.pkg_clone_dir(name).join(sub),
                None => self.layout.pkg_clone_dir(name),
            };
            let install_prefix = self.layout.pkg_install_dir(name);

            let multi_config = cmakex_config::is_multi_config(&self.generator);
            let mut configured_this_package = false;

            for config in &configs_to_build {
                let config_plan = entry.per_config.get(config).expect("just filtered on presence");
                for reason in &config_plan.reasons {
                    info!("  [{name}/{config}] reason: {reason}");
                }

                let binary_dir = self.layout.pkg_binary_dir(
                    name,
                    config,
                    &self.generator,
                    self.per_config_requested,
                );
                std::fs::create_dir_all(&binary_dir).map_err(|source| CmakexError::Filesystem {
                    path: binary_dir.clone(),
                    source,
                })?;

                if steps.configure && (!multi_config || !configured_this_package) {
                    self.configure_one(name, config, &source_dir, &binary_dir, config_plan).await?;
                    configured_this_package = true;
                }
                if steps.build {
                    self.build_one(name, config, &binary_dir).await?;
                }
                if steps.install {
                    self.install_one(name, config, &binary_dir, &install_prefix).await?;
                }

                if steps.configure && steps.build && steps.install {
                    self.record_success(name, entry, config, config_plan).await?;
                }
            }
        }
        Ok(())
    }

    async fn configure_one(
        &self,
        name: &str,
        config: &ConfigurationName,
        source_dir: &Path,
        binary_dir: &Path,
        config_plan: &crate::planner::ConfigPlan,
    ) -> Result<()> {
        let args: Vec<String> = config_plan.final_flags.iter().map(ToString::to_string).collect();
        let log_path = self.log_path(name, config, "configure");
        let ok = self
            .build_tool
            .configure(source_dir, binary_dir, &args, &log_path)
            .await?;
        if !ok {
            return Err(CmakexError::ExternalToolFailed {
                name: name.to_string(),
                config: config.canonical().to_string(),
                phase: "configure".to_string(),
                message: format!("see {}", log_path.display()),
            });
        }
        Ok(())
    }

    async fn build_one(&self, name: &str, config: &ConfigurationName, binary_dir: &Path) -> Result<()> {
        let log_path = self.log_path(name, config, "build");
        let ok = self.build_tool.build(binary_dir, config, &log_path).await?;
        if !ok {
            return Err(CmakexError::ExternalToolFailed {
                name: name.to_string(),
                config: config.canonical().to_string(),
                phase: "build".to_string(),
                message: format!("see {}", log_path.display()),
            });
        }
        Ok(())
    }

    async fn install_one(
        &self,
        name: &str,
        config: &ConfigurationName,
        binary_dir: &Path,
        prefix: &Path,
    ) -> Result<()> {
        let log_path = self.log_path(name, config, "install");
        let ok = self
            .build_tool
            .install(binary_dir, config, prefix, &log_path)
            .await?;
        if !ok {
            return Err(CmakexError::ExternalToolFailed {
                name: name.to_string(),
                config: config.canonical().to_string(),
                phase: "install".to_string(),
                message: format!("see {}", log_path.display()),
            });
        }
        Ok(())
    }

    /// On complete success of configure+build+install for one (package,
    /// configuration) pair, computes the dependency fingerprint map by consulting
    /// the install database for each direct dependency and writes the updated
    /// installed configuration record (spec 4.H.4).
    async fn record_success(
        &self,
        name: &str,
        entry: &crate::planner::PlannerEntry,
        config: &ConfigurationName,
        config_plan: &crate::planner::ConfigPlan,
    ) -> Result<()> {
        let mut dependency_fingerprints: BTreeMap<String, BTreeMap<ConfigurationName, String>> =
            BTreeMap::new();
        for dep_name in &entry.request.depends {
            if let Some(dep_record) = self.install_db.try_get(dep_name)? {
                let mut per_config = BTreeMap::new();
                for (dep_config, dep_config_record) in &dep_record.configurations {
                    let mut single = BTreeMap::new();
                    single.insert(dep_config.clone(), dep_config_record.clone());
                    let fp = InstalledPackageRecord {
                        name: dep_name.clone(),
                        direct_dependencies: dep_record.direct_dependencies.clone(),
                        configurations: single,
                    }
                    .fingerprint();
                    per_config.insert(dep_config.clone(), fp);
                }
                dependency_fingerprints.insert(dep_name.clone(), per_config);
            }
        }

        let mut record = self
            .install_db
            .try_get(name)?
            .unwrap_or_else(|| InstalledPackageRecord {
                name: name.to_string(),
                direct_dependencies: entry.request.depends.clone(),
                configurations: BTreeMap::new(),
            });
        record.direct_dependencies = entry.request.depends.clone();
        record.configurations.insert(
            config.clone(),
            InstalledConfigurationRecord {
                configuration: config.clone(),
                url: entry.request.clone.url.clone(),
                resolved_commit: entry.resolved_commit.clone().unwrap_or_default(),
                source_subdir: entry.request.build.source_subdir.clone(),
                requested_flags: entry.request.build.flags.clone(),
                final_flags: config_plan.final_flags.clone(),
                dependency_fingerprints,
            },
        );
        self.install_db.put(&record)
    }

    fn log_path(&self, name: &str, config: &ConfigurationName, phase: &str) -> std::path::PathBuf {
        self.layout
            .log_dir()
            .join(format!("{name}-{}-{phase}.log", config.canonical()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::configure_args::ConfigureFlag;
    use crate::planner::{BuildParams, CloneParams, ConfigPlan, Plan, PackageRequest, PlannerEntry};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct FakeBuildTool {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NativeBuildTool for FakeBuildTool {
        async fn configure(
            &self,
            _source_dir: &Path,
            _binary_dir: &Path,
            _args: &[String],
            _log_path: &Path,
        ) -> Result<bool> {
            self.calls.lock().unwrap().push("configure".to_string());
            Ok(true)
        }

        async fn build(
            &self,
            _binary_dir: &Path,
            _config: &ConfigurationName,
            _log_path: &Path,
        ) -> Result<bool> {
            self.calls.lock().unwrap().push("build".to_string());
            Ok(true)
        }

        async fn install(
            &self,
            _binary_dir: &Path,
            _config: &ConfigurationName,
            _prefix: &Path,
            _log_path: &Path,
        ) -> Result<bool> {
            self.calls.lock().unwrap().push("install".to_string());
            Ok(true)
        }
    }

    fn sample_plan(name: &str, config: &str) -> Plan {
        let mut workspace = BTreeMap::new();
        let mut per_config = BTreeMap::new();
        per_config.insert(
            ConfigurationName::new(config),
            ConfigPlan {
                reasons: vec!["requested but not installed".to_string()],
                final_flags: Vec::<ConfigureFlag>::new(),
            },
        );
        workspace.insert(
            name.to_string(),
            PlannerEntry {
                request: PackageRequest {
                    name: name.to_string(),
                    clone: CloneParams {
                        url: "https://example.invalid/repo.git".to_string(),
                        git_ref: "main".to_string(),
                        shallow: true,
                    },
                    build: BuildParams {
                        source_subdir: None,
                        flags: Vec::new(),
                        configs: [ConfigurationName::new(config)].into(),
                    },
                    depends: BTreeSet::new(),
                },
                just_cloned: true,
                resolved_commit: Some("deadbeef".to_string()),
                discovered_prefix_path: None,
                per_config,
                prospective_fingerprints: BTreeMap::new(),
            },
        );
        Plan {
            order: vec![name.to_string()],
            workspace,
        }
    }

    #[tokio::test]
    async fn fresh_build_runs_all_three_phases_and_writes_record() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let install_db = InstallDb::new(layout.installed_db_dir());
        let build_tool: Arc<dyn NativeBuildTool> = Arc::new(FakeBuildTool::default());
        let executor = Executor::new(&layout, &install_db, Arc::clone(&build_tool), "Ninja".to_string(), false);

        let plan = sample_plan("a", "Debug");
        executor.run(&plan, Steps::all()).await.unwrap();

        let record = install_db.try_get("a").unwrap().unwrap();
        assert!(record.configurations.contains_key(&ConfigurationName::new("Debug")));
    }

    #[tokio::test]
    async fn empty_build_reasons_skip_the_package_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let install_db = InstallDb::new(layout.installed_db_dir());
        let build_tool: Arc<dyn NativeBuildTool> = Arc::new(FakeBuildTool::default());
        let executor = Executor::new(&layout, &install_db, Arc::clone(&build_tool), "Ninja".to_string(), false);

        let mut plan = sample_plan("a", "Debug");
        plan.workspace.get_mut("a").unwrap().per_config.values_mut().for_each(|c| c.reasons.clear());
        executor.run(&plan, Steps::all()).await.unwrap();

        assert!(install_db.try_get("a").unwrap().is_none());
    }
}
