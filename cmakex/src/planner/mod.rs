//! Recursive dependency resolution (spec 4.G): discovers packages through the
//! script evaluator, merges duplicate requests, enforces the strict-commit
//! policy, and produces a topological build order annotated with per-configuration
//! build reasons.

mod guard;

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_recursion::async_recursion;

use cmakex_config::{ConfigurationName, Layout};
use rcs_cli_wrapper::{RcsClient, WorkingTreeStatus};

use crate::configure_args::{self, ConfigureFlag};
use crate::error::{CmakexError, Result};
use crate::installdb::{EvaluateStatus, InstallDb, InstalledConfigurationRecord, InstalledPackageRecord};
use crate::script_eval::{AddPkgLine, ScriptEvaluator};

pub use guard::{PersistentGuard, RecursionGuard};

/// Remote URL, requested ref, and shallow flag (spec 3, "Clone parameters").
#[derive(Debug, Clone)]
pub struct CloneParams {
    pub url: String,
    pub git_ref: String,
    pub shallow: bool,
}

/// Source sub-path, configure flags, and configuration set (spec 3, "Build parameters").
#[derive(Debug, Clone)]
pub struct BuildParams {
    pub source_subdir: Option<String>,
    pub flags: Vec<ConfigureFlag>,
    pub configs: BTreeSet<ConfigurationName>,
}

/// Name, clone parameters, build parameters, and declared direct dependencies
/// (spec 3, "Package request").
#[derive(Debug, Clone)]
pub struct PackageRequest {
    pub name: String,
    pub clone: CloneParams,
    pub build: BuildParams,
    pub depends: BTreeSet<String>,
}

/// Per-configuration planning outcome: why a configuration is being (re)built, and
/// the flags that build will use. A configuration absent from a
/// [`PlannerEntry::per_config`] map needs no work.
#[derive(Debug, Clone)]
pub struct ConfigPlan {
    pub reasons: Vec<String>,
    pub final_flags: Vec<ConfigureFlag>,
}

/// Per-package aggregate accumulated during Phase 1 (spec 3, "Planner work-space entry").
#[derive(Debug, Clone)]
pub struct PlannerEntry {
    pub request: PackageRequest,
    pub just_cloned: bool,
    pub resolved_commit: Option<String>,
    pub discovered_prefix_path: Option<PathBuf>,
    pub per_config: BTreeMap<ConfigurationName, ConfigPlan>,
    /// The fingerprint this package's installed record would have if every
    /// pending configuration in `per_config` were built successfully right now.
    /// Computed bottom-up so parents can detect a changed dependency before that
    /// dependency has actually rebuilt (spec 8, scenario 5).
    pub prospective_fingerprints: BTreeMap<ConfigurationName, String>,
}

/// The ordered build order plus the planner work-space (spec 3, "Plan").
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub order: Vec<String>,
    pub workspace: BTreeMap<String, PlannerEntry>,
}

/// A token is "possibly a commit identity" if it matches the canonical hex form
/// (spec 4.C, "Sha-likeness").
fn looks_like_commit_identity(s: &str) -> bool {
    (4..=40).contains(&s.len()) && s.chars().all(|c| c.is_ascii_hexdigit())
}

pub struct Planner<'a> {
    layout: &'a Layout,
    install_db: &'a InstallDb,
    rcs: Arc<dyn RcsClient>,
    script_eval: RefCell<ScriptEvaluator>,
    strict_commit: bool,
    /// Singleton flags (generator, toolset, architecture) shared by the main
    /// project and every dependency in this plan.
    global_singletons: Vec<ConfigureFlag>,
}

impl<'a> Planner<'a> {
    pub fn new(
        layout: &'a Layout,
        install_db: &'a InstallDb,
        rcs: Arc<dyn RcsClient>,
        script_eval: ScriptEvaluator,
        strict_commit: bool,
        global_singletons: Vec<ConfigureFlag>,
    ) -> Self {
        Self {
            layout,
            install_db,
            rcs,
            script_eval: RefCell::new(script_eval),
            strict_commit,
            global_singletons,
        }
    }

    /// Entry point (spec 4.G): `plan(main_source, requested_deps, requested_configs,
    /// script_override)`. `main_binary` is implicit in `self.layout`.
    pub async fn plan(
        &self,
        main_source: &Path,
        requested_deps: Vec<PackageRequest>,
        requested_configs: &BTreeSet<ConfigurationName>,
        script_override: Option<&Path>,
    ) -> Result<Plan> {
        let mut workspace = BTreeMap::new();
        let mut order = Vec::new();
        let mut guard = RecursionGuard::new();
        let persistent = PersistentGuard::open(self.layout.recursion_guard_path())?;

        let top_level = self
            .main_dependency_list(main_source, script_override, requested_deps, requested_configs)
            .await?;
        for request in top_level {
            self.add_pkg(request, &mut workspace, &mut order, &mut guard, &persistent, requested_configs)
                .await?;
        }
        Ok(Plan { order, workspace })
    }

    async fn main_dependency_list(
        &self,
        main_source: &Path,
        script_override: Option<&Path>,
        requested_deps: Vec<PackageRequest>,
        requested_configs: &BTreeSet<ConfigurationName>,
    ) -> Result<Vec<PackageRequest>> {
        match self.find_deps_script(main_source, script_override) {
            Some(script) => self.evaluate_script(&script, requested_configs).await,
            None => Ok(requested_deps),
        }
    }

    fn find_deps_script(&self, source_dir: &Path, script_override: Option<&Path>) -> Option<PathBuf> {
        if let Some(p) = script_override {
            return Some(p.to_path_buf());
        }
        let candidate = source_dir.join(cmakex_config::DEPS_SCRIPT_FILENAME);
        candidate.exists().then_some(candidate)
    }

    async fn evaluate_script(
        &self,
        script: &Path,
        default_configs: &BTreeSet<ConfigurationName>,
    ) -> Result<Vec<PackageRequest>> {
        let lines = {
            let mut evaluator = self.script_eval.borrow_mut();
            evaluator.ensure_configured(&self.global_singletons).await?;
            evaluator.evaluate(script).await?
        };
        lines
            .into_iter()
            .map(|line| self.line_to_request(line, default_configs))
            .collect()
    }

    fn line_to_request(
        &self,
        line: AddPkgLine,
        default_configs: &BTreeSet<ConfigurationName>,
    ) -> Result<PackageRequest> {
        if let Some(subdir) = &line.source_dir {
            if Path::new(subdir).is_absolute() {
                return Err(CmakexError::AbsoluteSourceDir {
                    name: line.name.clone(),
                    path: subdir.clone(),
                });
            }
        }
        let flags = configure_args::parse_flags(&line.cmake_args)?;
        configure_args::check_no_forbidden_flags(&flags, &line.name)?;
        let configs = if line.configs.is_empty() {
            default_configs.clone()
        } else {
            line.configs.into_iter().collect()
        };
        Ok(PackageRequest {
            name: line.name,
            clone: CloneParams {
                url: line.git_repository.unwrap_or_default(),
                git_ref: line.git_tag.unwrap_or_default(),
                shallow: line.git_shallow,
            },
            build: BuildParams {
                source_subdir: line.source_dir,
                flags,
                configs,
            },
            depends: line.depends.into_iter().collect(),
        })
    }

    #[async_recursion(?Send)]
    async fn add_pkg(
        &self,
        request: PackageRequest,
        workspace: &mut BTreeMap<String, PlannerEntry>,
        order: &mut Vec<String>,
        guard: &mut RecursionGuard,
        persistent: &PersistentGuard,
        requested_configs: &BTreeSet<ConfigurationName>,
    ) -> Result<()> {
        guard.enter(&request.name)?;
        persistent.enter(&request.name)?;

        let result = self
            .add_pkg_inner(request.clone(), workspace, order, guard, persistent, requested_configs)
            .await;

        persistent.exit(&request.name)?;
        guard.exit(&request.name);
        result
    }

    async fn add_pkg_inner(
        &self,
        request: PackageRequest,
        workspace: &mut BTreeMap<String, PlannerEntry>,
        order: &mut Vec<String>,
        guard: &mut RecursionGuard,
        persistent: &PersistentGuard,
        requested_configs: &BTreeSet<ConfigurationName>,
    ) -> Result<()> {
        configure_args::check_no_forbidden_flags(&request.build.flags, &request.name)?;
        if let Some(subdir) = &request.build.source_subdir {
            if Path::new(subdir).is_absolute() {
                return Err(CmakexError::AbsoluteSourceDir {
                    name: request.name.clone(),
                    path: subdir.clone(),
                });
            }
        }

        let first_visit = self.merge_request(workspace, &request)?;
        let merged = workspace.get(&request.name).expect("just inserted/merged").request.clone();

        let canonical_flags = configure_args::canonical(&merged.build.flags)?;
        let final_flags = self.with_global_singletons(&canonical_flags)?;
        // Compare against `final_flags`, not the request-only `canonical_flags`: the
        // installed record's `final_flags` already includes the planner-applied
        // global singletons (spec 4.E's "compatible with the request" means
        // compatible with what was actually configured, not the bare request).
        let status = self.install_db.evaluate(&merged.name, &merged.build.configs, &final_flags)?;
        let existing_record = self.install_db.try_get(&merged.name)?;
        let clone_dir = self.layout.pkg_clone_dir(&merged.name);
        let clone_status = self.rcs.status(&clone_dir).await?;

        self.resolve_status(&merged, &status, clone_status, &clone_dir, &final_flags, workspace)
            .await?;

        if first_visit {
            let source_dir = match &merged.build.source_subdir {
                Some(sub) => clone_dir.join(sub),
                None => clone_dir.clone(),
            };
            let children = match self.find_deps_script(&source_dir, None) {
                Some(script) => self.evaluate_script(&script, requested_configs).await?,
                None => Vec::new(),
            };
            for child in children {
                self.add_pkg(child, workspace, order, guard, persistent, requested_configs)
                    .await?;
            }

            self.propagate_dependency_fingerprints(&merged, existing_record.as_ref(), workspace)?;
            self.compute_prospective_fingerprint(&merged, workspace)?;

            order.push(merged.name.clone());
        }

        Ok(())
    }

    /// Merges `request` into the workspace entry for its name, if one exists.
    /// Returns whether this is the first time the name has been seen.
    fn merge_request(
        &self,
        workspace: &mut BTreeMap<String, PlannerEntry>,
        request: &PackageRequest,
    ) -> Result<bool> {
        if let Some(entry) = workspace.get_mut(&request.name) {
            if entry.request.build.source_subdir != request.build.source_subdir {
                return Err(CmakexError::DuplicatePackageName {
                    name: request.name.clone(),
                });
            }
            let existing_canonical = configure_args::canonical(&entry.request.build.flags)?;
            let new_canonical = configure_args::canonical(&request.build.flags)?;
            let diff = configure_args::incompatible(&existing_canonical, &new_canonical);
            if !diff.is_empty() {
                return Err(CmakexError::IncompatibleReAddition {
                    name: request.name.clone(),
                    diff: diff.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
                });
            }
            entry.request.build.configs.extend(request.build.configs.iter().cloned());
            entry.request.depends.extend(request.depends.iter().cloned());
            let mut merged_flags = entry.request.build.flags.clone();
            merged_flags.extend(request.build.flags.clone());
            entry.request.build.flags = configure_args::canonical(&merged_flags)?;
            Ok(false)
        } else {
            let mut inserted = request.clone();
            inserted.build.flags = configure_args::canonical(&inserted.build.flags)?;
            workspace.insert(
                request.name.clone(),
                PlannerEntry {
                    request: inserted,
                    just_cloned: false,
                    resolved_commit: None,
                    discovered_prefix_path: None,
                    per_config: BTreeMap::new(),
                    prospective_fingerprints: BTreeMap::new(),
                },
            );
            Ok(true)
        }
    }

    fn with_global_singletons(&self, flags: &[ConfigureFlag]) -> Result<Vec<ConfigureFlag>> {
        let mut combined = flags.to_vec();
        combined.extend(self.global_singletons.iter().cloned());
        configure_args::canonical(&combined)
    }

    /// Applies spec 4.G.3.c: decides clone/keep/fail and the per-configuration
    /// build reasons from the install-database evaluation and clone-directory state.
    async fn resolve_status(
        &self,
        merged: &PackageRequest,
        status: &EvaluateStatus,
        clone_status: WorkingTreeStatus,
        clone_dir: &Path,
        final_flags: &[ConfigureFlag],
        workspace: &mut BTreeMap<String, PlannerEntry>,
    ) -> Result<()> {
        let mut per_config: BTreeMap<ConfigurationName, ConfigPlan> = BTreeMap::new();
        let mut just_cloned = false;
        let mut resolved_commit: Option<String>;

        // A clone directory holding unrelated content is fatal in strict mode
        // (spec 3, "if present with unrelated content, the planner refuses to
        // proceed (strict mode) or warns (lax mode)"); in lax mode, warn and
        // treat the directory as an existing-but-unverified tree so the rest of
        // this function proceeds down its normal "already cloned" paths.
        let clone_status = if clone_status == WorkingTreeStatus::Obstructed {
            if self.strict_commit {
                return Err(CmakexError::CloneDirectoryObstructed {
                    name: merged.name.clone(),
                    dir: clone_dir.to_path_buf(),
                });
            }
            log::warn!(
                "clone directory {} for package '{}' is not a recognized working tree; \
                 continuing in lax mode",
                clone_dir.display(),
                merged.name
            );
            WorkingTreeStatus::Dirty
        } else {
            clone_status
        };

        match status {
            EvaluateStatus::NotInstalled => {
                if clone_status == WorkingTreeStatus::Missing {
                    resolved_commit = Some(self.clone_and_pin(merged, clone_dir).await?);
                    just_cloned = true;
                } else if self.strict_commit {
                    let resolved = self.resolve_ref(&merged.clone.url, &merged.clone.git_ref, clone_dir).await?;
                    let actual = self.rcs.rev_parse_head(clone_dir).await?;
                    if resolved != actual || clone_status == WorkingTreeStatus::Dirty {
                        return Err(CmakexError::StrictCommitMismatch {
                            name: merged.name.clone(),
                            requested_ref: merged.clone.git_ref.clone(),
                            resolved,
                            clone_dir: clone_dir.to_path_buf(),
                            actual,
                        });
                    }
                    resolved_commit = Some(actual);
                } else {
                    resolved_commit = Some(self.rcs.rev_parse_head(clone_dir).await?);
                }
                for config in &merged.build.configs {
                    per_config.insert(
                        config.clone(),
                        ConfigPlan {
                            reasons: vec!["requested but not installed".to_string()],
                            final_flags: final_flags.to_vec(),
                        },
                    );
                }
            }
            EvaluateStatus::MissingConfigs(missing) => {
                resolved_commit = if clone_status == WorkingTreeStatus::Missing {
                    just_cloned = true;
                    Some(self.clone_and_pin(merged, clone_dir).await?)
                } else {
                    Some(self.rcs.rev_parse_head(clone_dir).await?)
                };
                for config in missing {
                    per_config.insert(
                        config.clone(),
                        ConfigPlan {
                            reasons: vec![format!("missing configuration {config}")],
                            final_flags: final_flags.to_vec(),
                        },
                    );
                }
            }
            EvaluateStatus::Satisfied => {
                let existing = self.install_db.try_get(&merged.name)?;
                resolved_commit = existing
                    .as_ref()
                    .and_then(|r| r.configurations.values().next())
                    .map(|c| c.resolved_commit.clone());
                if self.strict_commit {
                    let resolved = self.resolve_ref(&merged.clone.url, &merged.clone.git_ref, clone_dir).await?;
                    if Some(&resolved) != resolved_commit.as_ref() {
                        let old = resolved_commit.clone().unwrap_or_default();
                        for config in &merged.build.configs {
                            per_config.insert(
                                config.clone(),
                                ConfigPlan {
                                    reasons: vec![format!("HEAD on remote advanced from {old} to {resolved}")],
                                    final_flags: final_flags.to_vec(),
                                },
                            );
                        }
                        resolved_commit = Some(self.clone_and_pin(merged, clone_dir).await?);
                        just_cloned = true;
                    }
                }
            }
            EvaluateStatus::NotCompatible(diff) => {
                resolved_commit = if clone_status == WorkingTreeStatus::Missing {
                    just_cloned = true;
                    Some(self.clone_and_pin(merged, clone_dir).await?)
                } else {
                    Some(self.rcs.rev_parse_head(clone_dir).await?)
                };
                let diff_str = diff.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
                for config in &merged.build.configs {
                    per_config.insert(
                        config.clone(),
                        ConfigPlan {
                            reasons: vec![format!("configure flags changed: {diff_str}")],
                            final_flags: final_flags.to_vec(),
                        },
                    );
                }
            }
        }

        let entry = workspace.get_mut(&merged.name).expect("entry exists");
        entry.per_config = per_config;
        entry.just_cloned = just_cloned;
        entry.resolved_commit = resolved_commit;
        Ok(())
    }

    /// Shallow-clone resolution sequence for a pinned ref (spec 4.C): clone the
    /// named ref directly when possible; for a commit-identity-like ref, attempt a
    /// shallow clone of the default branch and promote to full depth if the
    /// checkout fails, finally falling back to an unrestricted clone.
    async fn clone_and_pin(&self, merged: &PackageRequest, dest: &Path) -> Result<String> {
        let url = &merged.clone.url;
        let git_ref = &merged.clone.git_ref;
        let sha_like = looks_like_commit_identity(git_ref);

        if merged.clone.shallow && !git_ref.is_empty() && !sha_like {
            self.rcs.clone_repo(url, dest, Some(git_ref), true).await?;
        } else if merged.clone.shallow && sha_like {
            match self.rcs.clone_repo(url, dest, None, true).await {
                Ok(()) => {
                    if self.rcs.checkout(dest, git_ref).await.is_err() {
                        let _ = std::fs::remove_dir_all(dest);
                        self.rcs.clone_repo(url, dest, None, false).await?;
                        self.rcs.checkout(dest, git_ref).await?;
                    }
                }
                Err(_) => {
                    self.rcs.clone_repo(url, dest, None, false).await?;
                    self.rcs.checkout(dest, git_ref).await?;
                }
            }
        } else {
            self.rcs.clone_repo(url, dest, None, false).await?;
            if !git_ref.is_empty() {
                self.rcs.checkout(dest, git_ref).await?;
            }
        }
        Ok(self.rcs.rev_parse_head(dest).await?)
    }

    /// "Resolved" per spec 4.G: remote lookup first, falling back to a local
    /// `rev_parse` only when the ref looks like a commit identity.
    async fn resolve_ref(&self, url: &str, git_ref: &str, clone_dir: &Path) -> Result<String> {
        if let Some(sha) = self.rcs.ls_remote(url, git_ref).await? {
            return Ok(sha);
        }
        if looks_like_commit_identity(git_ref) && clone_dir.exists() {
            return Ok(self.rcs.rev_parse(clone_dir, git_ref).await?);
        }
        Err(CmakexError::Rcs(rcs_cli_wrapper::error::Error::RefNotFound {
            url: url.to_string(),
            git_ref: git_ref.to_string(),
        }))
    }

    /// For configurations the evaluation above left untouched (i.e. considered
    /// satisfied from the database), compares each declared dependency's
    /// prospective fingerprint against what this package's installed record says
    /// it was built against, marking a rebuild when they differ (spec 8, scenario 5).
    fn propagate_dependency_fingerprints(
        &self,
        merged: &PackageRequest,
        existing: Option<&InstalledPackageRecord>,
        workspace: &mut BTreeMap<String, PlannerEntry>,
    ) -> Result<()> {
        let Some(existing) = existing else { return Ok(()) };

        let mut updates: Vec<(ConfigurationName, String)> = Vec::new();
        for config in &merged.build.configs {
            let already_marked = workspace
                .get(&merged.name)
                .is_some_and(|e| e.per_config.contains_key(config));
            if already_marked {
                continue;
            }
            let Some(installed_config) = existing.configurations.get(config) else {
                continue;
            };
            for dep_name in &merged.depends {
                let prospective = workspace
                    .get(dep_name)
                    .and_then(|e| e.prospective_fingerprints.get(config))
                    .cloned();
                let Some(prospective) = prospective else { continue };
                let recorded = installed_config
                    .dependency_fingerprints
                    .get(dep_name)
                    .and_then(|m| m.get(config))
                    .cloned();
                if recorded.as_ref() != Some(&prospective) {
                    updates.push((
                        config.clone(),
                        format!(
                            "dependency {dep_name} fingerprint changed from {} to {prospective}",
                            recorded.unwrap_or_else(|| "<none>".to_string())
                        ),
                    ));
                    break;
                }
            }
        }

        let entry = workspace.get_mut(&merged.name).expect("entry exists");
        for (config, reason) in updates {
            let final_flags = entry.request.build.flags.clone();
            entry.per_config.insert(config, ConfigPlan {
                reasons: vec![reason],
                final_flags,
            });
        }
        Ok(())
    }

    /// Computes what this package's installed-record fingerprint would be per
    /// configuration if every currently-pending build succeeded, so parents visited
    /// later in this same post-order traversal can detect a changed dependency.
    fn compute_prospective_fingerprint(
        &self,
        merged: &PackageRequest,
        workspace: &mut BTreeMap<String, PlannerEntry>,
    ) -> Result<()> {
        let resolved_commit = workspace
            .get(&merged.name)
            .and_then(|e| e.resolved_commit.clone())
            .unwrap_or_default();

        let mut dep_fingerprints: BTreeMap<String, BTreeMap<ConfigurationName, String>> = BTreeMap::new();
        for dep in &merged.depends {
            if let Some(dep_entry) = workspace.get(dep) {
                dep_fingerprints.insert(dep.clone(), dep_entry.prospective_fingerprints.clone());
            }
        }

        let entry = workspace.get(&merged.name).expect("entry exists");
        let mut per_config_fingerprint = BTreeMap::new();
        for config in &merged.build.configs {
            // A configuration with no pending build reason is satisfied from the
            // database as-is: its `final_flags` were never computed by
            // `resolve_status`, so they must be reconstructed the same way Phase 2
            // persisted them (request flags plus the global singletons), not read
            // back as the bare request flags — otherwise this prospective
            // fingerprint never matches the real installed record and every parent
            // is spuriously marked for rebuild on every rerun.
            let final_flags = match entry.per_config.get(config) {
                Some(plan) => plan.final_flags.clone(),
                None => self.with_global_singletons(&entry.request.build.flags)?,
            };

            let mut configurations = BTreeMap::new();
            configurations.insert(
                config.clone(),
                InstalledConfigurationRecord {
                    configuration: config.clone(),
                    url: merged.clone.url.clone(),
                    resolved_commit: resolved_commit.clone(),
                    source_subdir: merged.build.source_subdir.clone(),
                    requested_flags: entry.request.build.flags.clone(),
                    final_flags,
                    dependency_fingerprints: dep_fingerprints.clone(),
                },
            );
            let record = InstalledPackageRecord {
                name: merged.name.clone(),
                direct_dependencies: merged.depends.clone(),
                configurations,
            };
            per_config_fingerprint.insert(config.clone(), record.fingerprint());
        }

        workspace
            .get_mut(&merged.name)
            .expect("entry exists")
            .prospective_fingerprints = per_config_fingerprint;
        Ok(())
    }
}
