//! End-to-end scenario tests against fake revision-control and native-build-tool
//! backends (SPEC_FULL §8), exercising the planner and the build executor
//! together without spawning real subprocesses.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use cmakex::buildtool::NativeBuildTool;
use cmakex::cmakex_cache::CmakexCache;
use cmakex::executor::{Executor, Steps};
use cmakex::installdb::InstallDb;
use cmakex::planner::{BuildParams, CloneParams, PackageRequest, Planner};
use cmakex::script_eval::ScriptEvaluator;
use cmakex_config::{ConfigurationName, Layout};
use rcs_cli_wrapper::{RcsClient, WorkingTreeStatus};

/// A fake remote: one commit tip per (url, ref), plus a default-branch tip per url.
#[derive(Debug, Default)]
struct FakeRemote {
    refs: Mutex<BTreeMap<(String, String), String>>,
    default_tip: Mutex<BTreeMap<String, String>>,
    heads: Mutex<BTreeMap<PathBuf, String>>,
    dirty: Mutex<BTreeSet<PathBuf>>,
    obstructed: Mutex<BTreeSet<PathBuf>>,
}

impl FakeRemote {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set_tip(&self, url: &str, git_ref: &str, commit: &str) {
        if git_ref.is_empty() {
            self.default_tip.lock().unwrap().insert(url.to_string(), commit.to_string());
        } else {
            self.refs
                .lock()
                .unwrap()
                .insert((url.to_string(), git_ref.to_string()), commit.to_string());
        }
    }

    fn mark_dirty(&self, dir: &Path) {
        self.dirty.lock().unwrap().insert(dir.to_path_buf());
    }

    fn mark_obstructed(&self, dir: &Path) {
        self.obstructed.lock().unwrap().insert(dir.to_path_buf());
    }
}

#[async_trait]
impl RcsClient for FakeRemote {
    async fn clone_repo(&self, url: &str, dest: &Path, git_ref: Option<&str>, _shallow: bool) -> rcs_cli_wrapper::Result<()> {
        std::fs::create_dir_all(dest).unwrap();
        let commit = match git_ref {
            Some(r) if !r.is_empty() => self
                .refs
                .lock()
                .unwrap()
                .get(&(url.to_string(), r.to_string()))
                .cloned()
                .unwrap_or_else(|| r.to_string()),
            _ => self
                .default_tip
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .unwrap_or_else(|| "0000000000000000000000000000000000000".to_string()),
        };
        self.heads.lock().unwrap().insert(dest.to_path_buf(), commit);
        Ok(())
    }

    async fn checkout(&self, dir: &Path, git_ref: &str) -> rcs_cli_wrapper::Result<()> {
        self.heads.lock().unwrap().insert(dir.to_path_buf(), git_ref.to_string());
        Ok(())
    }

    async fn ls_remote(&self, url: &str, git_ref: &str) -> rcs_cli_wrapper::Result<Option<String>> {
        if git_ref.is_empty() {
            return Ok(self.default_tip.lock().unwrap().get(url).cloned());
        }
        Ok(self.refs.lock().unwrap().get(&(url.to_string(), git_ref.to_string())).cloned())
    }

    async fn rev_parse_head(&self, dir: &Path) -> rcs_cli_wrapper::Result<String> {
        Ok(self.heads.lock().unwrap().get(dir).cloned().unwrap_or_default())
    }

    async fn rev_parse(&self, _dir: &Path, rev: &str) -> rcs_cli_wrapper::Result<String> {
        Ok(rev.to_string())
    }

    async fn status(&self, dir: &Path) -> rcs_cli_wrapper::Result<WorkingTreeStatus> {
        if !dir.exists() {
            return Ok(WorkingTreeStatus::Missing);
        }
        if self.obstructed.lock().unwrap().contains(dir) {
            return Ok(WorkingTreeStatus::Obstructed);
        }
        if self.dirty.lock().unwrap().contains(dir) {
            return Ok(WorkingTreeStatus::Dirty);
        }
        Ok(WorkingTreeStatus::Clean)
    }
}

/// A fake native build tool: configure/build/install always succeed and do
/// nothing but record the call for assertions.
#[derive(Debug, Default)]
struct FakeBuildTool {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl NativeBuildTool for FakeBuildTool {
    async fn configure(&self, _source_dir: &Path, _binary_dir: &Path, _args: &[String], _log_path: &Path) -> cmakex::error::Result<bool> {
        self.calls.lock().unwrap().push("configure".to_string());
        Ok(true)
    }

    async fn build(&self, _binary_dir: &Path, _config: &ConfigurationName, _log_path: &Path) -> cmakex::error::Result<bool> {
        self.calls.lock().unwrap().push("build".to_string());
        Ok(true)
    }

    async fn install(&self, _binary_dir: &Path, _config: &ConfigurationName, _prefix: &Path, _log_path: &Path) -> cmakex::error::Result<bool> {
        self.calls.lock().unwrap().push("install".to_string());
        Ok(true)
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    layout: Layout,
    install_db: InstallDb,
    remote: Arc<FakeRemote>,
    build_tool: Arc<FakeBuildTool>,
    cache: CmakexCache,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let install_db = InstallDb::new(layout.installed_db_dir());
        let cache = CmakexCache::new("Ninja".to_string(), None, None, false, vec![]);
        Self {
            _dir: dir,
            layout,
            install_db,
            remote: FakeRemote::new(),
            build_tool: Arc::new(FakeBuildTool::default()),
            cache,
        }
    }

    fn request(&self, name: &str, url: &str, git_ref: &str, configs: &[&str]) -> PackageRequest {
        PackageRequest {
            name: name.to_string(),
            clone: CloneParams {
                url: url.to_string(),
                git_ref: git_ref.to_string(),
                shallow: true,
            },
            build: BuildParams {
                source_subdir: None,
                flags: Vec::new(),
                configs: configs.iter().map(|c| ConfigurationName::new(*c)).collect(),
            },
            depends: BTreeSet::new(),
        }
    }

    async fn plan_and_build(&self, requests: Vec<PackageRequest>, configs: &[&str]) -> cmakex::planner::Plan {
        let requested_configs: BTreeSet<ConfigurationName> =
            configs.iter().map(|c| ConfigurationName::new(*c)).collect();
        let script_eval = ScriptEvaluator::new(
            self.layout.script_executor_dir(),
            self.layout.log_dir(),
            PathBuf::from("cmake"),
        );
        let planner = Planner::new(
            &self.layout,
            &self.install_db,
            Arc::clone(&self.remote) as Arc<dyn RcsClient>,
            script_eval,
            true,
            self.cache.singleton_flags(),
        );
        let main_source = self.layout.root().join("main");
        std::fs::create_dir_all(&main_source).unwrap();
        let plan = planner
            .plan(&main_source, requests, &requested_configs, None)
            .await
            .unwrap();

        let executor = Executor::new(
            &self.layout,
            &self.install_db,
            Arc::clone(&self.build_tool) as Arc<dyn cmakex::buildtool::NativeBuildTool>,
            self.cache.generator.clone(),
            self.cache.per_config_bin_dirs,
        );
        executor.run(&plan, Steps::all()).await.unwrap();
        plan
    }
}

#[tokio::test]
async fn scenario_1_fresh_build() {
    let fixture = Fixture::new();
    fixture.remote.set_tip("https://example.invalid/a.git", "main", "c0ffee");
    let request = fixture.request("a", "https://example.invalid/a.git", "main", &["Debug", "Release"]);

    fixture.plan_and_build(vec![request], &["Debug", "Release"]).await;

    let record = fixture.install_db.try_get("a").unwrap().unwrap();
    assert_eq!(record.configurations.len(), 2);
    for config in record.configurations.values() {
        assert_eq!(config.resolved_commit, "c0ffee");
    }
    assert_eq!(fixture.build_tool.calls.lock().unwrap().len(), 6);
}

#[tokio::test]
async fn scenario_2_noop_rerun_touches_nothing() {
    let fixture = Fixture::new();
    fixture.remote.set_tip("https://example.invalid/a.git", "main", "c0ffee");
    let request = fixture.request("a", "https://example.invalid/a.git", "main", &["Debug"]);
    fixture.plan_and_build(vec![request.clone()], &["Debug"]).await;
    let before = fixture.install_db.try_get("a").unwrap().unwrap();

    fixture.plan_and_build(vec![request], &["Debug"]).await;

    let after = fixture.install_db.try_get("a").unwrap().unwrap();
    assert_eq!(before.fingerprint(), after.fingerprint());
    assert_eq!(fixture.build_tool.calls.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn scenario_3_add_configuration_builds_only_the_new_one() {
    let fixture = Fixture::new();
    fixture.remote.set_tip("https://example.invalid/a.git", "main", "c0ffee");
    let request = fixture.request("a", "https://example.invalid/a.git", "main", &["Debug", "Release"]);
    fixture.plan_and_build(vec![request], &["Debug", "Release"]).await;

    let expanded = fixture.request(
        "a",
        "https://example.invalid/a.git",
        "main",
        &["Debug", "Release", "RelWithDebInfo"],
    );
    fixture
        .plan_and_build(vec![expanded], &["Debug", "Release", "RelWithDebInfo"])
        .await;

    let record = fixture.install_db.try_get("a").unwrap().unwrap();
    assert_eq!(record.configurations.len(), 3);
    assert_eq!(fixture.build_tool.calls.lock().unwrap().len(), 9);
}

#[tokio::test]
async fn scenario_4_incompatible_flag_rebuilds_every_configuration() {
    let fixture = Fixture::new();
    fixture.remote.set_tip("https://example.invalid/a.git", "main", "c0ffee");
    let request = fixture.request("a", "https://example.invalid/a.git", "main", &["Debug"]);
    fixture.plan_and_build(vec![request], &["Debug"]).await;

    let mut changed = fixture.request("a", "https://example.invalid/a.git", "main", &["Debug"]);
    changed.build.flags = cmakex::configure_args::parse_flags(&["-DFOO=BAR".to_string()]).unwrap();
    fixture.plan_and_build(vec![changed], &["Debug"]).await;

    let record = fixture.install_db.try_get("a").unwrap().unwrap();
    let config = record.configurations.get(&ConfigurationName::new("Debug")).unwrap();
    assert!(config.final_flags.iter().any(|f| f.to_string().contains("FOO")));
    assert_eq!(fixture.build_tool.calls.lock().unwrap().len(), 6);
}

#[tokio::test]
async fn scenario_5_dependency_propagation_rebuilds_the_parent() {
    let fixture = Fixture::new();
    fixture.remote.set_tip("https://example.invalid/b.git", "main", "b-rev-1");
    fixture.remote.set_tip("https://example.invalid/a.git", "main", "a-rev-1");

    let mut a = fixture.request("a", "https://example.invalid/a.git", "main", &["Debug"]);
    a.depends.insert("b".to_string());
    let b = fixture.request("b", "https://example.invalid/b.git", "main", &["Debug"]);
    // `b` is listed before `a` so it is visited (and its prospective fingerprint
    // computed) before `a`'s own fingerprint-propagation check runs; in the real
    // system this ordering falls out of `a`'s own dependency script naming `b`
    // before `a` is appended to the build order (post-order recursion).
    fixture.plan_and_build(vec![b, a.clone()], &["Debug"]).await;
    fixture.build_tool.calls.lock().unwrap().clear();

    fixture.remote.set_tip("https://example.invalid/b.git", "main", "b-rev-2");
    let b_advanced = fixture.request("b", "https://example.invalid/b.git", "main", &["Debug"]);
    fixture.plan_and_build(vec![b_advanced, a], &["Debug"]).await;

    let a_record = fixture.install_db.try_get("a").unwrap().unwrap();
    let a_debug = a_record.configurations.get(&ConfigurationName::new("Debug")).unwrap();
    let b_fp = a_debug.dependency_fingerprints.get("b").unwrap().get(&ConfigurationName::new("Debug")).unwrap();
    let b_record = fixture.install_db.try_get("b").unwrap().unwrap();
    assert_eq!(*b_fp, b_record.fingerprint());
    assert!(fixture.build_tool.calls.lock().unwrap().len() >= 6);
}

#[tokio::test]
async fn scenario_6_incompatible_readdition_of_same_package_is_rejected() {
    // The full circular-dependency chain (spec 8 scenario 6) is exercised at the
    // unit level in `planner::guard`, since reproducing it end-to-end would
    // require a real nested `deps.cmake`/cmake evaluation round-trip. Here we
    // cover the sibling invariant from spec 8: two requests for the same
    // package merged within one plan must be compatible, or the plan is
    // rejected before anything is built.
    let fixture = Fixture::new();
    fixture.remote.set_tip("https://example.invalid/a.git", "main", "a1");

    let mut first = fixture.request("a", "https://example.invalid/a.git", "main", &["Debug"]);
    first.build.flags = cmakex::configure_args::parse_flags(&["-DFOO=1".to_string()]).unwrap();
    let mut second = fixture.request("a", "https://example.invalid/a.git", "main", &["Release"]);
    second.build.flags = cmakex::configure_args::parse_flags(&["-DFOO=2".to_string()]).unwrap();

    let requested_configs: BTreeSet<ConfigurationName> =
        [ConfigurationName::new("Debug"), ConfigurationName::new("Release")].into();
    let script_eval = ScriptEvaluator::new(
        fixture.layout.script_executor_dir(),
        fixture.layout.log_dir(),
        PathBuf::from("cmake"),
    );
    let planner = Planner::new(
        &fixture.layout,
        &fixture.install_db,
        Arc::clone(&fixture.remote) as Arc<dyn RcsClient>,
        script_eval,
        true,
        fixture.cache.singleton_flags(),
    );
    let main_source = fixture.layout.root().join("main");
    std::fs::create_dir_all(&main_source).unwrap();

    let result = planner
        .plan(&main_source, vec![first, second], &requested_configs, None)
        .await;
    assert!(matches!(result, Err(cmakex::error::CmakexError::IncompatibleReAddition { .. })));
    assert!(fixture.install_db.try_get("a").unwrap().is_none());
}

#[tokio::test]
async fn obstructed_clone_directory_is_fatal_in_strict_mode_but_warned_in_lax_mode() {
    let fixture = Fixture::new();
    fixture.remote.set_tip("https://example.invalid/a.git", "main", "c0ffee");
    let clone_dir = fixture.layout.pkg_clone_dir("a");
    std::fs::create_dir_all(&clone_dir).unwrap();
    std::fs::write(clone_dir.join("unrelated.txt"), "not a clone").unwrap();
    fixture.remote.mark_obstructed(&clone_dir);

    let request = fixture.request("a", "https://example.invalid/a.git", "main", &["Debug"]);
    let requested_configs: BTreeSet<ConfigurationName> = [ConfigurationName::new("Debug")].into();
    let main_source = fixture.layout.root().join("main");
    std::fs::create_dir_all(&main_source).unwrap();

    let strict_planner = Planner::new(
        &fixture.layout,
        &fixture.install_db,
        Arc::clone(&fixture.remote) as Arc<dyn RcsClient>,
        ScriptEvaluator::new(fixture.layout.script_executor_dir(), fixture.layout.log_dir(), PathBuf::from("cmake")),
        true,
        fixture.cache.singleton_flags(),
    );
    let result = strict_planner
        .plan(&main_source, vec![request.clone()], &requested_configs, None)
        .await;
    assert!(matches!(
        result,
        Err(cmakex::error::CmakexError::CloneDirectoryObstructed { .. })
    ));

    let lax_planner = Planner::new(
        &fixture.layout,
        &fixture.install_db,
        Arc::clone(&fixture.remote) as Arc<dyn RcsClient>,
        ScriptEvaluator::new(fixture.layout.script_executor_dir(), fixture.layout.log_dir(), PathBuf::from("cmake")),
        false,
        fixture.cache.singleton_flags(),
    );
    let plan = lax_planner
        .plan(&main_source, vec![request], &requested_configs, None)
        .await
        .unwrap();
    assert_eq!(plan.order, vec!["a".to_string()]);
}
