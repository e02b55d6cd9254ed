//! Two independent circular-dependency guards, kept deliberately redundant (spec 9,
//! "File-based recursion guard and in-memory set both exist deliberately"): an
//! in-memory set catches cycles within one process, and a persistent on-disk stack
//! catches cycles that span separate invocations left in an inconsistent state by
//! a crash.

use std::path::{Path, PathBuf};

use crate::error::{CmakexError, Result};

/// Per-run in-memory set of names currently being resolved.
#[derive(Debug, Default)]
pub struct RecursionGuard {
    stack: Vec<String>,
}

impl RecursionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `name`. Errors with the full chain if `name` is already on the stack.
    pub fn enter(&mut self, name: &str) -> Result<()> {
        if let Some(pos) = self.stack.iter().position(|n| n == name) {
            let mut chain: Vec<&str> = self.stack[pos..].iter().map(String::as_str).collect();
            chain.push(name);
            return Err(CmakexError::CircularDependency {
                chain: chain.join(" -> "),
            });
        }
        self.stack.push(name.to_string());
        Ok(())
    }

    pub fn exit(&mut self, name: &str) {
        if self.stack.last().map(String::as_str) == Some(name) {
            self.stack.pop();
        }
    }
}

/// A file-backed stack of names currently being processed, surviving process
/// restarts (spec 3, "A persistent recursion guard"). `path` is
/// `_cmakex/tmp/dependency_stack.txt`.
#[derive(Debug)]
pub struct PersistentGuard {
    path: PathBuf,
}

impl PersistentGuard {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CmakexError::Filesystem {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(Self { path })
    }

    fn load(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path).map_err(|source| CmakexError::Filesystem {
            path: self.path.clone(),
            source,
        })?;
        Ok(text.lines().map(str::to_string).collect())
    }

    fn save(&self, stack: &[String]) -> Result<()> {
        let text = stack.iter().map(|s| format!("{s}\n")).collect::<String>();
        std::fs::write(&self.path, text).map_err(|source| CmakexError::Filesystem {
            path: self.path.clone(),
            source,
        })
    }

    /// Appends `name` to the on-disk stack. Errors with the full chain if `name` is
    /// already present.
    pub fn enter(&self, name: &str) -> Result<()> {
        let mut stack = self.load()?;
        if let Some(pos) = stack.iter().position(|n| n == name) {
            let mut chain = stack[pos..].to_vec();
            chain.push(name.to_string());
            return Err(CmakexError::CircularDependency {
                chain: chain.join(" -> "),
            });
        }
        stack.push(name.to_string());
        self.save(&stack)
    }

    /// Removes the top of the on-disk stack, which must be `name`.
    pub fn exit(&self, name: &str) -> Result<()> {
        let mut stack = self.load()?;
        if stack.last().map(String::as_str) == Some(name) {
            stack.pop();
            self.save(&stack)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn in_memory_guard_reports_full_chain() {
        let mut guard = RecursionGuard::new();
        guard.enter("A").unwrap();
        guard.enter("B").unwrap();
        let err = guard.enter("A").unwrap_err();
        match err {
            CmakexError::CircularDependency { chain } => assert_eq!(chain, "A -> B -> A"),
            _ => panic!("wrong error variant"),
        }
    }

    #[test]
    fn in_memory_guard_allows_sequential_reuse_after_exit() {
        let mut guard = RecursionGuard::new();
        guard.enter("A").unwrap();
        guard.exit("A");
        guard.enter("A").unwrap();
    }

    #[test]
    fn persistent_guard_survives_reopen_and_detects_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dependency_stack.txt");
        {
            let guard = PersistentGuard::open(&path).unwrap();
            guard.enter("A").unwrap();
            guard.enter("B").unwrap();
        }
        let reopened = PersistentGuard::open(&path).unwrap();
        let err = reopened.enter("A").unwrap_err();
        assert!(matches!(err, CmakexError::CircularDependency { .. }));
    }

    #[test]
    fn persistent_guard_pops_in_lifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let guard = PersistentGuard::open(dir.path().join("dependency_stack.txt")).unwrap();
        guard.enter("A").unwrap();
        guard.enter("B").unwrap();
        guard.exit("B").unwrap();
        guard.exit("A").unwrap();
        assert!(guard.load().unwrap().is_empty());
    }
}
