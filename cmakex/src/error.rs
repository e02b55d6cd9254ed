use std::path::PathBuf;

/// The single error sum used across every component (spec 9, "Exceptions for control
/// flow... become an explicit Result/sum-type... all error kinds become variants of a
/// single error sum"). Each variant renders a single-line, actionable summary naming
/// the package and configuration where applicable (spec 7, "User-visible failure").
#[derive(thiserror::Error, Debug)]
pub enum CmakexError {
    #[error("package '{name}' has no SOURCE_DIR (forbidden absolute path '{path}')")]
    AbsoluteSourceDir { name: String, path: String },

    #[error("package '{name}' request forbids setting {flag}; the planner controls it")]
    ForbiddenFlag { name: String, flag: String },

    #[error("malformed configure flag '{flag}': {detail}")]
    MalformedFlag { flag: String, detail: String },

    #[error("invalid cmakex verb '{verb}': {detail}")]
    InvalidVerb { verb: String, detail: String },

    #[error("conflicting value for singleton flag {flag}: '{first}' vs '{second}'")]
    ConflictingSingleton {
        flag: String,
        first: String,
        second: String,
    },

    #[error(
        "package '{name}' re-added with incompatible configure flags: {diff} (run again after resolving)"
    )]
    IncompatibleReAddition { name: String, diff: String },

    #[error("duplicate package name '{name}' requested with different SOURCE_DIR")]
    DuplicatePackageName { name: String },

    #[error("circular dependency detected: {chain}")]
    CircularDependency { chain: String },

    #[error(
        "package '{name}': strict-commit mismatch, requested ref '{requested_ref}' resolves to \
         {resolved}, but the clone at {clone_dir} is at {actual}"
    )]
    StrictCommitMismatch {
        name: String,
        requested_ref: String,
        resolved: String,
        clone_dir: PathBuf,
        actual: String,
    },

    #[error(
        "clone directory {dir} for package '{name}' exists and is not the expected checkout; \
         remove it and retry"
    )]
    CloneDirectoryObstructed { name: String, dir: PathBuf },

    #[error("failed to evaluate dependency script at {script}: {message}")]
    ScriptEvaluationFailed { script: PathBuf, message: String },

    #[error("package '{name}' configuration '{config}' {phase} failed: {message}")]
    ExternalToolFailed {
        name: String,
        config: String,
        phase: String,
        message: String,
    },

    #[error("failed to launch '{program}': {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("install record for '{name}' is corrupt; remove {path} and retry: {source}")]
    CorruptRecord {
        name: String,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("revision control operation failed: {0}")]
    Rcs(#[from] rcs_cli_wrapper::error::Error),
}

pub type Result<T> = std::result::Result<T, CmakexError>;
