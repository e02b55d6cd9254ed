//! Command-line surface (spec 6, "CLI surface"): a single short verb token
//! concatenating step letters (`c`, `b`, `i`, `t`) and configuration letters
//! (`d`, `r`, `w`), e.g. `cbi dr` runs configure/build/install for Debug and
//! Release. Parsing here mirrors `twoliter::cmd`'s `clap::Parser` derive shape;
//! the step/configuration decoding itself is a direct, idiomatic port of
//! `examples/original_source/src/cmakex/process_command_line.cpp`.

use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use cmakex_config::ConfigurationName;

use crate::error::{CmakexError, Result};
use crate::executor::Steps;

/// A tool that resolves, fetches, configures, builds and installs a project's
/// transitive dependencies against a shared prefix.
#[derive(Debug, Parser)]
#[clap(about, long_about = None, version)]
pub struct Args {
    /// Set the logging level. One of [off|error|warn|info|debug|trace]. Defaults to
    /// info. You can also leave this unset and use the RUST_LOG env variable.
    #[clap(long = "log-level")]
    pub log_level: Option<LevelFilter>,

    /// Steps and configurations, e.g. `cbi` or `cbi dr`.
    pub verb: String,
    pub configs: Option<String>,

    /// Root binary directory. Defaults to the current directory.
    #[clap(short = 'B', long = "binary-dir")]
    pub binary_dir: Option<PathBuf>,

    /// Source directory of the main project. Defaults to the current directory.
    #[clap(short = 'H', long = "source-dir")]
    pub source_dir: Option<PathBuf>,

    /// CMake generator (`-G`). Required on the first invocation for a given root
    /// binary directory; reused from the persisted cache on later invocations.
    #[clap(short = 'G', long)]
    pub generator: Option<String>,

    #[clap(short = 'T', long)]
    pub toolset: Option<String>,

    #[clap(short = 'A', long)]
    pub architecture: Option<String>,

    /// Raw configure flags forwarded verbatim to every package's configure step
    /// (`-D...`, `-U...`, `-Wno-dev`, ...).
    #[clap(long = "cmake-args", num_args = 0.., allow_hyphen_values = true)]
    pub cmake_args: Vec<String>,

    /// Use a separate binary directory per configuration, where the generator is
    /// single-configuration (spec 4.A, "Effective per-configuration flag").
    #[clap(long)]
    pub per_config_bin_dirs: bool,

    /// Download or install dependencies first, per the side-car dependency script.
    #[clap(long)]
    pub deps: bool,

    /// Turn strict-commit mismatches into warnings instead of fatal errors, and
    /// use a cloned tree as-is instead of refusing it (spec 4.G, "lax mode").
    /// Strict-commit mode is the default.
    #[clap(long)]
    pub lax: bool,
}

impl Args {
    /// Whether the planner runs in strict-commit mode (spec 4.G): the default,
    /// unless `--lax` was passed.
    pub fn strict_commit(&self) -> bool {
        !self.lax
    }
}

/// The decoded verb: which cmake steps to run, and for which configurations.
#[derive(Debug, Clone)]
pub struct Verb {
    pub steps: Steps,
    pub test: bool,
    pub configs: Vec<ConfigurationName>,
}

/// Decodes a step-letter token and an optional configuration-letter token into a
/// [`Verb`] (spec 6, "CLI surface"). An empty configuration token yields the
/// distinguished `NoConfig` singleton.
pub fn parse_verb(steps: &str, configs: Option<&str>) -> Result<Verb> {
    let mut configure = false;
    let mut build = false;
    let mut install = false;
    let mut test = false;
    let mut config_names: Vec<ConfigurationName> = Vec::new();

    for c in steps.chars() {
        match c {
            'c' => configure = true,
            'b' => build = true,
            'i' => install = true,
            't' => test = true,
            'd' | 'r' | 'w' => config_names.push(config_letter(c)),
            other => {
                return Err(invalid_char(other));
            }
        }
    }

    if let Some(configs) = configs {
        for c in configs.chars() {
            match c {
                'd' | 'r' | 'w' => config_names.push(config_letter(c)),
                other => return Err(invalid_char(other)),
            }
        }
    }

    if config_names.is_empty() {
        config_names.push(ConfigurationName::no_config());
    }
    config_names.sort();
    config_names.dedup();

    Ok(Verb {
        steps: Steps {
            configure,
            build,
            install,
        },
        test,
        configs: config_names,
    })
}

fn config_letter(c: char) -> ConfigurationName {
    match c {
        'd' => ConfigurationName::new("Debug"),
        'r' => ConfigurationName::new("Release"),
        'w' => ConfigurationName::new("RelWithDebInfo"),
        _ => unreachable!("callers only pass d/r/w"),
    }
}

fn invalid_char(c: char) -> CmakexError {
    CmakexError::InvalidVerb {
        verb: c.to_string(),
        detail: format!("'{c}' is not a recognized step or configuration letter"),
    }
}
