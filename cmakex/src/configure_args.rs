//! Canonicalization and compatibility checking of configure-time arguments
//! (spec 4.D). Five classes of flags are recognized: single-value singletons,
//! variable definitions, variable undefinitions, benign flags, and — checked
//! separately by [`forbidden_flag`] — the handful of flags a package request may
//! never set because the planner controls them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CmakexError, Result};

/// The four single-value singleton classes recognized by cmake's own configure-time
/// flags. At most one value per class may survive canonicalization.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum SingletonClass {
    CacheInitializer,
    Generator,
    Toolset,
    Architecture,
}

impl SingletonClass {
    fn flag_letter(self) -> &'static str {
        match self {
            Self::CacheInitializer => "-C",
            Self::Generator => "-G",
            Self::Toolset => "-T",
            Self::Architecture => "-A",
        }
    }

    fn from_flag_letter(letter: &str) -> Option<Self> {
        match letter {
            "-C" => Some(Self::CacheInitializer),
            "-G" => Some(Self::Generator),
            "-T" => Some(Self::Toolset),
            "-A" => Some(Self::Architecture),
            _ => None,
        }
    }
}

impl fmt::Display for SingletonClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.flag_letter())
    }
}

/// A single configure flag in parsed, classified form.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum ConfigureFlag {
    Singleton {
        class: SingletonClass,
        value: String,
    },
    Define {
        name: String,
        ty: Option<String>,
        value: String,
    },
    Undefine {
        name: String,
    },
    Benign(String),
}

impl ConfigureFlag {
    /// Critical flags are the ones whose change forces a full rebuild (GLOSSARY,
    /// "Critical flag"): singletons and anything touching a named cache variable.
    pub fn is_critical(&self) -> bool {
        !matches!(self, ConfigureFlag::Benign(_))
    }

    /// The cache variable name this flag assigns or unassigns, if any.
    fn variable_name(&self) -> Option<&str> {
        match self {
            ConfigureFlag::Define { name, .. } | ConfigureFlag::Undefine { name } => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigureFlag::Singleton { class, value } => write!(f, "{class} {value}"),
            ConfigureFlag::Define {
                name,
                ty: Some(ty),
                value,
            } => write!(f, "-D{name}:{ty}={value}"),
            ConfigureFlag::Define { name, ty: None, value } => write!(f, "-D{name}={value}"),
            ConfigureFlag::Undefine { name } => write!(f, "-U{name}"),
            ConfigureFlag::Benign(tok) => write!(f, "{tok}"),
        }
    }
}

/// Variable names a package request may never assign; the planner owns them
/// (spec 3, "Build parameters" invariant).
const FORBIDDEN_VARIABLES: &[&str] = &[
    "CMAKE_INSTALL_PREFIX",
    "CMAKE_PREFIX_PATH",
    "CMAKE_MODULE_PATH",
    "CMAKE_BUILD_TYPE",
];

/// Rejects a package request's flags if any assigns a variable the planner owns, or
/// names the source/binary directory directly.
pub fn check_no_forbidden_flags(flags: &[ConfigureFlag], package_name: &str) -> Result<()> {
    for flag in flags {
        if let Some(name) = flag.variable_name() {
            if FORBIDDEN_VARIABLES.contains(&name) {
                return Err(CmakexError::ForbiddenFlag {
                    name: package_name.to_string(),
                    flag: name.to_string(),
                });
            }
        }
        if let ConfigureFlag::Benign(tok) = flag {
            if tok == "-S" || tok == "-B" || tok.starts_with("-S=") || tok.starts_with("-B=") {
                return Err(CmakexError::ForbiddenFlag {
                    name: package_name.to_string(),
                    flag: tok.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Parses raw command-line style tokens (as they would be passed to `cmake`) into
/// classified flags. Singletons accept either the attached form (`-GNinja`) or the
/// split form (`-G`, `Ninja` as two tokens).
pub fn parse_flags(raw: &[String]) -> Result<Vec<ConfigureFlag>> {
    let mut out = Vec::new();
    let mut iter = raw.iter().peekable();
    while let Some(tok) = iter.next() {
        if let Some(rest) = tok.strip_prefix("-D") {
            let (name_and_type, value) = rest.split_once('=').ok_or_else(|| CmakexError::MalformedFlag {
                flag: tok.clone(),
                detail: "-D flag requires a NAME[:TYPE]=VALUE argument".to_string(),
            })?;
            let (name, ty) = match name_and_type.split_once(':') {
                Some((n, t)) => (n.to_string(), Some(t.to_string())),
                None => (name_and_type.to_string(), None),
            };
            out.push(ConfigureFlag::Define {
                name,
                ty,
                value: value.to_string(),
            });
        } else if let Some(name) = tok.strip_prefix("-U") {
            out.push(ConfigureFlag::Undefine {
                name: name.to_string(),
            });
        } else if let Some(class) = singleton_prefix(tok) {
            let letter = class.flag_letter();
            let value = if tok.len() > letter.len() {
                tok[letter.len()..].to_string()
            } else {
                iter.next().cloned().ok_or_else(|| CmakexError::MalformedFlag {
                    flag: tok.clone(),
                    detail: "requires a value".to_string(),
                })?
            };
            out.push(ConfigureFlag::Singleton { class, value });
        } else {
            out.push(ConfigureFlag::Benign(tok.clone()));
        }
    }
    Ok(out)
}

fn singleton_prefix(tok: &str) -> Option<SingletonClass> {
    let letter = tok.get(0..2)?;
    SingletonClass::from_flag_letter(letter)
}

/// Normalizes a (possibly redundant or conflicting) flag list into canonical,
/// order-independent form: singletons coalesce (conflicting values are an error),
/// each variable name's last assignment survives, benign flags deduplicate. The
/// result is sorted, so `canonical(canonical(x)) == canonical(x)` (spec 8).
pub fn canonical(flags: &[ConfigureFlag]) -> Result<Vec<ConfigureFlag>> {
    let mut singletons: BTreeMap<SingletonClass, String> = BTreeMap::new();
    let mut variables: BTreeMap<String, ConfigureFlag> = BTreeMap::new();
    let mut benign: BTreeSet<String> = BTreeSet::new();

    for flag in flags {
        match flag {
            ConfigureFlag::Singleton { class, value } => {
                if let Some(existing) = singletons.get(class) {
                    if existing != value {
                        return Err(CmakexError::ConflictingSingleton {
                            flag: class.to_string(),
                            first: existing.clone(),
                            second: value.clone(),
                        });
                    }
                } else {
                    singletons.insert(*class, value.clone());
                }
            }
            ConfigureFlag::Define { name, .. } | ConfigureFlag::Undefine { name } => {
                variables.insert(name.clone(), flag.clone());
            }
            ConfigureFlag::Benign(tok) => {
                benign.insert(tok.clone());
            }
        }
    }

    let mut out: Vec<ConfigureFlag> = Vec::new();
    out.extend(
        singletons
            .into_iter()
            .map(|(class, value)| ConfigureFlag::Singleton { class, value }),
    );
    out.extend(variables.into_values());
    out.extend(benign.into_iter().map(ConfigureFlag::Benign));
    out.sort();
    Ok(out)
}

/// The symmetric difference of two canonical flag sets, restricted to critical
/// flags. Empty iff the two requests are compatible (spec 4.D).
pub fn incompatible(a: &[ConfigureFlag], b: &[ConfigureFlag]) -> Vec<ConfigureFlag> {
    let a: BTreeSet<&ConfigureFlag> = a.iter().filter(|f| f.is_critical()).collect();
    let b: BTreeSet<&ConfigureFlag> = b.iter().filter(|f| f.is_critical()).collect();
    a.symmetric_difference(&b).map(|f| (*f).clone()).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn flags(raw: &[&str]) -> Vec<ConfigureFlag> {
        let raw: Vec<String> = raw.iter().map(|s| s.to_string()).collect();
        parse_flags(&raw).unwrap()
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let f = flags(&["-DFOO=1", "-DFOO=2", "-G", "Ninja", "-Wno-dev"]);
        let once = canonical(&f).unwrap();
        let twice = canonical(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn last_define_wins_regardless_of_order() {
        let forward = canonical(&flags(&["-DFOO=1", "-DFOO=2"])).unwrap();
        let backward = canonical(&flags(&["-DFOO=2", "-DFOO=1"])).unwrap();
        assert_ne!(forward, backward);
        assert!(forward.contains(&ConfigureFlag::Define {
            name: "FOO".into(),
            ty: None,
            value: "2".into(),
        }));
        assert!(backward.contains(&ConfigureFlag::Define {
            name: "FOO".into(),
            ty: None,
            value: "1".into(),
        }));
    }

    #[test]
    fn undefine_after_define_wins() {
        let c = canonical(&flags(&["-DFOO=1", "-UFOO"])).unwrap();
        assert_eq!(c, vec![ConfigureFlag::Undefine { name: "FOO".into() }]);
    }

    #[test]
    fn conflicting_singleton_is_an_error() {
        let err = canonical(&flags(&["-G", "Ninja", "-G", "Xcode"])).unwrap_err();
        assert!(matches!(err, CmakexError::ConflictingSingleton { .. }));
    }

    #[test]
    fn benign_flags_dont_affect_compatibility() {
        let a = canonical(&flags(&["-DFOO=1", "-Wno-dev"])).unwrap();
        let b = canonical(&flags(&["-DFOO=1", "--debug-output"])).unwrap();
        assert!(incompatible(&a, &b).is_empty());
    }

    #[test]
    fn critical_difference_is_reported() {
        let a = canonical(&flags(&["-DFOO=1"])).unwrap();
        let b = canonical(&flags(&["-DFOO=2"])).unwrap();
        assert_eq!(incompatible(&a, &b).len(), 2);
    }

    #[test]
    fn forbidden_flags_are_rejected() {
        let f = flags(&["-DCMAKE_INSTALL_PREFIX=/usr"]);
        assert!(check_no_forbidden_flags(&f, "pkg").is_err());
    }

    #[test]
    fn ordinary_flags_pass_forbidden_check() {
        let f = flags(&["-DFOO=1"]);
        assert!(check_no_forbidden_flags(&f, "pkg").is_ok());
    }

    #[test]
    fn define_without_equals_sign_is_a_malformed_flag_error() {
        let err = parse_flags(&["-DFOO".to_string()]).unwrap_err();
        assert!(matches!(err, CmakexError::MalformedFlag { .. }));
    }

    #[test]
    fn singleton_without_a_value_is_a_malformed_flag_error() {
        let err = parse_flags(&["-G".to_string()]).unwrap_err();
        assert!(matches!(err, CmakexError::MalformedFlag { .. }));
    }
}
