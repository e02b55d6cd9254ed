use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// A build configuration name (`Debug`, `Release`, ...), or the distinguished
/// "no configuration" singleton used by single-configuration generators.
///
/// Equality is case-sensitive. The case-folded form is only ever used as a secondary
/// key for filesystem paths (spec 3, "Entities and invariants").
#[derive(Debug, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigurationName(String);

impl ConfigurationName {
    /// The distinguished "no configuration" singleton.
    pub fn no_config() -> Self {
        Self(String::new())
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn is_no_config(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical external form: the raw name, or `NoConfig` for the empty singleton.
    pub fn canonical(&self) -> &str {
        if self.0.is_empty() {
            "NoConfig"
        } else {
            &self.0
        }
    }

    /// Secondary key used only for building filesystem paths.
    pub fn to_lowercase_for_path(&self) -> String {
        self.canonical().to_lowercase()
    }
}

impl Display for ConfigurationName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

impl From<&str> for ConfigurationName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConfigurationName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
