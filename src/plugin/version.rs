//! Plugin identity as declared in a build section.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::PluginDescriptor;

/// Error parsing a `name[:version]` plugin key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParsePluginVersionError {
    #[error("plugin key is empty")]
    Empty,
    #[error("plugin key '{0}' has an empty name")]
    EmptyName(String),
    #[error("plugin key '{0}' has an empty version")]
    EmptyVersion(String),
    #[error("plugin key '{0}' contains more than one ':'")]
    TooManySeparators(String),
    #[error("plugin key '{0}' contains a path separator or '..'")]
    UnsafePath(String),
}

/// Names and versions become cache and URL path segments.
fn is_path_safe(part: &str) -> bool {
    !part.contains(['/', '\\']) && part != "." && !part.contains("..")
}

/// A required plugin: a name and an optional exact version.
///
/// A missing version matches any version of the named plugin. Equality and
/// hashing cover both fields, so `foo` and `foo:1.0` are distinct requirements
/// even though the former is satisfied by anything satisfying the latter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginVersion {
    name: String,
    version: Option<String>,
}

impl PluginVersion {
    /// Create a requirement for any version of `name`.
    pub fn any(name: impl Into<String>) -> Self {
        Self { name: name.into(), version: None }
    }

    /// Create a requirement for an exact version of `name`.
    pub fn exact(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self { name: name.into(), version: Some(version.into()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Whether a loaded plugin with this descriptor satisfies the requirement.
    pub fn satisfied_by(&self, descriptor: &PluginDescriptor) -> bool {
        if self.name != descriptor.name {
            return false;
        }
        match &self.version {
            Some(version) => *version == descriptor.version,
            None => true,
        }
    }

    /// Repository-relative artifact path.
    ///
    /// Unversioned requirements live at `{name}.jar`, versioned ones at
    /// `{name}/{version}/{name}.jar`.
    pub fn artifact_path(&self) -> String {
        match &self.version {
            Some(version) => format!("{}/{}/{}.jar", self.name, version, self.name),
            None => format!("{}.jar", self.name),
        }
    }
}

impl FromStr for PluginVersion {
    type Err = ParsePluginVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        if key.is_empty() {
            return Err(ParsePluginVersionError::Empty);
        }

        let mut parts = key.split(':');
        let name = parts.next().unwrap_or_default().trim();
        let version = parts.next().map(str::trim);
        if parts.next().is_some() {
            return Err(ParsePluginVersionError::TooManySeparators(key.to_string()));
        }
        if name.is_empty() {
            return Err(ParsePluginVersionError::EmptyName(key.to_string()));
        }
        if !is_path_safe(name) || version.is_some_and(|v| !is_path_safe(v)) {
            return Err(ParsePluginVersionError::UnsafePath(key.to_string()));
        }

        match version {
            Some("") => Err(ParsePluginVersionError::EmptyVersion(key.to_string())),
            Some(version) => Ok(Self::exact(name, version)),
            None => Ok(Self::any(name)),
        }
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}:{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}
