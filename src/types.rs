//! Shared types used across hosts and modules.

use crate::errors::IntegrationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// Edition of the integration contract implemented by a host or a module.
///
/// Serialized as `{ "major": 5, "minor": 1, "patch": 0 }`. Older manifests
/// omit `patch`, which then reads as `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpecVersion {
    /// Breaking changes. Hosts refuse modules with a different major.
    pub major: u32,

    /// Non-breaking changes. Accepted, but reported to the module.
    pub minor: u32,

    /// Bug fixes. Accepted, reported to the module as informational.
    #[serde(default)]
    pub patch: u32,
}

impl SpecVersion {
    /// The edition implemented by this crate.
    pub const CURRENT: SpecVersion = SpecVersion::new(
        parse_component(env!("CARGO_PKG_VERSION_MAJOR")),
        parse_component(env!("CARGO_PKG_VERSION_MINOR")),
        parse_component(env!("CARGO_PKG_VERSION_PATCH")),
    );

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The edition implemented by this crate.
    pub fn current() -> Self {
        Self::CURRENT
    }
}

impl std::fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl From<(u32, u32, u32)> for SpecVersion {
    fn from((major, minor, patch): (u32, u32, u32)) -> Self {
        Self::new(major, minor, patch)
    }
}

impl TryFrom<&semver::Version> for SpecVersion {
    type Error = IntegrationError;

    fn try_from(v: &semver::Version) -> Result<Self, Self::Error> {
        let component = |n: u64| {
            u32::try_from(n).map_err(|_| {
                IntegrationError::invalid_input(format!("Version component {} out of range", n))
            })
        };
        Ok(Self::new(
            component(v.major)?,
            component(v.minor)?,
            component(v.patch)?,
        ))
    }
}

/// Accepts `major.minor.patch` and the short `major.minor` form.
impl FromStr for SpecVersion {
    type Err = IntegrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        let full = if s.matches('.').count() == 1 {
            format!("{}.0", s)
        } else {
            s.to_string()
        };
        let parsed = semver::Version::parse(&full).map_err(|e| {
            IntegrationError::invalid_input(format!("Invalid spec version '{}': {}", s, e))
        })?;
        Self::try_from(&parsed)
    }
}

const fn parse_component(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut value = 0u32;
    let mut i = 0;
    while i < bytes.len() {
        value = value * 10 + (bytes[i] - b'0') as u32;
        i += 1;
    }
    value
}

/// Functional grouping of components sharing cache and storage scope.
///
/// Independent of module boundaries: several modules may share a family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Family(String);

impl Family {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Family {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Shorthand for [`Family::new`].
pub fn family(name: impl Into<String>) -> Family {
    Family::new(name)
}

/// Token for calls to secured backends, obtained from the host.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Unique identifier (UUID-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueId(pub Uuid);

impl UniqueId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UniqueId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UniqueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one component instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub UniqueId);

impl InstanceId {
    pub fn new() -> Self {
        Self(UniqueId::new())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wc_{}", self.0)
    }
}

/// Handle returned when registering an event listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub UniqueId);

impl ListenerId {
    pub fn new() -> Self {
        Self(UniqueId::new())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lsn_{}", self.0)
    }
}

/// Generic metadata map.
pub type Metadata = HashMap<String, serde_json::Value>;
