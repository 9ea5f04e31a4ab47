//! Spec version compatibility between host and module.
//!
//! The host checks once, when it initialises a module. Versions are fixed
//! for the lifetime of a process so the result is never re-evaluated.
//!
//! | difference | outcome |
//! |---|---|
//! | major | refuse to load |
//! | minor | load, notify module with `level: "minor"` |
//! | patch | load, notify module with `level: "patch"` |
//! | none | load silently |

use crate::errors::{IntegrationError, IntegrationResult};
use crate::events::{MismatchLevel, VersionMismatchEvent};
use crate::types::SpecVersion;
use serde::{Deserialize, Serialize};

/// Outcome of comparing a host's and a module's spec versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compatibility {
    Compatible,
    MinorMismatch,
    PatchMismatch,
    Incompatible,
}

impl Compatibility {
    /// Whether the host may load the module.
    pub fn is_loadable(&self) -> bool {
        !matches!(self, Self::Incompatible)
    }

    /// Level to report to the module, if any.
    pub fn mismatch_level(&self) -> Option<MismatchLevel> {
        match self {
            Self::MinorMismatch => Some(MismatchLevel::Minor),
            Self::PatchMismatch => Some(MismatchLevel::Patch),
            Self::Compatible | Self::Incompatible => None,
        }
    }
}

impl std::fmt::Display for Compatibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compatible => write!(f, "compatible"),
            Self::MinorMismatch => write!(f, "minor mismatch"),
            Self::PatchMismatch => write!(f, "patch mismatch"),
            Self::Incompatible => write!(f, "incompatible"),
        }
    }
}

/// Classify a module's spec version against the host's.
///
/// Exact integer comparison, checked in order major, minor, patch.
pub fn classify(host: &SpecVersion, module: &SpecVersion) -> Compatibility {
    if host.major != module.major {
        Compatibility::Incompatible
    } else if host.minor != module.minor {
        Compatibility::MinorMismatch
    } else if host.patch != module.patch {
        Compatibility::PatchMismatch
    } else {
        Compatibility::Compatible
    }
}

/// Result of a host/module version check, with both inputs kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCheck {
    pub host_version: SpecVersion,
    pub module_version: SpecVersion,
    pub compatibility: Compatibility,
}

impl VersionCheck {
    pub fn new(host_version: SpecVersion, module_version: SpecVersion) -> Self {
        Self {
            host_version,
            module_version,
            compatibility: classify(&host_version, &module_version),
        }
    }

    /// Notification the host must deliver to the module, if any.
    pub fn mismatch_event(&self) -> Option<VersionMismatchEvent> {
        self.compatibility
            .mismatch_level()
            .map(|level| VersionMismatchEvent {
                level,
                host_version: self.host_version,
                module_version: self.module_version,
            })
    }

    /// `Err(IncompatibleVersion)` when the module must not be loaded.
    pub fn into_result(self) -> IntegrationResult<Self> {
        if self.compatibility.is_loadable() {
            Ok(self)
        } else {
            Err(IntegrationError::incompatible_version(
                &self.host_version,
                &self.module_version,
            ))
        }
    }
}
