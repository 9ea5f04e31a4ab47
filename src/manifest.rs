//! Machine-readable descriptions of modules and their components.
//!
//! A module manifest is written once by the module author and read by the
//! host to validate and wire the module. It is never mutated.
//!
//! ```json
//! {
//!   "specVersion": { "major": 5, "minor": 1, "patch": 0 },
//!   "family": "prescriptions",
//!   "components": [
//!     { "tagName": "prescription-list", "events": ["open", "refresh"] },
//!     { "tagName": "prescription-detail", "events": ["print"] }
//!   ]
//! }
//! ```

use crate::errors::{IntegrationError, IntegrationResult};
use crate::events::ComponentEventKind;
use crate::types::{Family, SpecVersion};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Host service a component relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceCapability {
    CacheDataStorage,
    OfflineDataStorage,
    Events,
    AccessToken,
}

/// A top-level component exposed by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentManifest {
    /// Element name the host uses to instantiate the component.
    pub tag_name: String,

    /// Events the component emits. The host only listens to the listed
    /// ones; `refresh` is always implied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<ComponentEventKind>,

    /// Properties the host must set beyond the host settings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,

    /// Host services the component needs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceCapability>,
}

impl ComponentManifest {
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            events: Vec::new(),
            properties: Vec::new(),
            services: Vec::new(),
        }
    }

    pub fn emits(mut self, kind: impl Into<ComponentEventKind>) -> Self {
        let kind = kind.into();
        if !self.events.contains(&kind) {
            self.events.push(kind);
        }
        self
    }

    pub fn requires_property(mut self, name: impl Into<String>) -> Self {
        self.properties.push(name.into());
        self
    }

    pub fn requires_service(mut self, capability: ServiceCapability) -> Self {
        if !self.services.contains(&capability) {
            self.services.push(capability);
        }
        self
    }

    /// Whether the host should listen for this event kind.
    pub fn declares(&self, kind: &ComponentEventKind) -> bool {
        *kind == ComponentEventKind::Refresh || self.events.contains(kind)
    }

    pub fn validate(&self) -> IntegrationResult<()> {
        validate_tag_name(&self.tag_name)?;
        let mut seen = HashSet::new();
        for kind in &self.events {
            if kind.as_str().is_empty() {
                return Err(IntegrationError::invalid_manifest(format!(
                    "<{}> declares an empty event name",
                    self.tag_name
                )));
            }
            if !seen.insert(kind.as_str()) {
                return Err(IntegrationError::invalid_manifest(format!(
                    "<{}> declares event '{}' twice",
                    self.tag_name, kind
                )));
            }
        }
        Ok(())
    }
}

/// Custom element naming rules: lowercase ASCII letter first, at least one
/// hyphen, then lowercase letters, digits, `-`, `.` or `_`.
pub fn validate_tag_name(tag: &str) -> IntegrationResult<()> {
    let invalid = |why: &str| {
        IntegrationError::invalid_manifest(format!("Invalid tag name '{}': {}", tag, why))
            .with_context("tag_name", tag)
    };
    let first = tag.chars().next().ok_or_else(|| invalid("empty"))?;
    if !first.is_ascii_lowercase() {
        return Err(invalid("must start with a lowercase letter"));
    }
    if !tag.contains('-') {
        return Err(invalid("must contain a hyphen"));
    }
    if let Some(c) = tag
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_')))
    {
        return Err(invalid(&format!("unexpected character '{}'", c)));
    }
    Ok(())
}

/// A module containing one or more components.
///
/// `components` is never empty; the first component is the entry point
/// initially loaded by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawModuleManifest")]
pub struct ModuleManifest {
    spec_version: SpecVersion,
    family: Family,
    components: Vec<ComponentManifest>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawModuleManifest {
    spec_version: SpecVersion,
    family: Family,
    components: Vec<ComponentManifest>,
}

impl TryFrom<RawModuleManifest> for ModuleManifest {
    type Error = IntegrationError;

    fn try_from(raw: RawModuleManifest) -> Result<Self, Self::Error> {
        let mut components = raw.components.into_iter();
        let entry = components
            .next()
            .ok_or_else(|| IntegrationError::invalid_manifest("A module must contain at least one component"))?;
        let manifest = Self::new(raw.spec_version, raw.family, entry).with_components(components);
        manifest.validate()?;
        Ok(manifest)
    }
}

impl ModuleManifest {
    /// Start from the entry component.
    pub fn new(spec_version: SpecVersion, family: Family, entry: ComponentManifest) -> Self {
        Self {
            spec_version,
            family,
            components: vec![entry],
        }
    }

    pub fn with_component(mut self, component: ComponentManifest) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_components(mut self, components: impl IntoIterator<Item = ComponentManifest>) -> Self {
        self.components.extend(components);
        self
    }

    /// Parse and validate a JSON manifest.
    pub fn from_json(json: &str) -> IntegrationResult<Self> {
        let manifest: Self = serde_json::from_str(json).map_err(|e| {
            IntegrationError::invalid_manifest(format!("Malformed module manifest: {}", e))
        })?;
        Ok(manifest)
    }

    pub fn to_json(&self) -> IntegrationResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn spec_version(&self) -> SpecVersion {
        self.spec_version
    }

    pub fn family(&self) -> &Family {
        &self.family
    }

    pub fn components(&self) -> &[ComponentManifest] {
        &self.components
    }

    /// The component the host loads first.
    pub fn entry_component(&self) -> &ComponentManifest {
        // Every constructor starts with the entry component.
        &self.components[0]
    }

    pub fn component(&self, tag_name: &str) -> Option<&ComponentManifest> {
        self.components.iter().find(|c| c.tag_name == tag_name)
    }

    pub fn validate(&self) -> IntegrationResult<()> {
        if self.family.as_str().trim().is_empty() {
            return Err(IntegrationError::invalid_manifest("Module family must not be empty"));
        }
        if self.components.is_empty() {
            return Err(IntegrationError::invalid_manifest(
                "A module must contain at least one component",
            ));
        }
        let mut tags = HashSet::new();
        for component in &self.components {
            component.validate()?;
            if !tags.insert(component.tag_name.as_str()) {
                return Err(IntegrationError::invalid_manifest(format!(
                    "Component <{}> is declared twice",
                    component.tag_name
                ))
                .with_context("tag_name", &component.tag_name));
            }
        }
        Ok(())
    }
}
