//! Configuration for hosts and component controllers.

use crate::settings::{HostSettings, SettingKey};
use crate::types::SpecVersion;
use serde::{Deserialize, Serialize};

/// Which attributes must be present before a component may connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredAttributes {
    /// `user-language`, `config-name`, `crash-reporting-enabled`,
    /// `offline-data-storage-enabled`, `is-offline-authenticated`.
    #[default]
    Standard,

    /// The standard set plus `authentication-status`.
    WithAuthenticationStatus,
}

impl RequiredAttributes {
    pub fn keys(&self) -> &'static [SettingKey] {
        const STANDARD: [SettingKey; 5] = [
            SettingKey::UserLanguage,
            SettingKey::ConfigName,
            SettingKey::CrashReportingEnabled,
            SettingKey::OfflineDataStorageEnabled,
            SettingKey::IsOfflineAuthenticated,
        ];
        match self {
            Self::Standard => &STANDARD,
            Self::WithAuthenticationStatus => &SettingKey::ALL,
        }
    }
}

/// How boolean attributes are read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BooleanParsing {
    /// Anything but `"false"` is `true`, absence included. Matches what
    /// existing hosts expect.
    #[default]
    Lenient,

    /// Only `"true"` and `"false"` are accepted.
    Strict,
}

/// What happens to a refresh request while another one is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOverlap {
    /// Drop the new request; the pending refresh answers for it.
    #[default]
    Ignore,

    /// Run one more refresh once the pending one settles. Further requests
    /// in the meantime fold into that one.
    Coalesce,
}

/// Configuration of one component controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub required_attributes: RequiredAttributes,

    #[serde(default)]
    pub boolean_parsing: BooleanParsing,

    #[serde(default)]
    pub refresh_overlap: RefreshOverlap,

    /// Capacity of the component's event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize {
    64
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            required_attributes: RequiredAttributes::default(),
            boolean_parsing: BooleanParsing::default(),
            refresh_overlap: RefreshOverlap::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also require `authentication-status` at connect time.
    pub fn require_authentication_status(mut self, required: bool) -> Self {
        self.required_attributes = if required {
            RequiredAttributes::WithAuthenticationStatus
        } else {
            RequiredAttributes::Standard
        };
        self
    }

    pub fn boolean_parsing(mut self, parsing: BooleanParsing) -> Self {
        self.boolean_parsing = parsing;
        self
    }

    pub fn refresh_overlap(mut self, overlap: RefreshOverlap) -> Self {
        self.refresh_overlap = overlap;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// Configuration of a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    /// Spec edition the host implements.
    #[serde(default = "SpecVersion::current")]
    pub spec_version: SpecVersion,

    /// Initial settings for every module.
    pub settings: HostSettings,

    /// Capacity of each module's event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl HostConfig {
    pub fn new(settings: HostSettings) -> Self {
        Self {
            spec_version: SpecVersion::current(),
            settings,
            event_capacity: default_event_capacity(),
        }
    }

    pub fn spec_version(mut self, version: SpecVersion) -> Self {
        self.spec_version = version;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::tests::sample_settings;

    #[test]
    fn test_required_attribute_sets() {
        let standard = RequiredAttributes::Standard.keys();
        assert_eq!(standard.len(), 5);
        assert!(!standard.contains(&SettingKey::AuthenticationStatus));

        let strict = RequiredAttributes::WithAuthenticationStatus.keys();
        assert!(strict.contains(&SettingKey::AuthenticationStatus));
    }

    #[test]
    fn test_controller_config_builder() {
        let config = ControllerConfig::new()
            .require_authentication_status(true)
            .boolean_parsing(BooleanParsing::Strict)
            .refresh_overlap(RefreshOverlap::Coalesce);

        assert_eq!(config.required_attributes, RequiredAttributes::WithAuthenticationStatus);
        assert_eq!(config.boolean_parsing, BooleanParsing::Strict);
        assert_eq!(config.refresh_overlap, RefreshOverlap::Coalesce);
    }

    #[test]
    fn test_controller_config_defaults_from_json() {
        let config: ControllerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ControllerConfig::default());

        let config: ControllerConfig =
            serde_json::from_str(r#"{"refresh_overlap":"coalesce"}"#).unwrap();
        assert_eq!(config.refresh_overlap, RefreshOverlap::Coalesce);
    }

    #[test]
    fn test_host_config_defaults_to_current_version() {
        let config = HostConfig::new(sample_settings());
        assert_eq!(config.spec_version, SpecVersion::current());

        let json = serde_json::json!({ "settings": sample_settings() });
        let parsed: HostConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.spec_version, SpecVersion::current());
        assert_eq!(parsed.event_capacity, 64);
    }
}
