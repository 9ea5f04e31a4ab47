//! Attribute storage of a component instance.
//!
//! Host settings reach a component as string attributes named in
//! kebab-case (`userLanguage` → `user-language`). [`Attributes`] keeps the
//! raw strings and converts them to and from their typed settings.

use crate::config::BooleanParsing;
use crate::errors::{IntegrationError, IntegrationResult};
use crate::settings::{
    AuthenticationStatus, ConfigName, HostSettings, SettingKey, SettingValue, UserLanguage,
};
use std::collections::BTreeMap;

/// Raw attribute values keyed by setting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    values: BTreeMap<SettingKey, String>,
    boolean_parsing: BooleanParsing,
}

impl Attributes {
    pub fn new(boolean_parsing: BooleanParsing) -> Self {
        Self {
            values: BTreeMap::new(),
            boolean_parsing,
        }
    }

    /// Every attribute set from a full settings snapshot.
    pub fn from_settings(settings: &HostSettings, boolean_parsing: BooleanParsing) -> Self {
        let mut attributes = Self::new(boolean_parsing);
        for value in settings.values() {
            attributes.write(value);
        }
        attributes
    }

    // ═══════════════════════════════════════════════════════════
    // Raw access by attribute name
    // ═══════════════════════════════════════════════════════════

    /// Set a raw attribute. Returns the previous value.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) -> IntegrationResult<Option<String>> {
        let key = Self::key(name)?;
        Ok(self.values.insert(key, value.into()))
    }

    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        SettingKey::from_attribute(name).and_then(|key| self.raw(key))
    }

    pub fn remove_attribute(&mut self, name: &str) -> IntegrationResult<Option<String>> {
        let key = Self::key(name)?;
        Ok(self.values.remove(&key))
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.get_attribute(name).is_some()
    }

    pub fn raw(&self, key: SettingKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// First key of `required` without a value.
    pub fn first_missing(&self, required: &[SettingKey]) -> Option<SettingKey> {
        required.iter().copied().find(|k| !self.values.contains_key(k))
    }

    fn key(name: &str) -> IntegrationResult<SettingKey> {
        SettingKey::from_attribute(name).ok_or_else(|| {
            IntegrationError::invalid_input(format!("Unknown attribute \"{}\"", name))
        })
    }

    // ═══════════════════════════════════════════════════════════
    // Typed access
    // ═══════════════════════════════════════════════════════════

    /// Serialize a typed value into its attribute. Returns the previous raw value.
    pub fn write(&mut self, value: SettingValue) -> Option<String> {
        self.values.insert(value.key(), value.to_attribute_value())
    }

    /// Deserialize the attribute of `key`.
    pub fn read(&self, key: SettingKey) -> IntegrationResult<SettingValue> {
        let raw = self.raw(key);
        if key.is_boolean() {
            let flag = self.parse_bool(key, raw)?;
            return SettingValue::boolean(key, flag)
                .ok_or_else(|| IntegrationError::internal(format!("{} is not boolean", key)));
        }
        let raw = raw.ok_or_else(|| IntegrationError::missing_attribute(key.attribute_name()))?;
        SettingValue::parse_enum(key, raw)
    }

    fn parse_bool(&self, key: SettingKey, raw: Option<&str>) -> IntegrationResult<bool> {
        match (self.boolean_parsing, raw) {
            (BooleanParsing::Lenient, raw) => Ok(raw != Some("false")),
            (BooleanParsing::Strict, Some("true")) => Ok(true),
            (BooleanParsing::Strict, Some("false")) => Ok(false),
            (BooleanParsing::Strict, Some(other)) => {
                Err(IntegrationError::invalid_attribute(key.attribute_name(), other))
            }
            (BooleanParsing::Strict, None) => {
                Err(IntegrationError::missing_attribute(key.attribute_name()))
            }
        }
    }

    fn read_bool(&self, key: SettingKey) -> IntegrationResult<bool> {
        self.parse_bool(key, self.raw(key))
    }

    pub fn user_language(&self) -> IntegrationResult<UserLanguage> {
        match self.read(SettingKey::UserLanguage)? {
            SettingValue::UserLanguage(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    pub fn config_name(&self) -> IntegrationResult<ConfigName> {
        match self.read(SettingKey::ConfigName)? {
            SettingValue::ConfigName(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    pub fn authentication_status(&self) -> IntegrationResult<AuthenticationStatus> {
        match self.read(SettingKey::AuthenticationStatus)? {
            SettingValue::AuthenticationStatus(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    pub fn crash_reporting_enabled(&self) -> IntegrationResult<bool> {
        self.read_bool(SettingKey::CrashReportingEnabled)
    }

    pub fn offline_data_storage_enabled(&self) -> IntegrationResult<bool> {
        self.read_bool(SettingKey::OfflineDataStorageEnabled)
    }

    /// Deprecated since 5.0.2, use [`Self::authentication_status`].
    pub fn is_offline_authenticated(&self) -> IntegrationResult<bool> {
        self.read_bool(SettingKey::IsOfflineAuthenticated)
    }

    /// All six settings as a typed snapshot.
    pub fn to_settings(&self) -> IntegrationResult<HostSettings> {
        Ok(HostSettings {
            user_language: self.user_language()?,
            config_name: self.config_name()?,
            crash_reporting_enabled: self.crash_reporting_enabled()?,
            offline_data_storage_enabled: self.offline_data_storage_enabled()?,
            is_offline_authenticated: self.is_offline_authenticated()?,
            authentication_status: self.authentication_status()?,
        })
    }
}

fn unexpected(value: SettingValue) -> IntegrationError {
    IntegrationError::internal(format!("Unexpected value for {}", value.key()))
}
