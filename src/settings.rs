//! Settings the host provides to every component instance.
//!
//! All values are always present once a component is connected and may
//! change at runtime. Modules observe changes either through
//! `settings-change` events on their event channel or through a
//! [`SettingsSignal`].

use crate::errors::{IntegrationError, IntegrationResult};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Language used to display translated content (ISO-2 codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserLanguage {
    En,
    Fr,
    Nl,
    De,
}

impl UserLanguage {
    pub const ALL: [UserLanguage; 4] = [Self::En, Self::Fr, Self::Nl, Self::De];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Fr => "fr",
            Self::Nl => "nl",
            Self::De => "de",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == s)
    }
}

impl std::fmt::Display for UserLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environment the application and its components are deployed to.
///
/// Applications start in one of `dev`, `int`, `acc` or `prod`; at runtime the
/// value can only change to `demo`, in which case components render static
/// or mock data only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigName {
    Dev,
    Int,
    Acc,
    Prod,
    Demo,
}

impl ConfigName {
    pub const ALL: [ConfigName; 5] = [Self::Dev, Self::Int, Self::Acc, Self::Prod, Self::Demo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Int => "int",
            Self::Acc => "acc",
            Self::Prod => "prod",
            Self::Demo => "demo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    /// No authentication or backend in demo mode.
    pub fn is_demo(&self) -> bool {
        matches!(self, Self::Demo)
    }
}

impl std::fmt::Display for ConfigName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication state of the current user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticationStatus {
    /// Not logged in
    Unauthenticated,

    /// Authenticated and online; backend services available
    OnlineAuthenticated,

    /// Authenticated with a light method while offline; use stored data
    OfflineAuthenticated,
}

impl AuthenticationStatus {
    pub const ALL: [AuthenticationStatus; 3] = [
        Self::Unauthenticated,
        Self::OnlineAuthenticated,
        Self::OfflineAuthenticated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::OnlineAuthenticated => "online-authenticated",
            Self::OfflineAuthenticated => "offline-authenticated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }

    /// Components only ask the host for an access token when online.
    pub fn may_request_token(&self) -> bool {
        matches!(self, Self::OnlineAuthenticated)
    }
}

impl std::fmt::Display for AuthenticationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values every component receives from its host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSettings {
    pub user_language: UserLanguage,

    pub config_name: ConfigName,

    /// User allowed crash reports to be sent.
    pub crash_reporting_enabled: bool,

    /// User enabled offline data storage.
    pub offline_data_storage_enabled: bool,

    /// Deprecated since 5.0.2, use `authentication_status`.
    pub is_offline_authenticated: bool,

    pub authentication_status: AuthenticationStatus,
}

impl HostSettings {
    /// Read one setting as a typed value.
    pub fn get(&self, key: SettingKey) -> SettingValue {
        match key {
            SettingKey::UserLanguage => SettingValue::UserLanguage(self.user_language),
            SettingKey::ConfigName => SettingValue::ConfigName(self.config_name),
            SettingKey::CrashReportingEnabled => {
                SettingValue::CrashReportingEnabled(self.crash_reporting_enabled)
            }
            SettingKey::OfflineDataStorageEnabled => {
                SettingValue::OfflineDataStorageEnabled(self.offline_data_storage_enabled)
            }
            SettingKey::IsOfflineAuthenticated => {
                SettingValue::IsOfflineAuthenticated(self.is_offline_authenticated)
            }
            SettingKey::AuthenticationStatus => {
                SettingValue::AuthenticationStatus(self.authentication_status)
            }
        }
    }

    /// Apply one typed value. Returns `true` if the stored value changed.
    pub fn apply(&mut self, value: SettingValue) -> bool {
        let before = self.get(value.key());
        match value {
            SettingValue::UserLanguage(v) => self.user_language = v,
            SettingValue::ConfigName(v) => self.config_name = v,
            SettingValue::CrashReportingEnabled(v) => self.crash_reporting_enabled = v,
            SettingValue::OfflineDataStorageEnabled(v) => self.offline_data_storage_enabled = v,
            SettingValue::IsOfflineAuthenticated(v) => self.is_offline_authenticated = v,
            SettingValue::AuthenticationStatus(v) => self.authentication_status = v,
        }
        before != value
    }

    /// Every setting as a typed value, in [`SettingKey::ALL`] order.
    pub fn values(&self) -> Vec<SettingValue> {
        SettingKey::ALL.iter().map(|k| self.get(*k)).collect()
    }
}

/// Name of one host setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingKey {
    UserLanguage,
    ConfigName,
    CrashReportingEnabled,
    OfflineDataStorageEnabled,
    IsOfflineAuthenticated,
    AuthenticationStatus,
}

impl SettingKey {
    pub const ALL: [SettingKey; 6] = [
        Self::UserLanguage,
        Self::ConfigName,
        Self::CrashReportingEnabled,
        Self::OfflineDataStorageEnabled,
        Self::IsOfflineAuthenticated,
        Self::AuthenticationStatus,
    ];

    /// Property name (camelCase).
    pub fn property_name(&self) -> &'static str {
        match self {
            Self::UserLanguage => "userLanguage",
            Self::ConfigName => "configName",
            Self::CrashReportingEnabled => "crashReportingEnabled",
            Self::OfflineDataStorageEnabled => "offlineDataStorageEnabled",
            Self::IsOfflineAuthenticated => "isOfflineAuthenticated",
            Self::AuthenticationStatus => "authenticationStatus",
        }
    }

    /// Attribute name (kebab-case).
    pub fn attribute_name(&self) -> &'static str {
        match self {
            Self::UserLanguage => "user-language",
            Self::ConfigName => "config-name",
            Self::CrashReportingEnabled => "crash-reporting-enabled",
            Self::OfflineDataStorageEnabled => "offline-data-storage-enabled",
            Self::IsOfflineAuthenticated => "is-offline-authenticated",
            Self::AuthenticationStatus => "authentication-status",
        }
    }

    pub fn from_attribute(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.attribute_name() == name)
    }

    pub fn from_property(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.property_name() == name)
    }

    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            Self::CrashReportingEnabled
                | Self::OfflineDataStorageEnabled
                | Self::IsOfflineAuthenticated
        )
    }

    pub fn is_deprecated(&self) -> bool {
        matches!(self, Self::IsOfflineAuthenticated)
    }
}

impl std::fmt::Display for SettingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.property_name())
    }
}

/// One setting with its typed value.
///
/// On the wire this is the `settings-change` payload:
/// `{ "setting": "userLanguage", "value": "nl" }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "setting", content = "value", rename_all = "camelCase")]
pub enum SettingValue {
    UserLanguage(UserLanguage),
    ConfigName(ConfigName),
    CrashReportingEnabled(bool),
    OfflineDataStorageEnabled(bool),
    IsOfflineAuthenticated(bool),
    AuthenticationStatus(AuthenticationStatus),
}

impl SettingValue {
    pub fn key(&self) -> SettingKey {
        match self {
            Self::UserLanguage(_) => SettingKey::UserLanguage,
            Self::ConfigName(_) => SettingKey::ConfigName,
            Self::CrashReportingEnabled(_) => SettingKey::CrashReportingEnabled,
            Self::OfflineDataStorageEnabled(_) => SettingKey::OfflineDataStorageEnabled,
            Self::IsOfflineAuthenticated(_) => SettingKey::IsOfflineAuthenticated,
            Self::AuthenticationStatus(_) => SettingKey::AuthenticationStatus,
        }
    }

    /// Attribute form of the value.
    pub fn to_attribute_value(&self) -> String {
        match self {
            Self::UserLanguage(v) => v.as_str().to_string(),
            Self::ConfigName(v) => v.as_str().to_string(),
            Self::CrashReportingEnabled(b)
            | Self::OfflineDataStorageEnabled(b)
            | Self::IsOfflineAuthenticated(b) => b.to_string(),
            Self::AuthenticationStatus(v) => v.as_str().to_string(),
        }
    }

    /// Parse a non-boolean setting from its attribute form.
    ///
    /// Booleans go through [`BooleanParsing`](crate::config::BooleanParsing)
    /// instead, see [`Attributes`](crate::attributes::Attributes).
    pub fn parse_enum(key: SettingKey, raw: &str) -> IntegrationResult<Self> {
        let invalid = || IntegrationError::invalid_attribute(key.attribute_name(), raw);
        match key {
            SettingKey::UserLanguage => UserLanguage::parse(raw)
                .map(Self::UserLanguage)
                .ok_or_else(invalid),
            SettingKey::ConfigName => ConfigName::parse(raw)
                .map(Self::ConfigName)
                .ok_or_else(invalid),
            SettingKey::AuthenticationStatus => AuthenticationStatus::parse(raw)
                .map(Self::AuthenticationStatus)
                .ok_or_else(invalid),
            _ => Err(IntegrationError::invalid_input(format!(
                "{} is a boolean setting",
                key
            ))),
        }
    }

    pub(crate) fn boolean(key: SettingKey, value: bool) -> Option<Self> {
        match key {
            SettingKey::CrashReportingEnabled => Some(Self::CrashReportingEnabled(value)),
            SettingKey::OfflineDataStorageEnabled => Some(Self::OfflineDataStorageEnabled(value)),
            SettingKey::IsOfflineAuthenticated => Some(Self::IsOfflineAuthenticated(value)),
            _ => None,
        }
    }
}

/// Signal-style view of the host settings.
///
/// Each accessor reads the latest value; `changed` waits for the next update.
#[derive(Debug, Clone)]
pub struct SettingsSignal {
    receiver: watch::Receiver<HostSettings>,
}

impl SettingsSignal {
    pub(crate) fn new(receiver: watch::Receiver<HostSettings>) -> Self {
        Self { receiver }
    }

    pub fn snapshot(&self) -> HostSettings {
        self.receiver.borrow().clone()
    }

    pub fn get(&self, key: SettingKey) -> SettingValue {
        self.receiver.borrow().get(key)
    }

    pub fn user_language(&self) -> UserLanguage {
        self.receiver.borrow().user_language
    }

    pub fn config_name(&self) -> ConfigName {
        self.receiver.borrow().config_name
    }

    pub fn crash_reporting_enabled(&self) -> bool {
        self.receiver.borrow().crash_reporting_enabled
    }

    pub fn offline_data_storage_enabled(&self) -> bool {
        self.receiver.borrow().offline_data_storage_enabled
    }

    pub fn is_offline_authenticated(&self) -> bool {
        self.receiver.borrow().is_offline_authenticated
    }

    pub fn authentication_status(&self) -> AuthenticationStatus {
        self.receiver.borrow().authentication_status
    }

    /// Wait until the host publishes new settings.
    pub async fn changed(&mut self) -> IntegrationResult<HostSettings> {
        self.receiver
            .changed()
            .await
            .map_err(|_| IntegrationError::invalid_state("Host dropped the settings signal"))?;
        Ok(self.receiver.borrow_and_update().clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_settings() -> HostSettings {
        HostSettings {
            user_language: UserLanguage::Nl,
            config_name: ConfigName::Acc,
            crash_reporting_enabled: true,
            offline_data_storage_enabled: false,
            is_offline_authenticated: false,
            authentication_status: AuthenticationStatus::OnlineAuthenticated,
        }
    }

    #[test]
    fn test_attribute_names_are_kebab_case_of_properties() {
        for key in SettingKey::ALL {
            let mut kebab = String::new();
            for c in key.property_name().chars() {
                if c.is_ascii_uppercase() {
                    kebab.push('-');
                }
                kebab.push(c.to_ascii_lowercase());
            }
            assert_eq!(key.attribute_name(), kebab);
            assert_eq!(SettingKey::from_attribute(key.attribute_name()), Some(key));
            assert_eq!(SettingKey::from_property(key.property_name()), Some(key));
        }
        assert_eq!(SettingKey::from_attribute("userLanguage"), None);
    }

    #[test]
    fn test_settings_serialize_camel_case() {
        let json = serde_json::to_value(sample_settings()).unwrap();
        assert_eq!(json["userLanguage"], "nl");
        assert_eq!(json["configName"], "acc");
        assert_eq!(json["authenticationStatus"], "online-authenticated");
        assert_eq!(json["isOfflineAuthenticated"], false);
    }

    #[test]
    fn test_setting_value_wire_shape() {
        let value = SettingValue::UserLanguage(UserLanguage::Fr);
        let json = serde_json::to_value(value).unwrap();
        assert_eq!(json, serde_json::json!({"setting": "userLanguage", "value": "fr"}));

        let back: SettingValue =
            serde_json::from_str(r#"{"setting":"crashReportingEnabled","value":false}"#).unwrap();
        assert_eq!(back, SettingValue::CrashReportingEnabled(false));
    }

    #[test]
    fn test_apply_reports_change() {
        let mut settings = sample_settings();
        assert!(settings.apply(SettingValue::ConfigName(ConfigName::Demo)));
        assert!(settings.config_name.is_demo());
        assert!(!settings.apply(SettingValue::ConfigName(ConfigName::Demo)));
        assert_eq!(settings.values().len(), SettingKey::ALL.len());
    }

    #[test]
    fn test_parse_enum_rejects_unknown() {
        assert_eq!(
            SettingValue::parse_enum(SettingKey::UserLanguage, "de").unwrap(),
            SettingValue::UserLanguage(UserLanguage::De)
        );
        assert!(SettingValue::parse_enum(SettingKey::UserLanguage, "es").is_err());
        assert!(SettingValue::parse_enum(SettingKey::CrashReportingEnabled, "true").is_err());
    }

    #[test]
    fn test_token_only_when_online() {
        assert!(AuthenticationStatus::OnlineAuthenticated.may_request_token());
        assert!(!AuthenticationStatus::OfflineAuthenticated.may_request_token());
        assert!(!AuthenticationStatus::Unauthenticated.may_request_token());
    }

    #[tokio::test]
    async fn test_settings_signal_follows_updates() {
        let (tx, rx) = watch::channel(sample_settings());
        let mut signal = SettingsSignal::new(rx);
        assert_eq!(signal.user_language(), UserLanguage::Nl);

        let mut next = sample_settings();
        next.user_language = UserLanguage::En;
        tx.send(next).unwrap();

        let seen = signal.changed().await.unwrap();
        assert_eq!(seen.user_language, UserLanguage::En);
        assert_eq!(signal.user_language(), UserLanguage::En);
    }
}
