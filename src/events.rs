//! Events crossing the boundary between host, module and component.
//!
//! Two channels carry them:
//!
//! - **component channel** ([`ComponentEvent`]): scoped to one instance.
//!   The host dispatches `refresh` requests on it; the component emits
//!   `refresh` outcomes plus `open`, `print`, `select` and custom events.
//! - **module channel** ([`HostEvent`]): host → module only, carrying
//!   `settings-change` and `version-mismatch`.
//!
//! On the wire an event is `{ "type": "<name>", "detail": { ... } }`.

use crate::errors::{IntegrationError, IntegrationResult};
use crate::settings::{SettingKey, SettingValue};
use crate::types::{Metadata, SpecVersion};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

pub const REFRESH_EVENT_TYPE: &str = "refresh";
pub const OPEN_EVENT_TYPE: &str = "open";
pub const PRINT_EVENT_TYPE: &str = "print";
pub const SELECT_EVENT_TYPE: &str = "select";
pub const SETTINGS_CHANGE_EVENT_TYPE: &str = "settings-change";
pub const VERSION_MISMATCH_EVENT_TYPE: &str = "version-mismatch";

// ═══════════════════════════════════════════════════════════════════
// REFRESH
// ═══════════════════════════════════════════════════════════════════

/// Status carried by a refresh event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStatus {
    /// Host asks the component to reload its data.
    Request,

    /// Component finished reloading.
    Success,

    /// Component tried and failed.
    Fail,
}

impl std::fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Success => write!(f, "success"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Request (host → component) or outcome (component → host) of a refresh.
///
/// A component must answer every request with exactly one `success` or
/// `fail`, even when it has nothing to reload; otherwise the host stays in
/// its refreshing state forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshEvent {
    pub status: RefreshStatus,
}

impl RefreshEvent {
    pub fn request() -> Self {
        Self {
            status: RefreshStatus::Request,
        }
    }

    pub fn success() -> Self {
        Self {
            status: RefreshStatus::Success,
        }
    }

    pub fn fail() -> Self {
        Self {
            status: RefreshStatus::Fail,
        }
    }

    pub fn is_request(&self) -> bool {
        self.status == RefreshStatus::Request
    }

    /// `success` or `fail`.
    pub fn is_outcome(&self) -> bool {
        !self.is_request()
    }
}

// ═══════════════════════════════════════════════════════════════════
// OUTPUT EVENTS
// ═══════════════════════════════════════════════════════════════════

/// Ask the host to display another component.
///
/// `props` are passed to the target's properties. Host settings must not
/// travel this way; they are the host's responsibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenEvent {
    pub component_tag: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Metadata>,
}

impl OpenEvent {
    pub fn new(component_tag: impl Into<String>) -> Self {
        Self {
            component_tag: component_tag.into(),
            props: None,
        }
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.props.get_or_insert_with(Metadata::new).insert(key.into(), v);
        }
        self
    }

    /// Reject props that shadow a host setting.
    pub fn validate(&self) -> IntegrationResult<()> {
        if self.component_tag.is_empty() {
            return Err(IntegrationError::invalid_input("Open event without componentTag"));
        }
        if let Some(props) = &self.props {
            if let Some(key) = props.keys().find(|k| SettingKey::from_property(k).is_some()) {
                return Err(IntegrationError::invalid_input(format!(
                    "Host setting '{}' cannot be passed as a prop",
                    key
                )));
            }
        }
        Ok(())
    }
}

/// Format of the content to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrintMimeType {
    #[serde(rename = "text/html")]
    Html,
    #[serde(rename = "text/plain")]
    Plain,
    #[serde(rename = "application/pdf")]
    Pdf,
    #[serde(rename = "application/base64")]
    Base64,
}

impl PrintMimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "text/html",
            Self::Plain => "text/plain",
            Self::Pdf => "application/pdf",
            Self::Base64 => "application/base64",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintOrientation {
    Landscape,
    Portrait,
}

/// Ask the host to print a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintEvent {
    /// Title of the print job (document name or page title).
    pub title: String,

    pub content: String,

    pub mime_type: PrintMimeType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<PrintOrientation>,
}

impl PrintEvent {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        mime_type: PrintMimeType,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            mime_type,
            orientation: None,
        }
    }

    pub fn with_orientation(mut self, orientation: PrintOrientation) -> Self {
        self.orientation = Some(orientation);
        self
    }

    pub fn validate(&self) -> IntegrationResult<()> {
        if self.title.trim().is_empty() {
            return Err(IntegrationError::invalid_input("Print event without title"));
        }
        if self.mime_type == PrintMimeType::Base64 {
            STANDARD.decode(self.content.as_bytes()).map_err(|e| {
                IntegrationError::invalid_input(format!("Print content is not base64: {}", e))
            })?;
        }
        Ok(())
    }
}

/// Something was selected; the host handles it in a documented way.
///
/// Prefer [`OpenEvent`] when the only goal is to show a component for the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectEvent {
    /// Discriminator for what is being selected.
    #[serde(rename = "type")]
    pub kind: String,

    pub id: String,
}

impl SelectEvent {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// Event outside the built-in set, declared in the component manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomEvent {
    pub name: String,

    #[serde(default)]
    pub detail: serde_json::Value,
}

// ═══════════════════════════════════════════════════════════════════
// MODULE-LEVEL EVENTS
// ═══════════════════════════════════════════════════════════════════

/// A host setting changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsChangeEvent(pub SettingValue);

impl SettingsChangeEvent {
    pub fn setting(&self) -> SettingKey {
        self.0.key()
    }

    pub fn value(&self) -> SettingValue {
        self.0
    }
}

/// Level of a non-fatal spec version mismatch.
///
/// There is no `major`: the host refuses to load the module instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchLevel {
    Minor,
    Patch,
}

impl std::fmt::Display for MismatchLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minor => write!(f, "minor"),
            Self::Patch => write!(f, "patch"),
        }
    }
}

/// Host and module implement different minor or patch spec versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMismatchEvent {
    pub level: MismatchLevel,
    pub host_version: SpecVersion,
    pub module_version: SpecVersion,
}

// ═══════════════════════════════════════════════════════════════════
// CHANNEL MESSAGES
// ═══════════════════════════════════════════════════════════════════

/// Kind of event a component may emit, as listed in its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComponentEventKind {
    Open,
    Print,
    Refresh,
    Select,
    Custom(String),
}

impl ComponentEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => OPEN_EVENT_TYPE,
            Self::Print => PRINT_EVENT_TYPE,
            Self::Refresh => REFRESH_EVENT_TYPE,
            Self::Select => SELECT_EVENT_TYPE,
            Self::Custom(name) => name,
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl From<String> for ComponentEventKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            OPEN_EVENT_TYPE => Self::Open,
            PRINT_EVENT_TYPE => Self::Print,
            REFRESH_EVENT_TYPE => Self::Refresh,
            SELECT_EVENT_TYPE => Self::Select,
            _ => Self::Custom(s),
        }
    }
}

impl From<&str> for ComponentEventKind {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ComponentEventKind> for String {
    fn from(kind: ComponentEventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for ComponentEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message on a component's own channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "kebab-case")]
pub enum ComponentEvent {
    Refresh(RefreshEvent),
    Open(OpenEvent),
    Print(PrintEvent),
    Select(SelectEvent),
    Custom(CustomEvent),
}

impl ComponentEvent {
    pub fn kind(&self) -> ComponentEventKind {
        match self {
            Self::Refresh(_) => ComponentEventKind::Refresh,
            Self::Open(_) => ComponentEventKind::Open,
            Self::Print(_) => ComponentEventKind::Print,
            Self::Select(_) => ComponentEventKind::Select,
            Self::Custom(e) => ComponentEventKind::Custom(e.name.clone()),
        }
    }

    pub fn as_refresh(&self) -> Option<&RefreshEvent> {
        match self {
            Self::Refresh(e) => Some(e),
            _ => None,
        }
    }

    /// Refresh request dispatched by the host.
    pub fn is_refresh_request(&self) -> bool {
        self.as_refresh().is_some_and(|e| e.is_request())
    }
}

/// Kind of event on the module channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostEventKind {
    SettingsChange,
    VersionMismatch,
}

impl HostEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SettingsChange => SETTINGS_CHANGE_EVENT_TYPE,
            Self::VersionMismatch => VERSION_MISMATCH_EVENT_TYPE,
        }
    }
}

impl std::fmt::Display for HostEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message on the module channel (host → module).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "kebab-case")]
pub enum HostEvent {
    SettingsChange(SettingsChangeEvent),
    VersionMismatch(VersionMismatchEvent),
}

impl HostEvent {
    pub fn kind(&self) -> HostEventKind {
        match self {
            Self::SettingsChange(_) => HostEventKind::SettingsChange,
            Self::VersionMismatch(_) => HostEventKind::VersionMismatch,
        }
    }
}

// Event constructors

pub fn refresh_event(status: RefreshStatus) -> ComponentEvent {
    ComponentEvent::Refresh(RefreshEvent { status })
}

pub fn open_event(detail: OpenEvent) -> ComponentEvent {
    ComponentEvent::Open(detail)
}

pub fn print_event(detail: PrintEvent) -> ComponentEvent {
    ComponentEvent::Print(detail)
}

pub fn select_event(kind: impl Into<String>, id: impl Into<String>) -> ComponentEvent {
    ComponentEvent::Select(SelectEvent::new(kind, id))
}

pub fn custom_event(name: impl Into<String>, detail: serde_json::Value) -> ComponentEvent {
    ComponentEvent::Custom(CustomEvent {
        name: name.into(),
        detail,
    })
}

pub fn settings_change_event(value: SettingValue) -> HostEvent {
    HostEvent::SettingsChange(SettingsChangeEvent(value))
}

pub fn version_mismatch_event(
    level: MismatchLevel,
    host_version: SpecVersion,
    module_version: SpecVersion,
) -> HostEvent {
    HostEvent::VersionMismatch(VersionMismatchEvent {
        level,
        host_version,
        module_version,
    })
}
