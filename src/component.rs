//! Lifecycle of one embeddable component instance.
//!
//! ```text
//! Uninitialized ──connect──▶ Idle ◀──settle── RefreshPending
//!       │                     │ └──request──────────▲
//!       └──missing attr──▶ Failed                    │
//!                             └──disconnect──▶ Disconnected
//! ```
//!
//! The controller mirrors the host settings as string attributes and answers
//! every refresh request it accepts with exactly one `success` or `fail`
//! event, whatever the outcome of the component's refresh operation.

use crate::attributes::Attributes;
use crate::channel::{ComponentEventBus, HostEventBus};
use crate::config::{ControllerConfig, RefreshOverlap};
use crate::errors::{InitError, IntegrationError, IntegrationResult};
use crate::events::{refresh_event, settings_change_event, ComponentEvent, RefreshStatus};
use crate::settings::{AuthenticationStatus, ConfigName, HostSettings, SettingValue, UserLanguage};
use crate::types::InstanceId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Component-specific data reload.
///
/// The default resolves immediately, so components without remote data
/// still answer refresh requests.
#[async_trait]
pub trait Refresh: Send + Sync {
    async fn refresh_data(&self) -> IntegrationResult<()> {
        Ok(())
    }
}

/// Component with nothing to reload.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRefresh;

impl Refresh for NoRefresh {}

struct RefreshFn<F>(F);

#[async_trait]
impl<F, Fut> Refresh for RefreshFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = IntegrationResult<()>> + Send + 'static,
{
    async fn refresh_data(&self) -> IntegrationResult<()> {
        (self.0)().await
    }
}

/// Wrap an async closure as a [`Refresh`] operation.
pub fn refresh_fn<F, Fut>(f: F) -> Arc<dyn Refresh>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = IntegrationResult<()>> + Send + 'static,
{
    Arc::new(RefreshFn(f))
}

/// Where a component instance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Created, not attached yet.
    Uninitialized,

    /// Connected and listening for refresh requests.
    Idle,

    /// A refresh operation is running.
    RefreshPending,

    /// Detached; refresh requests are ignored.
    Disconnected,

    /// Failed to initialise. Terminal.
    Failed,
}

impl LifecycleState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Idle | Self::RefreshPending)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Idle => write!(f, "idle"),
            Self::RefreshPending => write!(f, "refresh_pending"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of the last settled refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRecord {
    /// `success` or `fail`
    pub status: RefreshStatus,
    pub started_at: DateTime<Utc>,
    pub settled_at: DateTime<Utc>,

    /// Message of the refresh error, on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct ControllerState {
    lifecycle: LifecycleState,
    attributes: Attributes,
    refresh_queued: bool,

    // Bumped on every accepted request; only the matching run may settle.
    refresh_generation: u64,
    connected_at: Option<DateTime<Utc>>,
    last_refresh: Option<RefreshRecord>,
}

/// Settles a refresh whose future is dropped before it reports.
struct SettleGuard<'a> {
    controller: &'a ComponentController,
    generation: u64,
    started_at: DateTime<Utc>,
    armed: bool,
}

impl SettleGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let controller = self.controller;
        let _settling = controller.settle.try_lock();
        let record = RefreshRecord {
            status: RefreshStatus::Fail,
            started_at: self.started_at,
            settled_at: Utc::now(),
            error: Some("Refresh cancelled".to_string()),
        };
        controller.settle_refresh(self.generation, record, false);
        warn!(tag = %controller.tag, instance = %controller.id, "Refresh cancelled before it settled");
        controller.events.publish(refresh_event(RefreshStatus::Fail));
    }
}

/// Drives one component instance.
///
/// All methods take `&self`; share the controller behind an `Arc` to serve
/// concurrent refresh requests.
pub struct ComponentController {
    id: InstanceId,
    tag: String,
    config: ControllerConfig,
    refresh: Arc<dyn Refresh>,
    events: ComponentEventBus,
    host_events: Mutex<Option<HostEventBus>>,
    state: Mutex<ControllerState>,

    // Held from the settle transition until the outcome is published.
    settle: tokio::sync::Mutex<()>,
}

impl ComponentController {
    pub fn new(tag: impl Into<String>, refresh: Arc<dyn Refresh>, config: ControllerConfig) -> Self {
        let tag = tag.into().to_lowercase();
        let events = ComponentEventBus::new(config.event_capacity);
        let attributes = Attributes::new(config.boolean_parsing);
        Self {
            id: InstanceId::new(),
            tag,
            config,
            refresh,
            events,
            host_events: Mutex::new(None),
            state: Mutex::new(ControllerState {
                lifecycle: LifecycleState::Uninitialized,
                attributes,
                refresh_queued: false,
                refresh_generation: 0,
                connected_at: None,
                last_refresh: None,
            }),
            settle: tokio::sync::Mutex::new(()),
        }
    }

    /// Controller with the default configuration and no refresh work.
    pub fn without_refresh(tag: impl Into<String>) -> Self {
        Self::new(tag, Arc::new(NoRefresh), ControllerConfig::default())
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unusable(&self) -> InitError {
        InitError::unusable(&self.tag, "The instance must not be used after a failed initialisation")
    }

    fn ensure_usable(&self, state: &ControllerState) -> IntegrationResult<()> {
        if state.lifecycle == LifecycleState::Failed {
            return Err(self.unusable().into());
        }
        Ok(())
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// The instance's own event channel.
    pub fn events(&self) -> &ComponentEventBus {
        &self.events
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().lifecycle
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_refreshing(&self) -> bool {
        self.state() == LifecycleState::RefreshPending
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.lock().connected_at
    }

    pub fn last_refresh(&self) -> Option<RefreshRecord> {
        self.lock().last_refresh.clone()
    }

    /// Route [`Self::update`] notifications to a module channel.
    pub fn attach_host_events(&self, bus: HostEventBus) {
        *self.host_events.lock().unwrap_or_else(PoisonError::into_inner) = Some(bus);
    }

    // ═══════════════════════════════════════════════════════════
    // Attributes
    // ═══════════════════════════════════════════════════════════

    pub fn set_attribute(&self, name: &str, value: impl Into<String>) -> IntegrationResult<Option<String>> {
        let mut state = self.lock();
        self.ensure_usable(&state)?;
        state.attributes.set_attribute(name, value)
    }

    pub fn get_attribute(&self, name: &str) -> Option<String> {
        self.lock().attributes.get_attribute(name).map(str::to_string)
    }

    pub fn remove_attribute(&self, name: &str) -> IntegrationResult<Option<String>> {
        let mut state = self.lock();
        self.ensure_usable(&state)?;
        state.attributes.remove_attribute(name)
    }

    /// Set every attribute from a settings snapshot.
    pub fn apply_settings(&self, settings: &HostSettings) -> IntegrationResult<()> {
        let mut state = self.lock();
        self.ensure_usable(&state)?;
        for value in settings.values() {
            state.attributes.write(value);
        }
        Ok(())
    }

    /// Copy of the current attributes.
    pub fn attributes(&self) -> Attributes {
        self.lock().attributes.clone()
    }

    pub fn user_language(&self) -> IntegrationResult<UserLanguage> {
        self.lock().attributes.user_language()
    }

    pub fn config_name(&self) -> IntegrationResult<ConfigName> {
        self.lock().attributes.config_name()
    }

    pub fn crash_reporting_enabled(&self) -> IntegrationResult<bool> {
        self.lock().attributes.crash_reporting_enabled()
    }

    pub fn offline_data_storage_enabled(&self) -> IntegrationResult<bool> {
        self.lock().attributes.offline_data_storage_enabled()
    }

    /// Deprecated since 5.0.2, use [`Self::authentication_status`].
    pub fn is_offline_authenticated(&self) -> IntegrationResult<bool> {
        self.lock().attributes.is_offline_authenticated()
    }

    pub fn authentication_status(&self) -> IntegrationResult<AuthenticationStatus> {
        self.lock().attributes.authentication_status()
    }

    /// Store a new setting value and notify the module channel, if attached.
    ///
    /// Returns `false` when the attribute already held that value; no event
    /// is dispatched then.
    pub fn update(&self, value: SettingValue) -> IntegrationResult<bool> {
        let changed = {
            let mut state = self.lock();
            self.ensure_usable(&state)?;
            Self::write_setting(&mut state, value)
        };
        if !changed {
            return Ok(false);
        }

        debug!(tag = %self.tag, instance = %self.id, setting = %value.key(), "Setting updated");
        let bus = self
            .host_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(bus) = bus {
            bus.dispatch(settings_change_event(value));
        }
        Ok(true)
    }

    /// Store a host-driven setting value. The host notifies the module
    /// channel itself, so nothing is dispatched here.
    pub(crate) fn mirror(&self, value: SettingValue) -> bool {
        let mut state = self.lock();
        if state.lifecycle == LifecycleState::Failed {
            return false;
        }
        Self::write_setting(&mut state, value)
    }

    fn write_setting(state: &mut ControllerState, value: SettingValue) -> bool {
        let raw = value.to_attribute_value();
        state.attributes.write(value).as_deref() != Some(raw.as_str())
    }

    // ═══════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════

    /// Attach the instance. Fails when a required attribute has no value;
    /// the instance is then unusable.
    pub fn connect(&self) -> Result<(), InitError> {
        let mut state = self.lock();
        let lifecycle = state.lifecycle;
        match lifecycle {
            LifecycleState::Failed => return Err(self.unusable()),
            LifecycleState::Idle | LifecycleState::RefreshPending => {
                debug!(tag = %self.tag, instance = %self.id, "Already connected");
                return Ok(());
            }
            LifecycleState::Uninitialized | LifecycleState::Disconnected => {}
        }

        let required = self.config.required_attributes.keys();
        if let Some(missing) = state.attributes.first_missing(required) {
            state.lifecycle = LifecycleState::Failed;
            let err = InitError::missing_attribute(&self.tag, missing.attribute_name());
            warn!(tag = %self.tag, instance = %self.id, attribute = missing.attribute_name(), "{}", err);
            return Err(err);
        }

        state.lifecycle = LifecycleState::Idle;
        state.connected_at = Some(Utc::now());
        info!(tag = %self.tag, instance = %self.id, "Component connected");
        Ok(())
    }

    /// Detach the instance. Returns `false` if it was not connected.
    ///
    /// A refresh in flight is not cancelled and still reports its outcome,
    /// but no longer settles the lifecycle of a later connection.
    pub fn disconnect(&self) -> bool {
        let mut state = self.lock();
        if !state.lifecycle.is_connected() {
            return false;
        }
        if state.lifecycle == LifecycleState::RefreshPending {
            debug!(tag = %self.tag, instance = %self.id, "Disconnecting with a refresh in flight");
        }
        state.lifecycle = LifecycleState::Disconnected;
        state.refresh_queued = false;
        info!(tag = %self.tag, instance = %self.id, "Component disconnected");
        true
    }

    // ═══════════════════════════════════════════════════════════
    // Events
    // ═══════════════════════════════════════════════════════════

    /// Publish an event on the instance channel.
    ///
    /// A refresh request is handled before this returns: when accepted, the
    /// refresh operation runs and its outcome is published. Returns how many
    /// listeners received `event`.
    pub async fn dispatch(&self, event: ComponentEvent) -> usize {
        let is_request = event.is_refresh_request();
        let delivered = self.events.publish(event);
        if is_request {
            if let Some(generation) = self.begin_refresh() {
                self.run_refresh(generation).await;
            }
        }
        delivered
    }

    /// Ask the instance to reload its data.
    pub async fn request_refresh(&self) -> usize {
        self.dispatch(refresh_event(RefreshStatus::Request)).await
    }

    /// Send an output event to the host.
    ///
    /// Refresh outcomes are produced by the controller only.
    pub fn emit(&self, event: ComponentEvent) -> IntegrationResult<usize> {
        {
            let state = self.lock();
            self.ensure_usable(&state)?;
            if !state.lifecycle.is_connected() {
                return Err(IntegrationError::invalid_state(format!(
                    "<{}> cannot emit while {}",
                    self.tag, state.lifecycle
                )));
            }
        }
        match &event {
            ComponentEvent::Refresh(_) => {
                return Err(IntegrationError::invalid_input(
                    "Refresh events are emitted by the refresh protocol",
                ))
            }
            ComponentEvent::Open(open) => open.validate()?,
            ComponentEvent::Print(print) => print.validate()?,
            ComponentEvent::Select(_) | ComponentEvent::Custom(_) => {}
        }
        debug!(tag = %self.tag, instance = %self.id, event = %event.kind(), "Emitting event");
        Ok(self.events.publish(event))
    }

    /// Returns the generation the caller must run the refresh under.
    fn begin_refresh(&self) -> Option<u64> {
        let mut state = self.lock();
        let lifecycle = state.lifecycle;
        match lifecycle {
            LifecycleState::Idle => {
                state.lifecycle = LifecycleState::RefreshPending;
                state.refresh_generation += 1;
                Some(state.refresh_generation)
            }
            LifecycleState::RefreshPending => {
                match self.config.refresh_overlap {
                    RefreshOverlap::Ignore => {
                        debug!(tag = %self.tag, instance = %self.id, "Refresh already pending, request ignored");
                    }
                    RefreshOverlap::Coalesce => {
                        state.refresh_queued = true;
                        debug!(tag = %self.tag, instance = %self.id, "Refresh already pending, request coalesced");
                    }
                }
                None
            }
            other => {
                debug!(tag = %self.tag, instance = %self.id, state = %other, "Not listening, refresh request ignored");
                None
            }
        }
    }

    /// Record a settled refresh. Returns `true` when a coalesced request
    /// must run next.
    fn settle_refresh(&self, generation: u64, record: RefreshRecord, run_queued: bool) -> bool {
        let mut state = self.lock();
        state.last_refresh = Some(record);
        let current = state.refresh_generation == generation;
        let (lifecycle, queued) = (state.lifecycle, state.refresh_queued);
        match lifecycle {
            LifecycleState::RefreshPending if current && queued && run_queued => {
                state.refresh_queued = false;
                true
            }
            LifecycleState::RefreshPending if current => {
                state.lifecycle = LifecycleState::Idle;
                state.refresh_queued = false;
                false
            }
            _ => false,
        }
    }

    async fn run_refresh(&self, generation: u64) {
        let mut guard = SettleGuard {
            controller: self,
            generation,
            started_at: Utc::now(),
            armed: true,
        };
        loop {
            let started_at = Utc::now();
            guard.started_at = started_at;
            debug!(tag = %self.tag, instance = %self.id, generation, "Refresh started");
            let outcome = self.refresh.refresh_data().await;

            let (status, error) = match outcome {
                Ok(()) => (RefreshStatus::Success, None),
                Err(e) => {
                    warn!(tag = %self.tag, instance = %self.id, code = %e.code, "Refresh failed: {}", e.message);
                    (RefreshStatus::Fail, Some(e.message))
                }
            };

            let _settling = self.settle.lock().await;
            let record = RefreshRecord {
                status,
                started_at,
                settled_at: Utc::now(),
                error,
            };
            let again = self.settle_refresh(generation, record, true);

            info!(tag = %self.tag, instance = %self.id, status = %status, "Refresh settled");
            self.events.publish(refresh_event(status));
            if !again {
                break;
            }
        }
        guard.disarm();
    }
}

impl std::fmt::Debug for ComponentController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentController")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("state", &self.state())
            .field("events", &self.events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BooleanParsing, RequiredAttributes};
    use crate::errors::ErrorCode;
    use crate::events::{print_event, select_event, PrintEvent, PrintMimeType};
    use crate::settings::tests::sample_settings;
    use crate::settings::SettingKey;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn connected(refresh: Arc<dyn Refresh>, config: ControllerConfig) -> Arc<ComponentController> {
        let controller = ComponentController::new("my-widget", refresh, config);
        controller.apply_settings(&sample_settings()).unwrap();
        controller.connect().unwrap();
        Arc::new(controller)
    }

    fn outcomes(controller: &ComponentController) -> Arc<Mutex<Vec<RefreshStatus>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        controller.events().add_listener_for("refresh".into(), move |event| {
            if let Some(refresh) = event.as_refresh().filter(|r| r.is_outcome()) {
                sink.lock().unwrap().push(refresh.status);
            }
        });
        seen
    }

    /// Blocks each refresh until a permit is added.
    struct GatedRefresh {
        gate: Arc<Semaphore>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Refresh for GatedRefresh {
        async fn refresh_data(&self) -> IntegrationResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await.unwrap().forget();
            Ok(())
        }
    }

    async fn wait_for(controller: &ComponentController, wanted: LifecycleState) {
        while controller.state() != wanted {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_connect_requires_user_language() {
        let controller = ComponentController::without_refresh("My-Widget");
        let err = controller.connect().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to initialise web component <my-widget>. Missing attribute \"user-language\"."
        );
        assert_eq!(controller.state(), LifecycleState::Failed);

        // Terminal
        assert!(matches!(controller.connect(), Err(InitError::Unusable { .. })));
        let err = controller.set_attribute("user-language", "fr").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidState);
    }

    #[test]
    fn test_connect_with_required_attributes() {
        let controller = ComponentController::without_refresh("my-widget");
        for (name, value) in [
            ("user-language", "fr"),
            ("config-name", "prod"),
            ("crash-reporting-enabled", "false"),
            ("offline-data-storage-enabled", "true"),
            ("is-offline-authenticated", "false"),
        ] {
            controller.set_attribute(name, value).unwrap();
        }
        controller.connect().unwrap();
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert!(controller.connected_at().is_some());
        assert_eq!(controller.user_language().unwrap(), UserLanguage::Fr);
        assert!(!controller.crash_reporting_enabled().unwrap());
    }

    #[test]
    fn test_authentication_status_can_be_required() {
        let config = ControllerConfig::new().require_authentication_status(true);
        assert_eq!(config.required_attributes, RequiredAttributes::WithAuthenticationStatus);

        let controller = ComponentController::new("my-widget", Arc::new(NoRefresh), config);
        controller.apply_settings(&sample_settings()).unwrap();
        controller.remove_attribute("authentication-status").unwrap();

        match controller.connect().unwrap_err() {
            InitError::MissingAttribute { attribute, .. } => {
                assert_eq!(attribute, "authentication-status")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_default_refresh_succeeds_once() {
        let controller = connected(Arc::new(NoRefresh), ControllerConfig::default());
        let seen = outcomes(&controller);

        controller.request_refresh().await;
        assert_eq!(*seen.lock().unwrap(), vec![RefreshStatus::Success]);
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert_eq!(controller.last_refresh().unwrap().status, RefreshStatus::Success);
    }

    #[tokio::test]
    async fn test_failed_refresh_reports_fail() {
        let refresh = refresh_fn(|| async { Err(IntegrationError::refresh_failed("backend down")) });
        let controller = connected(refresh, ControllerConfig::default());
        let seen = outcomes(&controller);

        controller.request_refresh().await;
        assert_eq!(*seen.lock().unwrap(), vec![RefreshStatus::Fail]);
        assert_eq!(controller.state(), LifecycleState::Idle);

        let record = controller.last_refresh().unwrap();
        assert_eq!(record.error.as_deref(), Some("backend down"));
        assert!(record.settled_at >= record.started_at);
    }

    #[tokio::test]
    async fn test_disconnect_stops_refresh_handling() {
        let controller = connected(Arc::new(NoRefresh), ControllerConfig::default());
        let seen = outcomes(&controller);

        assert!(controller.disconnect());
        assert!(!controller.disconnect());
        assert_eq!(controller.state(), LifecycleState::Disconnected);

        controller.request_refresh().await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requests_before_connect_are_ignored() {
        let controller = ComponentController::without_refresh("my-widget");
        let seen = outcomes(&controller);
        let delivered = controller.request_refresh().await;
        assert_eq!(delivered, 1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_requests_ignored() {
        let gate = Arc::new(Semaphore::new(0));
        let refresh = Arc::new(GatedRefresh {
            gate: Arc::clone(&gate),
            calls: AtomicUsize::new(0),
        });
        let controller = connected(refresh.clone(), ControllerConfig::default());
        let seen = outcomes(&controller);

        let first = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.request_refresh().await })
        };
        wait_for(&controller, LifecycleState::RefreshPending).await;

        controller.request_refresh().await;
        gate.add_permits(1);
        first.await.unwrap();

        assert_eq!(refresh.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![RefreshStatus::Success]);
        assert_eq!(controller.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn test_overlapping_requests_coalesced() {
        let gate = Arc::new(Semaphore::new(0));
        let refresh = Arc::new(GatedRefresh {
            gate: Arc::clone(&gate),
            calls: AtomicUsize::new(0),
        });
        let config = ControllerConfig::new().refresh_overlap(RefreshOverlap::Coalesce);
        let controller = connected(refresh.clone(), config);
        let seen = outcomes(&controller);

        let first = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.request_refresh().await })
        };
        wait_for(&controller, LifecycleState::RefreshPending).await;

        controller.request_refresh().await;
        controller.request_refresh().await;
        gate.add_permits(2);
        first.await.unwrap();

        assert_eq!(refresh.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![RefreshStatus::Success, RefreshStatus::Success]
        );
        assert_eq!(controller.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn test_refresh_in_flight_at_disconnect_still_settles() {
        let gate = Arc::new(Semaphore::new(0));
        let refresh = Arc::new(GatedRefresh {
            gate: Arc::clone(&gate),
            calls: AtomicUsize::new(0),
        });
        let controller = connected(refresh, ControllerConfig::default());
        let seen = outcomes(&controller);

        let pending = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.request_refresh().await })
        };
        wait_for(&controller, LifecycleState::RefreshPending).await;

        assert!(controller.disconnect());
        gate.add_permits(1);
        pending.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![RefreshStatus::Success]);
        assert_eq!(controller.state(), LifecycleState::Disconnected);
    }

    #[tokio::test]
    async fn test_cancelled_refresh_still_settles() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let refresh = refresh_fn(move || {
            let slow = counter.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if slow {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                Ok(())
            }
        });
        let controller = connected(refresh, ControllerConfig::default());
        let seen = outcomes(&controller);

        let timed_out = tokio::time::timeout(Duration::from_millis(10), controller.request_refresh()).await;
        assert!(timed_out.is_err());
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert_eq!(*seen.lock().unwrap(), vec![RefreshStatus::Fail]);
        assert_eq!(
            controller.last_refresh().unwrap().error.as_deref(),
            Some("Refresh cancelled")
        );

        controller.request_refresh().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![RefreshStatus::Fail, RefreshStatus::Success]
        );
        assert_eq!(controller.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn test_stale_refresh_does_not_settle_reconnected_instance() {
        let gate = Arc::new(Semaphore::new(0));
        let refresh = Arc::new(GatedRefresh {
            gate: Arc::clone(&gate),
            calls: AtomicUsize::new(0),
        });
        let controller = connected(refresh.clone(), ControllerConfig::default());
        let seen = outcomes(&controller);

        let stale = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.request_refresh().await })
        };
        wait_for(&controller, LifecycleState::RefreshPending).await;
        assert!(controller.disconnect());
        controller.connect().unwrap();
        assert_eq!(controller.state(), LifecycleState::Idle);

        let current = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.request_refresh().await })
        };
        while refresh.calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }

        // The first waiter gets the permit
        gate.add_permits(1);
        stale.await.unwrap();
        assert_eq!(controller.state(), LifecycleState::RefreshPending);

        controller.request_refresh().await;
        assert_eq!(refresh.calls.load(Ordering::SeqCst), 2);

        gate.add_permits(1);
        current.await.unwrap();
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![RefreshStatus::Success, RefreshStatus::Success]
        );
    }

    #[tokio::test]
    async fn test_update_dispatches_settings_change() {
        let controller = connected(Arc::new(NoRefresh), ControllerConfig::default());
        let bus = HostEventBus::default();
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        bus.target().on_settings_change(move |e| sink.lock().unwrap().push(e.value()));
        controller.attach_host_events(bus);

        let value = SettingValue::UserLanguage(UserLanguage::De);
        assert!(controller.update(value).unwrap());
        assert!(!controller.update(value).unwrap());

        assert_eq!(*changes.lock().unwrap(), vec![value]);
        assert_eq!(controller.get_attribute("user-language").as_deref(), Some("de"));
    }

    #[test]
    fn test_strict_booleans_through_controller() {
        let config = ControllerConfig::new().boolean_parsing(BooleanParsing::Strict);
        let controller = ComponentController::new("my-widget", Arc::new(NoRefresh), config);
        controller.apply_settings(&sample_settings()).unwrap();
        controller
            .set_attribute(SettingKey::CrashReportingEnabled.attribute_name(), "yes")
            .unwrap();
        assert_eq!(
            controller.crash_reporting_enabled().unwrap_err().code,
            ErrorCode::InvalidAttributeValue
        );
    }

    #[test]
    fn test_emit_requires_connection_and_valid_payload() {
        let controller = ComponentController::without_refresh("my-widget");
        assert!(controller.emit(select_event("item", "1")).is_err());

        controller.apply_settings(&sample_settings()).unwrap();
        controller.connect().unwrap();
        assert_eq!(controller.emit(select_event("item", "1")).unwrap(), 0);

        let bad = PrintEvent::new("", "<p>x</p>", PrintMimeType::Html);
        assert!(controller.emit(print_event(bad)).is_err());
        assert!(controller.emit(refresh_event(RefreshStatus::Success)).is_err());
        assert_eq!(controller.events().recent(10).len(), 1);
    }
}
