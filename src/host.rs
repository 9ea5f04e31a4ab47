//! Host side: loading modules and feeding them settings and services.
//!
//! A [`Host`] checks each module's spec version before anything else, then
//! wires the module to its family's storage and to its own event channel.

use crate::channel::HostEventBus;
use crate::compat::VersionCheck;
use crate::component::{ComponentController, Refresh};
use crate::config::{ControllerConfig, HostConfig};
use crate::errors::{ErrorCode, IntegrationError, IntegrationResult};
use crate::events::{settings_change_event, HostEvent};
use crate::manifest::ModuleManifest;
use crate::module::{Module, ModuleConfig, PreFetch};
use crate::services::{
    AccessTokenProvider, CacheDataStorage, HostServices, MemoryOfflineStorage, OfflineDataStorage,
};
use crate::settings::{HostSettings, SettingValue, SettingsSignal};
use crate::types::{AccessToken, Family};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ═══════════════════════════════════════════════════════════════════
// ACCESS TOKENS
// ═══════════════════════════════════════════════════════════════════

/// Hands out tokens only while the user is online-authenticated.
///
/// Issuing itself is delegated to the provider installed with
/// [`Host::with_token_issuer`].
pub struct SessionTokenProvider {
    settings: SettingsSignal,
    issuer: Option<Arc<dyn AccessTokenProvider>>,
}

impl SessionTokenProvider {
    pub fn new(settings: SettingsSignal, issuer: Option<Arc<dyn AccessTokenProvider>>) -> Self {
        Self { settings, issuer }
    }
}

#[async_trait]
impl AccessTokenProvider for SessionTokenProvider {
    async fn access_token(&self) -> IntegrationResult<AccessToken> {
        let status = self.settings.authentication_status();
        if !status.may_request_token() {
            return Err(IntegrationError::access_token_unavailable(format!(
                "User is {}",
                status
            )));
        }
        match &self.issuer {
            Some(issuer) => issuer.access_token().await,
            None => Err(IntegrationError::access_token_unavailable(
                "No token issuer configured",
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// LOADED MODULES
// ═══════════════════════════════════════════════════════════════════

/// A module accepted by the host.
#[derive(Clone)]
pub struct LoadedModule {
    manifest: ModuleManifest,
    check: VersionCheck,
    pre_fetch: Option<PreFetch>,
    events: HostEventBus,
    services: HostServices,
    loaded_at: DateTime<Utc>,
    instances: Arc<Mutex<Vec<Weak<ComponentController>>>>,
}

impl LoadedModule {
    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    pub fn family(&self) -> &Family {
        self.manifest.family()
    }

    pub fn entry_tag(&self) -> &str {
        &self.manifest.entry_component().tag_name
    }

    pub fn version_check(&self) -> VersionCheck {
        self.check
    }

    pub fn has_pre_fetch(&self) -> bool {
        self.pre_fetch.is_some()
    }

    /// Host side of the module's event channel.
    pub fn events(&self) -> &HostEventBus {
        &self.events
    }

    pub fn services(&self) -> &HostServices {
        &self.services
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Create a controller for one of the module's components, with the
    /// current settings applied as attributes.
    ///
    /// The module keeps a weak handle, so later host settings reach the
    /// controller for as long as the caller holds it.
    pub fn instantiate(
        &self,
        tag_name: &str,
        settings: &HostSettings,
        refresh: Arc<dyn Refresh>,
        config: ControllerConfig,
    ) -> IntegrationResult<Arc<ComponentController>> {
        if self.manifest.component(tag_name).is_none() {
            return Err(IntegrationError::new(
                ErrorCode::NotFound,
                format!("Module '{}' has no component <{}>", self.family(), tag_name),
            )
            .with_context("tag_name", tag_name));
        }
        let controller = ComponentController::new(tag_name, refresh, config);
        controller.apply_settings(settings)?;
        controller.attach_host_events(self.events.clone());

        let controller = Arc::new(controller);
        lock(&self.instances).push(Arc::downgrade(&controller));
        Ok(controller)
    }

    /// Number of component instances still alive.
    pub fn live_instances(&self) -> usize {
        let mut instances = lock(&self.instances);
        instances.retain(|weak| weak.strong_count() > 0);
        instances.len()
    }

    /// Write `value` into every live instance's attributes. Returns how many
    /// instances changed.
    fn mirror(&self, value: SettingValue) -> usize {
        let live: Vec<Arc<ComponentController>> = {
            let mut instances = lock(&self.instances);
            instances.retain(|weak| weak.strong_count() > 0);
            instances.iter().filter_map(Weak::upgrade).collect()
        };
        live.iter().filter(|controller| controller.mirror(value)).count()
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("family", self.family())
            .field("entry", &self.entry_tag())
            .field("check", &self.check)
            .field("pre_fetch", &self.pre_fetch.is_some())
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

/// Result of running one module's pre-fetch.
#[derive(Debug, Clone)]
pub struct PrefetchOutcome {
    pub family: Family,
    pub entry_tag: String,
    pub result: IntegrationResult<()>,
}

impl PrefetchOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

// ═══════════════════════════════════════════════════════════════════
// HOST
// ═══════════════════════════════════════════════════════════════════

#[derive(Clone)]
struct FamilyStorage {
    cache: CacheDataStorage,
    offline: Arc<dyn OfflineDataStorage>,
}

/// Loads modules and owns everything they share.
pub struct Host {
    config: HostConfig,
    settings: watch::Sender<HostSettings>,
    families: Mutex<HashMap<Family, FamilyStorage>>,
    modules: Mutex<Vec<LoadedModule>>,

    // (family, entry tag) of every module loaded or being loaded.
    slots: Mutex<HashSet<(Family, String)>>,
    token_provider: Arc<dyn AccessTokenProvider>,
}

impl Host {
    pub fn new(config: HostConfig) -> Self {
        let (settings, receiver) = watch::channel(config.settings.clone());
        let token_provider = Arc::new(SessionTokenProvider::new(SettingsSignal::new(receiver), None));
        Self {
            config,
            settings,
            families: Mutex::new(HashMap::new()),
            modules: Mutex::new(Vec::new()),
            slots: Mutex::new(HashSet::new()),
            token_provider,
        }
    }

    /// Issue tokens through `issuer` while the user is online-authenticated.
    pub fn with_token_issuer(mut self, issuer: Arc<dyn AccessTokenProvider>) -> Self {
        self.token_provider = Arc::new(SessionTokenProvider::new(
            self.settings_signal(),
            Some(issuer),
        ));
        self
    }

    /// Replace the token provider altogether.
    pub fn with_token_provider(mut self, provider: Arc<dyn AccessTokenProvider>) -> Self {
        self.token_provider = provider;
        self
    }

    /// Use `storage` as the offline storage of `family` instead of memory.
    ///
    /// Modules of that family loaded earlier keep the storage they were
    /// given. The family cache is kept either way.
    pub fn with_offline_storage(self, family: Family, storage: Arc<dyn OfflineDataStorage>) -> Self {
        match lock(&self.families).entry(family) {
            Entry::Occupied(mut entry) => {
                debug!(family = %entry.key(), "Replacing offline storage");
                entry.get_mut().offline = storage;
            }
            Entry::Vacant(entry) => {
                entry.insert(FamilyStorage {
                    cache: CacheDataStorage::new(),
                    offline: storage,
                });
            }
        }
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    fn family_storage(&self, family: &Family) -> FamilyStorage {
        lock(&self.families)
            .entry(family.clone())
            .or_insert_with(|| {
                debug!(family = %family, "Creating family storage");
                FamilyStorage {
                    cache: CacheDataStorage::new(),
                    offline: Arc::new(MemoryOfflineStorage::new()),
                }
            })
            .clone()
    }

    /// Load a module.
    ///
    /// Refused with `IncompatibleVersion` when the major spec versions
    /// differ; the module is not bootstrapped then. A minor or patch
    /// mismatch is delivered on the module's channel after bootstrap, so
    /// listeners registered there receive it.
    pub fn load(&self, module: &dyn Module) -> IntegrationResult<LoadedModule> {
        let manifest = module.manifest();
        let check = VersionCheck::new(self.config.spec_version, manifest.spec_version())
            .into_result()
            .map_err(|e| {
                warn!(
                    family = %manifest.family(),
                    host_version = %self.config.spec_version,
                    module_version = %manifest.spec_version(),
                    "Module refused: {}", e.message
                );
                e
            })?;
        manifest.validate()?;

        let family = manifest.family().clone();
        let entry = manifest.entry_component().tag_name.clone();
        let slot = SlotReservation::claim(self, (family.clone(), entry.clone())).ok_or_else(|| {
            IntegrationError::new(
                ErrorCode::AlreadyExists,
                format!("Module <{}> of family '{}' is already loaded", entry, family),
            )
        })?;

        let storage = self.family_storage(&family);
        let events = HostEventBus::new(self.config.event_capacity);
        let services = HostServices::new(
            family.clone(),
            storage.cache,
            storage.offline,
            events.target(),
            Arc::clone(&self.token_provider),
        );

        let pre_fetch = module.bootstrap(ModuleConfig {
            settings: self.settings(),
            services: services.clone(),
        });

        if let Some(mismatch) = check.mismatch_event() {
            info!(
                family = %family,
                level = %mismatch.level,
                host_version = %mismatch.host_version,
                module_version = %mismatch.module_version,
                "Spec version mismatch"
            );
            events.dispatch(HostEvent::VersionMismatch(mismatch));
        }

        let loaded = LoadedModule {
            manifest: manifest.clone(),
            check,
            pre_fetch,
            events,
            services,
            loaded_at: Utc::now(),
            instances: Arc::new(Mutex::new(Vec::new())),
        };
        lock(&self.modules).push(loaded.clone());
        slot.keep();
        info!(family = %family, entry = %entry, "Module loaded");
        Ok(loaded)
    }

    pub fn loaded_modules(&self) -> Vec<LoadedModule> {
        lock(&self.modules).clone()
    }

    /// Loaded module whose manifest declares `tag_name`.
    pub fn module_for(&self, tag_name: &str) -> Option<LoadedModule> {
        lock(&self.modules)
            .iter()
            .find(|m| m.manifest.component(tag_name).is_some())
            .cloned()
    }

    /// Instantiate a component of any loaded module.
    pub fn create_component(
        &self,
        tag_name: &str,
        refresh: Arc<dyn Refresh>,
        config: ControllerConfig,
    ) -> IntegrationResult<Arc<ComponentController>> {
        let module = self.module_for(tag_name).ok_or_else(|| {
            IntegrationError::new(
                ErrorCode::NotFound,
                format!("No loaded module declares <{}>", tag_name),
            )
        })?;
        module.instantiate(tag_name, &self.settings(), refresh, config)
    }

    /// Run pre-fetch functions, for one family or for all. Modules without
    /// pre-fetch are skipped. Failures are reported, not propagated.
    pub async fn prefetch(&self, family: Option<&Family>) -> Vec<PrefetchOutcome> {
        let pending: Vec<(Family, String, PreFetch)> = lock(&self.modules)
            .iter()
            .filter(|m| family.map_or(true, |f| m.family() == f))
            .filter_map(|m| {
                m.pre_fetch
                    .as_ref()
                    .map(|p| (m.family().clone(), m.entry_tag().to_string(), Arc::clone(p)))
            })
            .collect();

        let mut outcomes = Vec::with_capacity(pending.len());
        for (family, entry_tag, pre_fetch) in pending {
            let result = match pre_fetch().await {
                Ok(_) => {
                    debug!(family = %family, entry = %entry_tag, "Pre-fetch done");
                    Ok(())
                }
                Err(e) => {
                    warn!(family = %family, entry = %entry_tag, "Pre-fetch failed: {}", e.message);
                    Err(IntegrationError::prefetch_failed(e.message.clone())
                        .with_context("family", family.as_str())
                        .with_context("cause", e.code))
                }
            };
            outcomes.push(PrefetchOutcome {
                family,
                entry_tag,
                result,
            });
        }
        outcomes
    }

    // ═══════════════════════════════════════════════════════════
    // Settings
    // ═══════════════════════════════════════════════════════════

    pub fn settings(&self) -> HostSettings {
        self.settings.borrow().clone()
    }

    pub fn settings_signal(&self) -> SettingsSignal {
        SettingsSignal::new(self.settings.subscribe())
    }

    /// Change one setting. The value is mirrored into the attributes of
    /// every live component instance, then each loaded module is notified
    /// once through a `settings-change` event. Returns `false` if the value
    /// was unchanged.
    pub fn update_setting(&self, value: SettingValue) -> bool {
        let changed = self.settings.send_if_modified(|settings| settings.apply(value));
        if !changed {
            debug!(setting = %value.key(), "Setting unchanged");
            return false;
        }

        let modules = self.loaded_modules();
        info!(setting = %value.key(), modules = modules.len(), "Setting updated");
        for module in &modules {
            let mirrored = module.mirror(value);
            debug!(family = %module.family(), entry = %module.entry_tag(), instances = mirrored, "Attributes mirrored");
            module.events.dispatch(settings_change_event(value));
        }
        true
    }
}

/// Holds a (family, entry) slot while a module loads. Released on drop
/// unless kept.
struct SlotReservation<'a> {
    slots: &'a Mutex<HashSet<(Family, String)>>,
    key: Option<(Family, String)>,
}

impl<'a> SlotReservation<'a> {
    fn claim(host: &'a Host, key: (Family, String)) -> Option<Self> {
        if !lock(&host.slots).insert(key.clone()) {
            return None;
        }
        Some(Self {
            slots: &host.slots,
            key: Some(key),
        })
    }

    fn keep(mut self) {
        self.key = None;
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            lock(self.slots).remove(&key);
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("spec_version", &self.config.spec_version)
            .field("modules", &lock(&self.modules).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ComponentManifest;
    use crate::settings::tests::sample_settings;
    use crate::settings::AuthenticationStatus;
    use crate::types::{family, SpecVersion};
    use serde_json::json;

    struct StaticIssuer;

    #[async_trait]
    impl AccessTokenProvider for StaticIssuer {
        async fn access_token(&self) -> IntegrationResult<AccessToken> {
            Ok(AccessToken::new("token-123"))
        }
    }

    struct Plain {
        manifest: ModuleManifest,
        pre_fetch: Option<PreFetch>,
    }

    impl Module for Plain {
        fn manifest(&self) -> &ModuleManifest {
            &self.manifest
        }

        fn bootstrap(&self, _config: ModuleConfig) -> Option<PreFetch> {
            self.pre_fetch.clone()
        }
    }

    fn plain(family_name: &str, tag: &str) -> Plain {
        Plain {
            manifest: ModuleManifest::new(
                SpecVersion::current(),
                family(family_name),
                ComponentManifest::new(tag),
            ),
            pre_fetch: None,
        }
    }

    #[tokio::test]
    async fn test_token_requires_online_authentication() {
        let host = Host::new(HostConfig::new(sample_settings())).with_token_issuer(Arc::new(StaticIssuer));
        let loaded = host.load(&plain("docs", "doc-list")).unwrap();

        let token = loaded.services().get_access_token().await.unwrap();
        assert_eq!(token.as_str(), "token-123");

        host.update_setting(SettingValue::AuthenticationStatus(
            AuthenticationStatus::OfflineAuthenticated,
        ));
        let err = loaded.services().get_access_token().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AccessTokenUnavailable);
        assert!(err.recoverable);
    }

    #[tokio::test]
    async fn test_token_without_issuer_rejected() {
        let host = Host::new(HostConfig::new(sample_settings()));
        let loaded = host.load(&plain("docs", "doc-list")).unwrap();
        assert!(loaded.services().get_access_token().await.is_err());
    }

    #[test]
    fn test_same_module_loaded_twice_rejected() {
        let host = Host::new(HostConfig::new(sample_settings()));
        host.load(&plain("docs", "doc-list")).unwrap();
        let err = host.load(&plain("docs", "doc-list")).unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyExists);

        // Same family, other entry
        host.load(&plain("docs", "doc-detail")).unwrap();
        assert_eq!(host.loaded_modules().len(), 2);
    }

    #[test]
    fn test_create_component_applies_settings() {
        let host = Host::new(HostConfig::new(sample_settings()));
        host.load(&plain("docs", "doc-list")).unwrap();

        let controller = host
            .create_component("doc-list", Arc::new(crate::component::NoRefresh), ControllerConfig::default())
            .unwrap();
        assert_eq!(controller.get_attribute("config-name").as_deref(), Some("acc"));
        controller.connect().unwrap();

        let err = host
            .create_component("doc-missing", Arc::new(crate::component::NoRefresh), ControllerConfig::default())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn test_concurrent_loads_of_same_module() {
        struct SlowBoot(Plain);

        impl Module for SlowBoot {
            fn manifest(&self) -> &ModuleManifest {
                self.0.manifest()
            }

            fn bootstrap(&self, _config: ModuleConfig) -> Option<PreFetch> {
                std::thread::sleep(std::time::Duration::from_millis(20));
                None
            }
        }

        let host = Host::new(HostConfig::new(sample_settings()));
        let module = SlowBoot(plain("docs", "doc-list"));
        let barrier = std::sync::Barrier::new(2);
        let results = std::thread::scope(|scope| {
            let first = scope.spawn(|| {
                barrier.wait();
                host.load(&module)
            });
            let second = scope.spawn(|| {
                barrier.wait();
                host.load(&module)
            });
            vec![first.join().unwrap(), second.join().unwrap()]
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.into_iter().find_map(Result::err).unwrap();
        assert_eq!(err.code, ErrorCode::AlreadyExists);
        assert_eq!(host.loaded_modules().len(), 1);
    }

    #[test]
    fn test_panicking_bootstrap_releases_slot() {
        struct PanicBoot(Plain);

        impl Module for PanicBoot {
            fn manifest(&self) -> &ModuleManifest {
                self.0.manifest()
            }

            fn bootstrap(&self, _config: ModuleConfig) -> Option<PreFetch> {
                panic!("bootstrap crashed");
            }
        }

        let host = Host::new(HostConfig::new(sample_settings()));
        let crashing = PanicBoot(plain("docs", "doc-list"));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| host.load(&crashing)));
        assert!(outcome.is_err());
        assert!(host.loaded_modules().is_empty());

        host.load(&plain("docs", "doc-list")).unwrap();
    }

    #[test]
    fn test_offline_storage_override_keeps_family_cache() {
        let host = Host::new(HostConfig::new(sample_settings()));
        let list = host.load(&plain("docs", "doc-list")).unwrap();
        list.services().cache_data_storage.set("count", 2).unwrap();

        let custom: Arc<dyn OfflineDataStorage> = Arc::new(MemoryOfflineStorage::new());
        let host = host.with_offline_storage(family("docs"), Arc::clone(&custom));
        let detail = host.load(&plain("docs", "doc-detail")).unwrap();

        assert_eq!(detail.services().cache_data_storage.get_as::<u32>("count"), Some(2));
        assert!(Arc::ptr_eq(&detail.services().offline_data_storage, &custom));
    }

    #[test]
    fn test_update_setting_reaches_live_instances_once() {
        let host = Host::new(HostConfig::new(sample_settings()));
        let loaded = host.load(&plain("docs", "doc-list")).unwrap();
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        loaded
            .events()
            .target()
            .on_settings_change(move |e| sink.lock().unwrap().push(e.value()));

        let controller = host
            .create_component("doc-list", Arc::new(crate::component::NoRefresh), ControllerConfig::default())
            .unwrap();
        controller.connect().unwrap();
        let dropped = host
            .create_component("doc-list", Arc::new(crate::component::NoRefresh), ControllerConfig::default())
            .unwrap();
        drop(dropped);

        let value = SettingValue::UserLanguage(crate::settings::UserLanguage::De);
        assert!(host.update_setting(value));
        assert_eq!(controller.get_attribute("user-language").as_deref(), Some("de"));
        assert_eq!(controller.user_language().unwrap(), crate::settings::UserLanguage::De);
        assert_eq!(*changes.lock().unwrap(), vec![value]);
        assert_eq!(loaded.live_instances(), 1);

        // Already mirrored, so no second notification
        assert!(!controller.update(value).unwrap());
        assert_eq!(changes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_prefetch_reports_each_module() {
        let host = Host::new(HostConfig::new(sample_settings()));
        let mut ok = plain("docs", "doc-list");
        ok.pre_fetch = Some(crate::module::pre_fetch(|| async { Ok(json!([1, 2])) }));
        let mut failing = plain("vaccines", "vaccine-list");
        failing.pre_fetch = Some(crate::module::pre_fetch(|| async {
            Err(IntegrationError::storage("disk full"))
        }));
        host.load(&ok).unwrap();
        host.load(&failing).unwrap();
        host.load(&plain("notes", "note-list")).unwrap();

        let outcomes = host.prefetch(None).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_ok());
        let err = outcomes[1].result.clone().unwrap_err();
        assert_eq!(err.code, ErrorCode::PrefetchFailed);
        assert_eq!(err.context_value("cause"), Some(&json!("STORAGE_ERROR")));

        let only_docs = host.prefetch(Some(&family("docs"))).await;
        assert_eq!(only_docs.len(), 1);
    }

    #[tokio::test]
    async fn test_settings_signal_follows_updates() {
        let host = Host::new(HostConfig::new(sample_settings()));
        let mut signal = host.settings_signal();
        assert_eq!(signal.user_language(), crate::settings::UserLanguage::Nl);

        assert!(host.update_setting(SettingValue::UserLanguage(crate::settings::UserLanguage::En)));
        let snapshot = signal.changed().await.unwrap();
        assert_eq!(snapshot.user_language, crate::settings::UserLanguage::En);
        assert!(!host.update_setting(SettingValue::UserLanguage(crate::settings::UserLanguage::En)));
    }
}
