//! What a module exports to its host.
//!
//! A module is a deployable unit exporting a [`ModuleManifest`] and a
//! bootstrap function. The host calls `bootstrap` once, before any component
//! of the module is instantiated, handing over the current settings and the
//! host services. Bootstrap may return a pre-fetch function that the host
//! can call (and re-call, e.g. on pull-to-refresh) to warm the module's data
//! before its components are shown.

use crate::errors::IntegrationResult;
use crate::manifest::ModuleManifest;
use crate::services::HostServices;
use crate::settings::HostSettings;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future type for pre-fetch operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Eagerly loads module data. The host ignores the returned value; it only
/// tracks completion.
pub type PreFetch = Arc<dyn Fn() -> BoxFuture<'static, IntegrationResult<serde_json::Value>> + Send + Sync>;

/// Wrap an async closure as a [`PreFetch`].
pub fn pre_fetch<F, Fut>(f: F) -> PreFetch
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = IntegrationResult<serde_json::Value>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as BoxFuture<'static, _>)
}

/// Configuration passed to [`Module::bootstrap`].
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    /// Initial values. Watch `settings-change` on `services.events` for
    /// updates.
    pub settings: HostSettings,

    pub services: HostServices,
}

/// The entry contract of a module.
pub trait Module: Send + Sync {
    fn manifest(&self) -> &ModuleManifest;

    /// Module-level setup, before any component is created.
    fn bootstrap(&self, config: ModuleConfig) -> Option<PreFetch>;
}
