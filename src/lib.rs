//! # MyHealth Web Component Integration v5.1
//!
//! Contracts between the MyHealth host applications and the embeddable
//! components they load.
//!
//! A host loads *modules*. Each module exports a manifest and a bootstrap
//! function; its *components* receive the host settings as attributes and
//! talk to the host through events.
//!
//! - **Compatibility**: host and module compare spec versions before loading
//!   (`compat`)
//! - **Manifests**: module and component descriptions (`manifest`)
//! - **Settings**: the values every component receives, mirrored as
//!   kebab-case attributes (`settings`, `attributes`)
//! - **Events**: refresh protocol, output events, module notifications
//!   (`events`, `channel`)
//! - **Services**: family-scoped cache and offline storage, access tokens
//!   (`services`)
//! - **Lifecycle**: connect guard and refresh protocol of a component
//!   instance (`component`)
//! - **Host**: module loading, settings updates, pre-fetch (`host`)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! myhealth-wc-integration = "5.1"
//! ```
//!
//! ```rust,ignore
//! use myhealth_wc_integration::prelude::*;
//!
//! struct Prescriptions {
//!     manifest: ModuleManifest,
//! }
//!
//! impl Module for Prescriptions {
//!     fn manifest(&self) -> &ModuleManifest {
//!         &self.manifest
//!     }
//!
//!     fn bootstrap(&self, config: ModuleConfig) -> Option<PreFetch> {
//!         config.services.events.on_version_mismatch(|e| {
//!             tracing::warn!(level = %e.level, "Host runs another spec version");
//!         });
//!         None
//!     }
//! }
//!
//! let host = Host::new(HostConfig::new(settings));
//! let loaded = host.load(&module)?;
//! let list = host.create_component("prescription-list", Arc::new(NoRefresh), ControllerConfig::default())?;
//! list.connect()?;
//! list.request_refresh().await;
//! ```
//!
//! The crate logs through `tracing` and installs no subscriber.

pub mod attributes;
pub mod channel;
pub mod compat;
pub mod component;
pub mod config;
pub mod errors;
pub mod events;
pub mod host;
pub mod manifest;
pub mod module;
pub mod services;
pub mod settings;
pub mod types;

// Re-export everything in prelude for convenience
pub mod prelude {
    pub use crate::attributes::*;
    pub use crate::channel::*;
    pub use crate::compat::*;
    pub use crate::component::*;
    pub use crate::config::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::host::*;
    pub use crate::manifest::*;
    pub use crate::module::*;
    pub use crate::services::*;
    pub use crate::settings::*;
    pub use crate::types::*;
}

// Also re-export at crate root
pub use prelude::*;
