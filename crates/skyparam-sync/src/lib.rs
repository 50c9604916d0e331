//! # skyparam-sync: Parameter Synchronization Engine for SkyParam
//!
//! This crate keeps a local mirror of every component's parameters in sync
//! with a vehicle over a lossy, half-duplex telemetry link. Requests may be
//! dropped, answered twice or never answered; the engine still reaches a
//! ready state, either complete or flagged with missing parameters.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Parameter Sync Architecture                      │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 ParameterEngine (owner task)                     │  │
//! │  │                                                                  │  │
//! │  │  Spawned as a Tokio task, driven through EngineHandle            │  │
//! │  │  Single owner of all parameter state and timers                  │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ParameterLoader │  │   Transport    │  │     CacheStore         │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Phases, retry  │  │ Commands out,  │  │ Hash-checked fast path │    │
//! │  │ budgets, write │  │ notifications  │  │ (memory / JSON file)   │    │
//! │  │ echoes, ready  │  │ in (mpsc)      │  │                        │    │
//! │  └───────┬────────┘  └────────────────┘  └────────────────────────┘    │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  ParamStore    │  │     Fact       │  │  MetadataProvider      │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Per-component  │  │ Live value,    │  │ TOML definitions,      │    │
//! │  │ pending/failed │  │ watch channel, │  │ loaded once, generic   │    │
//! │  │ bookkeeping    │  │ write hand-off │  │ fallback               │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  EVENTS (ParamEventEmitter + ReadyState watch):                        │
//! │  • ready          - once per epoch, with missing-parameters flag       │
//! │  • progress       - bulk load fraction                                 │
//! │  • read/write failed, write adjusted                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`engine`] - Owner task, `EngineHandle`, emitter trait, ready state
//! - [`loader`] - Sans-I/O synchronization state machine
//! - [`store`] - Per-component parameter bookkeeping
//! - [`fact`] - Observable value facade handed to UI code
//! - [`protocol`] - Outbound commands and inbound notifications
//! - [`transport`] - Channel pair between the engine and the link
//! - [`cache`] - Parameter-set cache stores
//! - [`metadata`] - Metadata definitions provider
//! - [`config`] - Engine configuration (TOML + environment)
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use skyparam_core::ComponentTarget;
//! use skyparam_sync::{
//!     transport, FileCacheStore, MetadataProvider, NoOpEmitter, ParameterEngine, SyncConfig,
//! };
//!
//! let config = SyncConfig::load_or_default(None);
//! let (link, inbound_rx, endpoint) = transport::channel(transport::DEFAULT_CHANNEL_CAPACITY);
//! // hand `endpoint` to the code that talks to the radio
//!
//! let (engine, handle) = ParameterEngine::new(
//!     config.clone(),
//!     Arc::new(MetadataProvider::empty()),
//!     Arc::new(FileCacheStore::new(config.cache.resolved_dir().unwrap_or_default())),
//!     link,
//!     inbound_rx,
//!     Arc::new(NoOpEmitter),
//! )?;
//! tokio::spawn(engine.run());
//!
//! handle.start().await?;
//! let ready = handle.wait_ready().await?;
//! println!("missing parameters: {}", ready.missing_parameters);
//!
//! let speed = handle.get_fact(ComponentTarget::Default, "CRUISE_SPEED").await?;
//! speed.set_raw_value_from_text("12.5")?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fact;
pub mod loader;
pub mod metadata;
pub mod protocol;
pub mod store;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use cache::{CacheStore, CachedParam, CachedParameterSet, FileCacheStore, MemoryCacheStore, NoCacheStore};
pub use config::SyncConfig;
pub use engine::{EngineHandle, NoOpEmitter, ParamEventEmitter, ParameterEngine, ReadyState};
pub use error::{ParamError, ParamResult};
pub use fact::{Fact, WriteRequest};
pub use loader::{ComponentStatus, GroupMap, ImportReport, LoadPhase, LoaderStatus, ParameterLoader};
pub use metadata::MetadataProvider;
pub use protocol::{InboundMessage, ParamCommand, ParamValueNotification};
pub use transport::{LinkEndpoint, TransportHandle};
