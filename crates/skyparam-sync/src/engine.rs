//! # Parameter Engine
//!
//! Owner task for all parameter state. Wraps the sans-I/O
//! [`ParameterLoader`] with channels, deadlines, the cache store and the
//! event emitter.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      ParameterEngine Architecture                       │
//! │                                                                         │
//! │   EngineHandle ──── EngineCommand + oneshot reply ────┐                 │
//! │   Fact::set_raw_value ── WriteRequest (unbounded) ────┤                 │
//! │   LinkEndpoint ──── InboundMessage ───────────────────┤                 │
//! │   TimerSet ──── earliest deadline ────────────────────┤                 │
//! │                                                       ▼                 │
//! │                               ┌───────────────────────────────────┐     │
//! │                               │  run(): tokio::select! loop       │     │
//! │                               │                                   │     │
//! │                               │  ParameterLoader ──► actions      │     │
//! │                               └──────────┬────────────────────────┘     │
//! │                                          │                              │
//! │          ┌───────────────┬───────────────┼──────────────┐               │
//! │          ▼               ▼               ▼              ▼               │
//! │   TransportHandle    TimerSet       CacheStore     Emitter + watch      │
//! │   (commands)         (deadlines)    (save blob)    (ReadyState)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing outside the task mutates the store. Replies are sent only after
//! the command's actions ran and the ready state was published, so a caller
//! that awaits `refresh_all_parameters` and then `wait_ready` never observes
//! the previous epoch's readiness.

use serde::Serialize;
use skyparam_core::{ComponentId, ComponentTarget, ParamValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::config::SyncConfig;
use crate::error::{ParamError, ParamResult};
use crate::fact::{Fact, WriteRequest};
use crate::loader::{
    GroupMap, ImportReport, LoaderAction, LoaderEvent, LoaderStatus, ParameterLoader, TimerKind,
};
use crate::metadata::MetadataProvider;
use crate::protocol::InboundMessage;
use crate::transport::TransportHandle;

/// Depth of the handle's command queue.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Ready State
// =============================================================================

/// Readiness of the current epoch, published on a watch channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReadyState {
    pub epoch: u64,
    pub ready: bool,
    pub missing_parameters: bool,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives engine events (UI bindings, logging sinks, tests).
///
/// Called from the engine task; implementations must not block.
pub trait ParamEventEmitter: Send + Sync {
    /// The epoch finished loading.
    fn on_ready(&self, state: &ReadyState);

    /// Bulk load progress, 0.0..=1.0.
    fn on_progress(&self, progress: f32);

    /// A read ran out of retries.
    fn on_read_failed(&self, component: ComponentId, index: Option<u16>, name: Option<&str>);

    /// A write ran out of retries.
    fn on_write_failed(&self, component: ComponentId, name: &str, value: ParamValue);

    /// The vehicle stored a different value than the one written.
    fn on_write_adjusted(
        &self,
        component: ComponentId,
        name: &str,
        requested: ParamValue,
        actual: ParamValue,
    );
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl ParamEventEmitter for NoOpEmitter {
    fn on_ready(&self, _state: &ReadyState) {}
    fn on_progress(&self, _progress: f32) {}
    fn on_read_failed(&self, _component: ComponentId, _index: Option<u16>, _name: Option<&str>) {}
    fn on_write_failed(&self, _component: ComponentId, _name: &str, _value: ParamValue) {}
    fn on_write_adjusted(
        &self,
        _component: ComponentId,
        _name: &str,
        _requested: ParamValue,
        _actual: ParamValue,
    ) {
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Requests handled by the engine task.
#[derive(Debug)]
enum EngineCommand {
    Start {
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    RefreshAll {
        target: ComponentTarget,
        reply: oneshot::Sender<ParamResult<()>>,
    },
    RefreshParameter {
        target: ComponentTarget,
        name: String,
        reply: oneshot::Sender<ParamResult<()>>,
    },
    RefreshPrefix {
        target: ComponentTarget,
        prefix: String,
        reply: oneshot::Sender<ParamResult<usize>>,
    },
    ParameterNames {
        target: ComponentTarget,
        reply: oneshot::Sender<ParamResult<Vec<String>>>,
    },
    GetFact {
        target: ComponentTarget,
        name: String,
        reply: oneshot::Sender<Option<Arc<Fact>>>,
    },
    WriteRaw {
        target: ComponentTarget,
        name: String,
        value: ParamValue,
        reply: oneshot::Sender<ParamResult<ParamValue>>,
    },
    GroupMap {
        reply: oneshot::Sender<GroupMap>,
    },
    DefaultComponent {
        reply: oneshot::Sender<Option<ComponentId>>,
    },
    Status {
        reply: oneshot::Sender<LoaderStatus>,
    },
    Export {
        reply: oneshot::Sender<String>,
    },
    Import {
        document: String,
        reply: oneshot::Sender<ImportReport>,
    },
    Shutdown,
}

// =============================================================================
// Timers
// =============================================================================

/// Armed deadlines, one per timer kind. Re-arming replaces the deadline.
#[derive(Debug, Default)]
struct TimerSet {
    deadlines: HashMap<TimerKind, Instant>,
}

impl TimerSet {
    fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.deadlines.insert(kind, Instant::now() + after);
    }

    fn disarm(&mut self, kind: TimerKind) {
        self.deadlines.remove(&kind);
    }

    fn next(&self) -> Option<(TimerKind, Instant)> {
        self.deadlines
            .iter()
            .min_by_key(|(_, at)| **at)
            .map(|(kind, at)| (*kind, *at))
    }
}

// =============================================================================
// Engine Handle
// =============================================================================

/// Cheap, clonable handle to a running [`ParameterEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    ready_rx: watch::Receiver<ReadyState>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> ParamResult<T> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(make(reply))
            .await
            .map_err(|_| ParamError::ShuttingDown)?;
        reply_rx.await.map_err(|_| ParamError::ShuttingDown)
    }

    /// Starts a connection: cache probe if a cached set exists, bulk load
    /// otherwise. Restarts cleanly if already running.
    pub async fn start(&self) -> ParamResult<()> {
        self.request(|reply| EngineCommand::Start { reply }).await
    }

    /// Stops the connection and drops all parameter state.
    pub async fn stop(&self) -> ParamResult<()> {
        self.request(|reply| EngineCommand::Stop { reply }).await
    }

    /// Re-reads every parameter in scope and starts a new epoch.
    pub async fn refresh_all_parameters(&self, target: ComponentTarget) -> ParamResult<()> {
        self.request(|reply| EngineCommand::RefreshAll { target, reply })
            .await?
    }

    pub async fn refresh_parameter(&self, target: ComponentTarget, name: &str) -> ParamResult<()> {
        let name = name.to_string();
        self.request(|reply| EngineCommand::RefreshParameter {
            target,
            name,
            reply,
        })
        .await?
    }

    /// Re-reads every known parameter starting with `prefix`. Returns the
    /// number of reads issued.
    pub async fn refresh_parameters_prefix(&self, target: ComponentTarget, prefix: &str) -> ParamResult<usize> {
        let prefix = prefix.to_string();
        self.request(|reply| EngineCommand::RefreshPrefix {
            target,
            prefix,
            reply,
        })
        .await?
    }

    pub async fn parameter_exists(&self, target: ComponentTarget, name: &str) -> ParamResult<bool> {
        Ok(self.try_get_fact(target, name).await?.is_some())
    }

    pub async fn parameter_names(&self, target: ComponentTarget) -> ParamResult<Vec<String>> {
        self.request(|reply| EngineCommand::ParameterNames { target, reply })
            .await?
    }

    /// Returns the live fact, or `None` if the parameter is not confirmed.
    pub async fn try_get_fact(&self, target: ComponentTarget, name: &str) -> ParamResult<Option<Arc<Fact>>> {
        let name = name.to_string();
        self.request(|reply| EngineCommand::GetFact {
            target,
            name,
            reply,
        })
        .await
    }

    /// Returns the live fact.
    ///
    /// # Panics
    /// Panics if the parameter does not exist; check with
    /// [`EngineHandle::parameter_exists`] first.
    pub async fn get_fact(&self, target: ComponentTarget, name: &str) -> ParamResult<Arc<Fact>> {
        match self.try_get_fact(target, name).await? {
            Some(fact) => Ok(fact),
            None => panic!("get_fact called for missing parameter {} on component {}", name, target),
        }
    }

    /// Validates and sends a write. Returns the converted value.
    pub async fn write_parameter_raw(
        &self,
        target: ComponentTarget,
        name: &str,
        value: ParamValue,
    ) -> ParamResult<ParamValue> {
        let name = name.to_string();
        self.request(|reply| EngineCommand::WriteRaw {
            target,
            name,
            value,
            reply,
        })
        .await?
    }

    pub async fn group_map(&self) -> ParamResult<GroupMap> {
        self.request(|reply| EngineCommand::GroupMap { reply }).await
    }

    pub async fn default_component(&self) -> ParamResult<Option<ComponentId>> {
        self.request(|reply| EngineCommand::DefaultComponent { reply })
            .await
    }

    pub async fn status(&self) -> ParamResult<LoaderStatus> {
        self.request(|reply| EngineCommand::Status { reply }).await
    }

    /// Serializes the mirror as a parameter file.
    pub async fn export_text(&self) -> ParamResult<String> {
        self.request(|reply| EngineCommand::Export { reply }).await
    }

    /// Applies a parameter file; see [`ImportReport`].
    pub async fn import_text(&self, document: &str) -> ParamResult<ImportReport> {
        let document = document.to_string();
        self.request(|reply| EngineCommand::Import { document, reply })
            .await
    }

    /// Current ready state without waiting.
    pub fn ready_state(&self) -> ReadyState {
        *self.ready_rx.borrow()
    }

    /// Subscribes to ready state changes.
    pub fn subscribe_ready(&self) -> watch::Receiver<ReadyState> {
        self.ready_rx.clone()
    }

    /// Waits until the current epoch is ready.
    pub async fn wait_ready(&self) -> ParamResult<ReadyState> {
        let mut rx = self.ready_rx.clone();
        let state = rx
            .wait_for(|state| state.ready)
            .await
            .map_err(|_| ParamError::ShuttingDown)?;
        Ok(*state)
    }

    /// Stops the engine task. Later requests fail with
    /// [`ParamError::ShuttingDown`].
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown).await;
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Single owner of all parameter state for one vehicle.
pub struct ParameterEngine {
    loader: ParameterLoader,
    cache: Arc<dyn CacheStore>,
    transport: TransportHandle,
    emitter: Arc<dyn ParamEventEmitter>,

    inbound_rx: mpsc::Receiver<InboundMessage>,
    command_rx: mpsc::Receiver<EngineCommand>,
    write_rx: mpsc::UnboundedReceiver<WriteRequest>,

    ready_tx: watch::Sender<ReadyState>,
    timers: TimerSet,
}

impl ParameterEngine {
    /// Creates an engine and its handle. Spawn [`ParameterEngine::run`] on
    /// a tokio runtime, then call [`EngineHandle::start`].
    pub fn new(
        config: SyncConfig,
        metadata: Arc<MetadataProvider>,
        cache: Arc<dyn CacheStore>,
        transport: TransportHandle,
        inbound_rx: mpsc::Receiver<InboundMessage>,
        emitter: Arc<dyn ParamEventEmitter>,
    ) -> ParamResult<(Self, EngineHandle)> {
        config.validate()?;

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = watch::channel(ReadyState::default());

        let engine = ParameterEngine {
            loader: ParameterLoader::new(config, metadata, write_tx),
            cache,
            transport,
            emitter,
            inbound_rx,
            command_rx,
            write_rx,
            ready_tx,
            timers: TimerSet::default(),
        };

        let handle = EngineHandle {
            command_tx,
            ready_rx,
        };

        Ok((engine, handle))
    }

    /// Runs the engine loop until shutdown or until every handle is dropped.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(vehicle_id = self.loader.config().vehicle.id, "Parameter engine starting");

        loop {
            let next_timer = self.timers.next();
            let timer = async move {
                match next_timer {
                    Some((kind, at)) => {
                        tokio::time::sleep_until(at).await;
                        kind
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                // Link notifications
                Some(message) = self.inbound_rx.recv() => {
                    self.loader.handle_inbound(message);
                    self.flush();
                }

                // Edits made through facts
                Some(request) = self.write_rx.recv() => {
                    self.loader.handle_write_request(request);
                    self.flush();
                }

                // Handle requests
                command = self.command_rx.recv() => {
                    match command {
                        Some(EngineCommand::Shutdown) | None => {
                            info!("Parameter engine shutting down");
                            break;
                        }
                        Some(command) => self.handle_command(command),
                    }
                }

                // Expired deadline
                kind = timer => {
                    self.timers.disarm(kind);
                    debug!(timer = ?kind, "Timer expired");
                    self.loader.handle_timer(kind);
                    self.flush();
                }
            }
        }

        self.loader.stop();
        self.flush();
        info!("Parameter engine stopped");
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Start { reply } => {
                let vehicle_id = self.loader.config().vehicle.id;
                let cached = if self.loader.config().cache.enabled {
                    self.cache.load(vehicle_id)
                } else {
                    None
                };
                self.loader.start(cached);
                self.flush();
                let _ = reply.send(());
            }
            EngineCommand::Stop { reply } => {
                self.loader.stop();
                self.flush();
                let _ = reply.send(());
            }
            EngineCommand::RefreshAll { target, reply } => {
                let result = self.loader.refresh_all(target);
                self.flush();
                let _ = reply.send(result);
            }
            EngineCommand::RefreshParameter {
                target,
                name,
                reply,
            } => {
                let result = self.loader.refresh_parameter(target, &name);
                self.flush();
                let _ = reply.send(result);
            }
            EngineCommand::RefreshPrefix {
                target,
                prefix,
                reply,
            } => {
                let result = self.loader.refresh_parameters_prefix(target, &prefix);
                self.flush();
                let _ = reply.send(result);
            }
            EngineCommand::ParameterNames { target, reply } => {
                let _ = reply.send(self.loader.parameter_names(target));
            }
            EngineCommand::GetFact {
                target,
                name,
                reply,
            } => {
                let _ = reply.send(self.loader.try_get_fact(target, &name));
            }
            EngineCommand::WriteRaw {
                target,
                name,
                value,
                reply,
            } => {
                let result = self.loader.write_parameter_raw(target, &name, value);
                self.flush();
                let _ = reply.send(result);
            }
            EngineCommand::GroupMap { reply } => {
                let _ = reply.send(self.loader.group_map());
            }
            EngineCommand::DefaultComponent { reply } => {
                let _ = reply.send(self.loader.default_component());
            }
            EngineCommand::Status { reply } => {
                let _ = reply.send(self.loader.status());
            }
            EngineCommand::Export { reply } => {
                let _ = reply.send(self.loader.export_text());
            }
            EngineCommand::Import { document, reply } => {
                let report = self.loader.import_text(&document);
                self.flush();
                let _ = reply.send(report);
            }
            EngineCommand::Shutdown => {}
        }
    }

    /// Executes pending loader actions and publishes the ready state.
    fn flush(&mut self) {
        for action in self.loader.take_actions() {
            match action {
                LoaderAction::Send(command) => {
                    if let Err(e) = self.transport.send(command) {
                        warn!(error = %e, "Failed to send parameter command");
                    }
                }
                LoaderAction::StartTimer(kind, after) => self.timers.arm(kind, after),
                LoaderAction::StopTimer(kind) => self.timers.disarm(kind),
                LoaderAction::SaveCache(set) => match self.cache.save(&set) {
                    Ok(()) => debug!(
                        vehicle_id = set.vehicle_id,
                        hash = set.hash,
                        params = set.params.len(),
                        "Parameter cache saved"
                    ),
                    Err(e) => warn!(error = %e, "Failed to save parameter cache"),
                },
                LoaderAction::Emit(event) => self.emit(event),
            }
        }

        self.publish_ready_state();
    }

    fn publish_ready_state(&self) {
        let state = ReadyState {
            epoch: self.loader.epoch(),
            ready: self.loader.is_ready(),
            missing_parameters: self.loader.missing_parameters(),
        };
        self.ready_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn emit(&self, event: LoaderEvent) {
        match event {
            LoaderEvent::Progress(progress) => self.emitter.on_progress(progress),
            LoaderEvent::Ready {
                epoch,
                missing_parameters,
            } => self.emitter.on_ready(&ReadyState {
                epoch,
                ready: true,
                missing_parameters,
            }),
            LoaderEvent::ReadFailed {
                component,
                index,
                name,
            } => self
                .emitter
                .on_read_failed(component, index, name.as_deref()),
            LoaderEvent::WriteFailed {
                component,
                name,
                value,
            } => self.emitter.on_write_failed(component, &name, value),
            LoaderEvent::WriteAdjusted {
                component,
                name,
                requested,
                actual,
            } => self
                .emitter
                .on_write_adjusted(component, &name, requested, actual),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
