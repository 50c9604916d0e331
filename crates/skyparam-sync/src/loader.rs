//! # Parameter Loader
//!
//! The synchronization state machine. It owns the [`ParamStore`], consumes
//! inbound notifications and timer expiries, and answers with
//! [`LoaderAction`]s: commands to send, timers to (re)arm, events to emit and
//! cache blobs to persist. It never touches a channel, a clock or a disk
//! itself; the engine task in [`crate::engine`] executes the actions.
//!
//! ## Phases
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Loader Phases                                    │
//! │                                                                         │
//! │   ┌──────┐  start (cache)   ┌────────────┐  hash matches  ┌───────┐     │
//! │   │ Idle │ ───────────────► │ CacheProbe │ ─────────────► │ Ready │     │
//! │   └──┬───┘                  └─────┬──────┘                └───┬───┘     │
//! │      │ start (no cache)           │ mismatch / cache timer    │         │
//! │      │                            ▼                           │         │
//! │      │                    ┌─────────────┐  all indices        │         │
//! │      └──────────────────► │ BulkLoading │  resolved/failed ───┘         │
//! │                           └─────────────┘                               │
//! │                                  ▲              refresh_all             │
//! │                                  └──────────────────────────────────    │
//! │                                                                         │
//! │   stop() from any phase: all timers disarmed, all state dropped, Idle  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Timers
//! - **Cache**: one-shot, waits for the vehicle's hash during CacheProbe
//! - **InitialRequest**: one-shot, re-sends the list request once if nothing
//!   arrived, then ends the epoch with missing parameters
//! - **WaitingParam**: re-armed after every inbound value and every tick while
//!   anything is pending; the only driver of retries. A broadcast sweep is
//!   declared ready on a tick, never on an inbound value
//! - **RefreshAll**: optional, armed on readiness
//!
//! ## Write Echoes
//! A value report for a name with a pending write is compared with it:
//! - equal to the pending value: the write is confirmed
//! - equal to a value the pending write superseded: stale, ignored
//! - anything else: the vehicle adjusted the value; it wins, the write is
//!   closed and [`LoaderEvent::WriteAdjusted`] is emitted
//!
//! With `vehicle.save_to_storage` set, every component that took a write is
//! sent [`ParamCommand::SaveToStorage`] once no write is outstanding.

use serde::Serialize;
use skyparam_core::text::{self, ParamRow};
use skyparam_core::{ComponentId, ComponentTarget, CoreError, ParamValue, ParameterMetadata};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{CachedParam, CachedParameterSet};
use crate::config::SyncConfig;
use crate::error::{ParamError, ParamResult};
use crate::fact::{Fact, WriteRequest};
use crate::metadata::MetadataProvider;
use crate::protocol::{InboundMessage, ParamCommand, ParamValueNotification};
use crate::store::{ComponentParams, ParamEntry, ParamStore, PendingWrite};

// =============================================================================
// Phases, Timers, Actions
// =============================================================================

/// Load phase of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    Idle,
    CacheProbe,
    BulkLoading,
    Ready,
}

impl std::fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadPhase::Idle => write!(f, "idle"),
            LoadPhase::CacheProbe => write!(f, "cache_probe"),
            LoadPhase::BulkLoading => write!(f, "bulk_loading"),
            LoadPhase::Ready => write!(f, "ready"),
        }
    }
}

/// The loader's timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Cache,
    InitialRequest,
    WaitingParam,
    RefreshAll,
}

impl TimerKind {
    pub const ALL: [TimerKind; 4] = [
        TimerKind::Cache,
        TimerKind::InitialRequest,
        TimerKind::WaitingParam,
        TimerKind::RefreshAll,
    ];
}

/// Something observers should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderEvent {
    /// Fraction of the bulk sweep completed, 0.0..=1.0.
    Progress(f32),

    /// The epoch finished. Fired once per epoch.
    Ready {
        epoch: u64,
        missing_parameters: bool,
    },

    /// A read ran out of retries.
    ReadFailed {
        component: ComponentId,
        index: Option<u16>,
        name: Option<String>,
    },

    /// A write ran out of retries without an echo.
    WriteFailed {
        component: ComponentId,
        name: String,
        value: ParamValue,
    },

    /// The vehicle echoed a different value than the one written.
    WriteAdjusted {
        component: ComponentId,
        name: String,
        requested: ParamValue,
        actual: ParamValue,
    },
}

/// Work for the engine task to carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderAction {
    Send(ParamCommand),
    StartTimer(TimerKind, Duration),
    StopTimer(TimerKind),
    SaveCache(CachedParameterSet),
    Emit(LoaderEvent),
}

// =============================================================================
// Status / Reports
// =============================================================================

/// Per-component counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentStatus {
    pub component: ComponentId,
    pub expected: Option<u16>,
    pub resolved: usize,
    pub pending_reads: usize,
    pub pending_writes: usize,
    pub failed: usize,
}

/// Snapshot of the loader for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoaderStatus {
    pub phase: LoadPhase,
    pub epoch: u64,
    pub ready: bool,
    pub missing_parameters: bool,
    pub progress: f32,
    pub default_component: Option<ComponentId>,
    pub components: Vec<ComponentStatus>,
}

/// Outcome of a text import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    /// Lines that produced a write.
    pub applied: usize,

    /// Lines whose value already matched.
    pub unchanged: usize,

    /// One message per rejected line.
    pub errors: Vec<String>,
}

impl ImportReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// All rejected lines joined into one message, if any.
    pub fn error_string(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("\n"))
        }
    }
}

/// Group index of every component.
pub type GroupMap = BTreeMap<ComponentId, BTreeMap<String, Vec<String>>>;

// =============================================================================
// Loader
// =============================================================================

/// Sans-I/O parameter synchronization state machine.
pub struct ParameterLoader {
    config: SyncConfig,
    metadata: Arc<MetadataProvider>,
    write_tx: mpsc::UnboundedSender<WriteRequest>,
    store: ParamStore,

    phase: LoadPhase,
    epoch: u64,
    ready_fired: bool,
    missing: bool,

    /// Scope of the current bulk request (broadcast id for all).
    bulk_target: ComponentId,
    received_since_request: bool,
    initial_request_retried: bool,

    /// Cached set waiting for the vehicle's hash.
    cached: Option<CachedParameterSet>,

    /// Components with confirmed writes not yet committed to storage.
    unsaved_writes: BTreeSet<ComponentId>,

    actions: Vec<LoaderAction>,
}

impl ParameterLoader {
    /// Creates an idle loader.
    ///
    /// `write_tx` is handed to every [`Fact`] so UI edits come back as
    /// [`WriteRequest`]s.
    pub fn new(
        config: SyncConfig,
        metadata: Arc<MetadataProvider>,
        write_tx: mpsc::UnboundedSender<WriteRequest>,
    ) -> Self {
        Self {
            config,
            metadata,
            write_tx,
            store: ParamStore::new(),
            phase: LoadPhase::Idle,
            epoch: 0,
            ready_fired: false,
            missing: false,
            bulk_target: ComponentId::ALL,
            received_since_request: false,
            initial_request_retried: false,
            cached: None,
            unsaved_writes: BTreeSet::new(),
            actions: Vec::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_ready(&self) -> bool {
        self.phase == LoadPhase::Ready
    }

    pub fn missing_parameters(&self) -> bool {
        self.missing
    }

    pub fn store(&self) -> &ParamStore {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Drains the actions produced since the last call.
    pub fn take_actions(&mut self) -> Vec<LoaderAction> {
        std::mem::take(&mut self.actions)
    }

    fn ensure_started(&self) -> ParamResult<()> {
        if self.phase == LoadPhase::Idle {
            return Err(ParamError::NotStarted);
        }
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Begins a new connection. A cached set enables the hash probe.
    pub fn start(&mut self, cached: Option<CachedParameterSet>) {
        if self.phase != LoadPhase::Idle {
            self.stop();
        }

        self.epoch += 1;
        self.ready_fired = false;
        self.missing = false;

        let cached = cached.filter(|_| self.config.cache.enabled);
        match cached {
            Some(set) => {
                info!(
                    epoch = self.epoch,
                    cached_hash = set.hash,
                    params = set.params.len(),
                    "Probing vehicle parameter hash"
                );
                self.phase = LoadPhase::CacheProbe;
                self.cached = Some(set);
                self.actions.push(LoaderAction::Send(ParamCommand::RequestHash {
                    component: ComponentId::ALL,
                }));
                self.actions.push(LoaderAction::StartTimer(
                    TimerKind::Cache,
                    self.config.timeouts.cache_timeout(),
                ));
            }
            None => self.enter_bulk(ComponentId::ALL),
        }
    }

    /// Disarms every timer and drops all parameter state.
    pub fn stop(&mut self) {
        info!(epoch = self.epoch, phase = %self.phase, "Stopping parameter loader");
        for kind in TimerKind::ALL {
            self.actions.push(LoaderAction::StopTimer(kind));
        }
        self.store.clear();
        self.phase = LoadPhase::Idle;
        self.cached = None;
        self.unsaved_writes.clear();
        self.ready_fired = false;
        self.missing = false;
        self.bulk_target = ComponentId::ALL;
        self.received_since_request = false;
        self.initial_request_retried = false;
    }

    fn enter_bulk(&mut self, target: ComponentId) {
        self.phase = LoadPhase::BulkLoading;
        self.bulk_target = target;
        self.cached = None;
        self.received_since_request = false;
        self.initial_request_retried = false;

        info!(epoch = self.epoch, component = %target, "Requesting parameter list");
        self.actions.push(LoaderAction::StopTimer(TimerKind::Cache));
        self.actions
            .push(LoaderAction::Send(ParamCommand::RequestList { component: target }));
        self.actions.push(LoaderAction::StartTimer(
            TimerKind::InitialRequest,
            self.config.timeouts.initial_request_timeout(),
        ));
        if self.store.has_pending() {
            self.arm_waiting_timer();
        }
    }

    fn arm_waiting_timer(&mut self) {
        self.actions.push(LoaderAction::StartTimer(
            TimerKind::WaitingParam,
            self.config.timeouts.waiting_param_timeout(),
        ));
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Consumes one notification from the link.
    pub fn handle_inbound(&mut self, message: InboundMessage) {
        let message = message.normalize();

        if message.vehicle_id() != self.config.vehicle.id {
            debug!(
                vehicle_id = message.vehicle_id(),
                msg_type = %message.type_name(),
                "Ignoring message for another vehicle"
            );
            return;
        }

        if self.phase == LoadPhase::Idle {
            debug!(msg_type = %message.type_name(), "Ignoring message while idle");
            return;
        }

        match message {
            InboundMessage::ParamHash { component, hash, .. } => self.handle_hash(component, hash),
            InboundMessage::ParamValue(notification) => self.handle_param_value(notification),
        }
    }

    fn handle_hash(&mut self, component: ComponentId, hash: u32) {
        if self.phase != LoadPhase::CacheProbe {
            debug!(component = %component, hash, "Ignoring parameter hash outside cache probe");
            return;
        }

        match self.cached.take() {
            Some(set) if set.hash == hash => {
                info!(component = %component, hash, "Parameter hash matches cache, loading from cache");
                self.load_from_cache(set);
            }
            Some(set) => {
                info!(
                    component = %component,
                    cached = set.hash,
                    reported = hash,
                    "Parameter hash differs from cache"
                );
                self.enter_bulk(ComponentId::ALL);
            }
            None => self.enter_bulk(ComponentId::ALL),
        }
    }

    fn load_from_cache(&mut self, set: CachedParameterSet) {
        for param in set.params {
            let fact = self.new_fact(param.component, &param.name, param.value, None);
            self.store.entry(param.component).params.insert(
                param.name,
                ParamEntry { fact, index: None },
            );
        }

        for (_, comp) in self.store.iter_mut() {
            comp.resolve_from_cache();
            comp.rebuild_groups();
        }

        self.declare_ready(false, false);
    }

    fn new_fact(
        &self,
        component: ComponentId,
        name: &str,
        value: ParamValue,
        metadata: Option<Arc<ParameterMetadata>>,
    ) -> Arc<Fact> {
        let metadata = metadata.unwrap_or_else(|| self.metadata.lookup(name, value.param_type()));
        Arc::new(Fact::new(component, name, value, metadata, self.write_tx.clone()))
    }

    fn handle_param_value(&mut self, notification: ParamValueNotification) {
        let ParamValueNotification {
            component,
            name,
            count,
            index,
            value,
            ..
        } = notification;

        if component.is_broadcast() {
            warn!(name = %name, "Ignoring parameter value from broadcast component id");
            return;
        }

        if !self.received_since_request {
            self.received_since_request = true;
            self.actions.push(LoaderAction::StopTimer(TimerKind::InitialRequest));
        }

        debug!(component = %component, name = %name, ?index, count, %value, "Parameter value received");

        let comp = self.store.entry(component);
        let seeded = comp.announce_count(count);
        if seeded > 0 {
            debug!(component = %component, count, seeded, "Parameter count announced");
        }

        // Index resolution
        let mut duplicate_name = false;
        if let Some(idx) = index {
            match comp.index_to_name.get(&idx) {
                Some(existing) if *existing != name => {
                    warn!(
                        component = %component,
                        index = idx,
                        existing = %existing,
                        name = %name,
                        "Index already resolved to another name, keeping first"
                    );
                    return;
                }
                Some(_) => {}
                None => {
                    if let Some(prev) = comp.params.get(&name).and_then(|e| e.index) {
                        duplicate_name = prev != idx;
                    }
                    comp.index_to_name.insert(idx, name.clone());
                }
            }
            comp.pending_index.remove(&idx);
            comp.failed.remove(&idx);
        }

        comp.pending_name.remove(&name);

        // Write echo
        let mut apply = true;
        let mut adjusted = None;
        let mut stored = false;
        if let Some(pending) = comp.pending_write.get(&name) {
            if pending.value.same_value(&value) {
                debug!(component = %component, name = %name, %value, "Write confirmed");
                comp.pending_write.remove(&name);
                stored = true;
            } else if pending.superseded.iter().any(|v| v.same_value(&value)) {
                debug!(component = %component, name = %name, %value, "Ignoring stale echo of superseded write");
                apply = false;
            } else {
                let requested = pending.value;
                warn!(
                    component = %component,
                    name = %name,
                    %requested,
                    actual = %value,
                    "Vehicle adjusted written value"
                );
                comp.pending_write.remove(&name);
                adjusted = Some(requested);
                stored = true;
            }
        }

        if apply {
            match comp.params.get_mut(&name) {
                Some(entry) => {
                    if entry.index.is_none() {
                        entry.index = index;
                    }
                    let declared = entry.fact.param_type();
                    match value.convert_to(declared) {
                        Ok(converted) => entry.fact.update_from_remote(converted),
                        Err(e) => warn!(
                            component = %component,
                            name = %name,
                            error = %e,
                            "Reported value does not fit declared type, ignored"
                        ),
                    }
                    if duplicate_name {
                        warn!(component = %component, name = %name, "Duplicate parameter name, using generic metadata");
                        entry
                            .fact
                            .replace_metadata(Arc::new(ParameterMetadata::generic(&name, declared)));
                        comp.rebuild_groups();
                    }
                }
                None => {
                    let metadata = self.metadata.lookup(&name, value.param_type());
                    let fact = Arc::new(Fact::new(component, &name, value, metadata, self.write_tx.clone()));
                    comp.params.insert(name.clone(), ParamEntry { fact, index });
                    comp.rebuild_groups();
                }
            }
        }

        if let Some(requested) = adjusted {
            self.actions.push(LoaderAction::Emit(LoaderEvent::WriteAdjusted {
                component,
                name,
                requested,
                actual: value,
            }));
        }

        if stored {
            self.unsaved_writes.insert(component);
            self.save_to_storage_if_settled();
        }

        if self.phase == LoadPhase::BulkLoading {
            self.actions.push(LoaderAction::Emit(LoaderEvent::Progress(self.progress())));
        }

        if self.store.has_pending() || self.awaiting_quiet_period() {
            self.arm_waiting_timer();
        }

        self.check_ready(false);
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Handles an expired timer.
    pub fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Cache => {
                if self.phase == LoadPhase::CacheProbe {
                    info!("No parameter hash from vehicle, loading over the link");
                    self.enter_bulk(ComponentId::ALL);
                }
            }
            TimerKind::InitialRequest => self.initial_request_timeout(),
            TimerKind::WaitingParam => self.waiting_param_timeout(),
            TimerKind::RefreshAll => {
                if self.phase == LoadPhase::Ready {
                    info!(epoch = self.epoch, "Periodic parameter refresh");
                    if let Err(e) = self.refresh_all(ComponentTarget::All) {
                        warn!(error = %e, "Periodic refresh failed");
                    }
                }
            }
        }
    }

    fn initial_request_timeout(&mut self) {
        if self.phase != LoadPhase::BulkLoading || self.received_since_request {
            return;
        }

        if !self.initial_request_retried {
            self.initial_request_retried = true;
            warn!(component = %self.bulk_target, "No parameters received, re-sending list request");
            self.actions.push(LoaderAction::Send(ParamCommand::RequestList {
                component: self.bulk_target,
            }));
            self.actions.push(LoaderAction::StartTimer(
                TimerKind::InitialRequest,
                self.config.timeouts.initial_request_timeout(),
            ));
        } else {
            warn!(component = %self.bulk_target, "Vehicle never answered the list request");
            self.declare_ready(true, false);
        }
    }

    fn waiting_param_timeout(&mut self) {
        let max_index_retries = self.config.retry.max_initial_load_retries;
        let max_rw_retries = self.config.retry.max_read_write_retries;
        let batch_size = self.config.retry.max_batch_size;

        let mut sent_index_reads = 0usize;
        let mut commands = Vec::new();
        let mut events = Vec::new();

        for (id, comp) in self.store.iter_mut() {
            let component = *id;

            // Index reads (bulk sweep), capped per tick
            let mut exhausted = Vec::new();
            for (idx, retries) in comp.pending_index.iter_mut() {
                if *retries >= max_index_retries {
                    exhausted.push(*idx);
                    continue;
                }
                if sent_index_reads >= batch_size {
                    continue;
                }
                *retries += 1;
                sent_index_reads += 1;
                debug!(component = %component, index = *idx, retries = *retries, "Re-requesting parameter by index");
                commands.push(ParamCommand::ReadByIndex {
                    component,
                    index: *idx,
                });
            }
            for idx in exhausted {
                comp.pending_index.remove(&idx);
                comp.failed.insert(idx);
                warn!(component = %component, index = idx, retries = max_index_retries, "Parameter read failed");
                events.push(LoaderEvent::ReadFailed {
                    component,
                    index: Some(idx),
                    name: None,
                });
            }

            // By-name reads
            let mut exhausted = Vec::new();
            for (name, retries) in comp.pending_name.iter_mut() {
                if *retries >= max_rw_retries {
                    exhausted.push(name.clone());
                    continue;
                }
                *retries += 1;
                debug!(component = %component, name = %name, retries = *retries, "Re-requesting parameter by name");
                commands.push(ParamCommand::ReadByName {
                    component,
                    name: name.clone(),
                });
            }
            for name in exhausted {
                comp.pending_name.remove(&name);
                warn!(component = %component, name = %name, retries = max_rw_retries, "Parameter read failed");
                events.push(LoaderEvent::ReadFailed {
                    component,
                    index: None,
                    name: Some(name),
                });
            }

            // Writes
            let mut exhausted = Vec::new();
            for (name, pending) in comp.pending_write.iter_mut() {
                if pending.retries >= max_rw_retries {
                    exhausted.push((name.clone(), pending.value));
                    continue;
                }
                pending.retries += 1;
                debug!(component = %component, name = %name, retries = pending.retries, "Re-sending parameter write");
                commands.push(ParamCommand::Write {
                    component,
                    name: name.clone(),
                    value: pending.value,
                });
            }
            for (name, value) in exhausted {
                comp.pending_write.remove(&name);
                warn!(component = %component, name = %name, %value, retries = max_rw_retries, "Parameter write failed");
                events.push(LoaderEvent::WriteFailed {
                    component,
                    name,
                    value,
                });
            }
        }

        self.actions
            .extend(commands.into_iter().map(LoaderAction::Send));
        self.actions.extend(events.into_iter().map(LoaderAction::Emit));

        // Abandoned writes may have been the last ones outstanding
        self.save_to_storage_if_settled();

        self.check_ready(true);

        if self.store.has_pending() || self.awaiting_quiet_period() {
            self.arm_waiting_timer();
        }
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    /// True while a broadcast sweep still waits for a waiting-param interval
    /// without inbound values.
    fn awaiting_quiet_period(&self) -> bool {
        self.phase == LoadPhase::BulkLoading && !self.ready_fired && self.bulk_target.is_broadcast()
    }

    /// Declares readiness once every component in scope is complete.
    ///
    /// A broadcast sweep only completes on a waiting-param tick (`quiet`),
    /// which fires after a full interval without inbound values.
    fn check_ready(&mut self, quiet: bool) {
        if self.phase != LoadPhase::BulkLoading || self.ready_fired {
            return;
        }
        if self.bulk_target.is_broadcast() && !quiet {
            return;
        }

        let targeted: Vec<&ComponentParams> = self
            .store
            .iter()
            .filter(|(id, _)| self.bulk_target.is_broadcast() || **id == self.bulk_target)
            .map(|(_, comp)| comp)
            .filter(|comp| comp.expected_count.is_some())
            .collect();

        if targeted.is_empty() || !targeted.iter().all(|comp| comp.is_complete()) {
            return;
        }

        let missing = self.store.any_failed();
        self.declare_ready(missing, !missing);
    }

    fn declare_ready(&mut self, missing: bool, save_cache: bool) {
        self.phase = LoadPhase::Ready;
        self.ready_fired = true;
        self.missing = missing;

        self.actions.push(LoaderAction::StopTimer(TimerKind::Cache));
        self.actions.push(LoaderAction::StopTimer(TimerKind::InitialRequest));

        info!(
            epoch = self.epoch,
            missing_parameters = missing,
            params = self.store.total_expected(),
            default_component = ?self.default_component(),
            "Parameters ready"
        );

        if save_cache && self.config.cache.enabled {
            self.actions.push(LoaderAction::SaveCache(self.cache_snapshot()));
        }

        if let Some(interval) = self.config.timeouts.refresh_all_interval() {
            self.actions
                .push(LoaderAction::StartTimer(TimerKind::RefreshAll, interval));
        }

        self.actions.push(LoaderAction::Emit(LoaderEvent::Ready {
            epoch: self.epoch,
            missing_parameters: missing,
        }));
    }

    fn cache_snapshot(&self) -> CachedParameterSet {
        let params = self
            .store
            .snapshot()
            .into_iter()
            .map(|(component, name, value)| CachedParam {
                component,
                name,
                value,
            })
            .collect();
        CachedParameterSet::new(self.config.vehicle.id, params)
    }

    /// Fraction of expected parameters no longer waiting on an index read.
    pub fn progress(&self) -> f32 {
        let expected = self.store.total_expected();
        if expected == 0 {
            return if self.is_ready() { 1.0 } else { 0.0 };
        }
        let pending = self.store.total_pending_index().min(expected);
        1.0 - pending as f32 / expected as f32
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Re-reads every parameter of the targeted scope and re-arms readiness.
    ///
    /// Pending reads and failures in scope are discarded before new requests
    /// go out, so calling this twice leaves one pending entry per index.
    pub fn refresh_all(&mut self, target: ComponentTarget) -> ParamResult<()> {
        self.ensure_started()?;

        let scope = match target {
            ComponentTarget::All => ComponentId::ALL,
            ComponentTarget::Default => self.default_component().ok_or(ParamError::NoDefaultComponent)?,
            ComponentTarget::Id(id) => id,
        };

        for (id, comp) in self.store.iter_mut() {
            if scope.is_broadcast() || *id == scope {
                comp.reseed_all();
            }
        }

        self.epoch += 1;
        self.ready_fired = false;
        self.missing = false;
        self.actions.push(LoaderAction::StopTimer(TimerKind::RefreshAll));

        info!(epoch = self.epoch, component = %scope, "Refreshing all parameters");
        self.enter_bulk(scope);
        Ok(())
    }

    /// Re-reads one parameter by name. Ready state is not affected.
    pub fn refresh_parameter(&mut self, target: ComponentTarget, name: &str) -> ParamResult<()> {
        self.ensure_started()?;

        let components: Vec<ComponentId> = match target {
            ComponentTarget::All => self
                .store
                .iter()
                .filter(|(_, comp)| comp.params.contains_key(name))
                .map(|(id, _)| *id)
                .collect(),
            single => vec![self.resolve_known_component(single, name)?],
        };

        if components.is_empty() {
            return Err(ParamError::UnknownParameter {
                component: target,
                name: name.to_string(),
            });
        }

        for component in components {
            self.request_by_name(component, name);
        }
        self.arm_waiting_timer();
        Ok(())
    }

    /// Re-reads every known parameter whose name starts with `prefix`.
    ///
    /// Returns the number of reads issued.
    pub fn refresh_parameters_prefix(&mut self, target: ComponentTarget, prefix: &str) -> ParamResult<usize> {
        self.ensure_started()?;

        let components: Vec<ComponentId> = match target {
            ComponentTarget::All => self.store.component_ids(),
            single => vec![self.resolve_known_component(single, prefix)?],
        };

        let mut requests = Vec::new();
        for component in components {
            if let Some(comp) = self.store.get(component) {
                requests.extend(
                    comp.params
                        .keys()
                        .filter(|name| name.starts_with(prefix))
                        .map(|name| (component, name.clone())),
                );
            }
        }

        for (component, name) in &requests {
            self.request_by_name(*component, name);
        }
        if !requests.is_empty() {
            self.arm_waiting_timer();
        }
        debug!(prefix, count = requests.len(), "Refreshing parameters by prefix");
        Ok(requests.len())
    }

    fn request_by_name(&mut self, component: ComponentId, name: &str) {
        self.store
            .entry(component)
            .pending_name
            .insert(name.to_string(), 0);
        debug!(component = %component, name, "Requesting parameter by name");
        self.actions.push(LoaderAction::Send(ParamCommand::ReadByName {
            component,
            name: name.to_string(),
        }));
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Validates `value` against the parameter's metadata and sends it.
    ///
    /// Returns the converted value. Completion is observed through the echo;
    /// invalid values are rejected here and produce no traffic.
    pub fn write_parameter_raw(
        &mut self,
        target: ComponentTarget,
        name: &str,
        value: ParamValue,
    ) -> ParamResult<ParamValue> {
        self.ensure_started()?;

        let fact = self.try_get_fact(target, name).ok_or_else(|| ParamError::UnknownParameter {
            component: target,
            name: name.to_string(),
        })?;
        let value = fact.metadata().validate(value)?;
        self.issue_write(fact.component(), name, value);
        Ok(value)
    }

    /// Applies a write handed over by a [`Fact`].
    pub fn handle_write_request(&mut self, request: WriteRequest) {
        let WriteRequest {
            component,
            name,
            value,
        } = request;

        if let Err(e) = self.write_parameter_raw(ComponentTarget::Id(component), &name, value) {
            warn!(component = %component, name = %name, error = %e, "Dropping write request");
        }
    }

    fn issue_write(&mut self, component: ComponentId, name: &str, value: ParamValue) {
        let comp = self.store.entry(component);
        match comp.pending_write.get_mut(name) {
            Some(pending) => {
                debug!(component = %component, name, previous = %pending.value, %value, "Superseding pending write");
                pending.supersede(value);
            }
            None => {
                comp.pending_write
                    .insert(name.to_string(), PendingWrite::new(value));
            }
        }

        debug!(component = %component, name, %value, "Writing parameter");
        self.actions.push(LoaderAction::Send(ParamCommand::Write {
            component,
            name: name.to_string(),
            value,
        }));
        self.arm_waiting_timer();
    }

    /// Asks each component with confirmed writes to commit its parameters
    /// once no write is outstanding on any component.
    fn save_to_storage_if_settled(&mut self) {
        if self.unsaved_writes.is_empty() {
            return;
        }
        if !self.config.vehicle.save_to_storage {
            self.unsaved_writes.clear();
            return;
        }
        if self.store.iter().any(|(_, comp)| !comp.pending_write.is_empty()) {
            return;
        }

        for component in std::mem::take(&mut self.unsaved_writes) {
            info!(component = %component, "Committing parameters to vehicle storage");
            self.actions
                .push(LoaderAction::Send(ParamCommand::SaveToStorage { component }));
        }
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Picks the component whose parameter set looks like the primary one.
    ///
    /// Heuristic, not protocol-defined: a configured override wins; otherwise
    /// the component carrying the marker parameter wins, then the largest
    /// announced count, then the lowest id.
    pub fn default_component(&self) -> Option<ComponentId> {
        if let Some(id) = self.config.vehicle.default_component {
            return Some(ComponentId(id));
        }

        let marker = self.config.vehicle.default_component_marker.as_str();
        let mut best: Option<(ComponentId, u64)> = None;
        for (id, comp) in self.store.iter() {
            let score = default_component_score(comp, marker);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((*id, score));
            }
        }
        best.map(|(id, _)| id)
    }

    fn resolve_lookup(&self, target: ComponentTarget, name: &str) -> Option<ComponentId> {
        match target {
            ComponentTarget::All => self
                .store
                .iter()
                .find(|(_, comp)| comp.params.contains_key(name))
                .map(|(id, _)| *id),
            ComponentTarget::Default => self.default_component(),
            ComponentTarget::Id(id) => Some(id),
        }
    }

    fn resolve_known_component(&self, target: ComponentTarget, name: &str) -> ParamResult<ComponentId> {
        let id = match target {
            ComponentTarget::Default => self.default_component().ok_or(ParamError::NoDefaultComponent)?,
            ComponentTarget::Id(id) => id,
            ComponentTarget::All => ComponentId::ALL,
        };
        if self.store.get(id).is_none() {
            return Err(ParamError::UnknownParameter {
                component: target,
                name: name.to_string(),
            });
        }
        Ok(id)
    }

    /// True iff a confirmed value exists for the name.
    pub fn parameter_exists(&self, target: ComponentTarget, name: &str) -> bool {
        self.try_get_fact(target, name).is_some()
    }

    /// Returns the live fact, or `None` if the parameter is not confirmed.
    pub fn try_get_fact(&self, target: ComponentTarget, name: &str) -> Option<Arc<Fact>> {
        let component = self.resolve_lookup(target, name)?;
        self.store.get(component)?.fact(name).cloned()
    }

    /// Returns the live fact.
    ///
    /// # Panics
    /// Panics if the parameter does not exist. Callers check with
    /// [`ParameterLoader::parameter_exists`] first.
    pub fn get_fact(&self, target: ComponentTarget, name: &str) -> Arc<Fact> {
        match self.try_get_fact(target, name) {
            Some(fact) => fact,
            None => panic!("get_fact called for missing parameter {} on component {}", name, target),
        }
    }

    /// Names of all confirmed parameters in scope, sorted.
    pub fn parameter_names(&self, target: ComponentTarget) -> ParamResult<Vec<String>> {
        match target {
            ComponentTarget::All => {
                let names: BTreeSet<String> = self
                    .store
                    .iter()
                    .flat_map(|(_, comp)| comp.params.keys().cloned())
                    .collect();
                Ok(names.into_iter().collect())
            }
            single => {
                let id = self.resolve_known_component(single, "*")?;
                Ok(self
                    .store
                    .get(id)
                    .map(|comp| comp.params.keys().cloned().collect())
                    .unwrap_or_default())
            }
        }
    }

    /// Current group index of every component.
    pub fn group_map(&self) -> GroupMap {
        self.store
            .iter()
            .map(|(id, comp)| (*id, comp.groups.clone()))
            .collect()
    }

    pub fn status(&self) -> LoaderStatus {
        LoaderStatus {
            phase: self.phase,
            epoch: self.epoch,
            ready: self.is_ready(),
            missing_parameters: self.missing,
            progress: self.progress(),
            default_component: self.default_component(),
            components: self
                .store
                .iter()
                .map(|(id, comp)| ComponentStatus {
                    component: *id,
                    expected: comp.expected_count,
                    resolved: comp.resolved_count(),
                    pending_reads: comp.pending_index.len() + comp.pending_name.len(),
                    pending_writes: comp.pending_write.len(),
                    failed: comp.failed.len(),
                })
                .collect(),
        }
    }

    // =========================================================================
    // Text Import / Export
    // =========================================================================

    /// Serializes the mirror in the tab-separated parameter file format.
    pub fn export_text(&self) -> String {
        let vehicle_id = self.config.vehicle.id;
        let rows: Vec<ParamRow> = self
            .store
            .snapshot()
            .into_iter()
            .map(|(component, name, value)| ParamRow {
                vehicle_id,
                component,
                name,
                value,
            })
            .collect();
        text::format_export(vehicle_id, &rows)
    }

    /// Applies a parameter file through the normal write path.
    ///
    /// Bad lines are collected in the report; the rest are still applied.
    pub fn import_text(&mut self, document: &str) -> ImportReport {
        let vehicle_id = self.config.vehicle.id;
        let mut report = ImportReport::default();

        for (line, result) in text::parse_document(document) {
            let row = match result {
                Ok(row) => row,
                Err(e @ CoreError::MalformedLine { .. }) => {
                    report.errors.push(e.to_string());
                    continue;
                }
                Err(e) => {
                    report.errors.push(format!("Line {}: {}", line, e));
                    continue;
                }
            };

            if row.vehicle_id != vehicle_id {
                report.errors.push(format!(
                    "Line {}: vehicle id {} does not match vehicle {}",
                    line, row.vehicle_id, vehicle_id
                ));
                continue;
            }

            let Some(fact) = self.try_get_fact(ComponentTarget::Id(row.component), &row.name) else {
                report.errors.push(format!(
                    "Line {}: unknown parameter {} on component {}",
                    line, row.name, row.component
                ));
                continue;
            };

            if row.value.param_type() != fact.param_type() {
                report.errors.push(format!(
                    "Line {}: {} has type {} on the vehicle, file has {}",
                    line,
                    row.name,
                    fact.param_type(),
                    row.value.param_type()
                ));
                continue;
            }

            let value = match fact.metadata().validate(row.value) {
                Ok(value) => value,
                Err(e) => {
                    report.errors.push(format!("Line {}: {}", line, e));
                    continue;
                }
            };

            if fact.raw_value() == value {
                report.unchanged += 1;
            } else {
                self.issue_write(row.component, &row.name, value);
                report.applied += 1;
            }
        }

        info!(
            applied = report.applied,
            unchanged = report.unchanged,
            rejected = report.errors.len(),
            "Parameter file imported"
        );
        report
    }
}

/// Score used to pick the default component.
fn default_component_score(comp: &ComponentParams, marker: &str) -> u64 {
    let size = comp
        .expected_count
        .map(u64::from)
        .unwrap_or(comp.params.len() as u64);
    let marker_bonus = if comp.params.contains_key(marker) { 1u64 << 32 } else { 0 };
    size + marker_bonus
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use skyparam_core::parameter_set_hash;

    const VEHICLE: u8 = 1;
    const AUTOPILOT: ComponentId = ComponentId(1);
    const CAMERA: ComponentId = ComponentId(100);

    fn loader() -> (ParameterLoader, mpsc::UnboundedReceiver<WriteRequest>) {
        loader_with(SyncConfig::default())
    }

    fn loader_with(config: SyncConfig) -> (ParameterLoader, mpsc::UnboundedReceiver<WriteRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ParameterLoader::new(config, Arc::new(MetadataProvider::empty()), tx),
            rx,
        )
    }

    fn value_msg(component: ComponentId, name: &str, count: u16, index: Option<u16>, value: ParamValue) -> InboundMessage {
        InboundMessage::ParamValue(ParamValueNotification {
            vehicle_id: VEHICLE,
            component,
            name: name.to_string(),
            count,
            index,
            value,
        })
    }

    fn sent(actions: &[LoaderAction]) -> Vec<ParamCommand> {
        actions
            .iter()
            .filter_map(|a| match a {
                LoaderAction::Send(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    fn ready_events(actions: &[LoaderAction]) -> Vec<(u64, bool)> {
        actions
            .iter()
            .filter_map(|a| match a {
                LoaderAction::Emit(LoaderEvent::Ready {
                    epoch,
                    missing_parameters,
                }) => Some((*epoch, *missing_parameters)),
                _ => None,
            })
            .collect()
    }

    fn deliver_autopilot_set(l: &mut ParameterLoader) {
        l.handle_inbound(value_msg(AUTOPILOT, "CRUISE_SPEED", 3, Some(0), ParamValue::Float(10.0)));
        l.handle_inbound(value_msg(AUTOPILOT, "SYS_AUTOSTART", 3, Some(1), ParamValue::Int32(4001)));
        l.handle_inbound(value_msg(AUTOPILOT, "MIS_TAKEOFF_ALT", 3, Some(2), ParamValue::Float(2.5)));
    }

    /// Starts without cache, delivers a full three-parameter set and lets
    /// the link go quiet.
    fn loaded() -> (ParameterLoader, mpsc::UnboundedReceiver<WriteRequest>) {
        loaded_with(SyncConfig::default())
    }

    fn loaded_with(config: SyncConfig) -> (ParameterLoader, mpsc::UnboundedReceiver<WriteRequest>) {
        let (mut l, rx) = loader_with(config);
        l.start(None);
        deliver_autopilot_set(&mut l);
        l.handle_timer(TimerKind::WaitingParam);
        assert!(l.is_ready());
        l.take_actions();
        (l, rx)
    }

    fn storage_commits(actions: &[LoaderAction]) -> Vec<ComponentId> {
        sent(actions)
            .into_iter()
            .filter_map(|c| match c {
                ParamCommand::SaveToStorage { component } => Some(component),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_without_cache_requests_list() {
        let (mut l, _rx) = loader();
        l.start(None);
        assert_eq!(l.phase(), LoadPhase::BulkLoading);

        let actions = l.take_actions();
        assert_eq!(
            sent(&actions),
            vec![ParamCommand::RequestList {
                component: ComponentId::ALL
            }]
        );
        assert!(actions.contains(&LoaderAction::StartTimer(
            TimerKind::InitialRequest,
            Duration::from_millis(6000)
        )));
    }

    #[test]
    fn test_full_load_fires_ready_once_and_saves_cache() {
        let (mut l, _rx) = loader();
        l.start(None);
        l.handle_inbound(value_msg(AUTOPILOT, "A", 2, Some(0), ParamValue::Int32(1)));
        assert!(!l.is_ready());
        assert!((l.progress() - 0.5).abs() < f32::EPSILON);

        l.handle_inbound(value_msg(AUTOPILOT, "B", 2, Some(1), ParamValue::Int32(2)));
        assert!(ready_events(&l.take_actions()).is_empty());

        l.handle_timer(TimerKind::WaitingParam);
        let actions = l.take_actions();
        assert_eq!(ready_events(&actions), vec![(1, false)]);
        assert!(actions.iter().any(|a| matches!(a, LoaderAction::SaveCache(_))));

        // A duplicate report after readiness does not fire again
        l.handle_inbound(value_msg(AUTOPILOT, "B", 2, Some(1), ParamValue::Int32(2)));
        assert!(ready_events(&l.take_actions()).is_empty());
    }

    #[test]
    fn test_unanswered_index_fails_after_budget() {
        let (mut l, _rx) = loader();
        l.start(None);
        l.handle_inbound(value_msg(AUTOPILOT, "A", 3, Some(0), ParamValue::Int32(0)));
        l.handle_inbound(value_msg(AUTOPILOT, "C", 3, Some(2), ParamValue::Int32(2)));
        l.take_actions();

        let budget = l.config().retry.max_initial_load_retries;
        for attempt in 1..=budget {
            l.handle_timer(TimerKind::WaitingParam);
            let actions = l.take_actions();
            assert_eq!(
                sent(&actions),
                vec![ParamCommand::ReadByIndex {
                    component: AUTOPILOT,
                    index: 1
                }]
            );
            let retries = l.store().get(AUTOPILOT).unwrap().pending_index[&1];
            assert_eq!(retries, attempt);
            assert!(retries <= budget);
        }

        l.handle_timer(TimerKind::WaitingParam);
        let actions = l.take_actions();
        assert!(sent(&actions).is_empty());
        assert_eq!(ready_events(&actions), vec![(1, true)]);
        assert!(!actions.iter().any(|a| matches!(a, LoaderAction::SaveCache(_))));

        let comp = l.store().get(AUTOPILOT).unwrap();
        assert_eq!(comp.failed.iter().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(comp.index_to_name.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(comp.resolved_count() + comp.failed.len(), 3);
        assert!(l.missing_parameters());
    }

    #[test]
    fn test_late_answer_clears_failed_index() {
        let (mut l, _rx) = loader_with(SyncConfig {
            retry: crate::config::RetrySettings {
                max_initial_load_retries: 1,
                ..Default::default()
            },
            ..Default::default()
        });
        l.start(None);
        l.handle_inbound(value_msg(AUTOPILOT, "A", 2, Some(0), ParamValue::Int32(0)));
        l.handle_timer(TimerKind::WaitingParam);
        l.handle_timer(TimerKind::WaitingParam);
        assert!(l.is_ready());
        assert!(l.store().get(AUTOPILOT).unwrap().failed.contains(&1));

        l.handle_inbound(value_msg(AUTOPILOT, "B", 2, Some(1), ParamValue::Int32(1)));
        let comp = l.store().get(AUTOPILOT).unwrap();
        assert!(comp.failed.is_empty());
        assert!(comp.pending_index.is_empty());
    }

    #[test]
    fn test_retry_batch_is_capped() {
        let (mut l, _rx) = loader_with(SyncConfig {
            retry: crate::config::RetrySettings {
                max_batch_size: 2,
                ..Default::default()
            },
            ..Default::default()
        });
        l.start(None);
        l.handle_inbound(value_msg(AUTOPILOT, "A", 6, Some(0), ParamValue::Int32(0)));
        l.take_actions();

        l.handle_timer(TimerKind::WaitingParam);
        assert_eq!(
            sent(&l.take_actions()),
            vec![
                ParamCommand::ReadByIndex { component: AUTOPILOT, index: 1 },
                ParamCommand::ReadByIndex { component: AUTOPILOT, index: 2 },
            ]
        );
    }

    #[test]
    fn test_superseding_write_ignores_stale_echo() {
        let (mut l, _rx) = loaded();

        l.write_parameter_raw(ComponentTarget::Default, "CRUISE_SPEED", ParamValue::Float(12.5))
            .unwrap();
        l.write_parameter_raw(ComponentTarget::Default, "CRUISE_SPEED", ParamValue::Float(15.0))
            .unwrap();

        let comp = l.store().get(AUTOPILOT).unwrap();
        assert_eq!(comp.pending_write.len(), 1);
        let pending = &comp.pending_write["CRUISE_SPEED"];
        assert_eq!(pending.value, ParamValue::Float(15.0));
        assert_eq!(pending.retries, 0);

        // Echo of the superseded value does not resolve the write
        l.handle_inbound(value_msg(AUTOPILOT, "CRUISE_SPEED", 3, None, ParamValue::Float(12.5)));
        assert!(l.store().get(AUTOPILOT).unwrap().pending_write.contains_key("CRUISE_SPEED"));
        assert_eq!(
            l.get_fact(ComponentTarget::Default, "CRUISE_SPEED").raw_value(),
            ParamValue::Float(10.0)
        );

        l.handle_inbound(value_msg(AUTOPILOT, "CRUISE_SPEED", 3, None, ParamValue::Float(15.0)));
        assert!(l.store().get(AUTOPILOT).unwrap().pending_write.is_empty());
        assert_eq!(
            l.get_fact(ComponentTarget::Default, "CRUISE_SPEED").raw_value(),
            ParamValue::Float(15.0)
        );
    }

    #[test]
    fn test_adjusted_echo_wins_and_is_reported() {
        let (mut l, _rx) = loaded();
        l.write_parameter_raw(ComponentTarget::Id(AUTOPILOT), "CRUISE_SPEED", ParamValue::Float(12.5))
            .unwrap();
        l.take_actions();

        l.handle_inbound(value_msg(AUTOPILOT, "CRUISE_SPEED", 3, None, ParamValue::Float(12.0)));
        let actions = l.take_actions();
        assert!(actions.contains(&LoaderAction::Emit(LoaderEvent::WriteAdjusted {
            component: AUTOPILOT,
            name: "CRUISE_SPEED".into(),
            requested: ParamValue::Float(12.5),
            actual: ParamValue::Float(12.0),
        })));
        assert!(l.store().get(AUTOPILOT).unwrap().pending_write.is_empty());
        assert_eq!(
            l.get_fact(ComponentTarget::Default, "CRUISE_SPEED").raw_value(),
            ParamValue::Float(12.0)
        );
    }

    #[test]
    fn test_unanswered_write_is_abandoned() {
        let (mut l, _rx) = loaded();
        l.write_parameter_raw(ComponentTarget::Default, "SYS_AUTOSTART", ParamValue::Int32(4002))
            .unwrap();

        let budget = l.config().retry.max_read_write_retries;
        for _ in 0..budget {
            l.handle_timer(TimerKind::WaitingParam);
        }
        l.take_actions();
        l.handle_timer(TimerKind::WaitingParam);
        let actions = l.take_actions();
        assert!(actions.contains(&LoaderAction::Emit(LoaderEvent::WriteFailed {
            component: AUTOPILOT,
            name: "SYS_AUTOSTART".into(),
            value: ParamValue::Int32(4002),
        })));
        assert!(!l.store().has_pending());
    }

    #[test]
    fn test_invalid_write_sends_nothing() {
        let (mut l, _rx) = loaded();
        let err = l
            .write_parameter_raw(ComponentTarget::Default, "SYS_AUTOSTART", ParamValue::Float(1.5))
            .unwrap_err();
        assert!(err.is_validation_error());
        assert!(l.take_actions().is_empty());

        let err = l
            .write_parameter_raw(ComponentTarget::Default, "NOPE", ParamValue::Int32(1))
            .unwrap_err();
        assert!(matches!(err, ParamError::UnknownParameter { .. }));
    }

    #[test]
    fn test_fact_edits_reach_loader() {
        let (mut l, mut rx) = loaded();
        let fact = l.get_fact(ComponentTarget::Default, "CRUISE_SPEED");
        fact.set_raw_value(ParamValue::Float(11.0)).unwrap();

        let request = rx.try_recv().unwrap();
        l.handle_write_request(request);
        assert_eq!(
            sent(&l.take_actions()),
            vec![ParamCommand::Write {
                component: AUTOPILOT,
                name: "CRUISE_SPEED".into(),
                value: ParamValue::Float(11.0),
            }]
        );
    }

    #[test]
    fn test_cache_hash_match_skips_reads() {
        let (source, _rx) = loaded();
        let set = source.cache_snapshot();
        let hash = parameter_set_hash(
            set.params
                .iter()
                .map(|p| (p.component, p.name.as_str(), p.value)),
        );
        assert_eq!(set.hash, hash);

        let (mut l, _rx) = loader();
        l.start(Some(set));
        assert_eq!(l.phase(), LoadPhase::CacheProbe);
        l.handle_inbound(InboundMessage::ParamHash {
            vehicle_id: VEHICLE,
            component: AUTOPILOT,
            hash,
        });

        let actions = l.take_actions();
        assert!(sent(&actions).iter().all(|c| !c.is_read()));
        assert!(!sent(&actions)
            .iter()
            .any(|c| matches!(c, ParamCommand::RequestList { .. })));
        assert_eq!(ready_events(&actions), vec![(1, false)]);
        assert!(l.parameter_exists(ComponentTarget::Default, "SYS_AUTOSTART"));
    }

    #[test]
    fn test_cache_hash_mismatch_falls_through() {
        let (source, _rx) = loaded();
        let set = source.cache_snapshot();

        let (mut l, _rx) = loader();
        l.start(Some(set.clone()));
        l.handle_inbound(InboundMessage::ParamHash {
            vehicle_id: VEHICLE,
            component: AUTOPILOT,
            hash: set.hash.wrapping_add(1),
        });
        assert_eq!(l.phase(), LoadPhase::BulkLoading);
        assert!(sent(&l.take_actions()).contains(&ParamCommand::RequestList {
            component: ComponentId::ALL
        }));
    }

    #[test]
    fn test_cache_timer_falls_through() {
        let (source, _rx) = loaded();
        let (mut l, _rx) = loader();
        l.start(Some(source.cache_snapshot()));
        l.handle_timer(TimerKind::Cache);
        assert_eq!(l.phase(), LoadPhase::BulkLoading);
    }

    #[test]
    fn test_initial_request_is_resent_once_then_gives_up() {
        let (mut l, _rx) = loader();
        l.start(None);
        l.take_actions();

        l.handle_timer(TimerKind::InitialRequest);
        assert_eq!(
            sent(&l.take_actions()),
            vec![ParamCommand::RequestList {
                component: ComponentId::ALL
            }]
        );
        assert!(!l.is_ready());

        l.handle_timer(TimerKind::InitialRequest);
        let actions = l.take_actions();
        assert!(sent(&actions).is_empty());
        assert_eq!(ready_events(&actions), vec![(1, true)]);
    }

    #[test]
    fn test_refresh_all_twice_keeps_one_entry_per_index() {
        let (mut l, _rx) = loaded();
        l.refresh_all(ComponentTarget::All).unwrap();
        l.refresh_all(ComponentTarget::All).unwrap();

        assert_eq!(l.phase(), LoadPhase::BulkLoading);
        assert_eq!(l.epoch(), 3);
        let comp = l.store().get(AUTOPILOT).unwrap();
        assert_eq!(comp.pending_index.len(), 3);
        assert!(comp.pending_index.values().all(|r| *r == 0));

        // Names stay bound to their indices
        deliver_autopilot_set(&mut l);
        l.handle_timer(TimerKind::WaitingParam);
        assert_eq!(ready_events(&l.take_actions()), vec![(3, false)]);
    }

    #[test]
    fn test_refresh_parameter_does_not_touch_ready() {
        let (mut l, _rx) = loaded();
        l.refresh_parameter(ComponentTarget::Default, "CRUISE_SPEED").unwrap();
        assert!(l.is_ready());
        assert_eq!(
            sent(&l.take_actions()),
            vec![ParamCommand::ReadByName {
                component: AUTOPILOT,
                name: "CRUISE_SPEED".into()
            }]
        );

        l.handle_inbound(value_msg(AUTOPILOT, "CRUISE_SPEED", 3, None, ParamValue::Float(9.0)));
        assert!(l.store().get(AUTOPILOT).unwrap().pending_name.is_empty());
        assert!(ready_events(&l.take_actions()).is_empty());
    }

    #[test]
    fn test_refresh_prefix() {
        let (mut l, _rx) = loaded();
        assert_eq!(
            l.refresh_parameters_prefix(ComponentTarget::All, "MIS_").unwrap(),
            1
        );
        assert_eq!(
            l.refresh_parameters_prefix(ComponentTarget::Id(AUTOPILOT), "NONE_").unwrap(),
            0
        );
    }

    #[test]
    fn test_broadcast_sweep_waits_for_late_component() {
        let (mut l, _rx) = loader();
        l.start(None);
        l.handle_inbound(value_msg(CAMERA, "CAM_MODE", 1, Some(0), ParamValue::Int32(0)));
        assert!(!l.is_ready());
        assert!(l.take_actions().contains(&LoaderAction::StartTimer(
            TimerKind::WaitingParam,
            Duration::from_millis(1000)
        )));

        // The autopilot starts reporting before the link goes quiet
        l.handle_inbound(value_msg(AUTOPILOT, "CRUISE_SPEED", 3, Some(0), ParamValue::Float(10.0)));
        l.handle_timer(TimerKind::WaitingParam);
        assert!(!l.is_ready());
        assert_eq!(l.store().get(AUTOPILOT).unwrap().pending_index.len(), 2);

        l.handle_inbound(value_msg(AUTOPILOT, "SYS_AUTOSTART", 3, Some(1), ParamValue::Int32(4001)));
        l.handle_inbound(value_msg(AUTOPILOT, "MIS_TAKEOFF_ALT", 3, Some(2), ParamValue::Float(2.5)));
        assert!(!l.is_ready());
        l.take_actions();

        l.handle_timer(TimerKind::WaitingParam);
        let actions = l.take_actions();
        assert_eq!(ready_events(&actions), vec![(1, false)]);
        let saved = actions.iter().find_map(|a| match a {
            LoaderAction::SaveCache(set) => Some(set.params.len()),
            _ => None,
        });
        assert_eq!(saved, Some(4));
    }

    #[test]
    fn test_targeted_refresh_is_ready_on_last_value() {
        let (mut l, _rx) = loaded();
        l.refresh_all(ComponentTarget::Id(AUTOPILOT)).unwrap();
        deliver_autopilot_set(&mut l);
        assert_eq!(ready_events(&l.take_actions()), vec![(2, false)]);
    }

    #[test]
    fn test_cache_hit_status_counts_every_parameter_resolved() {
        let (source, _rx) = loaded();
        let set = source.cache_snapshot();

        let (mut l, _rx) = loader();
        l.start(Some(set.clone()));
        l.handle_inbound(InboundMessage::ParamHash {
            vehicle_id: VEHICLE,
            component: AUTOPILOT,
            hash: set.hash,
        });

        let status = l.status();
        assert!(status.ready);
        assert!(!status.missing_parameters);
        assert_eq!(
            status.components,
            vec![ComponentStatus {
                component: AUTOPILOT,
                expected: Some(3),
                resolved: 3,
                pending_reads: 0,
                pending_writes: 0,
                failed: 0,
            }]
        );
    }

    #[test]
    fn test_settled_writes_are_committed_to_storage() {
        let mut config = SyncConfig::default();
        config.vehicle.save_to_storage = true;
        let (mut l, _rx) = loaded_with(config);

        l.write_parameter_raw(ComponentTarget::Default, "CRUISE_SPEED", ParamValue::Float(12.5))
            .unwrap();
        l.write_parameter_raw(ComponentTarget::Default, "MIS_TAKEOFF_ALT", ParamValue::Float(5.0))
            .unwrap();
        l.take_actions();

        // One write still outstanding
        l.handle_inbound(value_msg(AUTOPILOT, "CRUISE_SPEED", 3, None, ParamValue::Float(12.5)));
        assert!(storage_commits(&l.take_actions()).is_empty());

        l.handle_inbound(value_msg(AUTOPILOT, "MIS_TAKEOFF_ALT", 3, None, ParamValue::Float(5.0)));
        assert_eq!(storage_commits(&l.take_actions()), vec![AUTOPILOT]);

        // A repeated echo has nothing left to commit
        l.handle_inbound(value_msg(AUTOPILOT, "MIS_TAKEOFF_ALT", 3, None, ParamValue::Float(5.0)));
        assert!(sent(&l.take_actions()).is_empty());
    }

    #[test]
    fn test_storage_commit_waits_for_abandoned_write() {
        let mut config = SyncConfig::default();
        config.vehicle.save_to_storage = true;
        let (mut l, _rx) = loaded_with(config);

        l.write_parameter_raw(ComponentTarget::Default, "CRUISE_SPEED", ParamValue::Float(12.5))
            .unwrap();
        l.write_parameter_raw(ComponentTarget::Default, "SYS_AUTOSTART", ParamValue::Int32(4002))
            .unwrap();
        l.handle_inbound(value_msg(AUTOPILOT, "CRUISE_SPEED", 3, None, ParamValue::Float(12.5)));
        l.take_actions();

        let budget = l.config().retry.max_read_write_retries;
        for _ in 0..budget {
            l.handle_timer(TimerKind::WaitingParam);
            assert!(storage_commits(&l.take_actions()).is_empty());
        }

        l.handle_timer(TimerKind::WaitingParam);
        assert_eq!(storage_commits(&l.take_actions()), vec![AUTOPILOT]);
    }

    #[test]
    fn test_storage_commit_is_off_by_default() {
        let (mut l, _rx) = loaded();
        l.write_parameter_raw(ComponentTarget::Default, "CRUISE_SPEED", ParamValue::Float(12.5))
            .unwrap();
        l.take_actions();

        l.handle_inbound(value_msg(AUTOPILOT, "CRUISE_SPEED", 3, None, ParamValue::Float(12.5)));
        assert!(sent(&l.take_actions()).is_empty());
    }

    #[test]
    fn test_periodic_refresh_starts_new_epoch() {
        let mut config = SyncConfig::default();
        config.timeouts.refresh_all_interval_secs = Some(60);
        let (mut l, _rx) = loader_with(config);
        l.start(None);
        deliver_autopilot_set(&mut l);
        l.handle_timer(TimerKind::WaitingParam);

        let actions = l.take_actions();
        assert_eq!(ready_events(&actions), vec![(1, false)]);
        assert!(actions.contains(&LoaderAction::StartTimer(
            TimerKind::RefreshAll,
            Duration::from_secs(60)
        )));

        l.handle_timer(TimerKind::RefreshAll);
        assert_eq!(l.epoch(), 2);
        assert_eq!(l.phase(), LoadPhase::BulkLoading);
        let actions = l.take_actions();
        assert!(actions.contains(&LoaderAction::StopTimer(TimerKind::RefreshAll)));
        assert!(sent(&actions).contains(&ParamCommand::RequestList {
            component: ComponentId::ALL
        }));

        // Only a ready loader refreshes
        l.handle_timer(TimerKind::RefreshAll);
        assert_eq!(l.epoch(), 2);
        assert!(l.take_actions().is_empty());

        deliver_autopilot_set(&mut l);
        l.handle_timer(TimerKind::WaitingParam);
        assert!(l.take_actions().contains(&LoaderAction::StartTimer(
            TimerKind::RefreshAll,
            Duration::from_secs(60)
        )));
    }

    #[test]
    fn test_conflicting_index_report_is_dropped() {
        let (mut l, _rx) = loaded();
        l.handle_inbound(value_msg(AUTOPILOT, "OTHER", 3, Some(0), ParamValue::Float(1.0)));

        assert!(!l.parameter_exists(ComponentTarget::All, "OTHER"));
        let comp = l.store().get(AUTOPILOT).unwrap();
        assert_eq!(comp.index_to_name[&0], "CRUISE_SPEED");
        assert_eq!(comp.params.len(), 3);
        assert!(!l.export_text().contains("OTHER"));
    }

    #[test]
    fn test_default_component_heuristic() {
        let (mut l, _rx) = loader();
        l.start(None);
        l.handle_inbound(value_msg(CAMERA, "CAM_MODE", 40, Some(0), ParamValue::Int32(0)));
        assert_eq!(l.default_component(), Some(CAMERA));

        l.handle_inbound(value_msg(AUTOPILOT, "SYS_AUTOSTART", 5, Some(0), ParamValue::Int32(0)));
        assert_eq!(l.default_component(), Some(AUTOPILOT));
    }

    #[test]
    fn test_default_component_override() {
        let mut config = SyncConfig::default();
        config.vehicle.default_component = Some(CAMERA.get());
        let (l, _rx) = loader_with(config);
        assert_eq!(l.default_component(), Some(CAMERA));
    }

    #[test]
    fn test_zero_count_component_is_complete() {
        let (mut l, _rx) = loader();
        l.start(None);
        l.handle_inbound(value_msg(CAMERA, "CAM_INFO", 0, None, ParamValue::Int32(0)));
        l.handle_timer(TimerKind::WaitingParam);
        assert!(l.is_ready());
        assert!(!l.missing_parameters());
    }

    #[test]
    fn test_unsolicited_and_out_of_range_indices_are_accepted() {
        let (mut l, _rx) = loaded();
        l.handle_inbound(value_msg(AUTOPILOT, "EXTRA", 3, Some(7), ParamValue::Uint8(1)));
        assert!(l.parameter_exists(ComponentTarget::Id(AUTOPILOT), "EXTRA"));
        assert_eq!(l.store().get(AUTOPILOT).unwrap().resolved_count(), 3);
    }

    #[test]
    fn test_duplicate_name_gets_generic_metadata() {
        let provider = MetadataProvider::from_toml_str(
            r#"
            version = 3
            [[group]]
            name = "Mission"
            [[group.parameter]]
            name = "DUP"
            type = "INT32"
            max = "5"
            "#,
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut l = ParameterLoader::new(SyncConfig::default(), Arc::new(provider), tx);
        l.start(None);
        l.handle_inbound(value_msg(AUTOPILOT, "DUP", 3, Some(0), ParamValue::Int32(1)));
        assert!(!l.get_fact(ComponentTarget::All, "DUP").metadata().is_generic);

        l.handle_inbound(value_msg(AUTOPILOT, "DUP", 3, Some(1), ParamValue::Int32(1)));
        let fact = l.get_fact(ComponentTarget::All, "DUP");
        assert!(fact.metadata().is_generic);
        assert_eq!(l.group_map()[&AUTOPILOT]["Default Group"], vec!["DUP".to_string()]);
        assert_eq!(l.store().get(AUTOPILOT).unwrap().pending_index.len(), 1);
    }

    #[test]
    fn test_other_vehicle_and_idle_messages_are_ignored() {
        let (mut l, _rx) = loader();
        l.handle_inbound(value_msg(AUTOPILOT, "A", 1, Some(0), ParamValue::Int32(0)));
        assert!(l.store().is_empty());

        l.start(None);
        l.handle_inbound(InboundMessage::ParamValue(ParamValueNotification {
            vehicle_id: 9,
            component: AUTOPILOT,
            name: "A".into(),
            count: 1,
            index: Some(0),
            value: ParamValue::Int32(0),
        }));
        assert!(l.store().is_empty());
    }

    #[test]
    fn test_groups_from_metadata() {
        let (l, _rx) = loaded();
        let groups = l.group_map();
        assert_eq!(groups[&AUTOPILOT]["Default Group"].len(), 3);
    }

    #[test]
    fn test_stop_resets_everything() {
        let (mut l, _rx) = loaded();
        l.stop();
        let actions = l.take_actions();
        for kind in TimerKind::ALL {
            assert!(actions.contains(&LoaderAction::StopTimer(kind)));
        }
        assert_eq!(l.phase(), LoadPhase::Idle);
        assert!(l.store().is_empty());
        assert!(matches!(
            l.refresh_all(ComponentTarget::All),
            Err(ParamError::NotStarted)
        ));
    }

    #[test]
    #[should_panic(expected = "missing parameter")]
    fn test_get_fact_on_missing_parameter_panics() {
        let (l, _rx) = loaded();
        l.get_fact(ComponentTarget::Default, "NOPE");
    }

    #[test]
    fn test_export_then_import_round_trip() {
        let (mut l, _rx) = loaded();
        let exported = l.export_text();
        assert!(exported.starts_with("# Onboard parameters for Vehicle 1\n"));

        let report = l.import_text(&exported);
        assert!(report.is_ok());
        assert_eq!(report.unchanged, 3);
        assert_eq!(report.applied, 0);
        assert!(sent(&l.take_actions()).is_empty());
    }

    #[test]
    fn test_import_reports_each_bad_line() {
        let (mut l, _rx) = loaded();
        let document = "# header\n\
                        1\t1\tCRUISE_SPEED\t14\t9\n\
                        2\t1\tCRUISE_SPEED\t14\t9\n\
                        1\t1\tNOPE\t1\t6\n\
                        1\t1\tSYS_AUTOSTART\t1\t9\n\
                        1\t1\tbroken\n\
                        1\t1\tMIS_TAKEOFF_ALT\t3.5\t9\n";
        let report = l.import_text(document);

        assert_eq!(report.applied, 2);
        assert_eq!(report.errors.len(), 4);
        let combined = report.error_string().unwrap();
        assert!(combined.contains("Line 3: vehicle id 2"));
        assert!(combined.contains("Line 4: unknown parameter NOPE"));
        assert!(combined.contains("Line 5: SYS_AUTOSTART has type int32"));
        assert!(combined.contains("Malformed parameter line 6"));

        let writes: Vec<String> = sent(&l.take_actions())
            .into_iter()
            .filter_map(|c| match c {
                ParamCommand::Write { name, .. } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec!["CRUISE_SPEED".to_string(), "MIS_TAKEOFF_ALT".to_string()]);
    }

    #[test]
    fn test_status_counts() {
        let (mut l, _rx) = loader();
        l.start(None);
        l.handle_inbound(value_msg(AUTOPILOT, "A", 4, Some(0), ParamValue::Int32(0)));
        let status = l.status();
        assert_eq!(status.phase, LoadPhase::BulkLoading);
        assert_eq!(status.components.len(), 1);
        assert_eq!(status.components[0].expected, Some(4));
        assert_eq!(status.components[0].resolved, 1);
        assert_eq!(status.components[0].pending_reads, 3);
    }

    #[test]
    fn test_parameter_names() {
        let (l, _rx) = loaded();
        assert_eq!(
            l.parameter_names(ComponentTarget::Default).unwrap(),
            vec!["CRUISE_SPEED", "MIS_TAKEOFF_ALT", "SYS_AUTOSTART"]
        );
        assert!(l.parameter_names(ComponentTarget::Id(CAMERA)).is_err());
    }
}
