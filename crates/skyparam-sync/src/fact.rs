//! # Fact
//!
//! The live, observable value of one parameter.
//!
//! ```text
//!   vehicle echo ──► engine ──► Fact::update_from_remote ──► watch ──► UI
//!   UI edit ──► Fact::set_raw_value ──► validate ──► write queue ──► engine
//! ```
//!
//! A fact never touches engine state directly. Edits are validated on the
//! caller's thread and handed to the engine over an unbounded channel; the
//! engine is the only writer of the displayed value.

use skyparam_core::{ComponentId, ParamType, ParamValue, ParameterMetadata};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::{ParamError, ParamResult};

/// A validated write handed from a fact to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub component: ComponentId,
    pub name: String,
    pub value: ParamValue,
}

/// Live value of one (component, name) parameter.
#[derive(Debug)]
pub struct Fact {
    component: ComponentId,
    name: String,
    metadata: RwLock<Arc<ParameterMetadata>>,
    value_tx: watch::Sender<ParamValue>,
    write_tx: mpsc::UnboundedSender<WriteRequest>,
}

impl Fact {
    pub(crate) fn new(
        component: ComponentId,
        name: impl Into<String>,
        value: ParamValue,
        metadata: Arc<ParameterMetadata>,
        write_tx: mpsc::UnboundedSender<WriteRequest>,
    ) -> Self {
        let (value_tx, _) = watch::channel(value);
        Self {
            component,
            name: name.into(),
            metadata: RwLock::new(metadata),
            value_tx,
            write_tx,
        }
    }

    pub fn component(&self) -> ComponentId {
        self.component
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_type(&self) -> ParamType {
        self.metadata().param_type
    }

    pub fn metadata(&self) -> Arc<ParameterMetadata> {
        self.metadata
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swaps in new metadata (used when a definition stops being trusted).
    pub(crate) fn replace_metadata(&self, metadata: Arc<ParameterMetadata>) {
        *self
            .metadata
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = metadata;
    }

    /// Current value as last reported by the vehicle.
    pub fn raw_value(&self) -> ParamValue {
        *self.value_tx.borrow()
    }

    /// Enum label of the current value, if the metadata defines one.
    pub fn enum_label(&self) -> Option<String> {
        self.metadata()
            .enum_label(&self.raw_value())
            .map(str::to_string)
    }

    /// Subscribes to value changes.
    pub fn subscribe(&self) -> watch::Receiver<ParamValue> {
        self.value_tx.subscribe()
    }

    /// Validates `value` and queues a write to the vehicle.
    ///
    /// Returns the converted value that was queued. Invalid values are
    /// rejected here and generate no traffic.
    pub fn set_raw_value(&self, value: ParamValue) -> ParamResult<ParamValue> {
        let value = self.metadata().validate(value)?;
        debug!(component = %self.component, name = %self.name, %value, "Queueing write");
        self.write_tx
            .send(WriteRequest {
                component: self.component,
                name: self.name.clone(),
                value,
            })
            .map_err(|_| ParamError::ShuttingDown)?;
        Ok(value)
    }

    /// Parses `text` as the parameter's type, then behaves like
    /// [`Fact::set_raw_value`].
    pub fn set_raw_value_from_text(&self, text: &str) -> ParamResult<ParamValue> {
        let value = self.metadata().validate_text(text)?;
        self.set_raw_value(value)
    }

    /// Stores a value reported by the vehicle. Never issues a write.
    pub(crate) fn update_from_remote(&self, value: ParamValue) {
        self.value_tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}
