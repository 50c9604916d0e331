//! # Parameter Protocol Messages
//!
//! Message types exchanged between the engine and the telemetry link.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Parameter Protocol Messages                          │
//! │                                                                         │
//! │  CACHE PROBE                                                           │
//! │  ───────────                                                           │
//! │  ENGINE  ───► RequestHash { component }                                │
//! │  VEHICLE ◄─── ParamHash { component, hash }                            │
//! │               (or a ParamValue named _HASH_CHECK)                      │
//! │                                                                         │
//! │  BULK LOAD                                                             │
//! │  ─────────                                                             │
//! │  ENGINE  ───► RequestList { component }                                │
//! │  VEHICLE ◄─── ParamValue { index: 0..count, count, name, value } ...   │
//! │  ENGINE  ───► ReadByIndex { component, index }      (retries)          │
//! │                                                                         │
//! │  SINGLE READ / WRITE                                                   │
//! │  ───────────────────                                                   │
//! │  ENGINE  ───► ReadByName { component, name }                           │
//! │  ENGINE  ───► Write { component, name, value }                         │
//! │  VEHICLE ◄─── ParamValue { index: None, name, value }   (reply / echo) │
//! │  ENGINE  ───► SaveToStorage { component }     (after writes settle)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Messages serialize as adjacently tagged JSON:
//! ```json
//! { "type": "ReadByIndex", "payload": { "component": 1, "index": 4 } }
//! ```

use serde::{Deserialize, Serialize};
use skyparam_core::{ComponentId, ParamValue, HASH_CHECK_PARAM};

// =============================================================================
// Outbound Commands
// =============================================================================

/// Commands the engine asks the link to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ParamCommand {
    /// Ask a component (or every component, with the broadcast id) for its
    /// full parameter list.
    RequestList { component: ComponentId },

    /// Read one parameter by its position in the component's list.
    ReadByIndex { component: ComponentId, index: u16 },

    /// Read one parameter by name.
    ReadByName { component: ComponentId, name: String },

    /// Set a parameter. The vehicle answers with a value echo.
    Write {
        component: ComponentId,
        name: String,
        value: ParamValue,
    },

    /// Ask for the parameter-set hash.
    RequestHash { component: ComponentId },

    /// Commit the component's current parameters to persistent storage.
    SaveToStorage { component: ComponentId },
}

impl ParamCommand {
    /// Returns the command type name as a string (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamCommand::RequestList { .. } => "RequestList",
            ParamCommand::ReadByIndex { .. } => "ReadByIndex",
            ParamCommand::ReadByName { .. } => "ReadByName",
            ParamCommand::Write { .. } => "Write",
            ParamCommand::RequestHash { .. } => "RequestHash",
            ParamCommand::SaveToStorage { .. } => "SaveToStorage",
        }
    }

    /// Component the command is addressed to.
    pub fn component(&self) -> ComponentId {
        match self {
            ParamCommand::RequestList { component }
            | ParamCommand::ReadByIndex { component, .. }
            | ParamCommand::ReadByName { component, .. }
            | ParamCommand::Write { component, .. }
            | ParamCommand::RequestHash { component }
            | ParamCommand::SaveToStorage { component } => *component,
        }
    }

    /// True for the single-parameter read commands.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            ParamCommand::ReadByIndex { .. } | ParamCommand::ReadByName { .. }
        )
    }

    /// Serializes to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// =============================================================================
// Inbound Notifications
// =============================================================================

/// One parameter value reported by the vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamValueNotification {
    pub vehicle_id: u8,
    pub component: ComponentId,
    pub name: String,

    /// Total parameters on this component.
    pub count: u16,

    /// Position in the component's list. `None` for by-name replies and
    /// write echoes.
    pub index: Option<u16>,

    pub value: ParamValue,
}

/// Notifications the link delivers to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum InboundMessage {
    ParamValue(ParamValueNotification),

    /// Parameter-set hash of a component.
    ParamHash {
        vehicle_id: u8,
        component: ComponentId,
        hash: u32,
    },
}

impl InboundMessage {
    /// Returns the message type name as a string (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            InboundMessage::ParamValue(_) => "ParamValue",
            InboundMessage::ParamHash { .. } => "ParamHash",
        }
    }

    /// Vehicle that sent the message.
    pub fn vehicle_id(&self) -> u8 {
        match self {
            InboundMessage::ParamValue(n) => n.vehicle_id,
            InboundMessage::ParamHash { vehicle_id, .. } => *vehicle_id,
        }
    }

    /// Rewrites a `_HASH_CHECK` value report into a [`InboundMessage::ParamHash`].
    ///
    /// The hash travels as the raw 32 bits of the value, whatever its
    /// declared type.
    pub fn normalize(self) -> Self {
        match self {
            InboundMessage::ParamValue(n) if n.name == HASH_CHECK_PARAM => {
                let hash = match n.value {
                    ParamValue::Uint32(v) => v,
                    ParamValue::Int32(v) => v as u32,
                    ParamValue::Float(v) => v.to_bits(),
                    other => other.as_f64() as u32,
                };
                InboundMessage::ParamHash {
                    vehicle_id: n.vehicle_id,
                    component: n.component,
                    hash,
                }
            }
            other => other,
        }
    }
}
