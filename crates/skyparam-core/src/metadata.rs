//! # Parameter Metadata
//!
//! Static description of a parameter: declared type, validation rules,
//! default value, enum labels and display hints.
//!
//! Metadata is owned by the metadata provider and shared (never copied per
//! update) by every live parameter that refers to it. A parameter the
//! provider does not know gets [`ParameterMetadata::generic`], which accepts
//! any value its type can hold.

use serde::{Deserialize, Serialize};

use crate::error::ValidationResult;
use crate::types::{ParamType, ParamValue};
use crate::validation;

/// Group assigned to parameters without a declared group.
pub const DEFAULT_GROUP: &str = "Default Group";

/// A single enum value and its label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    pub value: ParamValue,
    pub label: String,
}

/// Type, validation rules and display hints for one parameter name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterMetadata {
    pub name: String,
    pub param_type: ParamType,

    /// Inclusive lower bound.
    pub min: Option<ParamValue>,

    /// Inclusive upper bound.
    pub max: Option<ParamValue>,

    pub default: Option<ParamValue>,
    pub enum_values: Vec<EnumValue>,

    /// Number of decimal places to show.
    pub decimal_places: Option<u8>,

    /// Vehicle must reboot before a change takes effect.
    pub reboot_required: bool,

    pub group: String,
    pub units: Option<String>,
    pub short_description: Option<String>,
    pub long_description: Option<String>,

    /// True when built as a fallback for a name with no definition.
    pub is_generic: bool,
}

impl ParameterMetadata {
    /// Creates permissive fallback metadata for an unknown (or untrusted) name.
    pub fn generic(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            min: None,
            max: None,
            default: None,
            enum_values: Vec::new(),
            decimal_places: None,
            reboot_required: false,
            group: DEFAULT_GROUP.to_string(),
            units: None,
            short_description: None,
            long_description: None,
            is_generic: true,
        }
    }

    /// Converts `value` to the declared type and checks it against min/max.
    pub fn validate(&self, value: ParamValue) -> ValidationResult<ParamValue> {
        validation::validate_value(self, value)
    }

    /// Parses `text` as the declared type and checks it against min/max.
    pub fn validate_text(&self, text: &str) -> ValidationResult<ParamValue> {
        let value = ParamValue::parse(self.param_type, text)?;
        validation::validate_value(self, value)
    }

    /// Returns the enum label for a value, if one is defined.
    pub fn enum_label(&self, value: &ParamValue) -> Option<&str> {
        self.enum_values
            .iter()
            .find(|e| e.value.same_value(value))
            .map(|e| e.label.as_str())
    }
}
