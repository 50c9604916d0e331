//! # Validation Module
//!
//! Write-boundary validation for parameter values.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Write Validation                                   │
//! │                                                                         │
//! │  Step 1: Conversion                                                     │
//! │  ├── Value converted to the declared type                              │
//! │  └── Negative → unsigned, fraction → integer, overflow: REJECTED       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Step 2: Range                                                          │
//! │  ├── Inclusive metadata min/max                                        │
//! │  └── Outside range: REJECTED (never clamped)                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Only now is a write command issued                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{ValidationError, ValidationResult};
use crate::metadata::ParameterMetadata;
use crate::types::ParamValue;
use crate::MAX_PARAM_NAME_LEN;

/// Converts `value` to the metadata's type and checks it against min/max.
///
/// ## Example
/// ```rust
/// use skyparam_core::{ParameterMetadata, ParamType, ParamValue};
/// use skyparam_core::validation::validate_value;
///
/// let meta = ParameterMetadata::generic("RATE", ParamType::Uint8);
/// assert_eq!(validate_value(&meta, ParamValue::Int32(5)).unwrap(), ParamValue::Uint8(5));
/// assert!(validate_value(&meta, ParamValue::Int32(-5)).is_err());
/// ```
pub fn validate_value(meta: &ParameterMetadata, value: ParamValue) -> ValidationResult<ParamValue> {
    let converted = value.convert_to(meta.param_type)?;
    let v = converted.as_f64();

    let below = meta.min.map(|min| v < min.as_f64()).unwrap_or(false);
    let above = meta.max.map(|max| v > max.as_f64()).unwrap_or(false);

    if below || above {
        return Err(ValidationError::OutOfRange {
            name: meta.name.clone(),
            value: converted.to_string(),
            min: bound_text(meta.min),
            max: bound_text(meta.max),
        });
    }

    Ok(converted)
}

fn bound_text(bound: Option<ParamValue>) -> String {
    bound.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Checks a parameter name against the wire limits.
///
/// ## Rules
/// - Must not be empty
/// - At most 16 bytes
/// - Printable ASCII without whitespace
pub fn is_valid_param_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_PARAM_NAME_LEN
        && name.bytes().all(|b| b.is_ascii_graphic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParamType;

    #[test]
    fn test_range_is_inclusive() {
        let meta = ParameterMetadata {
            min: Some(ParamValue::Int16(-10)),
            max: Some(ParamValue::Int16(10)),
            ..ParameterMetadata::generic("TRIM", ParamType::Int16)
        };
        assert!(validate_value(&meta, ParamValue::Int16(-10)).is_ok());
        assert!(validate_value(&meta, ParamValue::Int16(10)).is_ok());

        let err = validate_value(&meta, ParamValue::Int16(11)).unwrap_err();
        assert_eq!(err.to_string(), "TRIM must be between -10 and 10, got 11");
    }

    #[test]
    fn test_conversion_failure_is_not_clamped() {
        let meta = ParameterMetadata::generic("COUNT", ParamType::Uint8);
        let err = validate_value(&meta, ParamValue::Int32(300)).unwrap_err();
        assert!(matches!(err, ValidationError::Conversion { .. }));
    }

    #[test]
    fn test_param_names() {
        assert!(is_valid_param_name("CRUISE_SPEED"));
        assert!(is_valid_param_name("_HASH_CHECK"));
        assert!(!is_valid_param_name(""));
        assert!(!is_valid_param_name("HAS SPACE"));
        assert!(!is_valid_param_name("THIS_NAME_IS_TOO_LONG"));
    }
}
