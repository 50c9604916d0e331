//! # Error Types
//!
//! Domain-specific error types for skyparam-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  skyparam-core errors (this file)                                      │
//! │  ├── CoreError        - Text format and lookup failures                │
//! │  └── ValidationError  - Value conversion / range failures              │
//! │                                                                         │
//! │  skyparam-sync errors (separate crate)                                 │
//! │  └── ParamError       - Engine, config and cache failures              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → ParamError → caller               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (name, type, value)
//! 3. Errors are enum variants, never String
//! 4. Values are rejected, never silently clamped

use thiserror::Error;

use crate::types::ParamType;

// =============================================================================
// Core Error
// =============================================================================

/// Core parameter logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A line of a parameter text file could not be parsed.
    ///
    /// ## When This Occurs
    /// - Wrong number of tab-separated columns
    /// - Non-numeric vehicle/component id
    /// - Unknown type code
    #[error("Malformed parameter line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },

    /// Unknown parameter type code on the wire.
    #[error("Unknown parameter type code: {0}")]
    UnknownTypeCode(u8),

    /// Unknown parameter type name in a definitions file.
    #[error("Unknown parameter type: {0}")]
    UnknownTypeName(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Value conversion and validation errors.
///
/// These are raised synchronously at the write boundary, before any
/// command reaches the link.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// The text is not a number of the requested type.
    #[error("'{text}' is not a valid {ty} value")]
    NotANumber { text: String, ty: ParamType },

    /// The value cannot be represented in the requested type.
    ///
    /// ## When This Occurs
    /// - Negative value written to an unsigned parameter
    /// - Fractional value written to an integer parameter
    /// - Value larger than the type can hold
    #[error("{value} cannot be converted to {ty}")]
    Conversion { value: String, ty: ParamType },

    /// The value is outside the inclusive min/max of the metadata.
    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        name: String,
        value: String,
        min: String,
        max: String,
    },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Unit Tests
// =============================================================================
