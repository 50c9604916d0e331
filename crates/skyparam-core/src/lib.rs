//! # skyparam-core: Pure Parameter Logic for SkyParam
//!
//! This crate holds everything about vehicle parameters that does not need
//! a link, a clock or a disk: identities, typed values, conversion rules,
//! metadata, the text file format and the parameter-set fingerprint.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SkyParam Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 UI / apps (skyparam-sim)                        │   │
//! │  │    Param editor ──► Fact ──► write_parameter_raw                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ EngineHandle                           │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              skyparam-sync (engine owner task)                  │   │
//! │  │    Loader state machine, retries, timers, cache, metadata       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ skyparam-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ metadata  │  │   text    │  │   hash    │  │   │
//! │  │   │ ParamType │  │ min / max │  │  export   │  │  CRC-32   │  │   │
//! │  │   │ParamValue │  │   enums   │  │  import   │  │ fast path │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO TIMERS • NO NETWORK • PURE FUNCTIONS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Component ids, parameter types and typed raw values
//! - [`metadata`] - Per-name type, range, enum and display information
//! - [`validation`] - Write-boundary conversion and range checks
//! - [`text`] - Tab-separated parameter file format
//! - [`hash`] - Parameter-set fingerprint
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: same input, same output
//! 2. **No Clamping**: out-of-range or unrepresentable values are rejected
//! 3. **Explicit Errors**: typed errors, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use skyparam_core::{ParameterMetadata, ParamType, ParamValue};
//!
//! let meta = ParameterMetadata {
//!     max: Some(ParamValue::Float(30.0)),
//!     ..ParameterMetadata::generic("CRUISE_SPEED", ParamType::Float)
//! };
//!
//! assert_eq!(meta.validate_text("12.5").unwrap(), ParamValue::Float(12.5));
//! assert!(meta.validate_text("45").is_err());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod hash;
pub mod metadata;
pub mod text;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError, ValidationResult};
pub use hash::parameter_set_hash;
pub use metadata::{EnumValue, ParameterMetadata, DEFAULT_GROUP};
pub use text::ParamRow;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Pseudo parameter the vehicle uses to report its parameter-set hash.
///
/// It is never stored as a regular parameter.
pub const HASH_CHECK_PARAM: &str = "_HASH_CHECK";

/// Maximum length of a parameter name on the wire.
pub const MAX_PARAM_NAME_LEN: usize = 16;
