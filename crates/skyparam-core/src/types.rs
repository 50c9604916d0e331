//! # Domain Types
//!
//! Core domain types used throughout SkyParam.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  ComponentId    │   │   ParamType     │   │   ParamValue    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  u8 on the wire │   │  Uint8..Int32   │   │  Uint8(u8)      │       │
//! │  │  0 = broadcast  │   │  Float, Double  │   │  Float(f32) ... │       │
//! │  │                 │   │  wire codes     │   │  typed scalar   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────┐                       │
//! │  │  ComponentTarget                            │                       │
//! │  │  ─────────────                              │                       │
//! │  │  All      - every component (broadcast)     │                       │
//! │  │  Default  - heuristic primary component     │                       │
//! │  │  Id(c)    - one component                   │                       │
//! │  └─────────────────────────────────────────────┘                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Conversion Rules
//! Values are converted between types without clamping. A conversion that
//! would lose the integer part, change the sign, or overflow is rejected.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError, ValidationResult};

// =============================================================================
// Component Identity
// =============================================================================

/// Identifier of an addressable sub-unit of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub u8);

impl ComponentId {
    /// Wire value addressing every component at once.
    pub const ALL: ComponentId = ComponentId(0);

    /// Returns the raw wire value.
    #[inline]
    pub const fn get(&self) -> u8 {
        self.0
    }

    /// Returns true for the broadcast id.
    #[inline]
    pub const fn is_broadcast(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Component addressing used by the public engine operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ComponentTarget {
    /// Every component.
    All,
    /// The default (primary) component, chosen heuristically.
    #[default]
    Default,
    /// A specific component.
    Id(ComponentId),
}

impl From<ComponentId> for ComponentTarget {
    fn from(id: ComponentId) -> Self {
        if id.is_broadcast() {
            ComponentTarget::All
        } else {
            ComponentTarget::Id(id)
        }
    }
}

impl std::fmt::Display for ComponentTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentTarget::All => write!(f, "all"),
            ComponentTarget::Default => write!(f, "default"),
            ComponentTarget::Id(id) => write!(f, "{}", id),
        }
    }
}

// =============================================================================
// Parameter Type
// =============================================================================

/// Declared scalar type of a parameter.
///
/// Wire codes follow the telemetry protocol's parameter type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float,
    Double,
}

impl ParamType {
    /// Every supported type.
    pub const ALL: [ParamType; 8] = [
        ParamType::Uint8,
        ParamType::Int8,
        ParamType::Uint16,
        ParamType::Int16,
        ParamType::Uint32,
        ParamType::Int32,
        ParamType::Float,
        ParamType::Double,
    ];

    /// Returns the wire type code.
    pub const fn code(&self) -> u8 {
        match self {
            ParamType::Uint8 => 1,
            ParamType::Int8 => 2,
            ParamType::Uint16 => 3,
            ParamType::Int16 => 4,
            ParamType::Uint32 => 5,
            ParamType::Int32 => 6,
            ParamType::Float => 9,
            ParamType::Double => 10,
        }
    }

    /// Looks up a type by wire code.
    pub fn from_code(code: u8) -> CoreResult<Self> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.code() == code)
            .ok_or(CoreError::UnknownTypeCode(code))
    }

    /// Returns true for the integer types.
    pub const fn is_integer(&self) -> bool {
        !matches!(self, ParamType::Float | ParamType::Double)
    }

    /// Inclusive integer range of the type, `None` for floating point.
    pub const fn integer_range(&self) -> Option<(i64, i64)> {
        match self {
            ParamType::Uint8 => Some((0, u8::MAX as i64)),
            ParamType::Int8 => Some((i8::MIN as i64, i8::MAX as i64)),
            ParamType::Uint16 => Some((0, u16::MAX as i64)),
            ParamType::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            ParamType::Uint32 => Some((0, u32::MAX as i64)),
            ParamType::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            ParamType::Float | ParamType::Double => None,
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParamType::Uint8 => "uint8",
            ParamType::Int8 => "int8",
            ParamType::Uint16 => "uint16",
            ParamType::Int16 => "int16",
            ParamType::Uint32 => "uint32",
            ParamType::Int32 => "int32",
            ParamType::Float => "float",
            ParamType::Double => "double",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for ParamType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uint8" => Ok(ParamType::Uint8),
            "int8" => Ok(ParamType::Int8),
            "uint16" => Ok(ParamType::Uint16),
            "int16" => Ok(ParamType::Int16),
            "uint32" => Ok(ParamType::Uint32),
            "int32" => Ok(ParamType::Int32),
            "float" | "real32" => Ok(ParamType::Float),
            "double" | "real64" => Ok(ParamType::Double),
            other => Err(CoreError::UnknownTypeName(other.to_string())),
        }
    }
}

// =============================================================================
// Parameter Value
// =============================================================================

/// A typed raw parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Uint8(u8),
    Int8(i8),
    Uint16(u16),
    Int16(i16),
    Uint32(u32),
    Int32(i32),
    Float(f32),
    Double(f64),
}

impl ParamValue {
    /// Returns the declared type of this value.
    pub const fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Uint8(_) => ParamType::Uint8,
            ParamValue::Int8(_) => ParamType::Int8,
            ParamValue::Uint16(_) => ParamType::Uint16,
            ParamValue::Int16(_) => ParamType::Int16,
            ParamValue::Uint32(_) => ParamType::Uint32,
            ParamValue::Int32(_) => ParamType::Int32,
            ParamValue::Float(_) => ParamType::Float,
            ParamValue::Double(_) => ParamType::Double,
        }
    }

    /// Returns the value widened to f64 (for comparisons and display).
    pub fn as_f64(&self) -> f64 {
        match *self {
            ParamValue::Uint8(v) => v as f64,
            ParamValue::Int8(v) => v as f64,
            ParamValue::Uint16(v) => v as f64,
            ParamValue::Int16(v) => v as f64,
            ParamValue::Uint32(v) => v as f64,
            ParamValue::Int32(v) => v as f64,
            ParamValue::Float(v) => v as f64,
            ParamValue::Double(v) => v,
        }
    }

    /// Returns the value as i64 for integer types.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ParamValue::Uint8(v) => Some(v as i64),
            ParamValue::Int8(v) => Some(v as i64),
            ParamValue::Uint16(v) => Some(v as i64),
            ParamValue::Int16(v) => Some(v as i64),
            ParamValue::Uint32(v) => Some(v as i64),
            ParamValue::Int32(v) => Some(v as i64),
            ParamValue::Float(_) | ParamValue::Double(_) => None,
        }
    }

    /// Little-endian bytes of the value in its declared width.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match *self {
            ParamValue::Uint8(v) => v.to_le_bytes().to_vec(),
            ParamValue::Int8(v) => v.to_le_bytes().to_vec(),
            ParamValue::Uint16(v) => v.to_le_bytes().to_vec(),
            ParamValue::Int16(v) => v.to_le_bytes().to_vec(),
            ParamValue::Uint32(v) => v.to_le_bytes().to_vec(),
            ParamValue::Int32(v) => v.to_le_bytes().to_vec(),
            ParamValue::Float(v) => v.to_le_bytes().to_vec(),
            ParamValue::Double(v) => v.to_le_bytes().to_vec(),
        }
    }

    /// Builds a value of `ty` from an integer, rejecting anything out of range.
    pub fn from_i64(ty: ParamType, v: i64) -> ValidationResult<Self> {
        let Some((min, max)) = ty.integer_range() else {
            return Self::from_f64(ty, v as f64);
        };
        if v < min || v > max {
            return Err(ValidationError::Conversion {
                value: v.to_string(),
                ty,
            });
        }
        // Range checked above, the casts are lossless.
        Ok(match ty {
            ParamType::Uint8 => ParamValue::Uint8(v as u8),
            ParamType::Int8 => ParamValue::Int8(v as i8),
            ParamType::Uint16 => ParamValue::Uint16(v as u16),
            ParamType::Int16 => ParamValue::Int16(v as i16),
            ParamType::Uint32 => ParamValue::Uint32(v as u32),
            ParamType::Int32 => ParamValue::Int32(v as i32),
            ParamType::Float | ParamType::Double => unreachable!("floating types have no integer range"),
        })
    }

    /// Builds a value of `ty` from a float.
    ///
    /// ## Rules
    /// - Non-finite values are rejected
    /// - Integer types reject fractional values
    /// - Values outside the type's range are rejected, never clamped
    pub fn from_f64(ty: ParamType, v: f64) -> ValidationResult<Self> {
        let conversion = || ValidationError::Conversion {
            value: v.to_string(),
            ty,
        };

        if !v.is_finite() {
            return Err(conversion());
        }

        match ty {
            ParamType::Float => {
                if v.abs() > f32::MAX as f64 {
                    return Err(conversion());
                }
                Ok(ParamValue::Float(v as f32))
            }
            ParamType::Double => Ok(ParamValue::Double(v)),
            _ => {
                if v.fract() != 0.0 || v < i64::MIN as f64 || v > i64::MAX as f64 {
                    return Err(conversion());
                }
                Self::from_i64(ty, v as i64)
            }
        }
    }

    /// Parses text as a value of `ty`.
    ///
    /// ## Example
    /// ```rust
    /// use skyparam_core::{ParamType, ParamValue};
    ///
    /// assert_eq!(ParamValue::parse(ParamType::Uint8, "12").unwrap(), ParamValue::Uint8(12));
    /// assert!(ParamValue::parse(ParamType::Uint8, "-1").is_err());
    /// assert!(ParamValue::parse(ParamType::Int32, "1.5").is_err());
    /// ```
    pub fn parse(ty: ParamType, text: &str) -> ValidationResult<Self> {
        let text = text.trim();
        let not_a_number = || ValidationError::NotANumber {
            text: text.to_string(),
            ty,
        };

        if ty.is_integer() {
            match text.parse::<i64>() {
                Ok(v) => Self::from_i64(ty, v),
                // "5.0" is still a valid integer, "5.5" is not
                Err(_) => {
                    let v = text.parse::<f64>().map_err(|_| not_a_number())?;
                    Self::from_f64(ty, v)
                }
            }
        } else {
            let v = text.parse::<f64>().map_err(|_| not_a_number())?;
            Self::from_f64(ty, v)
        }
    }

    /// Converts this value to another declared type.
    pub fn convert_to(&self, ty: ParamType) -> ValidationResult<Self> {
        if self.param_type() == ty {
            return Ok(*self);
        }
        match self.as_i64() {
            Some(v) => Self::from_i64(ty, v),
            None => Self::from_f64(ty, self.as_f64()),
        }
    }

    /// Compares two values after converting `other` to this value's type.
    pub fn same_value(&self, other: &ParamValue) -> bool {
        match other.convert_to(self.param_type()) {
            Ok(converted) => converted == *self,
            Err(_) => false,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Uint8(v) => write!(f, "{}", v),
            ParamValue::Int8(v) => write!(f, "{}", v),
            ParamValue::Uint16(v) => write!(f, "{}", v),
            ParamValue::Int16(v) => write!(f, "{}", v),
            ParamValue::Uint32(v) => write!(f, "{}", v),
            ParamValue::Int32(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Double(v) => write!(f, "{}", v),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
