//! Value and data-type vocabulary shared by the read and write paths

use serde::{Deserialize, Serialize};

// ============================================================================
// Property Value
// ============================================================================

/// Value carried by a property, either user-facing or device-level
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Null,
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<u16> for PropertyValue {
    fn from(v: u16) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl PropertyValue {
    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::String(s) => s.trim().parse().ok(),
            Self::Null => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) => Some(f.round() as i64),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::String(s) => s.trim().parse().ok(),
            Self::Null => None,
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Integer(i) => Some(*i != 0),
            Self::Float(f) => Some(*f != 0.0),
            Self::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "on" => Some(true),
                "false" | "0" | "off" => Some(false),
                _ => None,
            },
            Self::Null => None,
        }
    }

    /// Strict boolean: only `0`, `1`, `true` and `false` are accepted
    pub fn as_strict_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Integer(0) => Some(false),
            Self::Integer(1) => Some(true),
            Self::String(s) => match s.trim() {
                "0" | "false" => Some(false),
                "1" | "true" => Some(true),
                _ => None,
            },
            _ => None,
        }
    }

    /// Convert to String
    pub fn as_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Null => String::new(),
        }
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Loose equality used when matching enum mappings and reconciling
    /// expected values: numbers compare by value, bools match 0/1.
    pub fn loosely_equals(&self, other: &PropertyValue) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            (Self::String(_), _) | (_, Self::String(_)) => false,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            other => write!(f, "{}", other.as_string()),
        }
    }
}

// ============================================================================
// Data Types
// ============================================================================

/// Declared data type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Float,
    Boolean,
    String,
    Enum,
    Switch,
    Button,
    Unknown,
}

impl DataType {
    /// Number of 16-bit registers a value of this type occupies
    pub fn register_count(&self) -> u16 {
        match self {
            Self::Int | Self::UInt | Self::Float => 2,
            _ => 1,
        }
    }

    /// Types that live in word registers
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::UChar
                | Self::Short
                | Self::UShort
                | Self::Int
                | Self::UInt
                | Self::Float
        )
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Boolean)
    }

    /// Inclusive range a device-level value of this type can hold
    pub fn value_range(&self) -> Option<(f64, f64)> {
        match self {
            Self::Char => Some((i8::MIN as f64, i8::MAX as f64)),
            Self::UChar => Some((0.0, u8::MAX as f64)),
            Self::Short => Some((i16::MIN as f64, i16::MAX as f64)),
            Self::UShort => Some((0.0, u16::MAX as f64)),
            Self::Int => Some((i32::MIN as f64, i32::MAX as f64)),
            Self::UInt => Some((0.0, u32::MAX as f64)),
            Self::Float => Some((f32::MIN as f64, f32::MAX as f64)),
            Self::Boolean => Some((0.0, 1.0)),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Char => "char",
            Self::UChar => "uchar",
            Self::Short => "short",
            Self::UShort => "ushort",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Enum => "enum",
            Self::Switch => "switch",
            Self::Button => "button",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// One user-facing enum label and its device-level value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnumMapping {
    pub value: String,
    pub device: PropertyValue,
}

/// Extra formatting rules attached to a property
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ValueFormat {
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Enum(Vec<EnumMapping>),
}

impl ValueFormat {
    /// Check a user-facing numeric value against a range format
    pub fn accepts(&self, value: f64) -> bool {
        match self {
            ValueFormat::Range { min, max } => {
                min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
            },
            ValueFormat::Enum(_) => true,
        }
    }
}

// ============================================================================
// Register layout
// ============================================================================

/// Word order of multi-register values, in ABCD notation
///
/// For the 32-bit value `0x12345678` read as registers `[r0, r1]`:
/// - `ABCD`: `[0x1234, 0x5678]`
/// - `CDAB`: `[0x5678, 0x1234]`
/// - `BADC`: `[0x3412, 0x7856]`
/// - `DCBA`: `[0x7856, 0x3412]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    #[default]
    #[serde(rename = "ABCD", alias = "abcd")]
    Abcd,
    #[serde(rename = "CDAB", alias = "cdab")]
    Cdab,
    #[serde(rename = "BADC", alias = "badc")]
    Badc,
    #[serde(rename = "DCBA", alias = "dcba")]
    Dcba,
}

impl ByteOrder {
    /// Combine two registers into a 32-bit word
    pub fn combine(&self, registers: [u16; 2]) -> u32 {
        let [r0, r1] = registers;
        let [a, b] = r0.to_be_bytes();
        let [c, d] = r1.to_be_bytes();
        let bytes = match self {
            Self::Abcd => [a, b, c, d],
            Self::Cdab => [c, d, a, b],
            Self::Badc => [b, a, d, c],
            Self::Dcba => [d, c, b, a],
        };
        u32::from_be_bytes(bytes)
    }

    /// Split a 32-bit word into two registers, inverse of [`combine`](Self::combine)
    pub fn split(&self, value: u32) -> [u16; 2] {
        let [a, b, c, d] = value.to_be_bytes();
        let (r0, r1) = match self {
            Self::Abcd => ([a, b], [c, d]),
            Self::Cdab => ([c, d], [a, b]),
            Self::Badc => ([b, a], [d, c]),
            Self::Dcba => ([d, c], [b, a]),
        };
        [u16::from_be_bytes(r0), u16::from_be_bytes(r1)]
    }
}

/// Register space of the request protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    Coil,
    DiscreteInput,
    Holding,
    Input,
}

impl RegisterKind {
    /// Pick the register space for a property.
    ///
    /// Settable booleans map to coils, read-only booleans to discrete
    /// inputs, settable numerics to holding registers and read-only numerics
    /// to input registers. Anything else cannot be polled.
    pub fn classify(data_type: DataType, settable: bool) -> Option<Self> {
        if data_type.is_boolean() {
            Some(if settable {
                Self::Coil
            } else {
                Self::DiscreteInput
            })
        } else if data_type.is_numeric() {
            Some(if settable { Self::Holding } else { Self::Input })
        } else {
            None
        }
    }

    /// Single-bit register spaces
    pub fn is_bit(&self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Coil | Self::Holding)
    }

    /// Whether a device data type can be stored in this register space
    pub fn supports(&self, data_type: DataType) -> bool {
        if self.is_bit() {
            data_type.is_boolean()
        } else {
            data_type.is_numeric() || data_type.is_boolean()
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coil => "COIL",
            Self::DiscreteInput => "DISCRETE_INPUT",
            Self::Holding => "HOLDING_REGISTER",
            Self::Input => "INPUT_REGISTER",
        }
    }
}

impl std::fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
