//! Register codec
//!
//! Turns raw coil / register images into device-level values and back.

use crate::error::{ConnectorError, Result, TransportError};
use crate::types::{ByteOrder, DataType, PropertyValue};

/// Raw payload of one read response
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterValues {
    Bits(Vec<bool>),
    Words(Vec<u16>),
}

impl RegisterValues {
    pub fn len(&self) -> usize {
        match self {
            RegisterValues::Bits(bits) => bits.len(),
            RegisterValues::Words(words) => words.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode the value starting `offset` entries into a response
pub fn decode(
    values: &RegisterValues,
    offset: usize,
    data_type: DataType,
    byte_order: ByteOrder,
) -> Result<PropertyValue> {
    match values {
        RegisterValues::Bits(bits) => bits
            .get(offset)
            .map(|bit| PropertyValue::Bool(*bit))
            .ok_or_else(|| short_response(offset, 1, bits.len())),
        RegisterValues::Words(words) => {
            let count = data_type.register_count() as usize;
            let slice = words
                .get(offset..offset + count)
                .ok_or_else(|| short_response(offset, count, words.len()))?;
            decode_words(slice, data_type, byte_order)
        },
    }
}

fn short_response(offset: usize, count: usize, len: usize) -> ConnectorError {
    TransportError::invalid_response(format!(
        "response holds {} entries, needed {} at offset {}",
        len, count, offset
    ))
    .into()
}

fn decode_words(words: &[u16], data_type: DataType, byte_order: ByteOrder) -> Result<PropertyValue> {
    let value = match (data_type, words) {
        (DataType::Boolean, [w]) => PropertyValue::Bool(*w != 0),
        (DataType::Char, [w]) => PropertyValue::Integer((*w as u8 as i8) as i64),
        (DataType::UChar, [w]) => PropertyValue::Integer((*w & 0x00FF) as i64),
        (DataType::Short, [w]) => PropertyValue::Integer(*w as i16 as i64),
        (DataType::UShort, [w]) => PropertyValue::Integer(*w as i64),
        (DataType::Int, [r0, r1]) => {
            PropertyValue::Integer(byte_order.combine([*r0, *r1]) as i32 as i64)
        },
        (DataType::UInt, [r0, r1]) => PropertyValue::Integer(byte_order.combine([*r0, *r1]) as i64),
        (DataType::Float, [r0, r1]) => {
            PropertyValue::Float(f32::from_bits(byte_order.combine([*r0, *r1])) as f64)
        },
        (other, _) => {
            return Err(ConnectorError::not_supported(format!(
                "cannot decode {} from registers",
                other
            )))
        },
    };
    Ok(value)
}

/// Encode a device-level value into holding registers
pub fn encode(value: &PropertyValue, data_type: DataType, byte_order: ByteOrder) -> Result<Vec<u16>> {
    if data_type.is_boolean() {
        let bit = value.as_strict_bool().ok_or_else(|| {
            ConnectorError::validation(format!("'{}' is not a boolean (0, 1, true, false)", value))
        })?;
        return Ok(vec![u16::from(bit)]);
    }

    if !data_type.is_numeric() {
        return Err(ConnectorError::not_supported(format!(
            "cannot encode {} into registers",
            data_type
        )));
    }

    let raw = value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ConnectorError::validation(format!("'{}' is not a number", value)))?;
    let v = if data_type == DataType::Float {
        raw
    } else {
        raw.round()
    };
    if let Some((min, max)) = data_type.value_range() {
        if v < min || v > max {
            return Err(ConnectorError::validation(format!(
                "{} out of range for {} [{}, {}]",
                raw, data_type, min, max
            )));
        }
    }

    let words = match data_type {
        DataType::Char => vec![(v as i8 as u8) as u16],
        DataType::UChar => vec![v as u8 as u16],
        DataType::Short => vec![v as i16 as u16],
        DataType::UShort => vec![v as u16],
        DataType::Int => byte_order.split(v as i32 as u32).to_vec(),
        DataType::UInt => byte_order.split(v as u32).to_vec(),
        _ => byte_order.split((v as f32).to_bits()).to_vec(),
    };
    Ok(words)
}
