//! Default value transformer

use crate::model::Property;
use crate::traits::ValueTransformer;
use crate::types::{DataType, EnumMapping, PropertyValue, ValueFormat};

/// Maps user-facing property types onto register types
///
/// - `switch` / `button` live in a single bit
/// - `enum` uses the device type of its mappings (all booleans, or integers
///   stored in one register)
/// - numerics are range checked against a `Range` format and floats are
///   rounded to `number_of_decimals`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValueTransformer;

impl DefaultValueTransformer {
    fn enum_device_type(mappings: &[EnumMapping]) -> DataType {
        if mappings.is_empty() {
            return DataType::Unknown;
        }
        if mappings
            .iter()
            .all(|m| matches!(m.device, PropertyValue::Bool(_)))
        {
            return DataType::Boolean;
        }
        let integers: Option<Vec<i64>> = mappings
            .iter()
            .map(|m| match m.device {
                PropertyValue::Integer(i) => Some(i),
                _ => None,
            })
            .collect();
        match integers {
            Some(values) if values.iter().all(|v| (0..=u16::MAX as i64).contains(v)) => {
                DataType::UShort
            },
            Some(_) => DataType::Int,
            None => DataType::Unknown,
        }
    }

    fn device_type(data_type: DataType, format: Option<&ValueFormat>) -> DataType {
        match data_type {
            DataType::Switch | DataType::Button => DataType::Boolean,
            DataType::Enum => match format {
                Some(ValueFormat::Enum(mappings)) => Self::enum_device_type(mappings),
                _ => DataType::Unknown,
            },
            other => other,
        }
    }

    fn round(value: f64, decimals: Option<u8>) -> f64 {
        match decimals {
            Some(d) => {
                let factor = 10f64.powi(i32::from(d));
                (value * factor).round() / factor
            },
            None => value,
        }
    }

    fn in_range(property: &Property, value: f64) -> bool {
        property.format.as_ref().map_or(true, |f| f.accepts(value))
    }

    fn enum_mappings(property: &Property) -> &[EnumMapping] {
        match &property.format {
            Some(ValueFormat::Enum(mappings)) => mappings,
            _ => &[],
        }
    }
}

impl ValueTransformer for DefaultValueTransformer {
    fn determine_device_read_data_type(
        &self,
        data_type: DataType,
        format: Option<&ValueFormat>,
    ) -> DataType {
        Self::device_type(data_type, format)
    }

    fn determine_device_write_data_type(
        &self,
        data_type: DataType,
        format: Option<&ValueFormat>,
    ) -> DataType {
        Self::device_type(data_type, format)
    }

    fn transform_value_from_device(
        &self,
        property: &Property,
        raw: &PropertyValue,
    ) -> Option<PropertyValue> {
        match property.data_type {
            DataType::Boolean | DataType::Switch | DataType::Button => {
                raw.as_bool().map(PropertyValue::Bool)
            },
            DataType::Enum => Self::enum_mappings(property)
                .iter()
                .find(|m| m.device.loosely_equals(raw))
                .map(|m| PropertyValue::String(m.value.clone())),
            DataType::Float => {
                let v = raw.as_f64()?;
                Self::in_range(property, v)
                    .then(|| PropertyValue::Float(Self::round(v, property.number_of_decimals)))
            },
            t if t.is_numeric() => {
                let v = raw.as_i64()?;
                Self::in_range(property, v as f64).then_some(PropertyValue::Integer(v))
            },
            _ => None,
        }
    }

    fn transform_value_to_device(
        &self,
        property: &Property,
        value: &PropertyValue,
    ) -> Option<PropertyValue> {
        match property.data_type {
            DataType::Boolean | DataType::Switch | DataType::Button => {
                value.as_strict_bool().map(PropertyValue::Bool)
            },
            DataType::Enum => {
                let label = value.as_string();
                Self::enum_mappings(property)
                    .iter()
                    .find(|m| m.value == label)
                    .map(|m| m.device.clone())
            },
            DataType::Float => {
                let v = value.as_f64()?;
                Self::in_range(property, v).then_some(PropertyValue::Float(v))
            },
            t if t.is_numeric() => {
                let v = value.as_f64()?;
                Self::in_range(property, v).then(|| PropertyValue::Integer(v.round() as i64))
            },
            _ => None,
        }
    }
}
