//! Raw-to-engineering conversion pipeline (spec §4.3).

use crate::config::{ByteOrder, DataPoint, ValueType};
use crate::error::PortError;
use crate::transport::RawValue;

/// Applies the digital-inversion flag for NC-wired contacts.
pub fn convert_digital(raw_bit: bool, inverted: bool) -> bool {
    if inverted {
        !raw_bit
    } else {
        raw_bit
    }
}

/// Decodes `registers` per the data point's value type and byte order, then
/// applies `converted = raw * scale_factor + offset`, rejecting values
/// outside `[min_valid, max_valid]` when both bounds are configured.
pub fn convert_analog(point: &DataPoint, registers: &[u16]) -> Result<f64, PortError> {
    let raw = decode_raw(point.value_type.unwrap_or(ValueType::Uint16), point.byte_order.unwrap_or(ByteOrder::HighLow), registers)?;
    let converted = raw * point.scale_factor + point.offset;

    if let (Some(min), Some(max)) = (point.min_valid, point.max_valid) {
        if converted < min || converted > max {
            return Err(PortError::InvalidRange);
        }
    }
    Ok(converted)
}

fn decode_raw(value_type: ValueType, byte_order: ByteOrder, registers: &[u16]) -> Result<f64, PortError> {
    let words = order_words(value_type, byte_order, registers);
    let value = match value_type {
        ValueType::Int16 => *words.first().unwrap_or(&0) as i16 as f64,
        ValueType::Uint16 => *words.first().unwrap_or(&0) as f64,
        ValueType::Int32 => combine_u32(words) as i32 as f64,
        ValueType::Uint32 => combine_u32(words) as f64,
        ValueType::Float32 => f32::from_bits(combine_u32(words)) as f64,
        ValueType::Uint64 => combine_u64(words) as f64,
    };
    Ok(value)
}

/// 16-bit values ignore byte order (spec §4.3); wider types swap register
/// order for `low_high` meters.
fn order_words(value_type: ValueType, byte_order: ByteOrder, registers: &[u16]) -> Vec<u16> {
    if matches!(value_type, ValueType::Int16 | ValueType::Uint16) {
        return registers.to_vec();
    }
    match byte_order {
        ByteOrder::HighLow => registers.to_vec(),
        ByteOrder::LowHigh => registers.iter().rev().copied().collect(),
    }
}

fn combine_u32(words: Vec<u16>) -> u32 {
    let hi = *words.first().unwrap_or(&0) as u32;
    let lo = *words.get(1).unwrap_or(&0) as u32;
    (hi << 16) | lo
}

fn combine_u64(words: Vec<u16>) -> u64 {
    let mut value: u64 = 0;
    for w in words.iter().take(4) {
        value = (value << 16) | *w as u64;
    }
    value
}

/// Inverse of [`convert_analog`]: `raw = (engineering - offset) / scale_factor`,
/// re-encoded per value type and byte order.
pub fn encode_analog(point: &DataPoint, engineering: f64) -> RawValue {
    let scale = if point.scale_factor == 0.0 { 1.0 } else { point.scale_factor };
    let raw = (engineering - point.offset) / scale;
    let value_type = point.value_type.unwrap_or(ValueType::Uint16);
    let byte_order = point.byte_order.unwrap_or(ByteOrder::HighLow);

    let mut words = match value_type {
        ValueType::Int16 => vec![raw as i16 as u16],
        ValueType::Uint16 => vec![raw as u16],
        ValueType::Int32 => {
            let v = raw as i32 as u32;
            vec![(v >> 16) as u16, (v & 0xFFFF) as u16]
        }
        ValueType::Uint32 => {
            let v = raw as u32;
            vec![(v >> 16) as u16, (v & 0xFFFF) as u16]
        }
        ValueType::Float32 => {
            let v = (raw as f32).to_bits();
            vec![(v >> 16) as u16, (v & 0xFFFF) as u16]
        }
        ValueType::Uint64 => {
            let v = raw as u64;
            vec![
                (v >> 48) as u16,
                (v >> 32) as u16,
                (v >> 16) as u16,
                (v & 0xFFFF) as u16,
            ]
        }
    };
    if !matches!(value_type, ValueType::Int16 | ValueType::Uint16) && byte_order == ByteOrder::LowHigh {
        words.reverse();
    }
    let len = words.len().min(4) as u8;
    let mut out = [0u16; 4];
    out[..words.len()].copy_from_slice(&words);
    RawValue::Registers(out, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(value_type: ValueType, byte_order: ByteOrder, scale: f64, offset: f64) -> DataPoint {
        DataPoint {
            name: "p".to_string(),
            direction: crate::config::PointDirection::Ai,
            port_id: "port".to_string(),
            slave_id: 1,
            register: 0,
            channel: None,
            read_fn: "read_analog_input".to_string(),
            write_fn: "write_analog_output".to_string(),
            value_type: Some(value_type),
            byte_order: Some(byte_order),
            scale_factor: scale,
            offset,
            unit: String::new(),
            min_valid: None,
            max_valid: None,
            log_interval: None,
            inverted: false,
            color_zones: Vec::new(),
            description: String::new(),
        }
    }

    #[test]
    fn int16_is_signed() {
        let p = point(ValueType::Int16, ByteOrder::HighLow, 1.0, 0.0);
        let converted = convert_analog(&p, &[0xFFFF]).unwrap();
        assert_eq!(converted, -1.0);
    }

    #[test]
    fn scale_and_offset_apply() {
        let p = point(ValueType::Uint16, ByteOrder::HighLow, 0.1, 5.0);
        let converted = convert_analog(&p, &[100]).unwrap();
        assert!((converted - 15.0).abs() < 1e-9);
    }

    #[test]
    fn uint32_high_low_vs_low_high() {
        let hl = point(ValueType::Uint32, ByteOrder::HighLow, 1.0, 0.0);
        let lh = point(ValueType::Uint32, ByteOrder::LowHigh, 1.0, 0.0);
        let high_low = convert_analog(&hl, &[0x0001, 0x0002]).unwrap();
        let low_high = convert_analog(&lh, &[0x0002, 0x0001]).unwrap();
        assert_eq!(high_low, low_high);
        assert_eq!(high_low, 0x0001_0002 as f64);
    }

    #[test]
    fn rejects_out_of_range() {
        let mut p = point(ValueType::Uint16, ByteOrder::HighLow, 1.0, 0.0);
        p.min_valid = Some(0.0);
        p.max_valid = Some(10.0);
        assert!(convert_analog(&p, &[20]).is_err());
    }

    #[test]
    fn digital_inversion() {
        assert!(!convert_digital(true, true));
        assert!(convert_digital(true, false));
    }

    #[test]
    fn float32_encode_decode_round_trips() {
        let p = point(ValueType::Float32, ByteOrder::HighLow, 1.0, 0.0);
        let encoded = encode_analog(&p, 98.6);
        let converted = convert_analog(&p, encoded.registers()).unwrap();
        assert!((converted - 98.6).abs() < 1e-3);
    }
}
