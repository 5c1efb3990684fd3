//! Scalar encoding for payload dtypes, little-endian throughout.

use fb_manifest::Dtype;
use half::f16;
use serde_json::Value;

use crate::PayloadError;

fn int_in_range(value: &Value, min: i64, max: i64, dtype: Dtype) -> Result<i64, PayloadError> {
    value
        .as_i64()
        .filter(|v| (min..=max).contains(v))
        .ok_or_else(|| PayloadError::input(format!("payload value does not fit dtype {dtype}")))
}

/// Append one JSON number encoded as `dtype`.
pub(crate) fn encode_value(buf: &mut Vec<u8>, dtype: Dtype, value: &Value) -> Result<(), PayloadError> {
    match dtype {
        Dtype::I32 => {
            let v = int_in_range(value, i32::MIN as i64, i32::MAX as i64, dtype)? as i32;
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Dtype::U32 => {
            let v = value
                .as_u64()
                .filter(|&v| v <= u32::MAX as u64)
                .ok_or_else(|| {
                    PayloadError::input(format!("payload value does not fit dtype {dtype}"))
                })? as u32;
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Dtype::I16 => {
            let v = int_in_range(value, i16::MIN as i64, i16::MAX as i64, dtype)? as i16;
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Dtype::I8 => {
            let v = int_in_range(value, i8::MIN as i64, i8::MAX as i64, dtype)? as i8;
            buf.push(v as u8);
        }
        Dtype::U8 => {
            let v = int_in_range(value, 0, u8::MAX as i64, dtype)? as u8;
            buf.push(v);
        }
        Dtype::F32 => {
            let v = value
                .as_f64()
                .ok_or_else(|| PayloadError::input("payload value must be a number"))?;
            buf.extend_from_slice(&(v as f32).to_le_bytes());
        }
        Dtype::F16 => {
            let v = value
                .as_f64()
                .ok_or_else(|| PayloadError::input("payload value must be a number"))?;
            buf.extend_from_slice(&f16::from_f64(v).to_le_bytes());
        }
    }
    Ok(())
}

/// Encode a flat slice of JSON numbers as `dtype`.
pub(crate) fn pack_values(dtype: Dtype, values: &[Value]) -> Result<Vec<u8>, PayloadError> {
    let mut buf = Vec::with_capacity(values.len() * dtype.size() as usize);
    for value in values {
        encode_value(&mut buf, dtype, value)?;
    }
    Ok(buf)
}

/// Decode exactly `count` elements of `dtype` from the front of `data`.
pub(crate) fn unpack_values(
    dtype: Dtype,
    data: &[u8],
    count: usize,
) -> Result<Vec<Value>, PayloadError> {
    let size = dtype.size() as usize;
    let needed = count * size;
    if data.len() < needed {
        return Err(PayloadError::input(format!(
            "payload truncated: need {needed} bytes for {count} {dtype} values, have {}",
            data.len()
        )));
    }
    (0..count)
        .map(|i| {
            decode_value(data, i * size, dtype)
                .ok_or_else(|| PayloadError::input("payload truncated"))
        })
        .collect()
}

/// Decode one element at `offset` into a JSON number.
pub(crate) fn decode_value(data: &[u8], offset: usize, dtype: Dtype) -> Option<Value> {
    let size = dtype.size() as usize;
    let bytes = data.get(offset..offset + size)?;
    Some(match dtype {
        Dtype::I32 => Value::from(i32::from_le_bytes(bytes.try_into().ok()?)),
        Dtype::U32 => Value::from(u32::from_le_bytes(bytes.try_into().ok()?)),
        Dtype::I16 => Value::from(i16::from_le_bytes(bytes.try_into().ok()?)),
        Dtype::I8 => Value::from(bytes[0] as i8),
        Dtype::U8 => Value::from(bytes[0]),
        Dtype::F32 => Value::from(f32::from_le_bytes(bytes.try_into().ok()?) as f64),
        Dtype::F16 => Value::from(f16::from_le_bytes(bytes.try_into().ok()?).to_f64()),
    })
}
