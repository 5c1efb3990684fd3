//! Human-readable rendering of guest output bytes.

use std::str::FromStr;

use fb_manifest::Dtype;
use serde_json::Value;

use crate::value::decode_value;

/// Render output bytes as `fmt`: `hex`, `raw`, or a dtype name which
/// decodes up to `count` little-endian elements as a JSON list.
///
/// Unknown formats fall back to hex; `count` is clamped to what the data
/// actually holds.
pub fn decode_output(data: &[u8], fmt: &str, count: i64) -> String {
    match fmt {
        "hex" => hex::encode(data),
        "raw" => "<raw>".to_string(),
        _ => match Dtype::from_str(fmt) {
            Err(_) => hex::encode(data),
            Ok(dtype) => {
                let size = dtype.size() as usize;
                let available = (data.len() / size) as i64;
                let count = count.min(available);
                if count <= 0 {
                    return "[]".to_string();
                }
                let values: Vec<Value> = (0..count as usize)
                    .filter_map(|i| decode_value(data, i * size, dtype))
                    .collect();
                Value::Array(values).to_string()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_and_raw() {
        assert_eq!(decode_output(&[0xDE, 0xAD], "hex", 0), "dead");
        assert_eq!(decode_output(&[0xDE, 0xAD], "raw", 0), "<raw>");
    }

    #[test]
    fn test_i32_list() {
        let mut data = Vec::new();
        data.extend_from_slice(&7i32.to_le_bytes());
        data.extend_from_slice(&(-1i32).to_le_bytes());
        assert_eq!(decode_output(&data, "i32", 2), "[7,-1]");
    }

    #[test]
    fn test_count_clamped_to_data() {
        let data = 42i32.to_le_bytes();
        assert_eq!(decode_output(&data, "i32", 10), "[42]");
        assert_eq!(decode_output(&data, "i32", 0), "[]");
    }

    #[test]
    fn test_u8_list() {
        assert_eq!(decode_output(&[1, 2, 255], "u8", 3), "[1,2,255]");
    }

    #[test]
    fn test_unknown_format_falls_back_to_hex() {
        assert_eq!(decode_output(&[0x01], "bogus", 1), "01");
    }
}
