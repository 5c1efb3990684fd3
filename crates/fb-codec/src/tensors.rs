//! JSON tensor sources.
//!
//! Tensors arrive as a JSON object mapping names (`w1`, `b1`, ...) to nested
//! float arrays, typically exported from a training notebook. A top-level
//! `state_dict` wrapper is unwrapped so torch-style exports work unchanged.

use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::CodecError;

pub type TensorMap = serde_json::Map<String, Value>;

/// Load a tensor map from a `.json` file.
pub fn load_tensors(path: &Path) -> Result<TensorMap, CodecError> {
    let suffix = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if suffix != "json" {
        return Err(CodecError::input(
            "Unsupported input format. Use .json (export tensors with `tolist()` first)",
        ));
    }
    let text = fs::read_to_string(path).map_err(|e| CodecError::io(path, e))?;
    let value: Value = serde_json::from_str(&text)?;
    let Value::Object(mut map) = value else {
        return Err(CodecError::input("Unsupported input object; expected dict or tensor"));
    };
    if let Some(Value::Object(inner)) = map.remove("state_dict") {
        return Ok(inner);
    }
    Ok(map)
}

/// Copy tensors under new names: each `(dest, src)` aliases `src` as `dest`.
pub fn apply_keymap(data: &mut TensorMap, keymap: &[(String, String)]) -> Result<(), CodecError> {
    for (dest, src) in keymap {
        let Some(value) = data.get(src).cloned() else {
            return Err(CodecError::input(format!(
                "Key '{src}' not found in input for mapping to '{dest}'"
            )));
        };
        data.insert(dest.clone(), value);
    }
    Ok(())
}

fn as_f64(value: &Value, name: &str) -> Result<f64, CodecError> {
    value
        .as_f64()
        .ok_or_else(|| CodecError::input(format!("{name} must contain numbers")))
}

fn push_numbers(out: &mut Vec<f64>, values: &[Value], name: &str) -> Result<(), CodecError> {
    for v in values {
        out.push(as_f64(v, name)?);
    }
    Ok(())
}

/// Flatten a `rows x cols` matrix, row-major. Accepts a 2D array or an
/// already-flat array of `rows * cols` numbers.
pub fn flatten_matrix(
    data: &Value,
    rows: usize,
    cols: usize,
    name: &str,
) -> Result<Vec<f64>, CodecError> {
    let Some(items) = data.as_array() else {
        return Err(CodecError::input(format!("{name} must be a list or 2D list")));
    };
    if items.first().is_some_and(Value::is_array) {
        if items.len() != rows {
            return Err(CodecError::input(format!(
                "{name} row count mismatch: {} != {rows}",
                items.len()
            )));
        }
        let mut flat = Vec::with_capacity(rows * cols);
        for row in items {
            let row = row
                .as_array()
                .filter(|r| r.len() == cols)
                .ok_or_else(|| CodecError::input(format!("{name} column count mismatch")))?;
            push_numbers(&mut flat, row, name)?;
        }
        return Ok(flat);
    }
    if items.len() != rows * cols {
        return Err(CodecError::input(format!(
            "{name} length mismatch: {} != {}",
            items.len(),
            rows * cols
        )));
    }
    let mut flat = Vec::with_capacity(items.len());
    push_numbers(&mut flat, items, name)?;
    Ok(flat)
}

/// Flatten conv1d weights shaped `[out_ch][in_ch][kernel]` (or pre-flattened).
pub fn flatten_conv1d(
    data: &Value,
    out_ch: usize,
    in_ch: usize,
    kernel: usize,
    name: &str,
) -> Result<Vec<f64>, CodecError> {
    let Some(items) = data.as_array() else {
        return Err(CodecError::input(format!("{name} must be a nested list")));
    };
    if !items.is_empty() && !items[0].is_array() {
        if items.len() != out_ch * in_ch * kernel {
            return Err(CodecError::input(format!(
                "{name} length mismatch: {} != {}",
                items.len(),
                out_ch * in_ch * kernel
            )));
        }
        let mut flat = Vec::with_capacity(items.len());
        push_numbers(&mut flat, items, name)?;
        return Ok(flat);
    }
    if items.len() != out_ch {
        return Err(CodecError::input(format!("{name} outer dimension mismatch")));
    }
    let mut flat = Vec::with_capacity(out_ch * in_ch * kernel);
    for oc in items {
        let Some(oc) = oc.as_array() else {
            return Err(CodecError::input(format!("{name} must be a nested list")));
        };
        if oc.first().is_some_and(Value::is_array) {
            if oc.len() != in_ch {
                return Err(CodecError::input(format!("{name} in_channel count mismatch")));
            }
            for chan in oc {
                let chan = chan
                    .as_array()
                    .filter(|c| c.len() == kernel)
                    .ok_or_else(|| CodecError::input(format!("{name} kernel length mismatch")))?;
                push_numbers(&mut flat, chan, name)?;
            }
        } else {
            if oc.len() != in_ch * kernel {
                return Err(CodecError::input(format!("{name} flattened length mismatch")));
            }
            push_numbers(&mut flat, oc, name)?;
        }
    }
    Ok(flat)
}

/// Flatten single-channel conv2d weights shaped `[out_ch][kernel][kernel]`.
///
/// Torch exports carry an extra channel axis (`[out_ch][1][k][k]`); that
/// axis is unwrapped when present.
pub fn flatten_conv2d(
    data: &Value,
    out_ch: usize,
    kernel: usize,
    name: &str,
) -> Result<Vec<f64>, CodecError> {
    let Some(items) = data.as_array() else {
        return Err(CodecError::input(format!("{name} must be a nested list")));
    };
    if !items.is_empty() && !items[0].is_array() {
        if items.len() != out_ch * kernel * kernel {
            return Err(CodecError::input(format!(
                "{name} length mismatch: {} != {}",
                items.len(),
                out_ch * kernel * kernel
            )));
        }
        let mut flat = Vec::with_capacity(items.len());
        push_numbers(&mut flat, items, name)?;
        return Ok(flat);
    }
    if items.len() != out_ch {
        return Err(CodecError::input(format!("{name} outer dimension mismatch")));
    }
    let mut flat = Vec::with_capacity(out_ch * kernel * kernel);
    for oc in items {
        let Some(mut oc) = oc.as_array() else {
            return Err(CodecError::input(format!("{name} must be a nested list")));
        };
        if oc.len() == 1 {
            if let Some(inner) = oc[0].as_array() {
                if inner.first().is_some_and(Value::is_array) {
                    oc = inner;
                }
            }
        }
        if oc.first().is_some_and(Value::is_array) {
            if oc.len() != kernel {
                return Err(CodecError::input(format!("{name} kernel rows mismatch")));
            }
            for row in oc {
                let row = row
                    .as_array()
                    .filter(|r| r.len() == kernel)
                    .ok_or_else(|| CodecError::input(format!("{name} kernel cols mismatch")))?;
                push_numbers(&mut flat, row, name)?;
            }
        } else {
            if oc.len() != kernel * kernel {
                return Err(CodecError::input(format!("{name} flattened length mismatch")));
            }
            push_numbers(&mut flat, oc, name)?;
        }
    }
    Ok(flat)
}

/// Dimensions of a well-formed 2D array, if the value is one.
pub fn matrix_shape(data: &Value) -> Option<(usize, usize)> {
    let items = data.as_array()?;
    let first = items.first()?.as_array()?;
    let cols = first.len();
    for row in items {
        if row.as_array()?.len() != cols {
            return None;
        }
    }
    Some((items.len(), cols))
}

/// A vector of exactly `length` numbers. A bare scalar is accepted when
/// `length` is 1.
pub fn vector(data: &Value, length: usize, name: &str) -> Result<Vec<f64>, CodecError> {
    if let Some(items) = data.as_array() {
        if items.len() != length {
            return Err(CodecError::input(format!(
                "{name} length mismatch: {} != {length}",
                items.len()
            )));
        }
        let mut out = Vec::with_capacity(length);
        push_numbers(&mut out, items, name)?;
        return Ok(out);
    }
    if length == 1 {
        return Ok(vec![as_f64(data, name)?]);
    }
    Err(CodecError::input(format!("{name} must be a list")))
}
