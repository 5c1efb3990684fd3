//! Schema-directed packing of JSON payloads into guest input bytes.

use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use toml::Table;

use fb_manifest::{Dtype, Manifest, SchemaType};

use crate::value::{pack_values, unpack_values};
use crate::PayloadError;

/// Load a payload from a JSON file, or stdin when the path is `-`.
///
/// A top-level object may wrap the payload under `input`, `data` or
/// `payload`; the first present key wins.
pub fn load_payload_from_path(path: &Path) -> Result<Value, PayloadError> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|source| PayloadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        buf
    } else {
        std::fs::read_to_string(path).map_err(|source| PayloadError::Io {
            path: path.to_path_buf(),
            source,
        })?
    };
    let data: Value = serde_json::from_str(&text)?;
    if let Value::Object(obj) = &data {
        for key in ["input", "data", "payload"] {
            if let Some(inner) = obj.get(key) {
                return Ok(inner.clone());
            }
        }
    }
    Ok(data)
}

/// Pack a payload into the byte layout the manifest schema declares.
pub fn pack_payload(manifest: &Manifest, payload: &Value) -> Result<Vec<u8>, PayloadError> {
    let schema_type = schema_type(manifest)?;
    let sub = manifest.schema_table().ok_or_else(|| {
        PayloadError::input(format!("schema.{schema_type} table is required"))
    })?;
    match schema_type {
        SchemaType::Vector => pack_vector(sub, payload),
        SchemaType::TimeSeries => pack_time_series(sub, payload),
        SchemaType::Graph => {
            let Value::Object(obj) = payload else {
                return Err(PayloadError::input("graph payload must be an object"));
            };
            pack_graph(sub, obj)
        }
        SchemaType::Custom => pack_custom(sub, payload),
    }
}

/// Invert [`pack_payload`]: decode guest input bytes back into the
/// canonical JSON payload for the manifest's schema.
///
/// Vectors come back as a flat list, time series as window rows, graphs as
/// an object carrying counts, node features, edge pairs and (when the
/// schema declares them) edge features, and custom blobs as a byte list.
pub fn unpack_payload(manifest: &Manifest, data: &[u8]) -> Result<Value, PayloadError> {
    let schema_type = schema_type(manifest)?;
    let sub = manifest.schema_table().ok_or_else(|| {
        PayloadError::input(format!("schema.{schema_type} table is required"))
    })?;
    match schema_type {
        SchemaType::Vector => unpack_vector(sub, data),
        SchemaType::TimeSeries => unpack_time_series(sub, data),
        SchemaType::Graph => unpack_graph(sub, data),
        SchemaType::Custom => Ok(Value::Array(
            data.iter().map(|&b| Value::from(b)).collect(),
        )),
    }
}

pub(crate) fn schema_type(manifest: &Manifest) -> Result<SchemaType, PayloadError> {
    if manifest.table("schema").is_none() {
        return Err(PayloadError::input("schema table missing"));
    }
    manifest.schema_type().ok_or_else(|| {
        PayloadError::input("schema.type must be vector, time_series, graph, or custom")
    })
}

fn dtype_of(sub: &Table, key: &str) -> Result<Dtype, PayloadError> {
    let name = sub
        .get(key)
        .and_then(toml::Value::as_str)
        .unwrap_or("<missing>");
    Dtype::from_str(name).map_err(|_| PayloadError::input(format!("Unsupported dtype: {name}")))
}

fn int_field(sub: &Table, key: &str) -> Option<i64> {
    sub.get(key).and_then(toml::Value::as_integer)
}

/// Flatten one level of nesting: `[[..], [..]]` concatenates rows, a flat
/// list passes through, a bare scalar becomes a one-element list.
fn flatten(payload: &Value) -> Result<Vec<Value>, PayloadError> {
    match payload {
        Value::Array(items) if items.first().is_some_and(Value::is_array) => {
            let mut flat = Vec::new();
            for row in items {
                let Value::Array(row) = row else {
                    return Err(PayloadError::input("nested list must contain lists"));
                };
                flat.extend(row.iter().cloned());
            }
            Ok(flat)
        }
        Value::Array(items) => Ok(items.clone()),
        other => Ok(vec![other.clone()]),
    }
}

fn pack_vector(sub: &Table, payload: &Value) -> Result<Vec<u8>, PayloadError> {
    let dtype = dtype_of(sub, "input_dtype")?;
    let shape = sub
        .get("input_shape")
        .and_then(toml::Value::as_array)
        .ok_or_else(|| PayloadError::input("schema.vector.input_shape must be a list"))?;
    let expected: usize = shape
        .iter()
        .filter_map(toml::Value::as_integer)
        .map(|v| v.max(0) as usize)
        .product();
    let flat = flatten(payload)?;
    if flat.len() != expected {
        return Err(PayloadError::input(format!(
            "vector payload length mismatch: {} != {expected}",
            flat.len()
        )));
    }
    pack_values(dtype, &flat)
}

fn unpack_vector(sub: &Table, data: &[u8]) -> Result<Value, PayloadError> {
    let dtype = dtype_of(sub, "input_dtype")?;
    let shape = sub
        .get("input_shape")
        .and_then(toml::Value::as_array)
        .ok_or_else(|| PayloadError::input("schema.vector.input_shape must be a list"))?;
    let expected: usize = shape
        .iter()
        .filter_map(toml::Value::as_integer)
        .map(|v| v.max(0) as usize)
        .product();
    let expected_bytes = expected * dtype.size() as usize;
    if data.len() != expected_bytes {
        return Err(PayloadError::input(format!(
            "vector buffer length mismatch: {} != {expected_bytes} bytes",
            data.len()
        )));
    }
    Ok(Value::Array(unpack_values(dtype, data, expected)?))
}

/// Chunk a flat value list into rows of `width`.
fn rows(values: Vec<Value>, width: usize) -> Value {
    Value::Array(
        values
            .chunks(width.max(1))
            .map(|row| Value::Array(row.to_vec()))
            .collect(),
    )
}

fn pack_time_series(sub: &Table, payload: &Value) -> Result<Vec<u8>, PayloadError> {
    let dtype = dtype_of(sub, "input_dtype")?;
    let (Some(window), Some(features)) = (int_field(sub, "window"), int_field(sub, "features"))
    else {
        return Err(PayloadError::input("schema.time_series window/features required"));
    };
    let (window, features) = (window.max(0) as usize, features.max(0) as usize);

    let flat = match payload {
        Value::Array(rows) if rows.first().is_some_and(Value::is_array) => {
            if rows.len() != window {
                return Err(PayloadError::input("time_series window length mismatch"));
            }
            let mut flat = Vec::with_capacity(window * features);
            for row in rows {
                let row = row
                    .as_array()
                    .filter(|r| r.len() == features)
                    .ok_or_else(|| PayloadError::input("time_series row length mismatch"))?;
                flat.extend(row.iter().cloned());
            }
            flat
        }
        other => flatten(other)?,
    };

    let expected = window * features;
    if flat.len() != expected {
        return Err(PayloadError::input(format!(
            "time_series payload length mismatch: {} != {expected}",
            flat.len()
        )));
    }
    pack_values(dtype, &flat)
}

fn unpack_time_series(sub: &Table, data: &[u8]) -> Result<Value, PayloadError> {
    let dtype = dtype_of(sub, "input_dtype")?;
    let (Some(window), Some(features)) = (int_field(sub, "window"), int_field(sub, "features"))
    else {
        return Err(PayloadError::input("schema.time_series window/features required"));
    };
    let (window, features) = (window.max(0) as usize, features.max(0) as usize);
    let expected_bytes = window * features * dtype.size() as usize;
    if data.len() != expected_bytes {
        return Err(PayloadError::input(format!(
            "time_series buffer length mismatch: {} != {expected_bytes} bytes",
            data.len()
        )));
    }
    Ok(rows(unpack_values(dtype, data, window * features)?, features))
}

fn normalize_edges(edges: &Value) -> Result<Vec<(u32, u32)>, PayloadError> {
    let Value::Array(items) = edges else {
        return Err(PayloadError::input("edges must be a list"));
    };
    let as_u32 = |v: &Value| -> Result<u32, PayloadError> {
        v.as_u64()
            .filter(|&v| v <= u32::MAX as u64)
            .map(|v| v as u32)
            .ok_or_else(|| PayloadError::input("edge endpoints must be u32 node indices"))
    };
    if items.first().is_some_and(Value::is_array) {
        let mut out = Vec::with_capacity(items.len());
        for pair in items {
            let pair = pair
                .as_array()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| PayloadError::input("edge pairs must be [src, dst]"))?;
            out.push((as_u32(&pair[0])?, as_u32(&pair[1])?));
        }
        return Ok(out);
    }
    if items.len() % 2 != 0 {
        return Err(PayloadError::input("edge list length must be even"));
    }
    items
        .chunks(2)
        .map(|pair| Ok((as_u32(&pair[0])?, as_u32(&pair[1])?)))
        .collect()
}

fn pick<'a>(payload: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| payload.get(*key))
}

fn counted(
    payload: &serde_json::Map<String, Value>,
    key: &str,
    actual: usize,
    max: i64,
    what: &str,
    max_label: &str,
) -> Result<usize, PayloadError> {
    let count = match payload.get(key) {
        Some(v) => v
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| PayloadError::input(format!("{key} must be a non-negative integer")))?,
        None => actual,
    };
    if count as i64 > max {
        return Err(PayloadError::input(format!("{key} exceeds {max_label}")));
    }
    if actual != count {
        return Err(PayloadError::input(format!("{key} does not match {what} length")));
    }
    Ok(count)
}

/// Graph wire layout: a 16-byte header `(node_count, edge_count, 0, 0)` as
/// u32s, node features, u32 edge index pairs, then edge features.
fn pack_graph(
    sub: &Table,
    payload: &serde_json::Map<String, Value>,
) -> Result<Vec<u8>, PayloadError> {
    let dtype = dtype_of(sub, "input_dtype")?;
    let (Some(node_dim), Some(edge_dim)) = (
        int_field(sub, "node_feature_dim"),
        int_field(sub, "edge_feature_dim"),
    ) else {
        return Err(PayloadError::input(
            "schema.graph node_feature_dim/edge_feature_dim required",
        ));
    };
    let (Some(max_nodes), Some(max_edges)) =
        (int_field(sub, "max_nodes"), int_field(sub, "max_edges"))
    else {
        return Err(PayloadError::input("schema.graph max_nodes/max_edges required"));
    };

    let nodes = pick(payload, &["nodes", "node_features"]);
    let edges = pick(payload, &["edges", "edge_index", "edge_indices"]);
    let edge_features = pick(payload, &["edge_features", "edge_attrs"]);
    let (Some(nodes), Some(edges)) = (nodes, edges) else {
        return Err(PayloadError::input("graph payload requires nodes and edges"));
    };
    let Value::Array(nodes) = nodes else {
        return Err(PayloadError::input("nodes must be a list"));
    };

    let node_count = counted(
        payload,
        "node_count",
        nodes.len(),
        max_nodes,
        "nodes",
        "schema.graph.max_nodes",
    )?;

    let mut flat_nodes = Vec::with_capacity(node_count * node_dim.max(0) as usize);
    for row in nodes {
        let row = row
            .as_array()
            .filter(|r| r.len() as i64 == node_dim)
            .ok_or_else(|| PayloadError::input("node feature row length mismatch"))?;
        flat_nodes.extend(row.iter().cloned());
    }

    let edge_pairs = normalize_edges(edges)?;
    let edge_count = counted(
        payload,
        "edge_count",
        edge_pairs.len(),
        max_edges,
        "edges",
        "schema.graph.max_edges",
    )?;

    let mut buf = Vec::new();
    for header in [node_count as u32, edge_count as u32, 0, 0] {
        buf.extend_from_slice(&header.to_le_bytes());
    }
    buf.extend(pack_values(dtype, &flat_nodes)?);
    for (src, dst) in &edge_pairs {
        buf.extend_from_slice(&src.to_le_bytes());
        buf.extend_from_slice(&dst.to_le_bytes());
    }

    if edge_dim > 0 {
        let Some(Value::Array(edge_features)) = edge_features else {
            return Err(PayloadError::input("edge_features required for edge_feature_dim > 0"));
        };
        if edge_features.len() != edge_count {
            return Err(PayloadError::input("edge_features length mismatch"));
        }
        let mut flat = Vec::with_capacity(edge_count * edge_dim as usize);
        for row in edge_features {
            let row = row
                .as_array()
                .filter(|r| r.len() as i64 == edge_dim)
                .ok_or_else(|| PayloadError::input("edge feature row length mismatch"))?;
            flat.extend(row.iter().cloned());
        }
        buf.extend(pack_values(dtype, &flat)?);
    }
    Ok(buf)
}

fn unpack_graph(sub: &Table, data: &[u8]) -> Result<Value, PayloadError> {
    let dtype = dtype_of(sub, "input_dtype")?;
    let (Some(node_dim), Some(edge_dim)) = (
        int_field(sub, "node_feature_dim"),
        int_field(sub, "edge_feature_dim"),
    ) else {
        return Err(PayloadError::input(
            "schema.graph node_feature_dim/edge_feature_dim required",
        ));
    };
    let (node_dim, edge_dim) = (node_dim.max(0) as usize, edge_dim.max(0) as usize);

    if data.len() < 16 {
        return Err(PayloadError::input("graph buffer shorter than its header"));
    }
    let node_count = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    let edge_count = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;

    let dsize = dtype.size() as usize;
    let nodes_bytes = node_count * node_dim * dsize;
    let edges_bytes = edge_count * 8;
    let edge_feat_bytes = edge_count * edge_dim * dsize;
    let expected = 16 + nodes_bytes + edges_bytes + edge_feat_bytes;
    if data.len() != expected {
        return Err(PayloadError::input(format!(
            "graph buffer length mismatch: {} != {expected} bytes",
            data.len()
        )));
    }

    let nodes = rows(
        unpack_values(dtype, &data[16..16 + nodes_bytes], node_count * node_dim)?,
        node_dim,
    );

    let edges_off = 16 + nodes_bytes;
    let mut edges = Vec::with_capacity(edge_count);
    for pair in data[edges_off..edges_off + edges_bytes].chunks(8) {
        let src = u32::from_le_bytes(pair[0..4].try_into().unwrap());
        let dst = u32::from_le_bytes(pair[4..8].try_into().unwrap());
        edges.push(Value::Array(vec![Value::from(src), Value::from(dst)]));
    }

    let mut out = serde_json::Map::new();
    out.insert("node_count".into(), Value::from(node_count));
    out.insert("edge_count".into(), Value::from(edge_count));
    out.insert("nodes".into(), nodes);
    out.insert("edges".into(), Value::Array(edges));
    if edge_dim > 0 {
        let feat_off = edges_off + edges_bytes;
        let feats = rows(
            unpack_values(dtype, &data[feat_off..], edge_count * edge_dim)?,
            edge_dim,
        );
        out.insert("edge_features".into(), feats);
    }
    Ok(Value::Object(out))
}

fn custom_payload_bytes(payload: &Value) -> Result<Vec<u8>, PayloadError> {
    match payload {
        Value::Object(obj) => {
            if let Some(hex_str) = obj.get("payload_hex").and_then(Value::as_str) {
                let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
                return hex::decode(hex_str)
                    .map_err(|_| PayloadError::input("payload_hex is not valid hex"));
            }
            if let Some(b64) = obj.get("payload_base64").and_then(Value::as_str) {
                return BASE64
                    .decode(b64)
                    .map_err(|_| PayloadError::input("payload_base64 is not valid base64"));
            }
            if let Some(inner) = obj.get("payload") {
                return custom_payload_bytes(inner);
            }
            Err(PayloadError::input("unsupported custom payload format"))
        }
        Value::Array(items) => items
            .iter()
            .map(|b| {
                b.as_i64()
                    .map(|v| (v & 0xFF) as u8)
                    .ok_or_else(|| PayloadError::input("custom payload bytes must be integers"))
            })
            .collect(),
        Value::String(s) => {
            if let Some(hex_str) = s.strip_prefix("0x") {
                return hex::decode(hex_str)
                    .map_err(|_| PayloadError::input("custom payload string must be hex or base64"));
            }
            BASE64
                .decode(s)
                .map_err(|_| PayloadError::input("custom payload string must be hex or base64"))
        }
        _ => Err(PayloadError::input("unsupported custom payload format")),
    }
}

fn pack_custom(sub: &Table, payload: &Value) -> Result<Vec<u8>, PayloadError> {
    let input_size = int_field(sub, "input_blob_size")
        .filter(|&s| s > 0)
        .ok_or_else(|| PayloadError::input("schema.custom.input_blob_size required"))?;
    let data = custom_payload_bytes(payload)?;
    if (data.len() as i64) < input_size {
        return Err(PayloadError::input("custom payload smaller than input_blob_size"));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fb_manifest::parse_manifest;
    use serde_json::json;

    fn manifest(text: &str) -> Manifest {
        parse_manifest(text).unwrap()
    }

    const VECTOR: &str = r#"
        [schema]
        type = "vector"
        [schema.vector]
        input_dtype = "i32"
        input_shape = [2, 2]
        output_dtype = "i32"
        output_shape = [1]
    "#;

    #[test]
    fn test_vector_accepts_flat_and_nested() {
        let m = manifest(VECTOR);
        let flat = pack_payload(&m, &json!([1, 2, 3, 4])).unwrap();
        let nested = pack_payload(&m, &json!([[1, 2], [3, 4]])).unwrap();
        assert_eq!(flat, nested);
        assert_eq!(flat.len(), 16);
        assert_eq!(&flat[0..4], &1i32.to_le_bytes());
    }

    #[test]
    fn test_vector_length_mismatch() {
        let m = manifest(VECTOR);
        let err = pack_payload(&m, &json!([1, 2, 3])).unwrap_err();
        assert!(err.to_string().contains("vector payload length mismatch: 3 != 4"));
    }

    #[test]
    fn test_time_series_row_checks() {
        let m = manifest(
            r#"
            [schema]
            type = "time_series"
            [schema.time_series]
            input_dtype = "i32"
            window = 2
            features = 3
            output_dtype = "i32"
            output_shape = [1]
        "#,
        );
        let ok = pack_payload(&m, &json!([[1, 2, 3], [4, 5, 6]])).unwrap();
        assert_eq!(ok.len(), 24);
        let err = pack_payload(&m, &json!([[1, 2], [3, 4]])).unwrap_err();
        assert!(err.to_string().contains("time_series row length mismatch"));
        let err = pack_payload(&m, &json!([[1, 2, 3]])).unwrap_err();
        assert!(err.to_string().contains("window length mismatch"));
    }

    const GRAPH: &str = r#"
        [schema]
        type = "graph"
        [schema.graph]
        input_dtype = "i32"
        node_feature_dim = 2
        edge_feature_dim = 0
        max_nodes = 4
        max_edges = 4
        output_dtype = "i32"
        output_shape = [1]
    "#;

    #[test]
    fn test_graph_header_and_edges() {
        let m = manifest(GRAPH);
        let payload = json!({
            "nodes": [[1, 2], [3, 4]],
            "edges": [[0, 1], [1, 0]]
        });
        let buf = pack_payload(&m, &payload).unwrap();
        // 16B header + 2*2 i32 nodes + 2 u32 pairs
        assert_eq!(buf.len(), 16 + 16 + 16);
        assert_eq!(&buf[0..4], &2u32.to_le_bytes());
        assert_eq!(&buf[4..8], &2u32.to_le_bytes());
        assert_eq!(&buf[32..36], &0u32.to_le_bytes());
        assert_eq!(&buf[36..40], &1u32.to_le_bytes());
    }

    #[test]
    fn test_graph_flat_edge_list() {
        let m = manifest(GRAPH);
        let nested = pack_payload(
            &m,
            &json!({"nodes": [[1, 2]], "edges": [[0, 0]]}),
        )
        .unwrap();
        let flat = pack_payload(&m, &json!({"nodes": [[1, 2]], "edges": [0, 0]})).unwrap();
        assert_eq!(nested, flat);
    }

    #[test]
    fn test_graph_count_limits() {
        let m = manifest(GRAPH);
        let payload = json!({
            "nodes": [[1, 2], [3, 4], [5, 6], [7, 8], [9, 10]],
            "edges": []
        });
        let err = pack_payload(&m, &payload).unwrap_err();
        assert!(err.to_string().contains("node_count exceeds schema.graph.max_nodes"));

        let payload = json!({"nodes": [[1, 2]], "edges": [], "node_count": 2});
        let err = pack_payload(&m, &payload).unwrap_err();
        assert!(err.to_string().contains("node_count does not match nodes length"));
    }

    const CUSTOM: &str = r#"
        [schema]
        type = "custom"
        [schema.custom]
        input_blob_size = 4
        output_blob_size = 4
    "#;

    #[test]
    fn test_custom_payload_forms_agree() {
        let m = manifest(CUSTOM);
        let from_hex = pack_payload(&m, &json!({"payload_hex": "0xDEADBEEF"})).unwrap();
        let from_b64 = pack_payload(&m, &json!({"payload_base64": "3q2+7w=="})).unwrap();
        let from_list = pack_payload(&m, &json!([0xDE, 0xAD, 0xBE, 0xEF])).unwrap();
        let from_str = pack_payload(&m, &json!("0xdeadbeef")).unwrap();
        assert_eq!(from_hex, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(from_hex, from_b64);
        assert_eq!(from_hex, from_list);
        assert_eq!(from_hex, from_str);
    }

    #[test]
    fn test_custom_payload_too_small() {
        let m = manifest(CUSTOM);
        let err = pack_payload(&m, &json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("smaller than input_blob_size"));
    }

    #[test]
    fn test_vector_round_trip() {
        let m = manifest(VECTOR);
        let payload = json!([1, -2, 3, 4]);
        let buf = pack_payload(&m, &payload).unwrap();
        assert_eq!(unpack_payload(&m, &buf).unwrap(), payload);
    }

    #[test]
    fn test_vector_unpack_rejects_short_buffer() {
        let m = manifest(VECTOR);
        let err = unpack_payload(&m, &[0u8; 12]).unwrap_err();
        assert!(err.to_string().contains("vector buffer length mismatch: 12 != 16 bytes"));
    }

    #[test]
    fn test_time_series_round_trip() {
        let m = manifest(
            r#"
            [schema]
            type = "time_series"
            [schema.time_series]
            input_dtype = "i16"
            window = 2
            features = 3
            output_dtype = "i32"
            output_shape = [1]
        "#,
        );
        let payload = json!([[1, 2, 3], [-4, 5, 6]]);
        let buf = pack_payload(&m, &payload).unwrap();
        assert_eq!(unpack_payload(&m, &buf).unwrap(), payload);
    }

    #[test]
    fn test_graph_round_trip() {
        let m = manifest(GRAPH);
        let payload = json!({
            "node_count": 2,
            "edge_count": 2,
            "nodes": [[1, 2], [3, 4]],
            "edges": [[0, 1], [1, 0]]
        });
        let buf = pack_payload(&m, &payload).unwrap();
        assert_eq!(unpack_payload(&m, &buf).unwrap(), payload);
    }

    #[test]
    fn test_graph_round_trip_with_edge_features() {
        let m = manifest(
            r#"
            [schema]
            type = "graph"
            [schema.graph]
            input_dtype = "i32"
            node_feature_dim = 2
            edge_feature_dim = 2
            max_nodes = 4
            max_edges = 4
            output_dtype = "i32"
            output_shape = [1]
        "#,
        );
        let payload = json!({
            "node_count": 2,
            "edge_count": 1,
            "nodes": [[1, 2], [3, 4]],
            "edges": [[0, 1]],
            "edge_features": [[7, -8]]
        });
        let buf = pack_payload(&m, &payload).unwrap();
        assert_eq!(unpack_payload(&m, &buf).unwrap(), payload);
    }

    #[test]
    fn test_graph_unpack_rejects_truncated_buffer() {
        let m = manifest(GRAPH);
        let buf = pack_payload(
            &m,
            &json!({"nodes": [[1, 2]], "edges": [[0, 0]]}),
        )
        .unwrap();
        let err = unpack_payload(&m, &buf[..buf.len() - 4]).unwrap_err();
        assert!(err.to_string().contains("graph buffer length mismatch"));
        let err = unpack_payload(&m, &buf[..8]).unwrap_err();
        assert!(err.to_string().contains("shorter than its header"));
    }

    #[test]
    fn test_custom_round_trip() {
        let m = manifest(CUSTOM);
        let payload = json!([0xDE, 0xAD, 0xBE, 0xEF]);
        let buf = pack_payload(&m, &payload).unwrap();
        assert_eq!(unpack_payload(&m, &buf).unwrap(), payload);
    }

    #[test]
    fn test_load_payload_unwraps_known_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(&path, json!({"input": [1, 2], "other": 3}).to_string()).unwrap();
        assert_eq!(load_payload_from_path(&path).unwrap(), json!([1, 2]));
        std::fs::write(&path, json!([4, 5]).to_string()).unwrap();
        assert_eq!(load_payload_from_path(&path).unwrap(), json!([4, 5]));
    }
}
