//! Schema identity: canonical projection and 32-bit FNV-1a hashing.
//!
//! The hash commits guest binaries to the exact I/O contract they were built
//! against. It is computed over a canonical JSON rendering of the schema
//! subtable (sorted keys, no whitespace) so that reordering keys or adding
//! comments in the manifest never changes the digest.

use serde_json::{Map, Value as Json};
use toml::Value as Toml;

use crate::constants::SchemaType;
use crate::model::Manifest;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema table missing")]
    MissingSchema,
    #[error("schema.type must be vector, time_series, graph, or custom")]
    BadType,
    #[error("schema hash must be 32-bit hex (0xXXXXXXXX)")]
    BadHashLiteral,
}

/// Numeric schema id for the manifest's declared schema type.
pub fn schema_id(manifest: &Manifest) -> Result<u32, SchemaError> {
    Ok(resolve_type(manifest)?.id())
}

/// FNV-1a/32 over the canonical JSON projection of the schema.
pub fn schema_hash32(manifest: &Manifest) -> Result<u32, SchemaError> {
    let canonical = canonical_schema(manifest)?;
    // serde_json maps are BTree-ordered, so this is already sorted-key compact JSON.
    let payload = serde_json::to_string(&canonical).expect("canonical schema serializes");
    Ok(fnv1a32(payload.as_bytes()))
}

/// Render a 32-bit hash as `0xXXXXXXXX` (uppercase).
pub fn format_hash32(value: u32) -> String {
    format!("0x{value:08X}")
}

/// Parse a `0xXXXXXXXX` hash literal.
pub fn parse_hash32(value: &str) -> Result<u32, SchemaError> {
    let hex_part = value
        .strip_prefix("0x")
        .filter(|_| value.len() == 10)
        .ok_or(SchemaError::BadHashLiteral)?;
    u32::from_str_radix(hex_part, 16).map_err(|_| SchemaError::BadHashLiteral)
}

fn resolve_type(manifest: &Manifest) -> Result<SchemaType, SchemaError> {
    let schema = manifest.table("schema").ok_or(SchemaError::MissingSchema)?;
    schema
        .get("type")
        .and_then(Toml::as_str)
        .and_then(|s| s.parse::<SchemaType>().ok())
        .ok_or(SchemaError::BadType)
}

/// Project the schema subtable onto the fields that define its identity.
///
/// Absent fields project to JSON null rather than being dropped, so a
/// manifest that omits a field hashes differently from one that declares it.
fn canonical_schema(manifest: &Manifest) -> Result<Json, SchemaError> {
    let ty = resolve_type(manifest)?;
    let schema = manifest.table("schema").ok_or(SchemaError::MissingSchema)?;
    let sub = schema.get(ty.as_str()).and_then(Toml::as_table);

    let field = |key: &str| -> Json {
        sub.and_then(|t| t.get(key)).map_or(Json::Null, to_json)
    };

    let mut out = Map::new();
    out.insert("type".into(), Json::String(ty.as_str().into()));

    match ty {
        SchemaType::Vector => {
            out.insert("input_dtype".into(), field("input_dtype"));
            out.insert("input_shape".into(), field("input_shape"));
            out.insert("output_dtype".into(), field("output_dtype"));
            out.insert("output_shape".into(), field("output_shape"));
        }
        SchemaType::TimeSeries => {
            out.insert("input_dtype".into(), field("input_dtype"));
            out.insert("window".into(), field("window"));
            out.insert("features".into(), field("features"));
            let stride = match field("stride") {
                Json::Null => Json::from(1),
                other => other,
            };
            out.insert("stride".into(), stride);
            out.insert("output_dtype".into(), field("output_dtype"));
            out.insert("output_shape".into(), field("output_shape"));
        }
        SchemaType::Graph => {
            out.insert("input_dtype".into(), field("input_dtype"));
            out.insert("node_feature_dim".into(), field("node_feature_dim"));
            out.insert("edge_feature_dim".into(), field("edge_feature_dim"));
            out.insert("max_nodes".into(), field("max_nodes"));
            out.insert("max_edges".into(), field("max_edges"));
            out.insert("output_dtype".into(), field("output_dtype"));
            out.insert("output_shape".into(), field("output_shape"));
        }
        SchemaType::Custom => {
            out.insert("input_blob_size".into(), field("input_blob_size"));
            out.insert("output_blob_size".into(), field("output_blob_size"));
            out.insert("alignment".into(), field("alignment"));
            if let Some(fields) = sub
                .and_then(|t| t.get("fields"))
                .and_then(Toml::as_array)
            {
                let mut projected: Vec<Map<String, Json>> = fields
                    .iter()
                    .filter_map(Toml::as_table)
                    .map(|f| {
                        let mut m = Map::new();
                        for key in ["name", "offset", "dtype", "shape"] {
                            m.insert(key.into(), f.get(key).map_or(Json::Null, to_json));
                        }
                        m
                    })
                    .collect();
                projected.sort_by_key(|f| {
                    let offset = f.get("offset").and_then(Json::as_i64).unwrap_or(0);
                    let name = f
                        .get("name")
                        .and_then(Json::as_str)
                        .unwrap_or("")
                        .to_string();
                    (offset, name)
                });
                out.insert(
                    "fields".into(),
                    Json::Array(projected.into_iter().map(Json::Object).collect()),
                );
            }
        }
    }

    Ok(Json::Object(out))
}

fn to_json(value: &Toml) -> Json {
    match value {
        Toml::String(s) => Json::String(s.clone()),
        Toml::Integer(n) => Json::from(*n),
        Toml::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Toml::Boolean(b) => Json::Bool(*b),
        Toml::Datetime(dt) => Json::String(dt.to_string()),
        Toml::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Toml::Table(table) => Json::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
    }
}

pub(crate) fn fnv1a32(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811C_9DC5;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
