//! Read-only views over a parsed manifest document.
//!
//! [`Manifest`] wraps the raw TOML table and exposes typed accessors for the
//! pieces the rest of the pipeline consumes. The raw tree stays available so
//! the validator can walk every key, including ones no accessor knows about.

use std::str::FromStr;

use toml::{Table, Value};

use crate::constants::{Dtype, SchemaType, RVCD_V1_DATA_OFFSET};

/// A parsed, immutable manifest document.
#[derive(Debug, Clone)]
pub struct Manifest {
    doc: Table,
}

/// One `[[segments]]` entry, as declared (not yet validated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDecl {
    pub index: Option<i64>,
    pub kind: Option<String>,
    pub access: Option<String>,
    pub source: Option<String>,
}

/// One `[[weights.blobs]]` entry, as declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDecl {
    pub name: Option<String>,
    pub file: Option<String>,
    pub hash: Option<String>,
    pub size_bytes: Option<i64>,
    pub chunk_size: Option<i64>,
    pub data_offset: Option<i64>,
    pub segment_index: Option<i64>,
}

/// Schema facts resolved for conversion and guest-config generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaInfo {
    pub schema_type: SchemaType,
    /// Flattened input element count (vector/time_series/graph).
    pub input_dim: Option<u64>,
    /// Flattened output element count (vector/time_series/graph).
    pub output_dim: Option<u64>,
    /// Custom schemas only.
    pub input_blob_size: Option<u64>,
    pub output_blob_size: Option<u64>,
}

/// Where the primary weights blob lands in VM memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightsBinding {
    pub segment_index: Option<i64>,
    pub data_offset: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaResolveError {
    #[error("schema table missing")]
    MissingSchema,
    #[error("schema.type must be vector, time_series, graph, or custom")]
    BadType,
    #[error("schema.{0} table is required")]
    MissingSubtable(&'static str),
    #[error("{0}")]
    MissingField(String),
}

impl Manifest {
    pub fn from_table(doc: Table) -> Self {
        Self { doc }
    }

    /// The raw document tree.
    pub fn raw(&self) -> &Table {
        &self.doc
    }

    /// A top-level table by name, if present and actually a table.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.doc.get(name).and_then(Value::as_table)
    }

    /// `schema.type`, parsed.
    pub fn schema_type(&self) -> Option<SchemaType> {
        let ty = self.table("schema")?.get("type")?.as_str()?;
        SchemaType::from_str(ty).ok()
    }

    /// The `schema.<type>` subtable matching the declared type.
    pub fn schema_table(&self) -> Option<&Table> {
        let ty = self.schema_type()?;
        self.table("schema")?.get(ty.as_str())?.as_table()
    }

    /// All `[[segments]]` entries; malformed entries come back with `None` fields.
    pub fn segments(&self) -> Vec<SegmentDecl> {
        let Some(items) = self.doc.get("segments").and_then(Value::as_array) else {
            return Vec::new();
        };
        items
            .iter()
            .map(|item| {
                let tbl = item.as_table();
                SegmentDecl {
                    index: tbl.and_then(|t| get_int(t, "index")),
                    kind: tbl.and_then(|t| get_str(t, "kind")),
                    access: tbl.and_then(|t| get_str(t, "access")),
                    source: tbl.and_then(|t| get_str(t, "source")),
                }
            })
            .collect()
    }

    /// All `[[weights.blobs]]` entries.
    pub fn blobs(&self) -> Vec<BlobDecl> {
        let Some(items) = self
            .table("weights")
            .and_then(|w| w.get("blobs"))
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };
        items
            .iter()
            .map(|item| {
                let tbl = item.as_table();
                BlobDecl {
                    name: tbl.and_then(|t| get_str(t, "name")),
                    file: tbl.and_then(|t| get_str(t, "file")),
                    hash: tbl.and_then(|t| get_str(t, "hash")),
                    size_bytes: tbl.and_then(|t| get_int(t, "size_bytes")),
                    chunk_size: tbl.and_then(|t| get_int(t, "chunk_size")),
                    data_offset: tbl.and_then(|t| get_int(t, "data_offset")),
                    segment_index: tbl.and_then(|t| get_int(t, "segment_index")),
                }
            })
            .collect()
    }

    /// `weights.layout`, if declared.
    pub fn weights_layout(&self) -> Option<String> {
        self.table("weights").and_then(|w| get_str(w, "layout"))
    }

    /// A named Q16 scale from `[weights.scales]`.
    pub fn scale(&self, key: &str) -> Option<i64> {
        self.table("weights")
            .and_then(|w| w.get("scales"))
            .and_then(Value::as_table)
            .and_then(|s| get_int(s, key))
    }

    /// An integer from `[build]`.
    pub fn build_int(&self, key: &str) -> Option<i64> {
        self.table("build").and_then(|b| get_int(b, key))
    }

    /// A boolean from `[build]`.
    pub fn build_bool(&self, key: &str) -> Option<bool> {
        self.table("build")
            .and_then(|b| b.get(key))
            .and_then(Value::as_bool)
    }

    /// An integer from `[abi]`.
    pub fn abi_int(&self, key: &str) -> Option<i64> {
        self.table("abi").and_then(|a| get_int(a, key))
    }

    /// Resolve schema type, flattened dims and custom blob sizes.
    ///
    /// This is the shared front door for the converter and the guest-config
    /// compiler; the validator reports field problems in more detail.
    pub fn schema_info(&self) -> Result<SchemaInfo, SchemaResolveError> {
        let schema = self
            .table("schema")
            .ok_or(SchemaResolveError::MissingSchema)?;
        let ty = schema
            .get("type")
            .and_then(Value::as_str)
            .and_then(|s| SchemaType::from_str(s).ok())
            .ok_or(SchemaResolveError::BadType)?;
        let sub = schema
            .get(ty.as_str())
            .and_then(Value::as_table)
            .ok_or(SchemaResolveError::MissingSubtable(ty.as_str()))?;

        let mut info = SchemaInfo {
            schema_type: ty,
            input_dim: None,
            output_dim: None,
            input_blob_size: None,
            output_blob_size: None,
        };

        match ty {
            SchemaType::Vector => {
                let input = shape_product(sub, "input_shape").ok_or_else(|| {
                    SchemaResolveError::MissingField(
                        "schema.vector input_shape/output_shape required".into(),
                    )
                })?;
                let output = shape_product(sub, "output_shape").ok_or_else(|| {
                    SchemaResolveError::MissingField(
                        "schema.vector input_shape/output_shape required".into(),
                    )
                })?;
                info.input_dim = Some(input);
                info.output_dim = Some(output);
            }
            SchemaType::TimeSeries => {
                let window = get_int(sub, "window").ok_or_else(|| {
                    SchemaResolveError::MissingField(
                        "schema.time_series window/features required".into(),
                    )
                })?;
                let features = get_int(sub, "features").ok_or_else(|| {
                    SchemaResolveError::MissingField(
                        "schema.time_series window/features required".into(),
                    )
                })?;
                let output = shape_product(sub, "output_shape").ok_or_else(|| {
                    SchemaResolveError::MissingField(
                        "schema.time_series output_shape required".into(),
                    )
                })?;
                info.input_dim = Some(window.max(0) as u64 * features.max(0) as u64);
                info.output_dim = Some(output);
            }
            SchemaType::Graph => {
                let node_dim = get_int(sub, "node_feature_dim").ok_or_else(|| {
                    SchemaResolveError::MissingField(
                        "schema.graph node_feature_dim required".into(),
                    )
                })?;
                let output = shape_product(sub, "output_shape").ok_or_else(|| {
                    SchemaResolveError::MissingField("schema.graph output_shape required".into())
                })?;
                info.input_dim = Some(node_dim.max(0) as u64);
                info.output_dim = Some(output);
            }
            SchemaType::Custom => {
                let input = get_int(sub, "input_blob_size").ok_or_else(|| {
                    SchemaResolveError::MissingField(
                        "schema.custom input_blob_size/output_blob_size required".into(),
                    )
                })?;
                let output = get_int(sub, "output_blob_size").ok_or_else(|| {
                    SchemaResolveError::MissingField(
                        "schema.custom input_blob_size/output_blob_size required".into(),
                    )
                })?;
                info.input_blob_size = Some(input.max(0) as u64);
                info.output_blob_size = Some(output.max(0) as u64);
            }
        }
        Ok(info)
    }

    /// Output dtype and flattened element count, for decoding results.
    pub fn output_info(&self) -> Option<(Dtype, Option<u64>)> {
        let ty = self.schema_type()?;
        let sub = self.schema_table()?;
        match ty {
            SchemaType::Vector | SchemaType::TimeSeries | SchemaType::Graph => {
                let dtype = get_str(sub, "output_dtype")?.parse::<Dtype>().ok()?;
                Some((dtype, shape_product(sub, "output_shape")))
            }
            SchemaType::Custom => {
                let size = get_int(sub, "output_blob_size")?;
                Some((Dtype::U8, Some(size.max(0) as u64)))
            }
        }
    }

    /// Locate the primary weights blob in VM memory.
    ///
    /// The segment index comes from the blob's `segment_index` or, failing
    /// that, the first `kind = "weights"` segment. The data offset falls back
    /// to the header format's implied offset.
    pub fn weights_binding(&self) -> Option<WeightsBinding> {
        let blob = self.blobs().into_iter().next()?;
        let header_format = self
            .table("weights")
            .and_then(|w| get_str(w, "header_format"))
            .unwrap_or_else(|| "none".to_string());
        let data_offset = match blob.data_offset {
            Some(off) => off.max(0) as u64,
            None if header_format == "rvcd-v1" => RVCD_V1_DATA_OFFSET,
            None => 0,
        };
        let segment_index = blob.segment_index.or_else(|| {
            self.segments()
                .into_iter()
                .find(|seg| seg.kind.as_deref() == Some("weights"))
                .and_then(|seg| seg.index)
        });
        Some(WeightsBinding {
            segment_index,
            data_offset,
        })
    }
}

/// Fetch an integer key from a table.
pub(crate) fn get_int(table: &Table, key: &str) -> Option<i64> {
    table.get(key).and_then(Value::as_integer)
}

/// Fetch a string key from a table.
pub(crate) fn get_str(table: &Table, key: &str) -> Option<String> {
    table.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Product of a positive-integer shape array, if the key holds one.
pub(crate) fn shape_product(table: &Table, key: &str) -> Option<u64> {
    let arr = table.get(key)?.as_array()?;
    let mut product: u64 = 1;
    for v in arr {
        let n = v.as_integer()?;
        if n < 0 {
            return None;
        }
        product = product.checked_mul(n as u64)?;
    }
    Some(product)
}
