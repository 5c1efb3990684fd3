//! Strict manifest validation.
//!
//! The validator walks the raw TOML tree and accumulates every violation it
//! can find, including unknown keys, instead of stopping at the first. This
//! keeps one `fbkit validate` run actionable for a manifest with several
//! mistakes. Nothing here mutates the document.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use toml::{Table, Value};

use crate::constants::{
    Dtype, SchemaType, ALLOWED_ARCH, ALLOWED_ENDIANNESS, ALLOWED_HEADER_FORMAT, ALLOWED_PROFILE,
    ALLOWED_QUANT, ALLOWED_SEGMENT_ACCESS, ALLOWED_SEGMENT_KIND, ALLOWED_VALIDATION_MODE,
    DEFAULT_SCRATCH_MIN, MAX_SEGMENT_BYTES, MIN_CONTROL_SIZE, MIN_RESERVED_TAIL, RVCD_V1_DATA_OFFSET,
    SCALE_KEYS,
};
use crate::constants::{is_semver, is_slug};
use crate::model::Manifest;

/// One validation failure, human-readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub message: String,
}

impl ValidationIssue {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

struct Checker {
    issues: Vec<ValidationIssue>,
}

impl Checker {
    fn err(&mut self, message: impl Into<String>) {
        self.issues.push(ValidationIssue::new(message));
    }
}

/// Validate a manifest, returning every violation found. Empty means valid.
pub fn validate_manifest(manifest: &Manifest) -> Vec<ValidationIssue> {
    let doc = manifest.raw();
    let mut c = Checker { issues: Vec::new() };

    for key in ["model", "abi", "schema", "segments", "limits"] {
        if !doc.contains_key(key) {
            c.err(format!("Missing required table: [{key}]"));
        }
    }

    const ALLOWED_TOP: [&str; 9] = [
        "model",
        "abi",
        "schema",
        "segments",
        "weights",
        "limits",
        "validation",
        "build",
        "metadata",
    ];
    for key in doc.keys() {
        if !ALLOWED_TOP.contains(&key.as_str()) {
            c.err(format!("Unknown top-level key: {key}"));
        }
    }

    let abi = doc.get("abi").and_then(Value::as_table);
    check_model(&mut c, doc.get("model"));
    check_abi(&mut c, doc.get("abi"));
    check_segments(&mut c, doc.get("segments"));
    let blob_names = check_weights(&mut c, doc.get("weights"), doc.get("segments"));
    check_segment_blob_refs(&mut c, doc.get("segments"), &blob_names);
    check_schema(&mut c, doc.get("schema"), abi);
    check_profile(&mut c, doc);
    check_validation(&mut c, doc.get("validation"));
    check_limits(&mut c, doc.get("limits"));

    c.issues
}

fn get_int(table: &Table, key: &str) -> Option<i64> {
    table.get(key).and_then(Value::as_integer)
}

fn reject_unknown_keys(c: &mut Checker, table: &Table, allowed: &[&str], label: &str) {
    for key in table.keys() {
        if !allowed.contains(&key.as_str()) {
            c.err(format!("Unknown {label} key: {key}"));
        }
    }
}

fn check_model(c: &mut Checker, model: Option<&Value>) {
    let Some(model) = model else {
        c.err("model table missing");
        return;
    };
    let Some(model) = model.as_table() else {
        c.err("model must be a table");
        return;
    };
    reject_unknown_keys(
        c,
        model,
        &["id", "version", "abi_version", "arch", "endianness", "vaddr_bits", "profile"],
        "model",
    );
    match model.get("id").and_then(Value::as_str) {
        Some(id) if is_slug(id) => {}
        _ => c.err("model.id must be a slug: [a-z0-9_-]+"),
    }
    match model.get("version").and_then(Value::as_str) {
        Some(v) if is_semver(v) => {}
        _ => c.err("model.version must be semver (X.Y.Z)"),
    }
    match model.get("arch").and_then(Value::as_str) {
        Some(arch) if ALLOWED_ARCH.contains(&arch) => {}
        _ => c.err("model.arch must be 'rv64imac'"),
    }
    match model.get("endianness").and_then(Value::as_str) {
        Some(e) if ALLOWED_ENDIANNESS.contains(&e) => {}
        _ => c.err("model.endianness must be 'little'"),
    }
    if get_int(model, "vaddr_bits") != Some(32) {
        c.err("model.vaddr_bits must be 32");
    }
    if let Some(profile) = model.get("profile") {
        match profile.as_str() {
            Some(p) if ALLOWED_PROFILE.contains(&p) => {}
            _ => c.err("model.profile must be 'finance-int' when provided"),
        }
    }
}

fn check_abi(c: &mut Checker, abi: Option<&Value>) {
    let Some(abi) = abi else {
        c.err("abi table missing");
        return;
    };
    let Some(abi) = abi.as_table() else {
        c.err("abi must be a table");
        return;
    };
    reject_unknown_keys(
        c,
        abi,
        &[
            "entry",
            "control_offset",
            "control_size",
            "input_offset",
            "input_max",
            "output_offset",
            "output_max",
            "scratch_min",
            "alignment",
            "reserved_tail",
        ],
        "abi",
    );

    match get_int(abi, "entry") {
        None => c.err("abi.entry must be an integer"),
        // The top 4 bits of a 32-bit vaddr select the segment.
        Some(entry) if entry >> 28 != 0 => {
            c.err("abi.entry must reside in segment 0 (top 4 bits = 0)")
        }
        Some(_) => {}
    }

    let alignment = get_int(abi, "alignment");
    if !matches!(alignment, Some(4) | Some(8)) {
        c.err("abi.alignment must be 4 or 8");
    }

    let control_offset = get_int(abi, "control_offset");
    let control_size = get_int(abi, "control_size");
    let input_offset = get_int(abi, "input_offset");
    let input_max = get_int(abi, "input_max");
    let output_offset = get_int(abi, "output_offset");
    let output_max = get_int(abi, "output_max");
    let scratch_min = if abi.contains_key("scratch_min") {
        get_int(abi, "scratch_min")
    } else {
        Some(DEFAULT_SCRATCH_MIN as i64)
    };
    let reserved_tail = if abi.contains_key("reserved_tail") {
        get_int(abi, "reserved_tail")
    } else {
        Some(MIN_RESERVED_TAIL as i64)
    };

    for (name, val) in [
        ("abi.control_offset", control_offset),
        ("abi.input_offset", input_offset),
        ("abi.output_offset", output_offset),
    ] {
        match val {
            None => c.err(format!("{name} must be an integer")),
            Some(v) => {
                if let Some(a) = alignment.filter(|a| *a == 4 || *a == 8) {
                    if v % a != 0 {
                        c.err(format!("{name} must be aligned to abi.alignment"));
                    }
                }
            }
        }
    }

    if control_size.is_none_or(|v| v < MIN_CONTROL_SIZE as i64) {
        c.err("abi.control_size must be >= 64");
    }
    if input_max.is_none_or(|v| v <= 0) {
        c.err("abi.input_max must be a positive integer");
    }
    if output_max.is_none_or(|v| v <= 0) {
        c.err("abi.output_max must be a positive integer");
    }
    if scratch_min.is_none_or(|v| v < DEFAULT_SCRATCH_MIN as i64) {
        c.err("abi.scratch_min must be >= 262144");
    }
    if reserved_tail.is_none_or(|v| v < MIN_RESERVED_TAIL as i64) {
        c.err("abi.reserved_tail must be >= 32");
    }

    if let (Some(scratch), Some(tail)) = (scratch_min, reserved_tail) {
        let limit = scratch as i128 - tail as i128;
        let regions = [
            ("control_offset + control_size", control_offset, control_size),
            ("input_offset + input_max", input_offset, input_max),
            ("output_offset + output_max", output_offset, output_max),
        ];
        for (label, offset, size) in regions {
            if let (Some(offset), Some(size)) = (offset, size) {
                if offset as i128 + size as i128 > limit {
                    c.err(format!("{label} exceeds scratch bounds"));
                }
            }
        }
    }
}

fn check_segments(c: &mut Checker, segments: Option<&Value>) {
    let Some(segments) = segments else {
        c.err("segments table missing");
        return;
    };
    let items = segments.as_array();
    if items.is_none_or(|a| a.is_empty()) {
        c.err("segments must be a non-empty array");
        return;
    }

    let mut seen: HashSet<i64> = HashSet::new();
    let mut has_scratch = false;
    for seg in items.unwrap_or(&Vec::new()) {
        let Some(seg) = seg.as_table() else {
            c.err("segments entries must be tables");
            continue;
        };
        reject_unknown_keys(c, seg, &["index", "kind", "access", "source"], "segments");

        let idx = get_int(seg, "index");
        let kind = seg.get("kind").and_then(Value::as_str);
        let access = seg.get("access").and_then(Value::as_str);
        let source = seg.get("source").and_then(Value::as_str);

        match idx {
            Some(i) if (0..=15).contains(&i) => {
                if !seen.insert(i) {
                    c.err("segments.index values must be unique");
                }
            }
            _ => c.err("segments.index must be 0..15"),
        }
        if !kind.is_some_and(|k| ALLOWED_SEGMENT_KIND.contains(&k)) {
            c.err("segments.kind is invalid");
        }
        if !access.is_some_and(|a| ALLOWED_SEGMENT_ACCESS.contains(&a)) {
            c.err("segments.access is invalid");
        }
        if idx == Some(0) {
            if kind != Some("scratch") || access != Some("rw") {
                c.err("segment 0 must be scratch with rw access");
            }
            has_scratch = true;
        }
        match kind {
            Some("weights") => {
                if !source.is_some_and(|s| s.starts_with("weights:")) {
                    c.err("weights segment source must be weights:<name>");
                }
            }
            Some("input") if source != Some("io:input") => {
                c.err("input segment source must be io:input");
            }
            Some("output") if source != Some("io:output") => {
                c.err("output segment source must be io:output");
            }
            Some("custom") => {
                if !source.is_some_and(|s| s.starts_with("custom:")) {
                    c.err("custom segment source must be custom:<label>");
                }
            }
            _ => {}
        }
    }
    if !has_scratch {
        c.err("segments must include index=0 scratch segment");
    }
}

fn check_weights(
    c: &mut Checker,
    weights: Option<&Value>,
    segments: Option<&Value>,
) -> HashSet<String> {
    let has_weight_segment = segments
        .and_then(Value::as_array)
        .is_some_and(|segs| {
            segs.iter().any(|seg| {
                seg.as_table()
                    .and_then(|t| t.get("kind"))
                    .and_then(Value::as_str)
                    == Some("weights")
            })
        });

    let mut blob_names: HashSet<String> = HashSet::new();
    let weights_table = weights.and_then(Value::as_table);
    if has_weight_segment && weights_table.is_none() {
        c.err("weights table is required when weights segments exist");
    }
    let Some(weights) = weights_table else {
        return blob_names;
    };

    reject_unknown_keys(
        c,
        weights,
        &["layout", "quantization", "dtype", "scale", "header_format", "blobs", "scales"],
        "weights",
    );
    if !weights
        .get("layout")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
    {
        c.err("weights.layout must be a non-empty string");
    }
    if !weights
        .get("quantization")
        .and_then(Value::as_str)
        .is_some_and(|q| ALLOWED_QUANT.contains(&q))
    {
        c.err("weights.quantization is invalid");
    }
    let header_fmt = weights
        .get("header_format")
        .and_then(Value::as_str)
        .unwrap_or("none");
    if !ALLOWED_HEADER_FORMAT.contains(&header_fmt) {
        c.err("weights.header_format is invalid");
    }

    let blobs = weights.get("blobs").and_then(Value::as_array);
    if blobs.is_none_or(|b| b.is_empty()) {
        c.err("weights.blobs must be a non-empty array");
    } else {
        for blob in blobs.unwrap_or(&Vec::new()) {
            let Some(blob) = blob.as_table() else {
                c.err("weights.blobs entries must be tables");
                continue;
            };
            reject_unknown_keys(
                c,
                blob,
                &["name", "file", "hash", "size_bytes", "chunk_size", "data_offset", "segment_index"],
                "weights.blobs",
            );
            match blob.get("name").and_then(Value::as_str) {
                Some(name) if !name.is_empty() => {
                    if !blob_names.insert(name.to_string()) {
                        c.err("weights.blobs.name must be unique");
                    }
                }
                _ => c.err("weights.blobs.name must be a string"),
            }
            if blob.get("file").and_then(Value::as_str).is_none() {
                c.err("weights.blobs.file must be a string");
            }
            if !blob
                .get("hash")
                .and_then(Value::as_str)
                .is_some_and(|h| h.starts_with("sha256:"))
            {
                c.err("weights.blobs.hash must start with sha256:");
            }
            let size_bytes = get_int(blob, "size_bytes");
            if size_bytes.is_none_or(|s| s <= 0) {
                c.err("weights.blobs.size_bytes must be > 0");
            }
            if let Some(chunk) = blob.get("chunk_size") {
                if chunk.as_integer().is_none_or(|v| v <= 0) {
                    c.err("weights.blobs.chunk_size must be > 0 when provided");
                }
            }
            let data_offset = blob.get("data_offset").map(Value::as_integer);
            if let Some(off) = data_offset {
                if off.is_none_or(|v| v < 0) {
                    c.err("weights.blobs.data_offset must be >= 0");
                }
            }

            let effective_offset = match data_offset {
                Some(Some(off)) => off,
                _ if header_fmt == "rvcd-v1" => RVCD_V1_DATA_OFFSET as i64,
                _ => 0,
            };
            if let Some(size) = size_bytes {
                if effective_offset as i128 + size as i128 > MAX_SEGMENT_BYTES as i128 {
                    c.err("weights blob exceeds segment limit");
                }
            }
        }
    }

    if let Some(scales) = weights.get("scales") {
        match scales.as_table() {
            None => c.err("weights.scales must be a table"),
            Some(scales) => {
                for key in scales.keys() {
                    if !SCALE_KEYS.contains(&key.as_str()) {
                        c.err(format!("weights.scales.{key} is not allowed"));
                    }
                }
                for (key, val) in scales {
                    if val.as_integer().is_none_or(|v| v <= 0) {
                        c.err(format!("weights.scales.{key} must be positive integer"));
                    }
                }
            }
        }
    }

    blob_names
}

fn check_segment_blob_refs(
    c: &mut Checker,
    segments: Option<&Value>,
    blob_names: &HashSet<String>,
) {
    if blob_names.is_empty() {
        return;
    }
    let Some(segments) = segments.and_then(Value::as_array) else {
        return;
    };
    for seg in segments {
        let Some(seg) = seg.as_table() else { continue };
        if seg.get("kind").and_then(Value::as_str) != Some("weights") {
            continue;
        }
        if let Some(source) = seg.get("source").and_then(Value::as_str) {
            if let Some(name) = source.strip_prefix("weights:") {
                if !blob_names.contains(name) {
                    c.err(format!("weights segment references unknown blob: {name}"));
                }
            }
        }
    }
}

fn dtype_of(table: &Table, key: &str) -> Option<Dtype> {
    table
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| Dtype::from_str(s).ok())
}

/// Non-empty array of positive integers; reports under `label` otherwise.
fn pos_int_list(c: &mut Checker, value: Option<&Value>, label: &str) -> Option<u64> {
    let Some(items) = value.and_then(Value::as_array).filter(|a| !a.is_empty()) else {
        c.err(format!("{label} must be a non-empty array"));
        return None;
    };
    let mut product: u64 = 1;
    let mut ok = true;
    for item in items {
        match item.as_integer() {
            Some(v) if v > 0 => product = product.saturating_mul(v as u64),
            _ => {
                c.err(format!("{label} must contain positive integers"));
                ok = false;
            }
        }
    }
    ok.then_some(product)
}

fn io_budget(abi: Option<&Table>, key: &str) -> Option<i64> {
    abi.and_then(|a| get_int(a, key))
}

fn check_schema(c: &mut Checker, schema: Option<&Value>, abi: Option<&Table>) {
    let schema_table = schema.and_then(Value::as_table);
    let schema_type = schema_table
        .and_then(|s| s.get("type"))
        .and_then(Value::as_str)
        .and_then(|s| SchemaType::from_str(s).ok());

    match schema_type {
        None => c.err("schema.type must be one of: vector, time_series, graph, custom"),
        Some(ty) => {
            let sub = schema_table
                .and_then(|s| s.get(ty.as_str()))
                .and_then(Value::as_table);
            if sub.is_none() {
                c.err(format!("schema.{ty} table is required"));
            }
        }
    }

    let Some(schema) = schema else {
        c.err("schema table missing");
        return;
    };
    let Some(schema) = schema.as_table() else {
        c.err("schema must be a table");
        return;
    };
    reject_unknown_keys(
        c,
        schema,
        &["type", "vector", "time_series", "graph", "custom"],
        "schema",
    );
    if let Some(ty) = schema_type {
        for other in SchemaType::all() {
            if other != ty && schema.contains_key(other.as_str()) {
                c.err(format!("schema.{other} must not be present when type={ty}"));
            }
        }
    }

    let sub = schema_type
        .and_then(|ty| schema.get(ty.as_str()))
        .and_then(Value::as_table);
    let (Some(ty), Some(s)) = (schema_type, sub) else {
        return;
    };

    match ty {
        SchemaType::Vector => {
            reject_unknown_keys(
                c,
                s,
                &["input_dtype", "input_shape", "output_dtype", "output_shape"],
                "schema.vector",
            );
            let in_dt = dtype_of(s, "input_dtype");
            let out_dt = dtype_of(s, "output_dtype");
            if in_dt.is_none() {
                c.err("schema.vector.input_dtype is invalid");
            }
            if out_dt.is_none() {
                c.err("schema.vector.output_dtype is invalid");
            }
            let in_elems = pos_int_list(c, s.get("input_shape"), "schema.vector.input_shape");
            let out_elems = pos_int_list(c, s.get("output_shape"), "schema.vector.output_shape");
            if let (Some(dt), Some(elems), Some(max)) =
                (in_dt, in_elems, io_budget(abi, "input_max"))
            {
                if elems as i128 * dt.size() as i128 > max as i128 {
                    c.err("schema.vector input exceeds abi.input_max");
                }
            }
            if let (Some(dt), Some(elems), Some(max)) =
                (out_dt, out_elems, io_budget(abi, "output_max"))
            {
                if elems as i128 * dt.size() as i128 > max as i128 {
                    c.err("schema.vector output exceeds abi.output_max");
                }
            }
        }
        SchemaType::TimeSeries => {
            reject_unknown_keys(
                c,
                s,
                &["input_dtype", "window", "features", "stride", "output_dtype", "output_shape"],
                "schema.time_series",
            );
            let in_dt = dtype_of(s, "input_dtype");
            let out_dt = dtype_of(s, "output_dtype");
            let window = get_int(s, "window");
            let features = get_int(s, "features");
            if window.is_none_or(|w| w < 1) {
                c.err("schema.time_series.window must be >= 1");
            }
            if features.is_none_or(|f| f < 1) {
                c.err("schema.time_series.features must be >= 1");
            }
            if let Some(stride) = s.get("stride") {
                if stride.as_integer().is_none_or(|v| v < 1) {
                    c.err("schema.time_series.stride must be >= 1");
                }
            }
            if in_dt.is_none() {
                c.err("schema.time_series.input_dtype is invalid");
            }
            if out_dt.is_none() {
                c.err("schema.time_series.output_dtype is invalid");
            }
            if let (Some(dt), Some(w), Some(f), Some(max)) =
                (in_dt, window, features, io_budget(abi, "input_max"))
            {
                if w as i128 * f as i128 * dt.size() as i128 > max as i128 {
                    c.err("schema.time_series input exceeds abi.input_max");
                }
            }
            let out_elems =
                pos_int_list(c, s.get("output_shape"), "schema.time_series.output_shape");
            if let (Some(dt), Some(elems), Some(max)) =
                (out_dt, out_elems, io_budget(abi, "output_max"))
            {
                if elems as i128 * dt.size() as i128 > max as i128 {
                    c.err("schema.time_series output exceeds abi.output_max");
                }
            }
        }
        SchemaType::Graph => {
            reject_unknown_keys(
                c,
                s,
                &[
                    "input_dtype",
                    "node_feature_dim",
                    "edge_feature_dim",
                    "max_nodes",
                    "max_edges",
                    "output_dtype",
                    "output_shape",
                ],
                "schema.graph",
            );
            let in_dt = dtype_of(s, "input_dtype");
            let out_dt = dtype_of(s, "output_dtype");
            let max_nodes = get_int(s, "max_nodes");
            let max_edges = get_int(s, "max_edges");
            let node_dim = get_int(s, "node_feature_dim");
            let edge_dim = get_int(s, "edge_feature_dim");
            if max_nodes.is_none_or(|v| v < 1) {
                c.err("schema.graph.max_nodes must be >= 1");
            }
            if max_edges.is_none_or(|v| v < 0) {
                c.err("schema.graph.max_edges must be >= 0");
            }
            if node_dim.is_none_or(|v| v < 1) {
                c.err("schema.graph.node_feature_dim must be >= 1");
            }
            if edge_dim.is_none_or(|v| v < 0) {
                c.err("schema.graph.edge_feature_dim must be >= 0");
            }
            if in_dt.is_none() {
                c.err("schema.graph.input_dtype is invalid");
            }
            if out_dt.is_none() {
                c.err("schema.graph.output_dtype is invalid");
            }
            if let (Some(dt), Some(nodes), Some(edges), Some(ndim), Some(edim), Some(max)) = (
                in_dt,
                max_nodes.filter(|_| node_dim.is_some_and(|v| v >= 1)),
                max_edges,
                node_dim,
                edge_dim.filter(|v| *v >= 0),
                io_budget(abi, "input_max"),
            ) {
                // Wire format: 16-byte header, node features, u32 edge index
                // pairs, then edge features.
                let header = 16i128;
                let node_bytes = nodes as i128 * ndim as i128 * dt.size() as i128;
                let edge_index_bytes = edges as i128 * 2 * 4;
                let edge_feat_bytes = edges as i128 * edim as i128 * dt.size() as i128;
                if header + node_bytes + edge_index_bytes + edge_feat_bytes > max as i128 {
                    c.err("schema.graph input exceeds abi.input_max");
                }
            }
            let out_elems = pos_int_list(c, s.get("output_shape"), "schema.graph.output_shape");
            if let (Some(dt), Some(elems), Some(max)) =
                (out_dt, out_elems, io_budget(abi, "output_max"))
            {
                if elems as i128 * dt.size() as i128 > max as i128 {
                    c.err("schema.graph output exceeds abi.output_max");
                }
            }
        }
        SchemaType::Custom => {
            reject_unknown_keys(
                c,
                s,
                &[
                    "input_blob_size",
                    "output_blob_size",
                    "alignment",
                    "layout_doc",
                    "schema_hash32",
                    "fields",
                ],
                "schema.custom",
            );
            let in_blob = get_int(s, "input_blob_size");
            let out_blob = get_int(s, "output_blob_size");
            if in_blob.is_none_or(|v| v < 1) {
                c.err("schema.custom.input_blob_size must be >= 1");
            }
            if out_blob.is_none_or(|v| v < 1) {
                c.err("schema.custom.output_blob_size must be >= 1");
            }
            if let (Some(blob), Some(max)) = (in_blob, io_budget(abi, "input_max")) {
                if blob > max {
                    c.err("schema.custom input_blob_size exceeds abi.input_max");
                }
            }
            if let (Some(blob), Some(max)) = (out_blob, io_budget(abi, "output_max")) {
                if blob > max {
                    c.err("schema.custom output_blob_size exceeds abi.output_max");
                }
            }
            if let Some(align) = s.get("alignment") {
                if !matches!(align.as_integer(), Some(4) | Some(8)) {
                    c.err("schema.custom.alignment must be 4 or 8");
                }
            }
            if let Some(declared) = s.get("schema_hash32") {
                match declared.as_str() {
                    None => c.err("schema.custom.schema_hash32 must be a hex string"),
                    Some(text) => {
                        if crate::schema::parse_hash32(text).is_err() {
                            c.err("schema.custom.schema_hash32 must be 32-bit hex (0xXXXXXXXX)");
                        }
                    }
                }
            }
        }
    }
}

fn check_profile(c: &mut Checker, doc: &Table) {
    let profile = doc
        .get("model")
        .and_then(Value::as_table)
        .and_then(|m| m.get("profile"))
        .and_then(Value::as_str);
    if profile != Some("finance-int") {
        return;
    }

    let schema = doc.get("schema").and_then(Value::as_table);
    let schema_type = schema
        .and_then(|s| s.get("type"))
        .and_then(Value::as_str)
        .and_then(|s| SchemaType::from_str(s).ok());
    if let Some(ty @ (SchemaType::Vector | SchemaType::TimeSeries | SchemaType::Graph)) =
        schema_type
    {
        let sub = schema
            .and_then(|s| s.get(ty.as_str()))
            .and_then(Value::as_table);
        let field = |key: &str| sub.and_then(|t| t.get(key)).and_then(Value::as_str);
        if field("input_dtype") != Some("i32") {
            c.err("finance-int requires input_dtype=i32");
        }
        if field("output_dtype") != Some("i32") {
            c.err("finance-int requires output_dtype=i32");
        }
    }

    let Some(weights) = doc.get("weights").and_then(Value::as_table) else {
        return;
    };
    let layout = weights
        .get("layout")
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .unwrap_or_default();
    let quant = weights.get("quantization").and_then(Value::as_str);
    let dtype = weights.get("dtype").and_then(Value::as_str);
    if layout.contains("tree") || layout.contains("gbdt") {
        if quant != Some("custom") {
            c.err("finance-int tree requires weights.quantization custom");
        }
        if dtype != Some("i32") {
            c.err("finance-int tree requires weights.dtype i32");
        }
    } else {
        if !matches!(quant, Some("q8") | Some("q4")) {
            c.err("finance-int requires weights.quantization q8 or q4");
        }
        if dtype != Some("i8") {
            c.err("finance-int requires weights.dtype i8");
        }
        if weights.get("scales").and_then(Value::as_table).is_none() {
            c.err("finance-int requires weights.scales with Q16 values");
        }
    }
}

fn check_validation(c: &mut Checker, validation: Option<&Value>) {
    let Some(validation) = validation else { return };
    let Some(validation) = validation.as_table() else {
        c.err("validation must be a table");
        return;
    };
    reject_unknown_keys(c, validation, &["mode"], "validation");
    if !validation
        .get("mode")
        .and_then(Value::as_str)
        .is_some_and(|m| ALLOWED_VALIDATION_MODE.contains(&m))
    {
        c.err("validation.mode must be minimal or guest");
    }
}

fn check_limits(c: &mut Checker, limits: Option<&Value>) {
    let Some(limits) = limits else {
        c.err("limits table missing");
        return;
    };
    let Some(limits) = limits.as_table() else {
        c.err("limits must be a table");
        return;
    };
    reject_unknown_keys(c, limits, &["max_instructions", "cu_budget"], "limits");
    if get_int(limits, "max_instructions").is_none() {
        c.err("limits.max_instructions must be an integer");
    }
    if get_int(limits, "cu_budget").is_none() {
        c.err("limits.cu_budget must be an integer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_manifest;

    fn valid_manifest() -> String {
        r#"
[model]
id = "demo-model"
version = "0.1.0"
arch = "rv64imac"
endianness = "little"
vaddr_bits = 32

[abi]
entry = 4096
control_offset = 0
control_size = 64
input_offset = 1024
input_max = 4096
output_offset = 8192
output_max = 1024
scratch_min = 262144
alignment = 4
reserved_tail = 32

[schema]
type = "vector"

[schema.vector]
input_dtype = "i32"
input_shape = [8]
output_dtype = "i32"
output_shape = [2]

[[segments]]
index = 0
kind = "scratch"
access = "rw"

[[segments]]
index = 1
kind = "weights"
access = "ro"
source = "weights:main"

[weights]
layout = "linear_q8"
quantization = "q8"
dtype = "i8"
header_format = "rvcd-v1"

[[weights.blobs]]
name = "main"
file = "weights.bin"
hash = "sha256:0000000000000000000000000000000000000000000000000000000000000000"
size_bytes = 100

[weights.scales]
w_scale_q16 = 65536

[limits]
max_instructions = 1000000
cu_budget = 200000
"#
        .to_string()
    }

    fn issues_for(text: &str) -> Vec<String> {
        validate_manifest(&parse_manifest(text).unwrap())
            .into_iter()
            .map(|i| i.message)
            .collect()
    }

    #[test]
    fn test_valid_manifest_passes() {
        assert_eq!(issues_for(&valid_manifest()), Vec::<String>::new());
    }

    #[test]
    fn test_missing_tables_reported() {
        let issues = issues_for("[model]\nid = \"x\"\n");
        assert!(issues.contains(&"Missing required table: [abi]".to_string()));
        assert!(issues.contains(&"Missing required table: [schema]".to_string()));
        assert!(issues.contains(&"Missing required table: [segments]".to_string()));
        assert!(issues.contains(&"Missing required table: [limits]".to_string()));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let text = valid_manifest() + "\n[extras]\nfoo = 1\n";
        let issues = issues_for(&text);
        assert!(issues.contains(&"Unknown top-level key: extras".to_string()));
    }

    #[test]
    fn test_all_violations_accumulate() {
        let text = valid_manifest()
            .replace("id = \"demo-model\"", "id = \"Demo Model\"")
            .replace("version = \"0.1.0\"", "version = \"1.0\"")
            .replace("vaddr_bits = 32", "vaddr_bits = 64");
        let issues = issues_for(&text);
        assert!(issues.contains(&"model.id must be a slug: [a-z0-9_-]+".to_string()));
        assert!(issues.contains(&"model.version must be semver (X.Y.Z)".to_string()));
        assert!(issues.contains(&"model.vaddr_bits must be 32".to_string()));
        assert!(issues.len() >= 3);
    }

    #[test]
    fn test_entry_must_sit_in_segment_zero() {
        let text = valid_manifest().replace("entry = 4096", "entry = 0x10000000");
        let issues = issues_for(&text);
        assert!(issues
            .contains(&"abi.entry must reside in segment 0 (top 4 bits = 0)".to_string()));
    }

    #[test]
    fn test_scratch_bounds() {
        let text = valid_manifest().replace("input_offset = 1024", "input_offset = 262000");
        let issues = issues_for(&text);
        assert!(issues.contains(&"input_offset + input_max exceeds scratch bounds".to_string()));
    }

    #[test]
    fn test_segment_zero_required() {
        let text = valid_manifest().replace("index = 0", "index = 2");
        let issues = issues_for(&text);
        assert!(issues.contains(&"segments must include index=0 scratch segment".to_string()));
    }

    #[test]
    fn test_duplicate_segment_index() {
        let text = valid_manifest() + "\n[[segments]]\nindex = 1\nkind = \"scratch\"\naccess = \"rw\"\n";
        let issues = issues_for(&text);
        assert!(issues.contains(&"segments.index values must be unique".to_string()));
    }

    #[test]
    fn test_weights_segment_needs_known_blob() {
        let text = valid_manifest().replace("source = \"weights:main\"", "source = \"weights:ghost\"");
        let issues = issues_for(&text);
        assert!(issues.contains(&"weights segment references unknown blob: ghost".to_string()));
    }

    #[test]
    fn test_blob_exceeding_segment_limit() {
        let text = valid_manifest().replace("size_bytes = 100", "size_bytes = 268435456");
        let issues = issues_for(&text);
        assert!(issues.contains(&"weights blob exceeds segment limit".to_string()));
    }

    #[test]
    fn test_extra_schema_subtable_rejected() {
        let text = valid_manifest()
            + "\n[schema.custom]\ninput_blob_size = 4\noutput_blob_size = 4\n";
        let issues = issues_for(&text);
        assert!(issues.contains(&"schema.custom must not be present when type=vector".to_string()));
    }

    #[test]
    fn test_vector_io_budget() {
        let text = valid_manifest().replace("input_shape = [8]", "input_shape = [4096]");
        let issues = issues_for(&text);
        assert!(issues.contains(&"schema.vector input exceeds abi.input_max".to_string()));
    }

    #[test]
    fn test_finance_int_profile_enforced() {
        let text = valid_manifest()
            .replace("vaddr_bits = 32", "vaddr_bits = 32\nprofile = \"finance-int\"")
            .replace("input_dtype = \"i32\"", "input_dtype = \"f32\"")
            .replace("quantization = \"q8\"", "quantization = \"f32\"");
        let issues = issues_for(&text);
        assert!(issues.contains(&"finance-int requires input_dtype=i32".to_string()));
        assert!(issues.contains(&"finance-int requires weights.quantization q8 or q4".to_string()));
    }

    #[test]
    fn test_finance_int_tree_rules() {
        let text = valid_manifest()
            .replace("vaddr_bits = 32", "vaddr_bits = 32\nprofile = \"finance-int\"")
            .replace("layout = \"linear_q8\"", "layout = \"tree_gbdt_v1\"")
            .replace("dtype = \"i8\"", "dtype = \"i32\"");
        let issues = issues_for(&text);
        assert!(issues.contains(&"finance-int tree requires weights.quantization custom".to_string()));
    }

    #[test]
    fn test_scale_keys_restricted() {
        let text = valid_manifest().replace("w_scale_q16 = 65536", "bogus_scale = 65536");
        let issues = issues_for(&text);
        assert!(issues.contains(&"weights.scales.bogus_scale is not allowed".to_string()));
    }

    #[test]
    fn test_validation_mode() {
        let text = valid_manifest() + "\n[validation]\nmode = \"full\"\n";
        let issues = issues_for(&text);
        assert!(issues.contains(&"validation.mode must be minimal or guest".to_string()));
    }

    #[test]
    fn test_custom_schema_hash_literal() {
        let text = r#"
[model]
id = "c"
version = "0.1.0"
arch = "rv64imac"
endianness = "little"
vaddr_bits = 32

[abi]
entry = 0
control_offset = 0
control_size = 64
input_offset = 1024
input_max = 4096
output_offset = 8192
output_max = 1024
alignment = 4

[schema]
type = "custom"

[schema.custom]
input_blob_size = 64
output_blob_size = 16
schema_hash32 = "0xBAD"

[[segments]]
index = 0
kind = "scratch"
access = "rw"

[limits]
max_instructions = 1
cu_budget = 1
"#;
        let issues = issues_for(text);
        assert!(issues
            .contains(&"schema.custom.schema_hash32 must be 32-bit hex (0xXXXXXXXX)".to_string()));
    }
}
