//! Template converters and the `convert` entry point.
//!
//! Each converter quantizes one kernel family's tensors and emits the packed
//! blob in the order the guest reads it: weights first, then Q16 biases,
//! layer by layer. The entry point resolves dimensions from the manifest
//! schema, dispatches on the (inferred or forced) template, writes the blob
//! and feeds fresh scales back into `[weights.scales]`.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::info;

use fb_manifest::{load_manifest, patch, Manifest, SchemaType};

use crate::quant::{quantize_i8, to_i32_q16};
use crate::template::{infer_template, Template};
use crate::tensors::{self, TensorMap};
use crate::tree::{encode_trees, parse_trees};
use crate::CodecError;

/// Manifest scale keys and their values, as produced by one conversion.
pub type Scales = Vec<(&'static str, i64)>;

/// Knobs for one `convert` run. Overrides beat manifest-derived values.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub template: Option<Template>,
    pub output_path: Option<PathBuf>,
    pub scale_q16: Option<i64>,
    pub w1_scale_q16: Option<i64>,
    pub w2_scale_q16: Option<i64>,
    pub w3_scale_q16: Option<i64>,
    pub w4_scale_q16: Option<i64>,
    pub update_manifest: bool,
    pub input_dim: Option<usize>,
    pub output_dim: Option<usize>,
    pub hidden_dim: Option<usize>,
    pub hidden_dim1: Option<usize>,
    pub hidden_dim2: Option<usize>,
    pub hidden_dim3: Option<usize>,
    pub bias: bool,
    pub keymap: Vec<(String, String)>,
    pub input_dim_a: Option<usize>,
    pub input_dim_b: Option<usize>,
    pub embed_dim: Option<usize>,
    pub tree_count: Option<usize>,
    pub tree_node_count: Option<usize>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions {
            template: None,
            output_path: None,
            scale_q16: None,
            w1_scale_q16: None,
            w2_scale_q16: None,
            w3_scale_q16: None,
            w4_scale_q16: None,
            update_manifest: true,
            input_dim: None,
            output_dim: None,
            hidden_dim: None,
            hidden_dim1: None,
            hidden_dim2: None,
            hidden_dim3: None,
            bias: true,
            keymap: Vec::new(),
            input_dim_a: None,
            input_dim_b: None,
            embed_dim: None,
            tree_count: None,
            tree_node_count: None,
        }
    }
}

/// What a conversion produced.
#[derive(Debug, Clone)]
pub struct ConvertReport {
    pub template: Template,
    pub output_path: PathBuf,
    pub blob_len: u64,
    pub scales: Scales,
}

fn require<'a>(data: &'a TensorMap, key: &str) -> Result<&'a Value, CodecError> {
    data.get(key)
        .ok_or_else(|| CodecError::input(format!("Missing '{key}' in input data")))
}

/// Zero-filled when absent, skipped entirely when biases are disabled.
fn bias_q16(
    data: &TensorMap,
    key: &str,
    len: usize,
    enabled: bool,
) -> Result<Vec<i32>, CodecError> {
    if !enabled {
        return Ok(Vec::new());
    }
    let vals = match data.get(key) {
        Some(v) => tensors::vector(v, len, key)?,
        None => vec![0.0; len],
    };
    Ok(to_i32_q16(&vals))
}

fn emit_layer(buf: &mut Vec<u8>, weights: &[i8], biases: &[i32]) {
    buf.extend(weights.iter().map(|&q| q as u8));
    for b in biases {
        buf.extend_from_slice(&b.to_le_bytes());
    }
}

/// Single dense layer: `w` (then `b` when biases are on).
pub fn convert_linear(
    data: &TensorMap,
    input_dim: usize,
    output_dim: usize,
    scale_q16: Option<i64>,
    bias: bool,
) -> Result<(Vec<u8>, Scales), CodecError> {
    let w_data = require(data, "w")?;
    // A single-output classifier may export w as [1][input_dim] or flat.
    let w = if output_dim == 1 {
        match w_data.as_array() {
            Some(rows) if rows.first().is_some_and(Value::is_array) => {
                if rows.len() != 1 {
                    return Err(CodecError::input(format!(
                        "w row count mismatch: {} != 1",
                        rows.len()
                    )));
                }
                tensors::vector(&rows[0], input_dim, "w")?
            }
            _ => tensors::vector(w_data, input_dim, "w")?,
        }
    } else {
        tensors::flatten_matrix(w_data, output_dim, input_dim, "w")?
    };

    let (w_q, scale_q16) = quantize_i8(&w, scale_q16);
    let b_q16 = bias_q16(data, "b", output_dim, bias)?;

    let mut buf = Vec::new();
    emit_layer(&mut buf, &w_q, &b_q16);
    Ok((buf, vec![("w_scale_q16", scale_q16)]))
}

/// Two dense layers: `w1 b1 w2 b2`. Biases are always present for this
/// kernel; absent tensors emit as zeros.
pub fn convert_mlp(
    data: &TensorMap,
    input_dim: usize,
    hidden_dim: usize,
    output_dim: usize,
    w1_scale_q16: Option<i64>,
    w2_scale_q16: Option<i64>,
) -> Result<(Vec<u8>, Scales), CodecError> {
    let w1 = tensors::flatten_matrix(require(data, "w1")?, hidden_dim, input_dim, "w1")?;
    let w2 = tensors::flatten_matrix(require(data, "w2")?, output_dim, hidden_dim, "w2")?;
    let (w1_q, w1_scale) = quantize_i8(&w1, w1_scale_q16);
    let (w2_q, w2_scale) = quantize_i8(&w2, w2_scale_q16);
    let b1 = bias_q16(data, "b1", hidden_dim, true)?;
    let b2 = bias_q16(data, "b2", output_dim, true)?;

    let mut buf = Vec::new();
    emit_layer(&mut buf, &w1_q, &b1);
    emit_layer(&mut buf, &w2_q, &b2);
    Ok((buf, vec![("w1_scale_q16", w1_scale), ("w2_scale_q16", w2_scale)]))
}

/// Three dense layers: `w1 b1 w2 b2 w3 b3`.
#[allow(clippy::too_many_arguments)]
pub fn convert_mlp2(
    data: &TensorMap,
    input_dim: usize,
    hidden_dim1: usize,
    hidden_dim2: usize,
    output_dim: usize,
    w1_scale_q16: Option<i64>,
    w2_scale_q16: Option<i64>,
    w3_scale_q16: Option<i64>,
    bias: bool,
) -> Result<(Vec<u8>, Scales), CodecError> {
    let w1 = tensors::flatten_matrix(require(data, "w1")?, hidden_dim1, input_dim, "w1")?;
    let w2 = tensors::flatten_matrix(require(data, "w2")?, hidden_dim2, hidden_dim1, "w2")?;
    let w3 = tensors::flatten_matrix(require(data, "w3")?, output_dim, hidden_dim2, "w3")?;
    let (w1_q, w1_scale) = quantize_i8(&w1, w1_scale_q16);
    let (w2_q, w2_scale) = quantize_i8(&w2, w2_scale_q16);
    let (w3_q, w3_scale) = quantize_i8(&w3, w3_scale_q16);
    let b1 = bias_q16(data, "b1", hidden_dim1, bias)?;
    let b2 = bias_q16(data, "b2", hidden_dim2, bias)?;
    let b3 = bias_q16(data, "b3", output_dim, bias)?;

    let mut buf = Vec::new();
    emit_layer(&mut buf, &w1_q, &b1);
    emit_layer(&mut buf, &w2_q, &b2);
    emit_layer(&mut buf, &w3_q, &b3);
    Ok((
        buf,
        vec![
            ("w1_scale_q16", w1_scale),
            ("w2_scale_q16", w2_scale),
            ("w3_scale_q16", w3_scale),
        ],
    ))
}

/// Four dense layers: `w1 b1 .. w4 b4`.
#[allow(clippy::too_many_arguments)]
pub fn convert_mlp3(
    data: &TensorMap,
    input_dim: usize,
    hidden_dim1: usize,
    hidden_dim2: usize,
    hidden_dim3: usize,
    output_dim: usize,
    scales: [Option<i64>; 4],
    bias: bool,
) -> Result<(Vec<u8>, Scales), CodecError> {
    let w1 = tensors::flatten_matrix(require(data, "w1")?, hidden_dim1, input_dim, "w1")?;
    let w2 = tensors::flatten_matrix(require(data, "w2")?, hidden_dim2, hidden_dim1, "w2")?;
    let w3 = tensors::flatten_matrix(require(data, "w3")?, hidden_dim3, hidden_dim2, "w3")?;
    let w4 = tensors::flatten_matrix(require(data, "w4")?, output_dim, hidden_dim3, "w4")?;
    let (w1_q, w1_scale) = quantize_i8(&w1, scales[0]);
    let (w2_q, w2_scale) = quantize_i8(&w2, scales[1]);
    let (w3_q, w3_scale) = quantize_i8(&w3, scales[2]);
    let (w4_q, w4_scale) = quantize_i8(&w4, scales[3]);
    let b1 = bias_q16(data, "b1", hidden_dim1, bias)?;
    let b2 = bias_q16(data, "b2", hidden_dim2, bias)?;
    let b3 = bias_q16(data, "b3", hidden_dim3, bias)?;
    let b4 = bias_q16(data, "b4", output_dim, bias)?;

    let mut buf = Vec::new();
    emit_layer(&mut buf, &w1_q, &b1);
    emit_layer(&mut buf, &w2_q, &b2);
    emit_layer(&mut buf, &w3_q, &b3);
    emit_layer(&mut buf, &w4_q, &b4);
    Ok((
        buf,
        vec![
            ("w1_scale_q16", w1_scale),
            ("w2_scale_q16", w2_scale),
            ("w3_scale_q16", w3_scale),
            ("w4_scale_q16", w4_scale),
        ],
    ))
}

/// Conv1d stage followed by a dense head: `conv b1 linear b2`.
#[allow(clippy::too_many_arguments)]
pub fn convert_cnn1d(
    data: &TensorMap,
    input_channels: usize,
    kernel_size: usize,
    out_channels: usize,
    output_dim: usize,
    w1_scale_q16: Option<i64>,
    w2_scale_q16: Option<i64>,
    bias: bool,
) -> Result<(Vec<u8>, Scales), CodecError> {
    let w1 = tensors::flatten_conv1d(
        require(data, "w1")?,
        out_channels,
        input_channels,
        kernel_size,
        "w1",
    )?;
    let w2 = tensors::flatten_matrix(require(data, "w2")?, output_dim, out_channels, "w2")?;
    let (w1_q, w1_scale) = quantize_i8(&w1, w1_scale_q16);
    let (w2_q, w2_scale) = quantize_i8(&w2, w2_scale_q16);
    let b1 = bias_q16(data, "b1", out_channels, bias)?;
    let b2 = bias_q16(data, "b2", output_dim, bias)?;

    let mut buf = Vec::new();
    emit_layer(&mut buf, &w1_q, &b1);
    emit_layer(&mut buf, &w2_q, &b2);
    Ok((buf, vec![("w1_scale_q16", w1_scale), ("w2_scale_q16", w2_scale)]))
}

/// Single-channel conv2d stage plus a dense head.
pub fn convert_tiny_cnn(
    data: &TensorMap,
    kernel_size: usize,
    out_channels: usize,
    output_dim: usize,
    w1_scale_q16: Option<i64>,
    w2_scale_q16: Option<i64>,
    bias: bool,
) -> Result<(Vec<u8>, Scales), CodecError> {
    let w1 = tensors::flatten_conv2d(require(data, "w1")?, out_channels, kernel_size, "w1")?;
    let w2 = tensors::flatten_matrix(require(data, "w2")?, output_dim, out_channels, "w2")?;
    let (w1_q, w1_scale) = quantize_i8(&w1, w1_scale_q16);
    let (w2_q, w2_scale) = quantize_i8(&w2, w2_scale_q16);
    let b1 = bias_q16(data, "b1", out_channels, bias)?;
    let b2 = bias_q16(data, "b2", output_dim, bias)?;

    let mut buf = Vec::new();
    emit_layer(&mut buf, &w1_q, &b1);
    emit_layer(&mut buf, &w2_q, &b2);
    Ok((buf, vec![("w1_scale_q16", w1_scale), ("w2_scale_q16", w2_scale)]))
}

/// Two projection towers into a shared embedding space.
pub fn convert_two_tower(
    data: &TensorMap,
    input_dim_a: usize,
    input_dim_b: usize,
    embed_dim: usize,
    w1_scale_q16: Option<i64>,
    w2_scale_q16: Option<i64>,
    bias: bool,
) -> Result<(Vec<u8>, Scales), CodecError> {
    let w1 = tensors::flatten_matrix(require(data, "w1")?, embed_dim, input_dim_a, "w1")?;
    let w2 = tensors::flatten_matrix(require(data, "w2")?, embed_dim, input_dim_b, "w2")?;
    let (w1_q, w1_scale) = quantize_i8(&w1, w1_scale_q16);
    let (w2_q, w2_scale) = quantize_i8(&w2, w2_scale_q16);
    let b1 = bias_q16(data, "b1", embed_dim, bias)?;
    let b2 = bias_q16(data, "b2", embed_dim, bias)?;

    let mut buf = Vec::new();
    emit_layer(&mut buf, &w1_q, &b1);
    emit_layer(&mut buf, &w2_q, &b2);
    Ok((buf, vec![("w1_scale_q16", w1_scale), ("w2_scale_q16", w2_scale)]))
}

fn resolve_dims(
    manifest: &Manifest,
    opts: &ConvertOptions,
) -> Result<(usize, usize), CodecError> {
    if let (Some(i), Some(o)) = (opts.input_dim, opts.output_dim) {
        return Ok((i, o));
    }
    let Some(schema_type) = manifest.schema_type() else {
        return Err(CodecError::input(
            "schema.type must be vector, time_series, graph, or custom",
        ));
    };
    if schema_type == SchemaType::Custom {
        return Err(CodecError::input(
            "custom schema requires --input-dim and --output-dim",
        ));
    }
    let info = manifest
        .schema_info()
        .map_err(|e| CodecError::input(e.to_string()))?;
    let input_dim = opts
        .input_dim
        .or(info.input_dim.map(|d| d as usize))
        .ok_or_else(|| CodecError::input("input/output dimensions could not be resolved"))?;
    let output_dim = opts
        .output_dim
        .or(info.output_dim.map(|d| d as usize))
        .ok_or_else(|| CodecError::input("input/output dimensions could not be resolved"))?;
    Ok((input_dim, output_dim))
}

fn resolve_output_path(
    manifest: &Manifest,
    manifest_path: &Path,
    opts: &ConvertOptions,
) -> PathBuf {
    if let Some(path) = &opts.output_path {
        return path.clone();
    }
    let dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    if let Some(file) = manifest.blobs().into_iter().next().and_then(|b| b.file) {
        return dir.join(file);
    }
    dir.join("weights.bin")
}

fn build_dim(manifest: &Manifest, key: &str) -> Option<usize> {
    manifest.build_int(key).and_then(|v| usize::try_from(v).ok())
}

/// Convert a tensor file into the packed weights blob the manifest declares.
pub fn convert_weights(
    manifest_path: &Path,
    input_path: &Path,
    opts: &ConvertOptions,
) -> Result<ConvertReport, CodecError> {
    let manifest = load_manifest(manifest_path)?;
    let template = opts
        .template
        .or_else(|| infer_template(manifest.weights_layout().as_deref()))
        .ok_or_else(|| CodecError::input("Unable to infer template; pass --template"))?;
    let (input_dim, output_dim) = resolve_dims(&manifest, opts)?;
    let output_path = resolve_output_path(&manifest, manifest_path, opts);

    let mut data = tensors::load_tensors(input_path)?;
    tensors::apply_keymap(&mut data, &opts.keymap)?;

    let (blob, scales) = match template {
        Template::Linear | Template::Softmax | Template::NaiveBayes => {
            convert_linear(&data, input_dim, output_dim, opts.scale_q16, opts.bias)?
        }
        Template::Mlp => {
            let hidden_dim = opts
                .hidden_dim
                .or_else(|| {
                    data.get("hidden_dim")
                        .and_then(Value::as_u64)
                        .map(|v| v as usize)
                })
                .or_else(|| {
                    data.get("w1")
                        .and_then(tensors::matrix_shape)
                        .map(|(rows, _)| rows)
                })
                .ok_or_else(|| {
                    CodecError::input("hidden_dim not found; include in input or pass 2D w1")
                })?;
            convert_mlp(
                &data,
                input_dim,
                hidden_dim,
                output_dim,
                opts.w1_scale_q16,
                opts.w2_scale_q16,
            )?
        }
        Template::Mlp2 => {
            let hidden_dim1 = opts
                .hidden_dim1
                .or_else(|| build_dim(&manifest, "hidden_dim1"))
                .or_else(|| data.get("w1").and_then(tensors::matrix_shape).map(|s| s.0));
            let hidden_dim2 = opts
                .hidden_dim2
                .or_else(|| build_dim(&manifest, "hidden_dim2"))
                .or_else(|| data.get("w2").and_then(tensors::matrix_shape).map(|s| s.0));
            let (Some(h1), Some(h2)) = (hidden_dim1, hidden_dim2) else {
                return Err(CodecError::input("hidden_dim1 and hidden_dim2 required for mlp2"));
            };
            convert_mlp2(
                &data,
                input_dim,
                h1,
                h2,
                output_dim,
                opts.w1_scale_q16,
                opts.w2_scale_q16,
                opts.w3_scale_q16,
                opts.bias,
            )?
        }
        Template::Mlp3 => {
            let hidden = |over: Option<usize>, key: &str, w: &str| {
                over.or_else(|| build_dim(&manifest, key))
                    .or_else(|| data.get(w).and_then(tensors::matrix_shape).map(|s| s.0))
            };
            let dims = [
                hidden(opts.hidden_dim1, "hidden_dim1", "w1"),
                hidden(opts.hidden_dim2, "hidden_dim2", "w2"),
                hidden(opts.hidden_dim3, "hidden_dim3", "w3"),
            ];
            let [Some(h1), Some(h2), Some(h3)] = dims else {
                return Err(CodecError::input("hidden_dim1/2/3 required for mlp3"));
            };
            convert_mlp3(
                &data,
                input_dim,
                h1,
                h2,
                h3,
                output_dim,
                [opts.w1_scale_q16, opts.w2_scale_q16, opts.w3_scale_q16, opts.w4_scale_q16],
                opts.bias,
            )?
        }
        Template::TwoTower => {
            let input_dim_a = opts
                .input_dim_a
                .or_else(|| build_dim(&manifest, "tower_input_a"));
            let input_dim_b = opts
                .input_dim_b
                .or_else(|| build_dim(&manifest, "tower_input_b"));
            let (Some(a), Some(b)) = (input_dim_a, input_dim_b) else {
                return Err(CodecError::input(
                    "build.tower_input_a and build.tower_input_b required for two_tower",
                ));
            };
            let embed_dim = opts
                .embed_dim
                .or_else(|| build_dim(&manifest, "embed_dim"))
                .ok_or_else(|| CodecError::input("build.embed_dim required for two_tower"))?;
            if a + b != input_dim {
                return Err(CodecError::input(
                    "tower_input_a + tower_input_b must equal schema input_dim",
                ));
            }
            convert_two_tower(
                &data,
                a,
                b,
                embed_dim,
                opts.w1_scale_q16,
                opts.w2_scale_q16,
                opts.bias,
            )?
        }
        Template::Tree => {
            let tree_count = opts
                .tree_count
                .or_else(|| build_dim(&manifest, "tree_count"))
                .unwrap_or(1);
            if tree_count < 1 {
                return Err(CodecError::input("build.tree_count must be >= 1 for tree template"));
            }
            let node_count = opts
                .tree_node_count
                .or_else(|| build_dim(&manifest, "tree_node_count"))
                .filter(|&n| n >= 1)
                .ok_or_else(|| {
                    CodecError::input("build.tree_node_count required for tree template")
                })?;
            let tree_stride = build_dim(&manifest, "tree_stride");
            let trees = parse_trees(&data)?;
            if trees.len() != tree_count {
                return Err(CodecError::input(
                    "tree_count does not match number of trees in input",
                ));
            }
            (encode_trees(&trees, node_count, tree_stride)?, Vec::new())
        }
        Template::Cnn1d => {
            if manifest.schema_type() != Some(SchemaType::TimeSeries) {
                return Err(CodecError::input("cnn1d template requires schema.type = time_series"));
            }
            let ts = manifest.schema_table();
            let features = ts
                .and_then(|t| t.get("features"))
                .and_then(toml::Value::as_integer)
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| {
                    CodecError::input("schema.time_series window/features required for cnn1d")
                })?;
            let kernel_size = build_dim(&manifest, "kernel_size")
                .filter(|&k| k >= 1)
                .ok_or_else(|| CodecError::input("build.kernel_size required for cnn1d"))?;
            let out_channels = build_dim(&manifest, "out_channels")
                .filter(|&c| c >= 1)
                .ok_or_else(|| CodecError::input("build.out_channels required for cnn1d"))?;
            let stride = build_dim(&manifest, "stride").unwrap_or(1);
            if stride < 1 {
                return Err(CodecError::input("build.stride must be >= 1 for cnn1d"));
            }
            convert_cnn1d(
                &data,
                features,
                kernel_size,
                out_channels,
                output_dim,
                opts.w1_scale_q16,
                opts.w2_scale_q16,
                opts.bias,
            )?
        }
        Template::TinyCnn => {
            if manifest.schema_type() != Some(SchemaType::Vector) {
                return Err(CodecError::input("tiny_cnn template requires schema.type = vector"));
            }
            let shape_dims = manifest
                .schema_table()
                .and_then(|t| t.get("input_shape"))
                .and_then(toml::Value::as_array)
                .filter(|a| a.len() == 2)
                .and_then(|a| {
                    let h = a[0].as_integer().and_then(|v| usize::try_from(v).ok())?;
                    let w = a[1].as_integer().and_then(|v| usize::try_from(v).ok())?;
                    Some((h, w))
                });
            let input_height = build_dim(&manifest, "input_height").or(shape_dims.map(|s| s.0));
            let input_width = build_dim(&manifest, "input_width").or(shape_dims.map(|s| s.1));
            let (Some(h), Some(w)) = (input_height, input_width) else {
                return Err(CodecError::input(
                    "build.input_height/input_width required for tiny_cnn",
                ));
            };
            let kernel_size = build_dim(&manifest, "kernel_size")
                .filter(|&k| k >= 1)
                .ok_or_else(|| CodecError::input("build.kernel_size required for tiny_cnn"))?;
            let out_channels = build_dim(&manifest, "out_channels")
                .filter(|&c| c >= 1)
                .ok_or_else(|| CodecError::input("build.out_channels required for tiny_cnn"))?;
            let stride = build_dim(&manifest, "stride").unwrap_or(1);
            if stride < 1 {
                return Err(CodecError::input("build.stride must be >= 1 for tiny_cnn"));
            }
            if h * w != input_dim {
                return Err(CodecError::input(
                    "tiny_cnn input_height * input_width must equal schema input_dim",
                ));
            }
            convert_tiny_cnn(
                &data,
                kernel_size,
                out_channels,
                output_dim,
                opts.w1_scale_q16,
                opts.w2_scale_q16,
                opts.bias,
            )?
        }
    };

    fs::write(&output_path, &blob).map_err(|e| CodecError::io(&output_path, e))?;
    info!(
        template = %template,
        path = %output_path.display(),
        bytes = blob.len(),
        "wrote weights blob"
    );

    if opts.update_manifest && !scales.is_empty() {
        patch::update_scales(manifest_path, scales.iter().copied())?;
    }

    Ok(ConvertReport {
        template,
        output_path,
        blob_len: blob.len() as u64,
        scales,
    })
}
