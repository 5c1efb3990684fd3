//! Resolution of a manifest into a [`GuestConfig`].

use std::fmt;
use std::str::FromStr;

use toml::Table;

use fb_codec::{infer_template, Template};
use fb_manifest::constants::{DEFAULT_SCRATCH_MIN, MIN_RESERVED_TAIL};
use fb_manifest::{parse_hash32, schema_hash32, Manifest, SchemaType};
use fb_payload::SchemaHashMode;

use crate::GuestError;

pub const DEFAULT_STACK_GUARD: i64 = 0x4000;
pub const DEFAULT_HIDDEN_OFFSET: i64 = 0x3000;
pub const DEFAULT_CONV_OFFSET: i64 = 0x3000;
const DEFAULT_Q16: i64 = 1 << 16;

/// Guest kernel family. Extends the converter templates with `custom`,
/// which has no weights pipeline of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestTemplate {
    Linear,
    Softmax,
    NaiveBayes,
    Mlp,
    Mlp2,
    Mlp3,
    Cnn1d,
    TinyCnn,
    TwoTower,
    Tree,
    Custom,
}

impl GuestTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestTemplate::Custom => "custom",
            other => Template::try_from(*other)
                .map(|t| t.as_str())
                .unwrap_or("custom"),
        }
    }

    /// Templates that read a quantized weights blob from a segment.
    fn reads_weights(&self) -> bool {
        !matches!(self, GuestTemplate::TwoTower | GuestTemplate::Custom)
    }
}

impl From<Template> for GuestTemplate {
    fn from(t: Template) -> Self {
        match t {
            Template::Linear => GuestTemplate::Linear,
            Template::Softmax => GuestTemplate::Softmax,
            Template::NaiveBayes => GuestTemplate::NaiveBayes,
            Template::Mlp => GuestTemplate::Mlp,
            Template::Mlp2 => GuestTemplate::Mlp2,
            Template::Mlp3 => GuestTemplate::Mlp3,
            Template::Cnn1d => GuestTemplate::Cnn1d,
            Template::TinyCnn => GuestTemplate::TinyCnn,
            Template::TwoTower => GuestTemplate::TwoTower,
            Template::Tree => GuestTemplate::Tree,
        }
    }
}

impl TryFrom<GuestTemplate> for Template {
    type Error = ();

    fn try_from(t: GuestTemplate) -> Result<Self, ()> {
        match t {
            GuestTemplate::Linear => Ok(Template::Linear),
            GuestTemplate::Softmax => Ok(Template::Softmax),
            GuestTemplate::NaiveBayes => Ok(Template::NaiveBayes),
            GuestTemplate::Mlp => Ok(Template::Mlp),
            GuestTemplate::Mlp2 => Ok(Template::Mlp2),
            GuestTemplate::Mlp3 => Ok(Template::Mlp3),
            GuestTemplate::Cnn1d => Ok(Template::Cnn1d),
            GuestTemplate::TinyCnn => Ok(Template::TinyCnn),
            GuestTemplate::TwoTower => Ok(Template::TwoTower),
            GuestTemplate::Tree => Ok(Template::Tree),
            GuestTemplate::Custom => Err(()),
        }
    }
}

impl FromStr for GuestTemplate {
    type Err = GuestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "custom" {
            return Ok(GuestTemplate::Custom);
        }
        Template::from_str(s)
            .map(GuestTemplate::from)
            .map_err(|_| GuestError::config(format!("Unknown template: {s}")))
    }
}

impl fmt::Display for GuestTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input/output dimensions and the weights window, for templates that
/// stream a weights blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDims {
    pub input_dim: u64,
    pub output_dim: u64,
    pub weights_seg: i64,
    pub weights_offset: i64,
    pub weights_data_offset: i64,
}

/// Per-template constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateParams {
    Linear {
        w_scale_q16: i64,
        has_bias: bool,
    },
    /// softmax and naive_bayes share a kernel shape.
    Classifier {
        w_scale_q16: i64,
        has_bias: bool,
        apply_softmax: bool,
    },
    Mlp {
        hidden_dim: i64,
        hidden_offset: i64,
        w1_scale_q16: i64,
        w2_scale_q16: i64,
    },
    Mlp2 {
        hidden_dims: [i64; 2],
        hidden_offsets: [i64; 2],
        scales: [i64; 3],
        has_bias: bool,
    },
    Mlp3 {
        hidden_dims: [i64; 3],
        hidden_offsets: [i64; 3],
        scales: [i64; 4],
        has_bias: bool,
    },
    Cnn1d {
        input_len: i64,
        input_channels: i64,
        kernel_size: i64,
        stride: i64,
        out_channels: i64,
        scales: [i64; 2],
        has_bias: bool,
        conv_offset: i64,
    },
    TinyCnn {
        input_height: i64,
        input_width: i64,
        kernel_size: i64,
        stride: i64,
        out_channels: i64,
        scales: [i64; 2],
        has_bias: bool,
        conv_offset: i64,
    },
    TwoTower {
        input_dim_a: i64,
        input_dim_b: i64,
        embed_dim: i64,
        scales: [i64; 2],
        has_bias: bool,
        dot_shift: i64,
        embed_a_offset: i64,
        embed_b_offset: i64,
    },
    Tree {
        count: i64,
        node_count: i64,
        stride: i64,
    },
    Custom {
        input_blob_size: u64,
        output_blob_size: u64,
    },
}

/// Everything a guest kernel's `config.rs` is rendered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestConfig {
    pub template: GuestTemplate,
    pub control_offset: i64,
    pub input_max: i64,
    pub output_max: i64,
    pub scratch_min: i64,
    pub reserved_tail: i64,
    pub stack_guard: i64,
    pub stack_ptr: i64,
    pub expected_schema_id: u32,
    pub expected_schema_hash: u32,
    pub dims: Option<ModelDims>,
    pub params: TemplateParams,
}

fn int_or_default(
    table: Option<&Table>,
    key: &str,
    default: i64,
    err: &str,
) -> Result<i64, GuestError> {
    match table.and_then(|t| t.get(key)) {
        None => Ok(default),
        Some(v) => v.as_integer().ok_or_else(|| GuestError::config(err)),
    }
}

fn required_int(table: Option<&Table>, key: &str, err: &str) -> Result<i64, GuestError> {
    table
        .and_then(|t| t.get(key))
        .and_then(toml::Value::as_integer)
        .ok_or_else(|| GuestError::config(err))
}

fn expected_hash(manifest: &Manifest, mode: SchemaHashMode) -> Result<u32, GuestError> {
    match mode {
        SchemaHashMode::None => Ok(0),
        SchemaHashMode::Manifest => {
            let literal = manifest
                .table("schema")
                .and_then(|s| s.get("custom"))
                .and_then(toml::Value::as_table)
                .and_then(|c| c.get("schema_hash32"))
                .and_then(toml::Value::as_str);
            // A malformed literal renders as an unchecked hash, not an error.
            Ok(literal.and_then(|s| parse_hash32(s).ok()).unwrap_or(0))
        }
        SchemaHashMode::Auto => Ok(schema_hash32(manifest)?),
    }
}

fn check_compat(template: GuestTemplate, schema_type: SchemaType) -> Result<(), GuestError> {
    use GuestTemplate::*;
    let ok = match template {
        Linear | Mlp | Mlp2 | Mlp3 | Softmax | NaiveBayes | Tree => matches!(
            schema_type,
            SchemaType::Vector | SchemaType::TimeSeries
        ),
        Cnn1d => schema_type == SchemaType::TimeSeries,
        TinyCnn | TwoTower => schema_type == SchemaType::Vector,
        Custom => schema_type == SchemaType::Custom,
    };
    if ok {
        return Ok(());
    }
    let msg = match template {
        Cnn1d => "schema type is incompatible with cnn1d template",
        TinyCnn => "schema type is incompatible with tiny_cnn template",
        TwoTower => "schema type is incompatible with two_tower template",
        Custom => "schema type is incompatible with custom template",
        _ => "schema type is incompatible with template",
    };
    Err(GuestError::config(msg))
}

/// Resolve the guest configuration for `manifest`.
pub fn generate_guest_config(
    manifest: &Manifest,
    template: Option<GuestTemplate>,
    hash_mode: SchemaHashMode,
) -> Result<GuestConfig, GuestError> {
    let build = manifest.table("build");
    let abi = manifest.table("abi");

    let template = match template {
        Some(t) => t,
        None => match infer_template(manifest.weights_layout().as_deref()) {
            Some(t) => t.into(),
            None if manifest.schema_type() == Some(SchemaType::Custom) => GuestTemplate::Custom,
            None => return Err(GuestError::config("Unable to infer template; pass --template")),
        },
    };

    let info = manifest.schema_info()?;
    check_compat(template, info.schema_type)?;

    let scratch_min = int_or_default(
        abi,
        "scratch_min",
        DEFAULT_SCRATCH_MIN as i64,
        "abi.scratch_min must be a positive integer",
    )?;
    if scratch_min <= 0 {
        return Err(GuestError::config("abi.scratch_min must be a positive integer"));
    }
    let reserved_tail = int_or_default(
        abi,
        "reserved_tail",
        MIN_RESERVED_TAIL as i64,
        "abi.reserved_tail must be a non-negative integer",
    )?;
    if reserved_tail < 0 {
        return Err(GuestError::config(
            "abi.reserved_tail must be a non-negative integer",
        ));
    }
    let stack_guard = int_or_default(
        build,
        "stack_guard",
        DEFAULT_STACK_GUARD,
        "build.stack_guard must be a non-negative integer",
    )?;
    if stack_guard < 0 {
        return Err(GuestError::config(
            "build.stack_guard must be a non-negative integer",
        ));
    }
    if scratch_min <= reserved_tail + stack_guard {
        return Err(GuestError::config(
            "scratch_min too small for stack guard and reserved_tail",
        ));
    }
    let stack_ptr = scratch_min - reserved_tail - stack_guard;

    let control_offset =
        int_or_default(abi, "control_offset", 0, "abi.control_offset must be an integer")?;
    let input_max = int_or_default(abi, "input_max", 0, "abi.input_max must be an integer")?;
    let output_max = int_or_default(abi, "output_max", 0, "abi.output_max must be an integer")?;

    let binding = manifest.weights_binding();
    let weights_seg = binding.and_then(|b| b.segment_index).unwrap_or(1);
    let weights_data_offset = binding.map(|b| b.data_offset as i64).unwrap_or(0);
    let weights_offset = int_or_default(
        build,
        "weights_offset",
        0,
        "build.weights_offset must be an integer when provided",
    )?;

    let scale = |key: &str| manifest.scale(key).unwrap_or(DEFAULT_Q16);
    let has_bias = manifest.build_bool("has_bias").unwrap_or(true);

    let mut dims = None;
    if template.reads_weights() {
        let (Some(input_dim), Some(output_dim)) = (info.input_dim, info.output_dim) else {
            return Err(GuestError::config("schema type is incompatible with template"));
        };
        dims = Some(ModelDims {
            input_dim,
            output_dim,
            weights_seg,
            weights_offset,
            weights_data_offset,
        });
    }

    let params = match template {
        GuestTemplate::Linear => TemplateParams::Linear {
            w_scale_q16: scale("w_scale_q16"),
            has_bias,
        },
        GuestTemplate::Softmax | GuestTemplate::NaiveBayes => TemplateParams::Classifier {
            w_scale_q16: scale("w_scale_q16"),
            has_bias,
            apply_softmax: manifest.build_bool("apply_softmax").unwrap_or(true),
        },
        GuestTemplate::Mlp => {
            let hidden_dim =
                required_int(build, "hidden_dim", "build.hidden_dim is required for MLP templates")?;
            let hidden_offset = int_or_default(
                build,
                "hidden_offset",
                DEFAULT_HIDDEN_OFFSET,
                "build.hidden_offset must be an integer when provided",
            )?;
            TemplateParams::Mlp {
                hidden_dim,
                hidden_offset,
                w1_scale_q16: scale("w1_scale_q16"),
                w2_scale_q16: scale("w2_scale_q16"),
            }
        }
        GuestTemplate::Mlp2 => {
            let err = "build.hidden_dim1 and build.hidden_dim2 required for mlp2";
            let h1 = required_int(build, "hidden_dim1", err)?;
            let h2 = required_int(build, "hidden_dim2", err)?;
            let o1 = int_or_default(
                build,
                "hidden_offset1",
                DEFAULT_HIDDEN_OFFSET,
                "build.hidden_offset1 must be an integer when provided",
            )?;
            let o2 = int_or_default(
                build,
                "hidden_offset2",
                o1 + h1 * 4,
                "build.hidden_offset2 must be an integer when provided",
            )?;
            TemplateParams::Mlp2 {
                hidden_dims: [h1, h2],
                hidden_offsets: [o1, o2],
                scales: [scale("w1_scale_q16"), scale("w2_scale_q16"), scale("w3_scale_q16")],
                has_bias,
            }
        }
        GuestTemplate::Mlp3 => {
            let err = "build.hidden_dim1/hidden_dim2/hidden_dim3 required for mlp3";
            let h1 = required_int(build, "hidden_dim1", err)?;
            let h2 = required_int(build, "hidden_dim2", err)?;
            let h3 = required_int(build, "hidden_dim3", err)?;
            let o1 = int_or_default(
                build,
                "hidden_offset1",
                DEFAULT_HIDDEN_OFFSET,
                "build.hidden_offset1 must be an integer when provided",
            )?;
            let o2 = int_or_default(
                build,
                "hidden_offset2",
                o1 + h1 * 4,
                "build.hidden_offset2 must be an integer when provided",
            )?;
            let o3 = int_or_default(
                build,
                "hidden_offset3",
                o2 + h2 * 4,
                "build.hidden_offset3 must be an integer when provided",
            )?;
            TemplateParams::Mlp3 {
                hidden_dims: [h1, h2, h3],
                hidden_offsets: [o1, o2, o3],
                scales: [
                    scale("w1_scale_q16"),
                    scale("w2_scale_q16"),
                    scale("w3_scale_q16"),
                    scale("w4_scale_q16"),
                ],
                has_bias,
            }
        }
        GuestTemplate::Cnn1d => {
            let ts = manifest
                .table("schema")
                .and_then(|s| s.get("time_series"))
                .and_then(toml::Value::as_table);
            let window = required_int(ts, "window", "schema.time_series window/features required for cnn1d")?;
            let features =
                required_int(ts, "features", "schema.time_series window/features required for cnn1d")?;
            let (kernel_size, stride, out_channels, conv_offset) =
                conv_params(build, "cnn1d")?;
            TemplateParams::Cnn1d {
                input_len: window,
                input_channels: features,
                kernel_size,
                stride,
                out_channels,
                scales: [scale("w1_scale_q16"), scale("w2_scale_q16")],
                has_bias,
                conv_offset,
            }
        }
        GuestTemplate::TinyCnn => {
            let input_dim = dims.as_ref().map(|d| d.input_dim as i64).unwrap_or(0);
            let (input_height, input_width) = tiny_cnn_hw(manifest, build)?;
            if input_height * input_width != input_dim {
                return Err(GuestError::config(
                    "tiny_cnn input_height * input_width must equal schema input_dim",
                ));
            }
            let (kernel_size, stride, out_channels, conv_offset) =
                conv_params(build, "tiny_cnn")?;
            TemplateParams::TinyCnn {
                input_height,
                input_width,
                kernel_size,
                stride,
                out_channels,
                scales: [scale("w1_scale_q16"), scale("w2_scale_q16")],
                has_bias,
                conv_offset,
            }
        }
        GuestTemplate::TwoTower => {
            let (Some(input_dim), Some(output_dim)) = (info.input_dim, info.output_dim) else {
                return Err(GuestError::config("schema input_dim required for two_tower"));
            };
            if output_dim != 1 {
                return Err(GuestError::config("two_tower template requires output_dim = 1"));
            }
            let pair_err = "build.tower_input_a and build.tower_input_b required for two_tower";
            let input_dim_a = required_int(build, "tower_input_a", pair_err)?;
            let input_dim_b = required_int(build, "tower_input_b", pair_err)?;
            let embed_dim = required_int(build, "embed_dim", "build.embed_dim required for two_tower")?;
            if input_dim_a + input_dim_b != input_dim as i64 {
                return Err(GuestError::config(
                    "tower_input_a + tower_input_b must equal schema input_dim",
                ));
            }
            dims = Some(ModelDims {
                input_dim,
                output_dim: 1,
                weights_seg,
                weights_offset,
                weights_data_offset,
            });
            let embed_a_offset = int_or_default(
                build,
                "embed_offset",
                DEFAULT_HIDDEN_OFFSET,
                "build.embed_offset must be an integer when provided",
            )?;
            let dot_shift = int_or_default(
                build,
                "dot_shift",
                16,
                "build.dot_shift must be an integer when provided",
            )?;
            TemplateParams::TwoTower {
                input_dim_a,
                input_dim_b,
                embed_dim,
                scales: [scale("w1_scale_q16"), scale("w2_scale_q16")],
                has_bias,
                dot_shift,
                embed_a_offset,
                embed_b_offset: embed_a_offset + embed_dim * 4,
            }
        }
        GuestTemplate::Tree => {
            let count = int_or_default(
                build,
                "tree_count",
                1,
                "build.tree_count must be >= 1 for tree template",
            )?;
            if count < 1 {
                return Err(GuestError::config("build.tree_count must be >= 1 for tree template"));
            }
            let node_count = required_int(
                build,
                "tree_node_count",
                "build.tree_node_count required for tree template",
            )?;
            if node_count < 1 {
                return Err(GuestError::config(
                    "build.tree_node_count required for tree template",
                ));
            }
            let stride = int_or_default(
                build,
                "tree_stride",
                node_count * 20,
                "build.tree_stride must be a positive integer when provided",
            )?;
            if stride <= 0 {
                return Err(GuestError::config(
                    "build.tree_stride must be a positive integer when provided",
                ));
            }
            if dims.as_ref().map(|d| d.output_dim) != Some(1) {
                return Err(GuestError::config("tree template requires output_dim = 1"));
            }
            TemplateParams::Tree {
                count,
                node_count,
                stride,
            }
        }
        GuestTemplate::Custom => {
            let (Some(input_blob_size), Some(output_blob_size)) =
                (info.input_blob_size, info.output_blob_size)
            else {
                return Err(GuestError::config(
                    "schema.custom input_blob_size/output_blob_size required",
                ));
            };
            TemplateParams::Custom {
                input_blob_size,
                output_blob_size,
            }
        }
    };

    Ok(GuestConfig {
        template,
        control_offset,
        input_max,
        output_max,
        scratch_min,
        reserved_tail,
        stack_guard,
        stack_ptr,
        expected_schema_id: info.schema_type.id(),
        expected_schema_hash: expected_hash(manifest, hash_mode)?,
        dims,
        params,
    })
}

fn conv_params(build: Option<&Table>, name: &str) -> Result<(i64, i64, i64, i64), GuestError> {
    let kernel_size =
        required_int(build, "kernel_size", &format!("build.kernel_size required for {name}"))?;
    if kernel_size < 1 {
        return Err(GuestError::config(format!("build.kernel_size required for {name}")));
    }
    let out_channels =
        required_int(build, "out_channels", &format!("build.out_channels required for {name}"))?;
    if out_channels < 1 {
        return Err(GuestError::config(format!("build.out_channels required for {name}")));
    }
    let stride_err = format!("build.stride must be >= 1 for {name}");
    let stride = int_or_default(build, "stride", 1, &stride_err)?;
    if stride < 1 {
        return Err(GuestError::config(stride_err));
    }
    let conv_offset = int_or_default(
        build,
        "conv_offset",
        DEFAULT_CONV_OFFSET,
        "build.conv_offset must be an integer when provided",
    )?;
    Ok((kernel_size, stride, out_channels, conv_offset))
}

fn tiny_cnn_hw(manifest: &Manifest, build: Option<&Table>) -> Result<(i64, i64), GuestError> {
    let mut height = build.and_then(|b| b.get("input_height")).and_then(toml::Value::as_integer);
    let mut width = build.and_then(|b| b.get("input_width")).and_then(toml::Value::as_integer);
    if height.is_none() || width.is_none() {
        let shape = manifest
            .table("schema")
            .and_then(|s| s.get("vector"))
            .and_then(toml::Value::as_table)
            .and_then(|v| v.get("input_shape"))
            .and_then(toml::Value::as_array);
        if let Some(shape) = shape.filter(|s| s.len() == 2) {
            height = shape[0].as_integer();
            width = shape[1].as_integer();
        }
    }
    match (height, width) {
        (Some(h), Some(w)) => Ok((h, w)),
        _ => Err(GuestError::config(
            "build.input_height/input_width required for tiny_cnn",
        )),
    }
}
