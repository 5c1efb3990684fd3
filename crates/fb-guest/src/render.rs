//! Rendering of a [`GuestConfig`] into the flat constant list a guest
//! kernel compiles against.

use std::path::{Path, PathBuf};

use fb_manifest::load_manifest;
use fb_payload::SchemaHashMode;

use crate::config::{generate_guest_config, GuestConfig, GuestTemplate, TemplateParams};
use crate::GuestError;

/// Render `config` as Rust source for a guest `config.rs`.
pub fn render_config(config: &GuestConfig) -> String {
    let mut lines: Vec<String> = vec![
        "//! Auto-generated config constants (patched by fbkit).".to_string(),
        String::new(),
    ];

    lines.push(format!("pub const CONTROL_OFFSET: usize = 0x{:04X};", config.control_offset));
    lines.push(format!("pub const INPUT_MAX: usize = {};", config.input_max));
    lines.push(format!("pub const OUTPUT_MAX: usize = {};", config.output_max));
    lines.push(String::new());
    lines.push(format!("pub const SCRATCH_MIN: usize = {};", config.scratch_min));
    lines.push(format!("pub const RESERVED_TAIL: usize = {};", config.reserved_tail));
    lines.push(format!("pub const STACK_GUARD: usize = 0x{:X};", config.stack_guard));
    lines.push(format!("pub const STACK_PTR: usize = {};", config.stack_ptr));

    if config.template != GuestTemplate::TwoTower {
        if let Some(dims) = &config.dims {
            lines.push(String::new());
            lines.push(format!("pub const INPUT_DIM: usize = {};", dims.input_dim));
            if let TemplateParams::Mlp { hidden_dim, .. } = &config.params {
                lines.push(format!("pub const HIDDEN_DIM: usize = {hidden_dim};"));
            }
            lines.push(format!("pub const OUTPUT_DIM: usize = {};", dims.output_dim));
            lines.push(String::new());
            lines.push(format!("pub const WEIGHTS_SEG: u32 = {};", dims.weights_seg));
            lines.push(format!("pub const WEIGHTS_OFFSET: usize = {};", dims.weights_offset));
            lines.push(format!(
                "pub const WEIGHTS_DATA_OFFSET: usize = {};",
                dims.weights_data_offset
            ));
        }
    }

    match &config.params {
        TemplateParams::Linear { w_scale_q16, has_bias } => {
            lines.push(String::new());
            lines.push(format!("pub const W_SCALE_Q16: i32 = {w_scale_q16};"));
            lines.push(format!("pub const HAS_BIAS: bool = {has_bias};"));
        }
        TemplateParams::Classifier { w_scale_q16, has_bias, apply_softmax } => {
            lines.push(String::new());
            lines.push(format!("pub const W_SCALE_Q16: i32 = {w_scale_q16};"));
            lines.push(format!("pub const HAS_BIAS: bool = {has_bias};"));
            lines.push(format!("pub const APPLY_SOFTMAX: bool = {apply_softmax};"));
        }
        TemplateParams::Mlp { hidden_offset, w1_scale_q16, w2_scale_q16, .. } => {
            lines.push(String::new());
            lines.push(format!("pub const W1_SCALE_Q16: i32 = {w1_scale_q16};"));
            lines.push(format!("pub const W2_SCALE_Q16: i32 = {w2_scale_q16};"));
            lines.push(String::new());
            lines.push(format!("pub const HIDDEN_OFFSET: usize = 0x{hidden_offset:X};"));
        }
        TemplateParams::Mlp2 { hidden_dims, hidden_offsets, scales, has_bias } => {
            lines.push(String::new());
            lines.push(format!("pub const HIDDEN_DIM1: usize = {};", hidden_dims[0]));
            lines.push(format!("pub const HIDDEN_DIM2: usize = {};", hidden_dims[1]));
            lines.push(format!("pub const W1_SCALE_Q16: i32 = {};", scales[0]));
            lines.push(format!("pub const W2_SCALE_Q16: i32 = {};", scales[1]));
            lines.push(format!("pub const W3_SCALE_Q16: i32 = {};", scales[2]));
            lines.push(format!("pub const HAS_BIAS: bool = {has_bias};"));
            lines.push(String::new());
            lines.push(format!("pub const HIDDEN1_OFFSET: usize = 0x{:X};", hidden_offsets[0]));
            lines.push(format!("pub const HIDDEN2_OFFSET: usize = 0x{:X};", hidden_offsets[1]));
        }
        TemplateParams::Mlp3 { hidden_dims, hidden_offsets, scales, has_bias } => {
            lines.push(String::new());
            lines.push(format!("pub const HIDDEN_DIM1: usize = {};", hidden_dims[0]));
            lines.push(format!("pub const HIDDEN_DIM2: usize = {};", hidden_dims[1]));
            lines.push(format!("pub const HIDDEN_DIM3: usize = {};", hidden_dims[2]));
            lines.push(format!("pub const W1_SCALE_Q16: i32 = {};", scales[0]));
            lines.push(format!("pub const W2_SCALE_Q16: i32 = {};", scales[1]));
            lines.push(format!("pub const W3_SCALE_Q16: i32 = {};", scales[2]));
            lines.push(format!("pub const W4_SCALE_Q16: i32 = {};", scales[3]));
            lines.push(format!("pub const HAS_BIAS: bool = {has_bias};"));
            lines.push(String::new());
            lines.push(format!("pub const HIDDEN1_OFFSET: usize = 0x{:X};", hidden_offsets[0]));
            lines.push(format!("pub const HIDDEN2_OFFSET: usize = 0x{:X};", hidden_offsets[1]));
            lines.push(format!("pub const HIDDEN3_OFFSET: usize = 0x{:X};", hidden_offsets[2]));
        }
        TemplateParams::Cnn1d {
            input_len,
            input_channels,
            kernel_size,
            stride,
            out_channels,
            scales,
            has_bias,
            conv_offset,
        } => {
            lines.push(String::new());
            lines.push(format!("pub const INPUT_LEN: usize = {input_len};"));
            lines.push(format!("pub const INPUT_CHANNELS: usize = {input_channels};"));
            lines.push(format!("pub const KERNEL_SIZE: usize = {kernel_size};"));
            lines.push(format!("pub const STRIDE: usize = {stride};"));
            lines.push(format!("pub const OUT_CHANNELS: usize = {out_channels};"));
            lines.push(format!("pub const W1_SCALE_Q16: i32 = {};", scales[0]));
            lines.push(format!("pub const W2_SCALE_Q16: i32 = {};", scales[1]));
            lines.push(format!("pub const HAS_BIAS: bool = {has_bias};"));
            lines.push(String::new());
            lines.push(format!("pub const CONV_OFFSET: usize = 0x{conv_offset:X};"));
        }
        TemplateParams::TinyCnn {
            input_height,
            input_width,
            kernel_size,
            stride,
            out_channels,
            scales,
            has_bias,
            conv_offset,
        } => {
            lines.push(String::new());
            lines.push(format!("pub const INPUT_HEIGHT: usize = {input_height};"));
            lines.push(format!("pub const INPUT_WIDTH: usize = {input_width};"));
            lines.push(format!("pub const KERNEL_SIZE: usize = {kernel_size};"));
            lines.push(format!("pub const STRIDE: usize = {stride};"));
            lines.push(format!("pub const OUT_CHANNELS: usize = {out_channels};"));
            lines.push(format!("pub const W1_SCALE_Q16: i32 = {};", scales[0]));
            lines.push(format!("pub const W2_SCALE_Q16: i32 = {};", scales[1]));
            lines.push(format!("pub const HAS_BIAS: bool = {has_bias};"));
            lines.push(String::new());
            lines.push(format!("pub const CONV_OFFSET: usize = 0x{conv_offset:X};"));
        }
        TemplateParams::TwoTower {
            input_dim_a,
            input_dim_b,
            embed_dim,
            scales,
            has_bias,
            dot_shift,
            embed_a_offset,
            embed_b_offset,
        } => {
            let dims = config.dims.as_ref();
            lines.push(String::new());
            lines.push(format!("pub const INPUT_DIM_A: usize = {input_dim_a};"));
            lines.push(format!("pub const INPUT_DIM_B: usize = {input_dim_b};"));
            lines.push(format!("pub const EMBED_DIM: usize = {embed_dim};"));
            lines.push(format!(
                "pub const OUTPUT_DIM: usize = {};",
                dims.map(|d| d.output_dim).unwrap_or(1)
            ));
            lines.push(String::new());
            lines.push(format!(
                "pub const WEIGHTS_SEG: u32 = {};",
                dims.map(|d| d.weights_seg).unwrap_or(1)
            ));
            lines.push(format!(
                "pub const WEIGHTS_OFFSET: usize = {};",
                dims.map(|d| d.weights_offset).unwrap_or(0)
            ));
            lines.push(format!(
                "pub const WEIGHTS_DATA_OFFSET: usize = {};",
                dims.map(|d| d.weights_data_offset).unwrap_or(0)
            ));
            lines.push(String::new());
            lines.push(format!("pub const W1_SCALE_Q16: i32 = {};", scales[0]));
            lines.push(format!("pub const W2_SCALE_Q16: i32 = {};", scales[1]));
            lines.push(format!("pub const HAS_BIAS: bool = {has_bias};"));
            lines.push(format!("pub const DOT_SHIFT: u32 = {dot_shift};"));
            lines.push(String::new());
            lines.push(format!("pub const EMBED_A_OFFSET: usize = 0x{embed_a_offset:X};"));
            lines.push(format!("pub const EMBED_B_OFFSET: usize = 0x{embed_b_offset:X};"));
        }
        TemplateParams::Tree { count, node_count, stride } => {
            lines.push(String::new());
            lines.push(format!("pub const TREE_COUNT: usize = {count};"));
            lines.push(format!("pub const TREE_NODE_COUNT: usize = {node_count};"));
            lines.push(format!("pub const TREE_STRIDE: usize = {stride};"));
        }
        TemplateParams::Custom { input_blob_size, output_blob_size } => {
            lines.push(String::new());
            lines.push(format!("pub const INPUT_BLOB_SIZE: usize = {input_blob_size};"));
            lines.push(format!("pub const OUTPUT_BLOB_SIZE: usize = {output_blob_size};"));
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "pub const EXPECTED_SCHEMA_HASH: u32 = 0x{:08X};",
        config.expected_schema_hash
    ));
    lines.push(format!(
        "pub const EXPECTED_SCHEMA_ID: u32 = {};",
        config.expected_schema_id
    ));
    lines.push(String::new());
    lines.join("\n")
}

/// Generate and write `<guest_dir>/src/config.rs` for the manifest.
pub fn write_guest_config(
    manifest_path: &Path,
    guest_dir: &Path,
    template: Option<GuestTemplate>,
    hash_mode: SchemaHashMode,
) -> Result<PathBuf, GuestError> {
    let manifest = load_manifest(manifest_path)?;
    let config = generate_guest_config(&manifest, template, hash_mode)?;
    let out_dir = guest_dir.join("src");
    std::fs::create_dir_all(&out_dir).map_err(|source| GuestError::Io {
        path: out_dir.clone(),
        source,
    })?;
    let config_path = out_dir.join("config.rs");
    std::fs::write(&config_path, render_config(&config)).map_err(|source| GuestError::Io {
        path: config_path.clone(),
        source,
    })?;
    tracing::info!(
        template = %config.template,
        path = %config_path.display(),
        "wrote guest config"
    );
    Ok(config_path)
}
