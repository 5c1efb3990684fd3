//! Payload commands: pack inputs, decode outputs.

use std::fs;

use anyhow::{bail, Context, Result};
use toml::Value;

use fb_manifest::{load_manifest, schema_id};
use fb_payload::{
    pack_fbh1_header, parse_control_block, resolve_schema_hash, write_input, SchemaHashMode,
};

use crate::args::{InputArgs, OutputArgs};

/// Explicit flags win; otherwise guest-validated manifests default to the
/// framed layout the guest expects.
fn resolve_input_header(manifest: &fb_manifest::Manifest, args: &InputArgs) -> Result<bool> {
    if args.header && args.no_header {
        bail!("--header and --no-header are mutually exclusive");
    }
    if args.header {
        return Ok(true);
    }
    if args.no_header {
        return Ok(false);
    }
    let guest_mode = manifest
        .table("validation")
        .and_then(|v| v.get("mode"))
        .and_then(Value::as_str)
        == Some("guest");
    Ok(guest_mode)
}

pub fn input(args: &InputArgs) -> Result<i32> {
    let manifest = load_manifest(&args.manifest)?;
    let include_header = resolve_input_header(&manifest, args)?;
    let hash_mode: SchemaHashMode = args.schema_hash.into();

    let out_path = args.out.clone().unwrap_or_else(|| {
        args.manifest
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join("input.bin")
    });

    let written = if let Some(input_bin) = &args.input_bin {
        let body = fs::read(input_bin)
            .with_context(|| format!("failed to read {}", input_bin.display()))?;
        let data = if include_header {
            let id = schema_id(&manifest)?;
            let hash = resolve_schema_hash(&manifest, hash_mode)?;
            pack_fbh1_header(&body, id, args.crc, hash, hash_mode)
        } else {
            body
        };
        fs::write(&out_path, &data)
            .with_context(|| format!("failed to write {}", out_path.display()))?;
        data.len()
    } else if let Some(data_path) = &args.data {
        let payload = fb_payload::load_payload_from_path(data_path)?;
        write_input(
            &args.manifest,
            &payload,
            &out_path,
            include_header,
            args.crc,
            hash_mode,
        )?
    } else {
        bail!("input requires --data or --input-bin");
    };

    println!("Wrote input payload: {} ({written} bytes)", out_path.display());
    Ok(0)
}

pub fn output(args: &OutputArgs) -> Result<i32> {
    let manifest = load_manifest(&args.manifest)?;

    let (output_bytes, control) = if let Some(scratch_path) = &args.scratch {
        let scratch = fs::read(scratch_path)
            .with_context(|| format!("failed to read {}", scratch_path.display()))?;
        let control_offset = manifest
            .abi_int("control_offset")
            .context("abi.control_offset must be an integer")? as usize;
        let output_offset = manifest
            .abi_int("output_offset")
            .context("abi.output_offset must be an integer")? as usize;
        let output_max = manifest
            .abi_int("output_max")
            .context("abi.output_max must be an integer")?;
        let control = parse_control_block(&scratch, control_offset)?;
        let mut output_len = control.output_len as usize;
        if output_len == 0 && args.use_max {
            output_len = output_max as usize;
        }
        let end = output_offset
            .checked_add(output_len)
            .filter(|&end| end <= scratch.len());
        let Some(end) = end else {
            bail!("output buffer out of bounds");
        };
        (scratch[output_offset..end].to_vec(), Some(control))
    } else if let Some(bin_path) = &args.bin {
        let bytes = fs::read(bin_path)
            .with_context(|| format!("failed to read {}", bin_path.display()))?;
        (bytes, None)
    } else {
        bail!("output requires --bin or --scratch");
    };

    if let Some(out) = &args.out {
        fs::write(out, &output_bytes)
            .with_context(|| format!("failed to write {}", out.display()))?;
    }

    let (out_dtype, out_count) = match manifest.output_info() {
        Some((dtype, count)) => (Some(dtype), count),
        None => (None, None),
    };
    let fmt = if args.format == "auto" {
        out_dtype.map(|d| d.as_str().to_string()).unwrap_or_else(|| "hex".to_string())
    } else {
        args.format.clone()
    };
    let count = out_count.map(|c| c as i64).unwrap_or(i64::MAX);
    let decoded = fb_payload::decode_output(&output_bytes, &fmt, count);

    println!("Output:");
    if let Some(control) = &control {
        println!("  status: {}", control.status);
        println!("  input_ptr: 0x{:X}", control.input_ptr);
        println!("  output_ptr: 0x{:X}", control.output_ptr);
    }
    println!("  output_len: {}", output_bytes.len());
    if output_bytes.is_empty() {
        println!("  output: <empty>");
    } else {
        println!("  output_format: {fmt}");
        println!("  output: {decoded}");
    }
    Ok(0)
}
