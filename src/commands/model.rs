//! Manifest and weights commands: validate, schema-hash, convert, pack,
//! chunk.

use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};

use fb_codec::{chunk_file, chunk_manifest, convert_weights, ConvertOptions, Template};
use fb_manifest::{
    format_hash32, load_manifest, patch, schema_hash32, schema_id, validate_manifest,
};

use crate::args::{ChunkArgs, ConvertArgs, PackArgs, SchemaHashArgs, ValidateArgs};

pub fn validate(args: &ValidateArgs) -> Result<i32> {
    let manifest = load_manifest(&args.manifest)
        .with_context(|| format!("failed to load {}", args.manifest.display()))?;
    let issues = validate_manifest(&manifest);
    if issues.is_empty() {
        println!("OK: {}", args.manifest.display());
        return Ok(0);
    }
    if args.json {
        for issue in &issues {
            println!("{}", serde_json::json!({ "error": issue.message }));
        }
    } else {
        eprintln!("Manifest validation failed ({} issue(s)):", issues.len());
        for issue in &issues {
            eprintln!("  - {issue}");
        }
    }
    Ok(1)
}

pub fn schema_hash(args: &SchemaHashArgs) -> Result<i32> {
    let manifest = load_manifest(&args.manifest)?;
    let id = schema_id(&manifest)?;
    let hash = format_hash32(schema_hash32(&manifest)?);
    println!("schema_id: {id}");
    println!("schema_hash32: {hash}");
    if args.update_manifest {
        patch::update_schema_hash(&args.manifest, &hash)?;
        println!("Updated schema_hash32 in {}", args.manifest.display());
    }
    Ok(0)
}

fn parse_keymap(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(dst, src)| (dst.to_string(), src.to_string()))
                .ok_or_else(|| anyhow!("keymap entries must be dst=src, got '{entry}'"))
        })
        .collect()
}

pub fn convert(args: &ConvertArgs) -> Result<i32> {
    let template = args
        .template
        .as_deref()
        .map(|s| Template::from_str(s).map_err(|()| anyhow!("Unknown template: {s}")))
        .transpose()?;
    let opts = ConvertOptions {
        template,
        output_path: args.output.clone(),
        scale_q16: args.scale_q16,
        w1_scale_q16: args.w1_scale_q16,
        w2_scale_q16: args.w2_scale_q16,
        w3_scale_q16: args.w3_scale_q16,
        w4_scale_q16: args.w4_scale_q16,
        update_manifest: !args.no_update_manifest,
        input_dim: args.input_dim,
        output_dim: args.output_dim,
        hidden_dim: args.hidden_dim,
        hidden_dim1: args.hidden_dim1,
        hidden_dim2: args.hidden_dim2,
        hidden_dim3: args.hidden_dim3,
        bias: !args.no_bias,
        keymap: parse_keymap(&args.keymap)?,
        input_dim_a: args.input_dim_a,
        input_dim_b: args.input_dim_b,
        embed_dim: args.embed_dim,
        tree_count: args.tree_count,
        tree_node_count: args.tree_node_count,
    };
    let report = convert_weights(&args.manifest, &args.input, &opts)?;
    println!("Template: {}", report.template);
    println!(
        "Wrote weights: {} ({} bytes)",
        report.output_path.display(),
        report.blob_len
    );
    for (key, value) in &report.scales {
        println!("  {key} = {value}");
    }
    if args.pack {
        run_pack(&args.manifest, false, true, false)?;
    }
    Ok(0)
}

fn run_pack(
    manifest: &Path,
    update_size: bool,
    write: bool,
    create_missing: bool,
) -> Result<i32> {
    let updates = fb_codec::pack_manifest(manifest, update_size, write, create_missing)?;
    if updates.is_empty() {
        println!("No blob updates needed");
        return Ok(0);
    }
    for update in &updates {
        println!("{}: {} ({} bytes)", update.name, update.hash, update.size_bytes);
    }
    if write {
        println!("Updated manifest: {}", manifest.display());
    }
    Ok(0)
}

pub fn pack(args: &PackArgs) -> Result<i32> {
    run_pack(
        &args.manifest,
        args.update_size,
        !args.check,
        args.create_missing,
    )
}

pub fn chunk(args: &ChunkArgs) -> Result<i32> {
    if let Some(file) = &args.file {
        let chunk_size = args
            .chunk_size
            .ok_or_else(|| anyhow!("chunk requires --chunk-size with --file"))?;
        let out_dir = args
            .out_dir
            .clone()
            .unwrap_or_else(|| Path::new(".").to_path_buf());
        let result = chunk_file(file, chunk_size, &out_dir)?;
        for chunk in &result.chunks {
            println!("{}", chunk.display());
        }
        println!("Wrote {} chunk(s) from {}", result.chunks.len(), result.source.display());
        return Ok(0);
    }
    let Some(manifest) = &args.manifest else {
        bail!("chunk requires --manifest or --file");
    };
    let results = chunk_manifest(manifest, args.chunk_size, args.out_dir.as_deref())?;
    for result in &results {
        for chunk in &result.chunks {
            println!("{}", chunk.display());
        }
        println!("Wrote {} chunk(s) from {}", result.chunks.len(), result.source.display());
    }
    Ok(0)
}
