//! Weights blob bookkeeping: hashing, packing, placeholders, chunking.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use fb_manifest::{load_manifest, patch, BlobUpdate, Manifest};

use crate::tree::TreeNode;
use crate::CodecError;

/// Streamed sha256 of a file, rendered as `sha256:<hex>`.
pub fn sha256_file(path: &Path) -> Result<String, CodecError> {
    let mut file = File::open(path).map_err(|e| CodecError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| CodecError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Hash every declared blob and fold the digests (and sizes) back into the
/// manifest. With `create_missing`, absent files are created zero-filled at
/// their declared `size_bytes` first. `write = false` reports without
/// touching the manifest.
pub fn pack_manifest(
    manifest_path: &Path,
    update_size: bool,
    write: bool,
    create_missing: bool,
) -> Result<Vec<BlobUpdate>, CodecError> {
    let manifest = load_manifest(manifest_path)?;
    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));

    let mut updates = Vec::new();
    for blob in manifest.blobs() {
        let (Some(name), Some(file)) = (blob.name, blob.file) else {
            continue;
        };
        let file_path = base_dir.join(&file);
        if !file_path.exists() {
            if !create_missing {
                return Err(CodecError::input(format!(
                    "Weights blob not found: {}",
                    file_path.display()
                )));
            }
            let size_bytes = blob
                .size_bytes
                .filter(|&s| s > 0)
                .ok_or_else(|| {
                    CodecError::input(format!(
                        "Missing or invalid size_bytes for {}",
                        file_path.display()
                    ))
                })?;
            if let Some(parent) = file_path.parent() {
                fs::create_dir_all(parent).map_err(|e| CodecError::io(parent, e))?;
            }
            let handle = File::create(&file_path).map_err(|e| CodecError::io(&file_path, e))?;
            handle
                .set_len(size_bytes as u64)
                .map_err(|e| CodecError::io(&file_path, e))?;
        }
        let hash = sha256_file(&file_path)?;
        let size_bytes = fs::metadata(&file_path)
            .map_err(|e| CodecError::io(&file_path, e))?
            .len();
        updates.push(BlobUpdate {
            name,
            file,
            hash,
            size_bytes,
        });
    }

    if updates.is_empty() {
        return Ok(updates);
    }
    if write {
        patch::update_blobs(manifest_path, &updates, update_size)?;
        info!(path = %manifest_path.display(), blobs = updates.len(), "packed manifest");
    }
    Ok(updates)
}

/// Create placeholder blob files for every declared blob that is missing.
///
/// Tree layouts are tiled with leaf-sentinel records rather than zeros; a
/// zero node reads as an interior node pointing at itself and the guest
/// would spin until the instruction limit.
pub fn write_placeholders(manifest: &Manifest, dest: &Path) -> Result<Vec<PathBuf>, CodecError> {
    let layout = manifest.weights_layout().unwrap_or_default();
    let tree_layout = layout.starts_with("tree_");

    let mut written = Vec::new();
    for blob in manifest.blobs() {
        let Some(file) = blob.file.filter(|f| !f.is_empty()) else {
            continue;
        };
        let Some(size_bytes) = blob.size_bytes.filter(|&s| s > 0) else {
            continue;
        };
        let path = dest.join(&file);
        if path.exists() {
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CodecError::io(parent, e))?;
        }
        let mut handle = File::create(&path).map_err(|e| CodecError::io(&path, e))?;
        if tree_layout && size_bytes % 20 == 0 {
            let sentinel = TreeNode::leaf_sentinel();
            let mut record = Vec::with_capacity(20);
            for field in [sentinel.feature, 0, sentinel.left, sentinel.right, 0] {
                record.extend_from_slice(&field.to_le_bytes());
            }
            for _ in 0..size_bytes / 20 {
                handle.write_all(&record).map_err(|e| CodecError::io(&path, e))?;
            }
        } else {
            handle
                .set_len(size_bytes as u64)
                .map_err(|e| CodecError::io(&path, e))?;
        }
        debug!(path = %path.display(), size_bytes, "wrote placeholder blob");
        written.push(path);
    }
    Ok(written)
}

/// The pieces a blob file was split into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResult {
    pub source: PathBuf,
    pub chunks: Vec<PathBuf>,
}

fn chunk_path(base: &Path, idx: usize, out_dir: &Path) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("weights");
    out_dir.join(format!("{stem}_chunk{idx}.bin"))
}

/// Split one file into `chunk_size`-byte pieces named `<stem>_chunk<idx>.bin`.
pub fn chunk_file(path: &Path, chunk_size: u64, out_dir: &Path) -> Result<ChunkResult, CodecError> {
    if chunk_size == 0 {
        return Err(CodecError::input("chunk_size must be > 0"));
    }
    if !path.exists() {
        return Err(CodecError::input(format!(
            "Weights file not found: {}",
            path.display()
        )));
    }

    fs::create_dir_all(out_dir).map_err(|e| CodecError::io(out_dir, e))?;
    let mut handle = File::open(path).map_err(|e| CodecError::io(path, e))?;
    let mut chunks = Vec::new();
    let mut buf = vec![0u8; chunk_size as usize];
    let mut idx = 0;
    loop {
        let mut filled = 0;
        // A single read may come back short of the chunk size.
        while filled < buf.len() {
            let n = handle
                .read(&mut buf[filled..])
                .map_err(|e| CodecError::io(path, e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        let out_path = chunk_path(path, idx, out_dir);
        fs::write(&out_path, &buf[..filled]).map_err(|e| CodecError::io(&out_path, e))?;
        chunks.push(out_path);
        idx += 1;
        if filled < buf.len() {
            break;
        }
    }
    Ok(ChunkResult {
        source: path.to_path_buf(),
        chunks,
    })
}

/// Chunk every blob the manifest declares. An explicit `chunk_size` beats
/// the per-blob `chunk_size` field; some valid size is required.
pub fn chunk_manifest(
    manifest_path: &Path,
    chunk_size: Option<u64>,
    out_dir: Option<&Path>,
) -> Result<Vec<ChunkResult>, CodecError> {
    let manifest = load_manifest(manifest_path)?;
    if manifest.table("weights").is_none() {
        return Err(CodecError::input("weights table missing in manifest"));
    }
    let blobs = manifest.blobs();
    if blobs.is_empty() {
        return Err(CodecError::input("weights.blobs missing in manifest"));
    }

    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let mut results = Vec::new();
    for blob in blobs {
        let Some(file) = blob.file else { continue };
        let blob_chunk = chunk_size.or(blob.chunk_size.and_then(|c| u64::try_from(c).ok()));
        let Some(blob_chunk) = blob_chunk.filter(|&c| c > 0) else {
            return Err(CodecError::input(
                "chunk_size is required (no valid chunk_size in manifest)",
            ));
        };
        let weights_path = base_dir.join(&file);
        let target_dir = out_dir.unwrap_or(base_dir);
        results.push(chunk_file(&weights_path, blob_chunk, target_dir)?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fb_manifest::parse_manifest;

    #[test]
    fn test_sha256_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.bin");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_pack_updates_hash_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("Frostbite.toml");
        fs::write(
            &manifest_path,
            r#"[weights]
layout = "linear_q8"
[[weights.blobs]]
name = "main"
file = "weights.bin"
hash = "sha256:stale"
size_bytes = 1
"#,
        )
        .unwrap();
        fs::write(dir.path().join("weights.bin"), vec![7u8; 64]).unwrap();

        let updates = pack_manifest(&manifest_path, true, true, false).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].size_bytes, 64);
        let text = fs::read_to_string(&manifest_path).unwrap();
        assert!(text.contains(&updates[0].hash));
        assert!(text.contains("size_bytes = 64"));
    }

    #[test]
    fn test_pack_missing_blob_errors_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("Frostbite.toml");
        fs::write(
            &manifest_path,
            "[weights]\n[[weights.blobs]]\nname = \"main\"\nfile = \"gone.bin\"\nsize_bytes = 16\n",
        )
        .unwrap();
        assert!(pack_manifest(&manifest_path, false, false, false).is_err());

        let updates = pack_manifest(&manifest_path, false, false, true).unwrap();
        assert_eq!(updates[0].size_bytes, 16);
        assert!(dir.path().join("gone.bin").exists());
    }

    #[test]
    fn test_placeholder_tree_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = parse_manifest(
            "[weights]\nlayout = \"tree_gbdt_v1\"\n[[weights.blobs]]\nname = \"main\"\nfile = \"trees.bin\"\nsize_bytes = 40\n",
        )
        .unwrap();
        let written = write_placeholders(&manifest, dir.path()).unwrap();
        assert_eq!(written.len(), 1);
        let data = fs::read(&written[0]).unwrap();
        assert_eq!(data.len(), 40);
        // two leaf records: feature=-1, left=-1, right=-1
        assert_eq!(&data[0..4], &(-1i32).to_le_bytes());
        assert_eq!(&data[8..12], &(-1i32).to_le_bytes());
        assert_eq!(&data[20..24], &(-1i32).to_le_bytes());
    }

    #[test]
    fn test_placeholder_zero_fill_for_dense_layouts() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = parse_manifest(
            "[weights]\nlayout = \"linear_q8\"\n[[weights.blobs]]\nname = \"main\"\nfile = \"w.bin\"\nsize_bytes = 10\n",
        )
        .unwrap();
        write_placeholders(&manifest, dir.path()).unwrap();
        let data = fs::read(dir.path().join("w.bin")).unwrap();
        assert_eq!(data, vec![0u8; 10]);
    }

    #[test]
    fn test_chunk_file_naming_and_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");
        fs::write(&path, vec![1u8; 25]).unwrap();
        let result = chunk_file(&path, 10, dir.path()).unwrap();
        assert_eq!(result.chunks.len(), 3);
        assert_eq!(result.chunks[0], dir.path().join("weights_chunk0.bin"));
        assert_eq!(result.chunks[2], dir.path().join("weights_chunk2.bin"));
        assert_eq!(fs::read(&result.chunks[1]).unwrap().len(), 10);
        assert_eq!(fs::read(&result.chunks[2]).unwrap().len(), 5);
    }

    #[test]
    fn test_chunk_manifest_requires_some_size() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("Frostbite.toml");
        fs::write(
            &manifest_path,
            "[weights]\n[[weights.blobs]]\nname = \"main\"\nfile = \"w.bin\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("w.bin"), vec![0u8; 8]).unwrap();
        assert!(chunk_manifest(&manifest_path, None, None).is_err());
        let results = chunk_manifest(&manifest_path, Some(4), None).unwrap();
        assert_eq!(results[0].chunks.len(), 2);
    }
}
