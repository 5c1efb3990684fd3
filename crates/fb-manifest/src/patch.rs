//! Format-preserving manifest edits.
//!
//! Conversion and packing feed results back into the manifest (quantization
//! scales, blob hashes and sizes, the custom schema hash). Those writes go
//! through `toml_edit` so user comments, key order and whitespace survive.

use std::fs;
use std::path::{Path, PathBuf};

use toml_edit::{DocumentMut, Item, Table};
use tracing::debug;

/// Post-pack facts about one weights blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobUpdate {
    pub name: String,
    pub file: String,
    pub hash: String,
    pub size_bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("failed to access manifest {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest is not valid TOML")]
    Toml(#[from] toml_edit::TomlError),
    #[error("{0} table not found in manifest")]
    MissingTable(&'static str),
    #[error("manifest {0} is not a table")]
    NotATable(&'static str),
}

fn load(path: &Path) -> Result<(String, DocumentMut), PatchError> {
    let text = fs::read_to_string(path).map_err(|source| PatchError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc = text.parse::<DocumentMut>()?;
    Ok((text, doc))
}

fn store(path: &Path, original: &str, doc: &DocumentMut) -> Result<(), PatchError> {
    let rendered = doc.to_string();
    if rendered != original {
        fs::write(path, rendered).map_err(|source| PatchError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Write quantization scales into `[weights.scales]`, creating the table if
/// the manifest has none yet.
pub fn update_scales<'a, I>(path: &Path, scales: I) -> Result<(), PatchError>
where
    I: IntoIterator<Item = (&'a str, i64)>,
{
    let (original, mut doc) = load(path)?;
    let weights = doc
        .entry("weights")
        .or_insert_with(|| {
            let mut table = Table::new();
            table.set_implicit(true);
            Item::Table(table)
        })
        .as_table_mut()
        .ok_or(PatchError::NotATable("weights"))?;
    let scales_table = weights
        .entry("scales")
        .or_insert_with(|| Item::Table(Table::new()))
        .as_table_mut()
        .ok_or(PatchError::NotATable("weights.scales"))?;
    for (key, value) in scales {
        scales_table[key] = toml_edit::value(value);
    }
    debug!(path = %path.display(), "updated weights.scales");
    store(path, &original, &doc)
}

/// Write the computed schema hash into `[schema.custom]`.
pub fn update_schema_hash(path: &Path, hash_str: &str) -> Result<(), PatchError> {
    let (original, mut doc) = load(path)?;
    let custom = doc
        .get_mut("schema")
        .and_then(Item::as_table_mut)
        .and_then(|s| s.get_mut("custom"))
        .and_then(Item::as_table_mut)
        .ok_or(PatchError::MissingTable("schema.custom"))?;
    custom["schema_hash32"] = toml_edit::value(hash_str);
    store(path, &original, &doc)
}

/// Fold fresh blob hashes (and optionally sizes) into `[[weights.blobs]]`.
///
/// Entries whose `name` matches no update are left untouched. Returns the
/// number of blob entries rewritten.
pub fn update_blobs(
    path: &Path,
    updates: &[BlobUpdate],
    update_size: bool,
) -> Result<usize, PatchError> {
    if updates.is_empty() {
        return Ok(0);
    }
    let (original, mut doc) = load(path)?;
    let blobs = doc
        .get_mut("weights")
        .and_then(Item::as_table_mut)
        .and_then(|w| w.get_mut("blobs"))
        .and_then(Item::as_array_of_tables_mut)
        .ok_or(PatchError::MissingTable("weights.blobs"))?;

    let mut touched = 0;
    for blob in blobs.iter_mut() {
        let Some(name) = blob.get("name").and_then(Item::as_str) else {
            continue;
        };
        let Some(update) = updates.iter().find(|u| u.name == name) else {
            continue;
        };
        blob["hash"] = toml_edit::value(update.hash.as_str());
        if update_size {
            blob["size_bytes"] = toml_edit::value(update.size_bytes as i64);
        }
        touched += 1;
    }
    debug!(path = %path.display(), touched, "updated weights.blobs");
    store(path, &original, &doc)?;
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn manifest_file(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_update_scales_preserves_comments() {
        let file = manifest_file(
            "# tuned by hand\n[weights]\nlayout = \"mlp_q8\"\n\n[weights.scales]\nw1_scale_q16 = 1\n",
        );
        update_scales(file.path(), [("w1_scale_q16", 4321), ("w2_scale_q16", 99)]).unwrap();
        let text = fs::read_to_string(file.path()).unwrap();
        assert!(text.starts_with("# tuned by hand\n"));
        assert!(text.contains("w1_scale_q16 = 4321"));
        assert!(text.contains("w2_scale_q16 = 99"));
        assert!(text.contains("layout = \"mlp_q8\""));
    }

    #[test]
    fn test_update_scales_creates_table() {
        let file = manifest_file("[weights]\nlayout = \"linear_q8\"\n");
        update_scales(file.path(), [("w_scale_q16", 65536)]).unwrap();
        let text = fs::read_to_string(file.path()).unwrap();
        assert!(text.contains("[weights.scales]"));
        assert!(text.contains("w_scale_q16 = 65536"));
    }

    #[test]
    fn test_update_schema_hash() {
        let file = manifest_file(
            "[schema]\ntype = \"custom\"\n\n[schema.custom]\ninput_blob_size = 64\noutput_blob_size = 8\n",
        );
        update_schema_hash(file.path(), "0xDEADBEEF").unwrap();
        let text = fs::read_to_string(file.path()).unwrap();
        assert!(text.contains("schema_hash32 = \"0xDEADBEEF\""));
    }

    #[test]
    fn test_update_schema_hash_requires_custom_table() {
        let file = manifest_file("[schema]\ntype = \"vector\"\n");
        let err = update_schema_hash(file.path(), "0x00000001").unwrap_err();
        assert!(matches!(err, PatchError::MissingTable("schema.custom")));
    }

    #[test]
    fn test_update_blobs_by_name() {
        let file = manifest_file(
            r#"[weights]
layout = "linear_q8"

[[weights.blobs]]
name = "main"
file = "weights.bin"
hash = "sha256:old"
size_bytes = 1

[[weights.blobs]]
name = "aux"
file = "aux.bin"
hash = "sha256:keep"
size_bytes = 2
"#,
        );
        let touched = update_blobs(
            file.path(),
            &[BlobUpdate {
                name: "main".into(),
                file: "weights.bin".into(),
                hash: "sha256:new".into(),
                size_bytes: 128,
            }],
            true,
        )
        .unwrap();
        assert_eq!(touched, 1);
        let text = fs::read_to_string(file.path()).unwrap();
        assert!(text.contains("hash = \"sha256:new\""));
        assert!(text.contains("size_bytes = 128"));
        assert!(text.contains("hash = \"sha256:keep\""));
        assert!(text.contains("size_bytes = 2"));
    }

    #[test]
    fn test_update_blobs_can_skip_size() {
        let file = manifest_file(
            "[weights]\n[[weights.blobs]]\nname = \"main\"\nfile = \"w.bin\"\nhash = \"sha256:old\"\nsize_bytes = 7\n",
        );
        update_blobs(
            file.path(),
            &[BlobUpdate {
                name: "main".into(),
                file: "w.bin".into(),
                hash: "sha256:new".into(),
                size_bytes: 999,
            }],
            false,
        )
        .unwrap();
        let text = fs::read_to_string(file.path()).unwrap();
        assert!(text.contains("size_bytes = 7"));
        assert!(!text.contains("999"));
    }
}
