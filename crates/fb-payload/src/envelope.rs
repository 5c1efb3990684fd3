//! FBH1 input envelope: a fixed 32-byte little-endian header carrying the
//! schema id, payload length, and optional crc32 and schema-hash fields.

use std::path::Path;
use std::str::FromStr;

use fb_manifest::{load_manifest, schema_hash32, schema_id, Manifest};

use crate::pack::pack_payload;
use crate::PayloadError;

pub const FBH1_MAGIC: u32 = 0x3148_4246; // "FBH1"
pub const FBH1_VERSION: u16 = 1;
pub const FBH1_HEADER_LEN: u32 = 32;

pub const FBH_FLAG_HAS_CRC32: u16 = 1 << 0;
pub const FBH_FLAG_HAS_SCHEMA_HASH: u16 = 1 << 1;

/// IEEE CRC-32, bitwise. Matches the table-free kernel the guests carry.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// Where the header's schema-hash field comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaHashMode {
    /// Compute from the manifest's canonical schema projection.
    #[default]
    Auto,
    /// Use `schema.custom.schema_hash32` as written, 0 when absent.
    Manifest,
    /// Omit the hash entirely.
    None,
}

impl FromStr for SchemaHashMode {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(SchemaHashMode::Auto),
            "manifest" => Ok(SchemaHashMode::Manifest),
            "none" => Ok(SchemaHashMode::None),
            _ => Err(PayloadError::input(
                "schema-hash mode must be auto, manifest, or none",
            )),
        }
    }
}

/// Resolve the hash value the envelope should carry for `mode`.
pub fn resolve_schema_hash(manifest: &Manifest, mode: SchemaHashMode) -> Result<u32, PayloadError> {
    match mode {
        SchemaHashMode::Auto => Ok(schema_hash32(manifest)?),
        SchemaHashMode::Manifest => {
            let literal = manifest
                .table("schema")
                .and_then(|s| s.get("custom"))
                .and_then(toml::Value::as_table)
                .and_then(|c| c.get("schema_hash32"));
            match literal {
                Some(toml::Value::String(s)) => Ok(fb_manifest::parse_hash32(s)?),
                Some(toml::Value::Integer(v)) => Ok(*v as u32),
                _ => Ok(0),
            }
        }
        SchemaHashMode::None => Ok(0),
    }
}

/// Prefix `payload` with the FBH1 header.
pub fn pack_fbh1_header(
    payload: &[u8],
    schema_id_value: u32,
    include_crc: bool,
    schema_hash: u32,
    mode: SchemaHashMode,
) -> Vec<u8> {
    let mut flags: u16 = 0;
    let mut crc_field: u32 = 0;
    if include_crc {
        flags |= FBH_FLAG_HAS_CRC32;
        crc_field = crc32(payload);
    }
    // A zero hash is indistinguishable from "absent", so the flag is only
    // set when the resolved value is nonzero.
    let include_hash = mode != SchemaHashMode::None && schema_hash != 0;
    if include_hash {
        flags |= FBH_FLAG_HAS_SCHEMA_HASH;
    }

    let mut buf = Vec::with_capacity(FBH1_HEADER_LEN as usize + payload.len());
    buf.extend_from_slice(&FBH1_MAGIC.to_le_bytes());
    buf.extend_from_slice(&FBH1_VERSION.to_le_bytes());
    buf.extend_from_slice(&flags.to_le_bytes());
    buf.extend_from_slice(&FBH1_HEADER_LEN.to_le_bytes());
    buf.extend_from_slice(&schema_id_value.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc_field.to_le_bytes());
    buf.extend_from_slice(&if include_hash { schema_hash } else { 0 }.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Pack a payload for the manifest at `manifest_path`, optionally wrapped
/// in the FBH1 envelope.
pub fn pack_input(
    manifest_path: &Path,
    payload: &serde_json::Value,
    include_header: bool,
    include_crc: bool,
    hash_mode: SchemaHashMode,
) -> Result<Vec<u8>, PayloadError> {
    let manifest = load_manifest(manifest_path)?;
    let body = pack_payload(&manifest, payload)?;
    if !include_header {
        return Ok(body);
    }
    let id = schema_id(&manifest)?;
    let hash = resolve_schema_hash(&manifest, hash_mode)?;
    Ok(pack_fbh1_header(&body, id, include_crc, hash, hash_mode))
}

/// Pack and write input bytes to `out_path`, returning the byte count.
pub fn write_input(
    manifest_path: &Path,
    payload: &serde_json::Value,
    out_path: &Path,
    include_header: bool,
    include_crc: bool,
    hash_mode: SchemaHashMode,
) -> Result<usize, PayloadError> {
    let data = pack_input(manifest_path, payload, include_header, include_crc, hash_mode)?;
    std::fs::write(out_path, &data).map_err(|source| PayloadError::Io {
        path: out_path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %out_path.display(), bytes = data.len(), "wrote input blob");
    Ok(data.len())
}

/// Decoded FBH1 header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fbh1Header {
    pub version: u16,
    pub flags: u16,
    pub header_len: u32,
    pub schema_id: u32,
    pub payload_len: u32,
    pub crc32: u32,
    pub schema_hash: u32,
}

impl Fbh1Header {
    pub fn has_crc32(&self) -> bool {
        self.flags & FBH_FLAG_HAS_CRC32 != 0
    }

    pub fn has_schema_hash(&self) -> bool {
        self.flags & FBH_FLAG_HAS_SCHEMA_HASH != 0
    }
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

/// Parse an FBH1 envelope, returning the header and the payload slice.
///
/// When the crc flag is set the payload checksum is verified.
pub fn parse_fbh1_header(data: &[u8]) -> Result<(Fbh1Header, &[u8]), PayloadError> {
    if data.len() < FBH1_HEADER_LEN as usize {
        return Err(PayloadError::input("input shorter than FBH1 header"));
    }
    if read_u32(data, 0) != FBH1_MAGIC {
        return Err(PayloadError::input("bad FBH1 magic"));
    }
    let header = Fbh1Header {
        version: u16::from_le_bytes(data[4..6].try_into().unwrap()),
        flags: u16::from_le_bytes(data[6..8].try_into().unwrap()),
        header_len: read_u32(data, 8),
        schema_id: read_u32(data, 12),
        payload_len: read_u32(data, 16),
        crc32: read_u32(data, 20),
        schema_hash: read_u32(data, 24),
    };
    if header.version != FBH1_VERSION {
        return Err(PayloadError::input(format!(
            "unsupported FBH1 version {}",
            header.version
        )));
    }
    let start = header.header_len as usize;
    let end = start
        .checked_add(header.payload_len as usize)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| PayloadError::input("FBH1 payload_len exceeds input"))?;
    let payload = &data[start..end];
    if header.has_crc32() && crc32(payload) != header.crc32 {
        return Err(PayloadError::input("FBH1 crc32 mismatch"));
    }
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fb_manifest::parse_manifest;
    use serde_json::json;

    #[test]
    fn test_crc32_known_vectors() {
        assert_eq!(crc32(b""), 0);
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_header_layout() {
        let payload = [1u8, 2, 3, 4];
        let buf = pack_fbh1_header(&payload, 7, true, 0xDEAD_BEEF, SchemaHashMode::Auto);
        assert_eq!(buf.len(), 36);
        assert_eq!(&buf[0..4], b"FBH1");
        assert_eq!(u16::from_le_bytes(buf[4..6].try_into().unwrap()), 1);
        let flags = u16::from_le_bytes(buf[6..8].try_into().unwrap());
        assert_eq!(flags, FBH_FLAG_HAS_CRC32 | FBH_FLAG_HAS_SCHEMA_HASH);
        assert_eq!(read_u32(&buf, 8), 32);
        assert_eq!(read_u32(&buf, 12), 7);
        assert_eq!(read_u32(&buf, 16), 4);
        assert_eq!(read_u32(&buf, 20), crc32(&payload));
        assert_eq!(read_u32(&buf, 24), 0xDEAD_BEEF);
        assert_eq!(read_u32(&buf, 28), 0);
        assert_eq!(&buf[32..], &payload);
    }

    #[test]
    fn test_zero_hash_clears_flag() {
        let buf = pack_fbh1_header(&[], 1, false, 0, SchemaHashMode::Auto);
        let flags = u16::from_le_bytes(buf[6..8].try_into().unwrap());
        assert_eq!(flags, 0);
    }

    #[test]
    fn test_parse_roundtrip_and_crc_check() {
        let payload = b"hello".to_vec();
        let mut buf = pack_fbh1_header(&payload, 9, true, 0, SchemaHashMode::None);
        let (header, body) = parse_fbh1_header(&buf).unwrap();
        assert_eq!(header.schema_id, 9);
        assert_eq!(body, payload.as_slice());
        buf[33] ^= 0xFF;
        let err = parse_fbh1_header(&buf).unwrap_err();
        assert!(err.to_string().contains("crc32 mismatch"));
    }

    #[test]
    fn test_resolve_manifest_mode_hash() {
        let manifest = parse_manifest(
            r#"
            [schema]
            type = "custom"
            [schema.custom]
            input_blob_size = 4
            output_blob_size = 4
            schema_hash32 = "0x0000ABCD"
        "#,
        )
        .unwrap();
        let hash = resolve_schema_hash(&manifest, SchemaHashMode::Manifest).unwrap();
        assert_eq!(hash, 0xABCD);
        assert_eq!(
            resolve_schema_hash(&manifest, SchemaHashMode::None).unwrap(),
            0
        );
    }

    #[test]
    fn test_pack_input_with_and_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.toml");
        std::fs::write(
            &path,
            r#"
            [model]
            name = "demo"
            version = "0.1.0"
            [schema]
            type = "vector"
            [schema.vector]
            input_dtype = "i32"
            input_shape = [2]
            output_dtype = "i32"
            output_shape = [1]
        "#,
        )
        .unwrap();
        let payload = json!([1, 2]);
        let bare = pack_input(&path, &payload, false, false, SchemaHashMode::None).unwrap();
        assert_eq!(bare.len(), 8);
        let framed = pack_input(&path, &payload, true, true, SchemaHashMode::Auto).unwrap();
        assert_eq!(framed.len(), 40);
        let (header, body) = parse_fbh1_header(&framed).unwrap();
        assert!(header.has_crc32());
        assert!(header.has_schema_hash());
        assert_eq!(body, bare.as_slice());
    }
}
