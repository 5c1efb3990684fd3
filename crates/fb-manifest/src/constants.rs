//! Manifest vocabulary and on-wire constants.

use std::fmt;
use std::str::FromStr;

/// Allowed `model.arch` values.
pub const ALLOWED_ARCH: [&str; 1] = ["rv64imac"];
/// Allowed `model.endianness` values.
pub const ALLOWED_ENDIANNESS: [&str; 1] = ["little"];
/// Allowed `weights.quantization` values.
pub const ALLOWED_QUANT: [&str; 5] = ["q8", "q4", "f16", "f32", "custom"];
/// Allowed `weights.header_format` values.
pub const ALLOWED_HEADER_FORMAT: [&str; 2] = ["none", "rvcd-v1"];
/// Allowed `segments[].kind` values.
pub const ALLOWED_SEGMENT_KIND: [&str; 5] = ["scratch", "weights", "input", "output", "custom"];
/// Allowed `segments[].access` values.
pub const ALLOWED_SEGMENT_ACCESS: [&str; 3] = ["ro", "rw", "wo"];
/// Allowed `validation.mode` values.
pub const ALLOWED_VALIDATION_MODE: [&str; 2] = ["minimal", "guest"];
/// Allowed `model.profile` values.
pub const ALLOWED_PROFILE: [&str; 1] = ["finance-int"];

/// Keys permitted under `[weights.scales]`.
pub const SCALE_KEYS: [&str; 5] = [
    "w_scale_q16",
    "w1_scale_q16",
    "w2_scale_q16",
    "w3_scale_q16",
    "w4_scale_q16",
];

/// Control-block magic ("FBM1", little-endian).
pub const FBM1_MAGIC: u32 = 0x314D_4246;
/// Control-block ABI version understood by the execution target.
pub const ABI_VERSION: u32 = 1;
/// VM account header size; scratch memory starts at this offset.
pub const MMU_VM_HEADER_SIZE: usize = 545;

/// Default Frostbite program id (devnet v0).
pub const DEFAULT_PROGRAM_ID: &str = "FRsToriMLgDc1Ud53ngzHUZvCRoazCaGeGUuzkwoha7m";

/// Upper bound on `data_offset + size_bytes` for any weights blob.
pub const MAX_SEGMENT_BYTES: u64 = 0x1000_0000;
/// Minimum (and default) `abi.scratch_min`.
pub const DEFAULT_SCRATCH_MIN: u64 = 262_144;
/// Minimum `abi.control_size`.
pub const MIN_CONTROL_SIZE: u64 = 64;
/// Minimum (and default) `abi.reserved_tail`.
pub const MIN_RESERVED_TAIL: u64 = 32;

/// Data offset implied by the `rvcd-v1` weights header when none is declared.
pub const RVCD_V1_DATA_OFFSET: u64 = 12;

/// Element types a schema can declare for I/O tensors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Dtype {
    F32,
    F16,
    I32,
    I16,
    I8,
    U32,
    U8,
}

impl Dtype {
    /// Size in bytes of one element.
    pub fn size(self) -> u64 {
        match self {
            Dtype::F32 | Dtype::I32 | Dtype::U32 => 4,
            Dtype::F16 | Dtype::I16 => 2,
            Dtype::I8 | Dtype::U8 => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dtype::F32 => "f32",
            Dtype::F16 => "f16",
            Dtype::I32 => "i32",
            Dtype::I16 => "i16",
            Dtype::I8 => "i8",
            Dtype::U32 => "u32",
            Dtype::U8 => "u8",
        }
    }
}

impl FromStr for Dtype {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "f32" => Ok(Dtype::F32),
            "f16" => Ok(Dtype::F16),
            "i32" => Ok(Dtype::I32),
            "i16" => Ok(Dtype::I16),
            "i8" => Ok(Dtype::I8),
            "u32" => Ok(Dtype::U32),
            "u8" => Ok(Dtype::U8),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four I/O schema families a manifest can declare.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SchemaType {
    Vector,
    TimeSeries,
    Graph,
    Custom,
}

impl SchemaType {
    /// Numeric id embedded in payload envelopes and guest configs.
    pub fn id(self) -> u32 {
        match self {
            SchemaType::Vector => 0,
            SchemaType::TimeSeries => 1,
            SchemaType::Graph => 2,
            SchemaType::Custom => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaType::Vector => "vector",
            SchemaType::TimeSeries => "time_series",
            SchemaType::Graph => "graph",
            SchemaType::Custom => "custom",
        }
    }

    pub fn all() -> [SchemaType; 4] {
        [
            SchemaType::Vector,
            SchemaType::TimeSeries,
            SchemaType::Graph,
            SchemaType::Custom,
        ]
    }
}

impl FromStr for SchemaType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vector" => Ok(SchemaType::Vector),
            "time_series" => Ok(SchemaType::TimeSeries),
            "graph" => Ok(SchemaType::Graph),
            "custom" => Ok(SchemaType::Custom),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a model id slug: `[a-z0-9_-]+`.
pub fn is_slug(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

/// Check a `X.Y.Z` semver string (plain numeric components only).
pub fn is_semver(value: &str) -> bool {
    let mut parts = 0;
    for part in value.split('.') {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        parts += 1;
    }
    parts == 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        assert!(is_slug("price-oracle_v2"));
        assert!(!is_slug("Price"));
        assert!(!is_slug(""));
        assert!(!is_slug("has space"));
    }

    #[test]
    fn test_semver() {
        assert!(is_semver("0.1.0"));
        assert!(is_semver("10.20.30"));
        assert!(!is_semver("1.0"));
        assert!(!is_semver("1.0.0-rc1"));
        assert!(!is_semver("v1.0.0"));
    }

    #[test]
    fn test_dtype_sizes() {
        assert_eq!(Dtype::F32.size(), 4);
        assert_eq!(Dtype::F16.size(), 2);
        assert_eq!(Dtype::I8.size(), 1);
        assert_eq!("i32".parse::<Dtype>(), Ok(Dtype::I32));
        assert!("i64".parse::<Dtype>().is_err());
    }

    #[test]
    fn test_schema_ids() {
        assert_eq!(SchemaType::Vector.id(), 0);
        assert_eq!(SchemaType::TimeSeries.id(), 1);
        assert_eq!(SchemaType::Graph.id(), 2);
        assert_eq!(SchemaType::Custom.id(), 3);
    }
}
