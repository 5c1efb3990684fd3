//! Frostbite model manifest handling.
//!
//! This crate is the canonical source for manifest semantics in the
//! workspace. Other crates should consume the [`Manifest`] view rather than
//! re-parsing TOML themselves.
//!
//! A manifest is a declarative TOML document with the tables `model`, `abi`,
//! `schema.{vector|time_series|graph|custom}`, `weights.{blobs[],scales}`,
//! `segments[]`, `limits`, `validation` and `build`. It is loaded once per
//! invocation and never mutated in memory; persistence updates go through
//! the format-preserving patch operations in [`patch`].

pub mod constants;
pub mod model;
pub mod patch;
pub mod schema;
pub mod validate;

mod loader;

pub use constants::{Dtype, SchemaType};
pub use loader::{load_manifest, parse_manifest, ManifestError};
pub use model::{BlobDecl, Manifest, SchemaInfo, SchemaResolveError, SegmentDecl, WeightsBinding};
pub use patch::{BlobUpdate, PatchError};
pub use schema::{format_hash32, parse_hash32, schema_hash32, schema_id, SchemaError};
pub use validate::{validate_manifest, ValidationIssue};
