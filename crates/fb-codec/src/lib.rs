//! Weights conversion for Frostbite models.
//!
//! Takes float tensors exported as JSON, quantizes them to the integer
//! formats the guest kernels consume, and emits the packed blob a manifest
//! layout describes. Also owns blob hashing (`pack`), chunking for chunked
//! uploads, and placeholder generation for freshly scaffolded projects.

use std::path::PathBuf;

pub mod blobs;
pub mod convert;
pub mod quant;
pub mod template;
pub mod tensors;
pub mod tree;

pub use blobs::{chunk_file, chunk_manifest, pack_manifest, sha256_file, write_placeholders, ChunkResult};
pub use convert::{convert_weights, ConvertOptions, ConvertReport};
pub use quant::{quantize_i8, to_i32_q16, Q16};
pub use template::{infer_template, Template};
pub use tensors::{load_tensors, TensorMap};
pub use tree::{encode_trees, TreeNode, NODE_BYTES};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse tensor input")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Manifest(#[from] fb_manifest::ManifestError),
    #[error(transparent)]
    Patch(#[from] fb_manifest::PatchError),
    #[error("{0}")]
    Input(String),
}

impl CodecError {
    pub(crate) fn input(msg: impl Into<String>) -> Self {
        CodecError::Input(msg.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CodecError::Io {
            path: path.into(),
            source,
        }
    }
}
