//! Deterministic account derivation and the accounts-file model.
//!
//! Every address the deploy pipeline touches is derived offline from
//! `(program_id, authority, vm_seed)` and checked against whatever the
//! accounts file declares before any on-chain action happens.

use std::path::PathBuf;

pub mod accounts;
pub mod collision;
pub mod derive;
pub mod plan;
pub mod pubkey;
pub mod registry;
pub mod tools;

pub use accounts::{
    load_accounts, resolve_accounts_path, AccountsFile, ClusterDecl, SegmentEntry, VmDecl,
};
pub use collision::{
    find_seed_collision, fingerprint_from_accounts, normalize_rpc_url, probe_account_exists,
    SeedFingerprint,
};
pub use derive::{
    segment_seed_string, vm_seed_string, AddressDeriver, LegacyDeriver, SeededDeriver, SegmentKind,
};
pub use plan::{segment_metas, ClusterContext, SegmentMeta};
pub use pubkey::{FsKeypairResolver, KeypairResolver, Pubkey};
pub use registry::{ProjectEntry, Registry, RegistryDoc};
pub use tools::{
    init_pda_accounts_args, pda_account_ops_args, run_tool, runner_args, validate_upload_input,
    write_account_args, ExternalToolError, PdaOp, RunnerSpec, SegmentSpec,
};

#[derive(Debug, thiserror::Error)]
pub enum AccountsError {
    #[error("failed to access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML")]
    Toml(#[from] toml::de::Error),
    #[error("failed to serialize TOML")]
    TomlSer(#[from] toml::ser::Error),
    #[error(transparent)]
    Derivation(#[from] DerivationError),
    #[error(transparent)]
    Tool(#[from] ExternalToolError),
    #[error("{0}")]
    Input(String),
}

impl AccountsError {
    pub(crate) fn input(msg: impl Into<String>) -> Self {
        AccountsError::Input(msg.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AccountsError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Slot, kind, and declared-versus-derived violations caught before any
/// transaction is built.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DerivationError {
    #[error("seed exceeds 32 bytes: {0}")]
    SeedTooLong(String),
    #[error("Unable to find a viable program address bump seed")]
    BumpExhausted,
    #[error("Unable to derive VM PDA: missing authority pubkey")]
    MissingAuthority,
    #[error("Unable to derive segment {index}: unsupported kind '{kind}' (expected weights|ram)")]
    UnsupportedKind { index: i64, kind: String },
    #[error("Unable to derive segment {index}: slot {slot} is out of range (1..15)")]
    SlotOutOfRange { index: i64, slot: i64 },
    #[error("PDA mode requires a weights segment at slot 1")]
    SlotOneNotWeights,
    #[error("PDA mode supports weights only at slot 1")]
    WeightsNotAtSlotOne,
    #[error("segment {index} ({kind}) must be {access} in PDA mode; fix segment writable metadata")]
    WrongAccess {
        index: i64,
        kind: String,
        access: &'static str,
    },
    #[error("duplicate segment slot {0} in PDA mode; each mapped account must use a unique slot")]
    DuplicateSlot(i64),
    #[error(
        "PDA execute requires contiguous segment slots starting at 1; \
         missing slot {expected} before configured slot {actual}"
    )]
    NonContiguousSlots { expected: i64, actual: i64 },
    #[error(
        "vm.pubkey does not match derived VM PDA for vm.seed/authority; \
         remove vm.pubkey or fix vm.seed/authority"
    )]
    VmPubkeyMismatch,
    #[error(
        "segment {0} pubkey does not match derived PDA for vm.seed/authority/slot; \
         remove segment pubkey/keypair or fix metadata"
    )]
    SegmentPubkeyMismatch(i64),
}
