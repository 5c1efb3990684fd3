//! Argv builders and process plumbing for the on-chain helper binaries.
//!
//! The actual transactions are built by external tools shipped with the
//! program (`init_pda_accounts`, `pda_account_ops`, `write_account`, the
//! runner). This module owns their command-line contracts so every caller
//! spells them identically, plus the guards applied before invoking them.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::derive::SegmentKind;
use crate::pubkey::Pubkey;
use crate::AccountsError;

/// A segment to create, as `kind:slot:bytes` on the tool command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSpec {
    pub kind: SegmentKind,
    pub slot: u8,
    pub bytes: u32,
}

/// Argv for `init_pda_accounts`.
pub fn init_pda_accounts_args(vm_seed: u64, segments: &[SegmentSpec]) -> Vec<String> {
    let mut args = vec!["--vm-seed".to_string(), vm_seed.to_string()];
    for seg in segments {
        args.push("--segment".to_string());
        args.push(format!("{}:{}:{}", seg.kind.as_str(), seg.slot, seg.bytes));
    }
    args
}

/// Maintenance operations handled by `pda_account_ops`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdaOp {
    ClearSegment {
        kind: SegmentKind,
        slot: u8,
        offset: Option<u32>,
        len: Option<u32>,
    },
    CloseSegment {
        kind: SegmentKind,
        slot: u8,
        recipient: Option<Pubkey>,
    },
    CloseVm {
        recipient: Option<Pubkey>,
    },
}

/// Argv for `pda_account_ops`.
pub fn pda_account_ops_args(vm_seed: u64, op: &PdaOp) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let push_target = |args: &mut Vec<String>, kind: SegmentKind, slot: u8| {
        args.push("--kind".to_string());
        args.push(kind.as_str().to_string());
        args.push("--slot".to_string());
        args.push(slot.to_string());
    };
    match op {
        PdaOp::ClearSegment {
            kind,
            slot,
            offset,
            len,
        } => {
            args.push("clear-segment".to_string());
            args.push("--vm-seed".to_string());
            args.push(vm_seed.to_string());
            push_target(&mut args, *kind, *slot);
            if let Some(offset) = offset {
                args.push("--offset".to_string());
                args.push(offset.to_string());
            }
            if let Some(len) = len {
                args.push("--len".to_string());
                args.push(len.to_string());
            }
        }
        PdaOp::CloseSegment {
            kind,
            slot,
            recipient,
        } => {
            args.push("close-segment".to_string());
            args.push("--vm-seed".to_string());
            args.push(vm_seed.to_string());
            push_target(&mut args, *kind, *slot);
            if let Some(recipient) = recipient {
                args.push("--recipient".to_string());
                args.push(recipient.to_string());
            }
        }
        PdaOp::CloseVm { recipient } => {
            args.push("close-vm".to_string());
            args.push("--vm-seed".to_string());
            args.push(vm_seed.to_string());
            if let Some(recipient) = recipient {
                args.push("--recipient".to_string());
                args.push(recipient.to_string());
            }
        }
    }
    args
}

/// Argv for `write_account`. Offsets travel as u32 on chain.
pub fn write_account_args(
    pubkey: &Pubkey,
    offset: u64,
    payload: &Path,
    chunk_size: Option<u32>,
) -> Result<Vec<String>, AccountsError> {
    if u32::try_from(offset).is_err() {
        return Err(AccountsError::input("offset must fit in u32"));
    }
    let mut args = vec![
        pubkey.to_string(),
        offset.to_string(),
        payload.display().to_string(),
    ];
    if let Some(chunk_size) = chunk_size {
        args.push("--chunk-size".to_string());
        args.push(chunk_size.to_string());
    }
    Ok(args)
}

/// One runner invocation. `entry_pc` and `resume` are mutually exclusive;
/// the seeded fields are only meaningful together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSpec {
    pub vm_pubkey: Pubkey,
    pub mapped_file: PathBuf,
    pub instructions: u64,
    pub entry_pc: Option<u64>,
    pub resume: bool,
    pub vm_seed: Option<u64>,
    pub authority_keypair: Option<PathBuf>,
    /// Whether `vm.authority` matches the payer signer's pubkey. When it
    /// does not, a seeded run must carry its own authority keypair.
    pub authority_is_payer: bool,
}

/// Argv for the runner.
pub fn runner_args(spec: &RunnerSpec) -> Result<Vec<String>, AccountsError> {
    let mut args = vec![
        "--vm".to_string(),
        spec.vm_pubkey.to_string(),
        "--mapped-file".to_string(),
        spec.mapped_file.display().to_string(),
        "--instructions".to_string(),
        spec.instructions.to_string(),
    ];
    if spec.resume {
        args.push("--resume".to_string());
    } else if let Some(entry_pc) = spec.entry_pc {
        args.push("--entry-pc".to_string());
        args.push(entry_pc.to_string());
    }
    if let Some(vm_seed) = spec.vm_seed {
        args.push("--vm-seed".to_string());
        args.push(vm_seed.to_string());
        match &spec.authority_keypair {
            Some(keypair) => {
                args.push("--authority-keypair".to_string());
                args.push(keypair.display().to_string());
            }
            None if !spec.authority_is_payer => {
                return Err(AccountsError::input(
                    "seeded run requires vm.authority_keypair when vm.authority \
                     differs from payer signer",
                ));
            }
            None => {}
        }
    }
    Ok(args)
}

/// Failure of an external helper tool, streams preserved verbatim.
#[derive(Debug, thiserror::Error)]
pub enum ExternalToolError {
    #[error("failed to launch {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}\nstdout:\n{stdout}\nstderr:\n{stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stdout: String,
        stderr: String,
    },
}

/// Run a helper tool to completion, returning its stdout.
pub fn run_tool(
    program: &Path,
    args: &[String],
    envs: &[(String, String)],
) -> Result<String, ExternalToolError> {
    tracing::info!(program = %program.display(), ?args, "invoking external tool");
    let output = Command::new(program)
        .args(args)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .output()
        .map_err(|source| ExternalToolError::Spawn {
            program: program.display().to_string(),
            source,
        })?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        return Err(ExternalToolError::Failed {
            program: program.display().to_string(),
            status: output.status,
            stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(stdout)
}

const SOURCE_UPLOAD_SUFFIXES: &[&str] = &[
    "json",
    "npz",
    "npy",
    "pt",
    "pth",
    "safetensors",
    "toml",
    "yaml",
    "yml",
    "csv",
    "txt",
];

/// Refuse to upload files that look like model source artifacts rather
/// than packed binary payloads.
pub fn validate_upload_input(path: &Path, allow_raw: bool) -> Result<(), AccountsError> {
    if allow_raw {
        return Ok(());
    }
    let suffix = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    if suffix.is_some_and(|s| SOURCE_UPLOAD_SUFFIXES.contains(&s.as_str())) {
        return Err(AccountsError::input(
            "upload expects a binary payload (for example weights.bin). \
             Convert first with `fbkit convert ... --pack`, then upload weights.bin. \
             Pass --allow-raw-upload to bypass this guard.",
        ));
    }
    Ok(())
}
