//! Resolution of an accounts file into the ordered account list a run
//! needs, with every derived address cross-checked against declarations.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use fb_manifest::constants::DEFAULT_PROGRAM_ID;

use crate::accounts::{
    load_accounts, resolve_accounts_path, resolve_authority_pubkey, resolve_declared_pubkey,
    validate_vm_authority_binding,
};
use crate::derive::{AddressDeriver, SegmentKind};
use crate::pubkey::{KeypairResolver, Pubkey};
use crate::{AccountsError, DerivationError};

/// Cluster and VM facts resolved alongside the mapped account list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterContext {
    pub rpc_url: Option<String>,
    pub program_id: String,
    pub payer: Option<String>,
    pub vm_pubkey: Pubkey,
    pub authority_pubkey: Option<Pubkey>,
    pub vm_seed: Option<u64>,
    pub vm_entry: Option<u64>,
}

/// One mapped account, ordered by slot (seeded) or index (legacy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMeta {
    pub sort_key: i64,
    pub writable: bool,
    pub pubkey: Pubkey,
}

impl SegmentMeta {
    /// The `rw:`/`ro:` line format the runner's mapped-file consumes.
    pub fn to_line(&self) -> String {
        let access = if self.writable { "rw" } else { "ro" };
        format!("{access}:{}", self.pubkey)
    }
}

/// Resolve every mapped account for `accounts_path`.
///
/// In seeded mode each address is derived and compared against whatever
/// the file declares; any disagreement is fatal before a transaction is
/// ever built.
pub fn segment_metas(
    accounts_path: &Path,
    program_id_override: Option<&str>,
    payer_override: Option<&str>,
    resolver: &dyn KeypairResolver,
    deriver: &dyn AddressDeriver,
) -> Result<(ClusterContext, Vec<SegmentMeta>), AccountsError> {
    let accounts = load_accounts(accounts_path)?;
    validate_vm_authority_binding(accounts_path, &accounts.vm, resolver)?;

    let program_id = program_id_override
        .map(str::to_string)
        .or_else(|| accounts.cluster.program_id.clone())
        .unwrap_or_else(|| DEFAULT_PROGRAM_ID.to_string());
    let program_pubkey = Pubkey::from_str(&program_id)?;

    let payer_keypair: Option<PathBuf> = payer_override
        .map(PathBuf::from)
        .or_else(|| {
            accounts
                .cluster
                .payer
                .as_deref()
                .map(|p| resolve_accounts_path(accounts_path, p))
        });
    let authority_override: Option<PathBuf> = accounts
        .vm
        .authority_keypair
        .as_deref()
        .filter(|k| !k.is_empty())
        .map(|k| resolve_accounts_path(accounts_path, k))
        .or_else(|| payer_keypair.clone());

    let vm_seed = accounts.vm.seed;
    let authority_pubkey = resolve_authority_pubkey(
        &accounts,
        accounts_path,
        authority_override.as_deref(),
        resolver,
    )?;

    let mut vm_pubkey = resolve_declared_pubkey(
        accounts.vm.pubkey.as_deref(),
        accounts.vm.keypair.as_deref(),
        accounts_path,
        resolver,
    )?;
    if let Some(seed) = vm_seed {
        let authority = authority_pubkey.ok_or(DerivationError::MissingAuthority)?;
        let expected = deriver.derive_vm(&program_pubkey, &authority, seed)?;
        if vm_pubkey.is_some_and(|declared| declared != expected) {
            return Err(DerivationError::VmPubkeyMismatch.into());
        }
        vm_pubkey = Some(expected);
    }
    let vm_pubkey = vm_pubkey.ok_or_else(|| {
        AccountsError::input("accounts file missing vm pubkey/keypair (or vm.seed + authority)")
    })?;

    if accounts.segments.is_empty() {
        return Err(AccountsError::input("accounts file has no segments"));
    }

    let mut mapped: Vec<SegmentMeta> = Vec::with_capacity(accounts.segments.len());
    for seg in &accounts.segments {
        let mut pubkey = resolve_declared_pubkey(
            seg.pubkey.as_deref(),
            seg.keypair.as_deref(),
            accounts_path,
            resolver,
        )?;
        let mut writable = seg.writable;
        if let Some(seed) = vm_seed {
            let authority = authority_pubkey.ok_or(DerivationError::MissingAuthority)?;
            let kind = SegmentKind::parse(&seg.kind).ok_or(DerivationError::UnsupportedKind {
                index: seg.index,
                kind: seg.kind.clone(),
            })?;
            if seg.slot == 1 && kind != SegmentKind::Weights {
                return Err(DerivationError::SlotOneNotWeights.into());
            }
            if kind == SegmentKind::Weights && seg.slot != 1 {
                return Err(DerivationError::WeightsNotAtSlotOne.into());
            }
            if !(1..=15).contains(&seg.slot) {
                return Err(DerivationError::SlotOutOfRange {
                    index: seg.index,
                    slot: seg.slot,
                }
                .into());
            }
            let expected =
                deriver.derive_segment(&program_pubkey, &authority, seed, kind, seg.slot as u8)?;
            if pubkey.is_some_and(|declared| declared != expected) {
                return Err(DerivationError::SegmentPubkeyMismatch(seg.index).into());
            }
            pubkey = Some(expected);
            let expected_writable = kind == SegmentKind::Ram;
            if seg.writable != expected_writable {
                return Err(DerivationError::WrongAccess {
                    index: seg.index,
                    kind: seg.kind.clone(),
                    access: if expected_writable { "writable" } else { "readonly" },
                }
                .into());
            }
            writable = expected_writable;
        }
        let pubkey = pubkey.ok_or_else(|| {
            AccountsError::input(format!(
                "segment {} missing pubkey/keypair (or derivation metadata)",
                seg.index
            ))
        })?;
        let sort_key = if vm_seed.is_some() { seg.slot } else { seg.index };
        mapped.push(SegmentMeta {
            sort_key,
            writable,
            pubkey,
        });
    }
    mapped.sort_by_key(|m| m.sort_key);

    if vm_seed.is_some() {
        for pair in mapped.windows(2) {
            if pair[0].sort_key == pair[1].sort_key {
                return Err(DerivationError::DuplicateSlot(pair[0].sort_key).into());
            }
        }
        for (position, meta) in mapped.iter().enumerate() {
            let expected = position as i64 + 1;
            if meta.sort_key != expected {
                return Err(DerivationError::NonContiguousSlots {
                    expected,
                    actual: meta.sort_key,
                }
                .into());
            }
        }
    }

    tracing::debug!(
        vm = %vm_pubkey,
        segments = mapped.len(),
        seeded = vm_seed.is_some(),
        "resolved mapped accounts"
    );

    Ok((
        ClusterContext {
            rpc_url: accounts.cluster.rpc_url.clone(),
            program_id,
            payer: payer_keypair.map(|p| p.display().to_string()),
            vm_pubkey,
            authority_pubkey,
            vm_seed,
            vm_entry: accounts.vm.entry_pc,
        },
        mapped,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::SeededDeriver;

    struct FixedResolver(Pubkey);

    impl KeypairResolver for FixedResolver {
        fn pubkey_for(&self, _: &Path) -> Result<Pubkey, AccountsError> {
            Ok(self.0)
        }
    }

    fn write_accounts(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("frostbite-accounts.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn authority() -> Pubkey {
        Pubkey::new([7u8; 32])
    }

    fn seeded_accounts(dir: &Path, extra_segment: &str) -> PathBuf {
        write_accounts(
            dir,
            &format!(
                r#"
                [cluster]
                rpc_url = "http://127.0.0.1:8899"

                [vm]
                seed = 42
                authority = "{}"

                [[segments]]
                index = 1
                slot = 1
                kind = "weights"
                writable = false

                {extra_segment}
            "#,
                authority()
            ),
        )
    }

    #[test]
    fn test_seeded_plan_derives_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded_accounts(
            dir.path(),
            r#"
            [[segments]]
            index = 2
            slot = 2
            kind = "ram"
            writable = true
        "#,
        );
        let resolver = FixedResolver(authority());
        let (context, metas) =
            segment_metas(&path, None, None, &resolver, &SeededDeriver).unwrap();
        assert_eq!(context.vm_seed, Some(42));
        assert_eq!(metas.len(), 2);
        assert!(metas[0].to_line().starts_with("ro:"));
        assert!(metas[1].to_line().starts_with("rw:"));

        // Stable across runs
        let (context2, metas2) =
            segment_metas(&path, None, None, &resolver, &SeededDeriver).unwrap();
        assert_eq!(context.vm_pubkey, context2.vm_pubkey);
        assert_eq!(metas, metas2);
    }

    #[test]
    fn test_weights_must_sit_at_slot_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_accounts(
            dir.path(),
            &format!(
                r#"
                [vm]
                seed = 1
                authority = "{}"

                [[segments]]
                index = 1
                slot = 2
                kind = "weights"
                writable = false
            "#,
                authority()
            ),
        );
        let resolver = FixedResolver(authority());
        let err = segment_metas(&path, None, None, &resolver, &SeededDeriver).unwrap_err();
        assert!(err.to_string().contains("PDA mode supports weights only at slot 1"));
    }

    #[test]
    fn test_ram_must_be_writable() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded_accounts(
            dir.path(),
            r#"
            [[segments]]
            index = 2
            slot = 2
            kind = "ram"
            writable = false
        "#,
        );
        let resolver = FixedResolver(authority());
        let err = segment_metas(&path, None, None, &resolver, &SeededDeriver).unwrap_err();
        assert!(err.to_string().contains("must be writable in PDA mode"));
    }

    #[test]
    fn test_contiguous_slots_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded_accounts(
            dir.path(),
            r#"
            [[segments]]
            index = 2
            slot = 3
            kind = "ram"
            writable = true
        "#,
        );
        let resolver = FixedResolver(authority());
        let err = segment_metas(&path, None, None, &resolver, &SeededDeriver).unwrap_err();
        assert!(err
            .to_string()
            .contains("missing slot 2 before configured slot 3"));
    }

    #[test]
    fn test_declared_vm_pubkey_must_match_derived() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_accounts(
            dir.path(),
            &format!(
                r#"
                [vm]
                seed = 42
                authority = "{}"
                pubkey = "{}"

                [[segments]]
                index = 1
                slot = 1
                kind = "weights"
                writable = false
            "#,
                authority(),
                Pubkey::new([9u8; 32])
            ),
        );
        let resolver = FixedResolver(authority());
        let err = segment_metas(&path, None, None, &resolver, &SeededDeriver).unwrap_err();
        assert!(err.to_string().contains("vm.pubkey does not match derived VM PDA"));
    }

    #[test]
    fn test_legacy_mode_uses_declared_pubkeys() {
        let dir = tempfile::tempdir().unwrap();
        let vm_key = Pubkey::new([11u8; 32]);
        let seg_key = Pubkey::new([12u8; 32]);
        let path = write_accounts(
            dir.path(),
            &format!(
                r#"
                [vm]
                pubkey = "{vm_key}"

                [[segments]]
                index = 1
                kind = "weights"
                pubkey = "{seg_key}"
                writable = false
            "#
            ),
        );
        let resolver = FixedResolver(authority());
        let (context, metas) =
            segment_metas(&path, None, None, &resolver, &SeededDeriver).unwrap();
        assert_eq!(context.vm_pubkey, vm_key);
        assert_eq!(metas[0].pubkey, seg_key);
    }
}
