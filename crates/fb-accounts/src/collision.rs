//! Best-effort seed-collision detection across registered projects.
//!
//! Not a lock: two machines can still race, but catching a reused
//! `(program, authority, seed)` tuple before account creation avoids the
//! common footgun of silently writing into another project's VM.

use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde_json::json;

use crate::derive::AddressDeriver;
use crate::plan::segment_metas;
use crate::pubkey::{KeypairResolver, Pubkey};
use crate::registry::{ProjectEntry, Registry};
use crate::AccountsError;

/// Identity of a deployment target as far as derivation is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedFingerprint {
    pub rpc_url: String,
    pub program_id: String,
    pub authority_pubkey: Pubkey,
    pub vm_seed: u64,
    pub vm_pubkey: Pubkey,
}

impl SeedFingerprint {
    /// Two fingerprints collide when they derive the same VM, regardless
    /// of the (derived) vm_pubkey field itself.
    fn collides_with(&self, other: &SeedFingerprint) -> bool {
        self.rpc_url == other.rpc_url
            && self.program_id == other.program_id
            && self.authority_pubkey == other.authority_pubkey
            && self.vm_seed == other.vm_seed
    }
}

/// Trailing slashes and whitespace stripped; absent URLs get a sentinel
/// so they only collide with other unspecified clusters.
pub fn normalize_rpc_url(url: Option<&str>) -> String {
    match url {
        Some(url) => {
            let cleaned = url.trim().trim_end_matches('/');
            if cleaned.is_empty() {
                "<unspecified-rpc>".to_string()
            } else {
                cleaned.to_string()
            }
        }
        None => "<unspecified-rpc>".to_string(),
    }
}

/// Build a fingerprint from an accounts file, when it is seed-driven.
///
/// Files without a seed (legacy explicit pubkeys) have no fingerprint.
pub fn fingerprint_from_accounts(
    accounts_path: &Path,
    rpc_url: Option<&str>,
    program_id: Option<&str>,
    payer: Option<&str>,
    resolver: &dyn KeypairResolver,
    deriver: &dyn AddressDeriver,
) -> Result<Option<SeedFingerprint>, AccountsError> {
    let (context, _) = segment_metas(accounts_path, program_id, payer, resolver, deriver)?;
    let (Some(vm_seed), Some(authority_pubkey)) = (context.vm_seed, context.authority_pubkey)
    else {
        return Ok(None);
    };
    Ok(Some(SeedFingerprint {
        rpc_url: normalize_rpc_url(rpc_url.or(context.rpc_url.as_deref())),
        program_id: context.program_id,
        authority_pubkey,
        vm_seed,
        vm_pubkey: context.vm_pubkey,
    }))
}

/// Scan other registered projects for an accounts file resolving to the
/// same `(rpc, program, authority, seed)` tuple.
///
/// Projects whose accounts files are missing or broken are skipped; this
/// is a warning mechanism, not an integrity check.
pub fn find_seed_collision(
    registry: &Registry,
    current: &SeedFingerprint,
    exclude_project_path: Option<&Path>,
    resolver: &dyn KeypairResolver,
    deriver: &dyn AddressDeriver,
) -> Result<Option<(ProjectEntry, SeedFingerprint)>, AccountsError> {
    for project in registry.list()? {
        if exclude_project_path.is_some_and(|path| project.path == path) {
            continue;
        }
        let Some(accounts_path) = project.accounts_path() else {
            continue;
        };
        if !accounts_path.exists() {
            continue;
        }
        let fingerprint = fingerprint_from_accounts(
            &accounts_path,
            project.rpc_url.as_deref(),
            project.program_id.as_deref(),
            project.payer.as_deref(),
            resolver,
            deriver,
        );
        let Ok(Some(other)) = fingerprint else {
            continue;
        };
        if other.collides_with(current) {
            tracing::warn!(
                project = %project.name,
                vm = %other.vm_pubkey,
                "seed collision with registered project"
            );
            return Ok(Some((project, other)));
        }
    }
    Ok(None)
}

const PROBE_RETRIES: u32 = 6;

/// Probe `getAccountInfo` for an existing account before creation.
///
/// Retries with exponential backoff on 429 and transient 5xx responses.
pub fn probe_account_exists(rpc_url: &str, pubkey: &Pubkey) -> Result<bool, AccountsError> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "getAccountInfo",
        "params": [pubkey.to_string(), {"encoding": "base64", "commitment": "confirmed"}],
    });
    for attempt in 0..=PROBE_RETRIES {
        let response = ureq::post(rpc_url).send_json(body.clone());
        match response {
            Ok(resp) => {
                let payload: serde_json::Value = resp
                    .into_json()
                    .map_err(|e| AccountsError::input(format!("RPC transport error: {e}")))?;
                if let Some(err) = payload.get("error") {
                    return Err(AccountsError::input(format!("RPC error: {err}")));
                }
                let value = payload.pointer("/result/value");
                return Ok(value.is_some_and(|v| !v.is_null()));
            }
            Err(ureq::Error::Status(code, _))
                if matches!(code, 429 | 500 | 502 | 503 | 504) && attempt < PROBE_RETRIES =>
            {
                sleep(Duration::from_millis(250 * (1 << attempt)));
            }
            Err(ureq::Error::Status(code, resp)) => {
                return Err(AccountsError::input(format!(
                    "RPC HTTP error {code}: {}",
                    resp.status_text()
                )));
            }
            Err(err) => {
                if attempt < PROBE_RETRIES {
                    sleep(Duration::from_millis(250 * (1 << attempt)));
                    continue;
                }
                return Err(AccountsError::input(format!("RPC transport error: {err}")));
            }
        }
    }
    Err(AccountsError::input("RPC request failed after retries"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::SeededDeriver;
    use std::path::PathBuf;

    struct FixedResolver(Pubkey);

    impl KeypairResolver for FixedResolver {
        fn pubkey_for(&self, _: &Path) -> Result<Pubkey, AccountsError> {
            Ok(self.0)
        }
    }

    fn authority() -> Pubkey {
        Pubkey::new([7u8; 32])
    }

    fn write_seeded_accounts(dir: &Path, name: &str, seed: u64) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(
            &path,
            format!(
                r#"
                [cluster]
                rpc_url = "http://127.0.0.1:8899/"

                [vm]
                seed = {seed}
                authority = "{}"

                [[segments]]
                index = 1
                slot = 1
                kind = "weights"
                writable = false
            "#,
                authority()
            ),
        )
        .unwrap();
        path
    }

    #[test]
    fn test_normalize_rpc_url() {
        assert_eq!(normalize_rpc_url(Some("http://x/")), "http://x");
        assert_eq!(normalize_rpc_url(Some("  ")), "<unspecified-rpc>");
        assert_eq!(normalize_rpc_url(None), "<unspecified-rpc>");
    }

    #[test]
    fn test_fingerprint_requires_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.toml");
        std::fs::write(
            &path,
            format!(
                r#"
                [vm]
                pubkey = "{}"

                [[segments]]
                index = 1
                kind = "weights"
                pubkey = "{}"
            "#,
                Pubkey::new([1u8; 32]),
                Pubkey::new([2u8; 32])
            ),
        )
        .unwrap();
        let resolver = FixedResolver(authority());
        let fingerprint =
            fingerprint_from_accounts(&path, None, None, None, &resolver, &SeededDeriver)
                .unwrap();
        assert!(fingerprint.is_none());
    }

    #[test]
    fn test_collision_found_for_matching_tuple() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().join("projects.toml"));

        let other_dir = dir.path().join("other");
        std::fs::create_dir_all(&other_dir).unwrap();
        write_seeded_accounts(&other_dir, "frostbite-accounts.toml", 42);
        registry
            .register(ProjectEntry {
                name: "other".to_string(),
                path: other_dir.clone(),
                manifest: other_dir.join("frostbite-model.toml"),
                accounts: Some(PathBuf::from("frostbite-accounts.toml")),
                ..ProjectEntry::default()
            })
            .unwrap();

        let resolver = FixedResolver(authority());
        let mine = write_seeded_accounts(dir.path(), "mine.toml", 42);
        let current =
            fingerprint_from_accounts(&mine, None, None, None, &resolver, &SeededDeriver)
                .unwrap()
                .unwrap();
        let hit = find_seed_collision(&registry, &current, None, &resolver, &SeededDeriver)
            .unwrap();
        let (project, other_fp) = hit.expect("collision expected");
        assert_eq!(project.name, "other");
        assert_eq!(other_fp.vm_pubkey, current.vm_pubkey);

        // A different seed does not collide.
        let elsewhere = write_seeded_accounts(dir.path(), "fresh.toml", 43);
        let fresh =
            fingerprint_from_accounts(&elsewhere, None, None, None, &resolver, &SeededDeriver)
                .unwrap()
                .unwrap();
        assert!(find_seed_collision(&registry, &fresh, None, &resolver, &SeededDeriver)
            .unwrap()
            .is_none());
    }
}
