//! The accounts file: where a deployment's cluster, VM, and mapped
//! segment accounts are declared.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use toml::{Table, Value};

use crate::pubkey::{KeypairResolver, Pubkey};
use crate::AccountsError;

/// `[cluster]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterDecl {
    pub rpc_url: Option<String>,
    pub program_id: Option<String>,
    pub payer: Option<String>,
}

/// `[vm]` table. Either a seed (derived addresses) or an explicit
/// pubkey/keypair identifies the VM account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmDecl {
    pub seed: Option<u64>,
    pub pubkey: Option<String>,
    pub keypair: Option<String>,
    pub authority: Option<String>,
    pub authority_keypair: Option<String>,
    pub account_model: Option<String>,
    pub entry_pc: Option<u64>,
}

/// One `[[segments]]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
    pub index: i64,
    pub slot: i64,
    pub kind: String,
    pub pubkey: Option<String>,
    pub keypair: Option<String>,
    pub writable: bool,
    pub bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountsFile {
    pub cluster: ClusterDecl,
    pub vm: VmDecl,
    pub segments: Vec<SegmentEntry>,
}

fn get_str(table: &Table, key: &str) -> Option<String> {
    table.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_seed(value: &Value) -> Option<u64> {
    match value {
        Value::Integer(v) => u64::try_from(*v).ok(),
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                u64::from_str_radix(hex, 16).ok()
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

impl AccountsFile {
    pub fn from_table(doc: &Table) -> Self {
        let cluster = doc
            .get("cluster")
            .and_then(Value::as_table)
            .map(|c| ClusterDecl {
                rpc_url: get_str(c, "rpc_url"),
                program_id: get_str(c, "program_id"),
                payer: get_str(c, "payer"),
            })
            .unwrap_or_default();

        let vm = doc
            .get("vm")
            .and_then(Value::as_table)
            .map(|v| VmDecl {
                seed: v.get("seed").and_then(parse_seed),
                pubkey: get_str(v, "pubkey"),
                keypair: get_str(v, "keypair"),
                authority: get_str(v, "authority"),
                authority_keypair: get_str(v, "authority_keypair"),
                account_model: get_str(v, "account_model"),
                entry_pc: v
                    .get("entry_pc")
                    .and_then(Value::as_integer)
                    .and_then(|v| u64::try_from(v).ok()),
            })
            .unwrap_or_default();

        let mut segments: Vec<SegmentEntry> = Vec::new();
        if let Some(items) = doc.get("segments").and_then(Value::as_array) {
            for (position, item) in items.iter().enumerate() {
                let Some(item) = item.as_table() else {
                    continue;
                };
                let index = item
                    .get("index")
                    .and_then(Value::as_integer)
                    .unwrap_or(position as i64 + 1);
                segments.push(SegmentEntry {
                    index,
                    slot: item.get("slot").and_then(Value::as_integer).unwrap_or(index),
                    kind: get_str(item, "kind").unwrap_or_else(|| "custom".to_string()),
                    pubkey: get_str(item, "pubkey"),
                    keypair: get_str(item, "keypair"),
                    writable: item.get("writable").and_then(Value::as_bool).unwrap_or(false),
                    bytes: item
                        .get("bytes")
                        .and_then(Value::as_integer)
                        .and_then(|v| u64::try_from(v).ok()),
                });
            }
        }
        segments.sort_by_key(|s| s.index);

        AccountsFile {
            cluster,
            vm,
            segments,
        }
    }
}

/// Load and parse an accounts file.
pub fn load_accounts(path: &Path) -> Result<AccountsFile, AccountsError> {
    if !path.exists() {
        return Err(AccountsError::input(format!(
            "Accounts file not found: {}",
            path.display()
        )));
    }
    let text = std::fs::read_to_string(path).map_err(|source| AccountsError::io(path, source))?;
    let doc: Table = toml::from_str(&text)?;
    Ok(AccountsFile::from_table(&doc))
}

/// Resolve a path from the accounts file relative to its directory.
pub fn resolve_accounts_path(accounts_path: &Path, raw: &str) -> PathBuf {
    let candidate = if let Some(rest) = raw.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw))
    } else {
        PathBuf::from(raw)
    };
    if candidate.is_absolute() {
        return candidate;
    }
    accounts_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(candidate)
}

/// Resolve a declared pubkey, or fall back to its keypair file.
pub fn resolve_declared_pubkey(
    pubkey: Option<&str>,
    keypair: Option<&str>,
    accounts_path: &Path,
    resolver: &dyn KeypairResolver,
) -> Result<Option<Pubkey>, AccountsError> {
    if let Some(pubkey) = pubkey.filter(|p| !p.is_empty()) {
        return Pubkey::from_str(pubkey).map(Some);
    }
    if let Some(keypair) = keypair.filter(|k| !k.is_empty()) {
        let path = resolve_accounts_path(accounts_path, keypair);
        return resolver.pubkey_for(&path).map(Some);
    }
    Ok(None)
}

/// When both `vm.authority` and `vm.authority_keypair` are present, the
/// declared pubkey must match the keypair's.
pub fn validate_vm_authority_binding(
    accounts_path: &Path,
    vm: &VmDecl,
    resolver: &dyn KeypairResolver,
) -> Result<(), AccountsError> {
    let (Some(authority), Some(keypair)) = (
        vm.authority.as_deref().filter(|a| !a.is_empty()),
        vm.authority_keypair.as_deref().filter(|k| !k.is_empty()),
    ) else {
        return Ok(());
    };
    let path = resolve_accounts_path(accounts_path, keypair);
    let derived = resolver.pubkey_for(&path)?;
    if derived.to_string() != authority {
        return Err(AccountsError::input(
            "vm.authority does not match vm.authority_keypair pubkey; \
             update accounts file or signer path",
        ));
    }
    Ok(())
}

/// The authority that signs for derived accounts: `vm.authority`, the
/// `vm.authority_keypair` pubkey, or a caller-supplied signer path.
pub fn resolve_authority_pubkey(
    accounts: &AccountsFile,
    accounts_path: &Path,
    authority_keypair_override: Option<&Path>,
    resolver: &dyn KeypairResolver,
) -> Result<Option<Pubkey>, AccountsError> {
    if let Some(authority) = accounts.vm.authority.as_deref().filter(|a| !a.is_empty()) {
        return Pubkey::from_str(authority).map(Some);
    }
    if let Some(keypair) = accounts
        .vm
        .authority_keypair
        .as_deref()
        .filter(|k| !k.is_empty())
    {
        let path = resolve_accounts_path(accounts_path, keypair);
        return resolver.pubkey_for(&path).map(Some);
    }
    if let Some(path) = authority_keypair_override {
        return resolver.pubkey_for(path).map(Some);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accounts_file() {
        let doc: Table = toml::from_str(
            r#"
            [cluster]
            rpc_url = "http://127.0.0.1:8899"
            program_id = "FRsToriMLgDc1Ud53ngzHUZvCRoazCaGeGUuzkwoha7m"
            payer = "payer.json"

            [vm]
            seed = 42
            authority = "4vJ9JU1bJJE96FWSJKvHsmmFADCg4gpZQff4P3bkLKi"

            [[segments]]
            index = 1
            slot = 1
            kind = "weights"
            writable = false
            bytes = 4096

            [[segments]]
            index = 2
            slot = 2
            kind = "ram"
            writable = true
        "#,
        )
        .unwrap();
        let accounts = AccountsFile::from_table(&doc);
        assert_eq!(accounts.vm.seed, Some(42));
        assert_eq!(accounts.segments.len(), 2);
        assert_eq!(accounts.segments[0].kind, "weights");
        assert_eq!(accounts.segments[0].bytes, Some(4096));
        assert!(accounts.segments[1].writable);
    }

    #[test]
    fn test_segment_defaults() {
        let doc: Table = toml::from_str(
            r#"
            [[segments]]
            kind = "ram"
        "#,
        )
        .unwrap();
        let accounts = AccountsFile::from_table(&doc);
        assert_eq!(accounts.segments[0].index, 1);
        assert_eq!(accounts.segments[0].slot, 1);
        assert!(!accounts.segments[0].writable);
    }

    #[test]
    fn test_seed_accepts_hex_string() {
        let doc: Table = toml::from_str(
            r#"
            [vm]
            seed = "0x2a"
        "#,
        )
        .unwrap();
        assert_eq!(AccountsFile::from_table(&doc).vm.seed, Some(42));
    }

    #[test]
    fn test_missing_accounts_file() {
        let err = load_accounts(Path::new("/nonexistent/accounts.toml")).unwrap_err();
        assert!(err.to_string().contains("Accounts file not found"));
    }

    #[test]
    fn test_resolve_accounts_path_relative() {
        let resolved = resolve_accounts_path(Path::new("/proj/frostbite-accounts.toml"), "keys/id.json");
        assert_eq!(resolved, PathBuf::from("/proj/keys/id.json"));
        let absolute = resolve_accounts_path(Path::new("/proj/accounts.toml"), "/etc/id.json");
        assert_eq!(absolute, PathBuf::from("/etc/id.json"));
    }

    struct FixedResolver(Pubkey);

    impl KeypairResolver for FixedResolver {
        fn pubkey_for(&self, _: &Path) -> Result<Pubkey, AccountsError> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_authority_binding_mismatch() {
        let vm = VmDecl {
            authority: Some(Pubkey::new([1u8; 32]).to_string()),
            authority_keypair: Some("auth.json".to_string()),
            ..VmDecl::default()
        };
        let resolver = FixedResolver(Pubkey::new([2u8; 32]));
        let err = validate_vm_authority_binding(Path::new("/proj/accounts.toml"), &vm, &resolver)
            .unwrap_err();
        assert!(err.to_string().contains("vm.authority does not match"));

        let resolver = FixedResolver(Pubkey::new([1u8; 32]));
        validate_vm_authority_binding(Path::new("/proj/accounts.toml"), &vm, &resolver).unwrap();
    }
}
