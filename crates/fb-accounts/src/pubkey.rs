//! 32-byte account addresses with base58 text form.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use curve25519_dalek::edwards::CompressedEdwardsY;

use crate::AccountsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pubkey([u8; 32]);

impl Pubkey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Pubkey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether the bytes decompress to a valid ed25519 curve point.
    ///
    /// Program-derived addresses must be off-curve so no keypair can ever
    /// sign for them.
    pub fn is_on_curve(&self) -> bool {
        CompressedEdwardsY::from_slice(&self.0)
            .ok()
            .and_then(|p| p.decompress())
            .is_some()
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl FromStr for Pubkey {
    type Err = AccountsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| AccountsError::input(format!("invalid base58 pubkey: {s}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AccountsError::input(format!("pubkey must be 32 bytes: {s}")))?;
        Ok(Pubkey(bytes))
    }
}

/// Resolves a keypair file to its public key.
///
/// A trait seam so planning code can run in tests without key material on
/// disk.
pub trait KeypairResolver {
    fn pubkey_for(&self, keypair_path: &Path) -> Result<Pubkey, AccountsError>;
}

/// Reads Solana-style JSON keypairs: a 64-byte array whose trailing 32
/// bytes are the public key.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsKeypairResolver;

impl KeypairResolver for FsKeypairResolver {
    fn pubkey_for(&self, keypair_path: &Path) -> Result<Pubkey, AccountsError> {
        let text = std::fs::read_to_string(keypair_path)
            .map_err(|source| AccountsError::io(keypair_path, source))?;
        let bytes: Vec<u8> = serde_json::from_str(&text)
            .map_err(|_| AccountsError::input(format!("invalid keypair file: {}", keypair_path.display())))?;
        if bytes.len() != 64 {
            return Err(AccountsError::input(format!(
                "keypair file must contain 64 bytes: {}",
                keypair_path.display()
            )));
        }
        let mut pubkey = [0u8; 32];
        pubkey.copy_from_slice(&bytes[32..]);
        Ok(Pubkey(pubkey))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base58_round_trip() {
        let key = Pubkey::new([7u8; 32]);
        let parsed: Pubkey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!("abc".parse::<Pubkey>().is_err());
    }

    #[test]
    fn test_system_program_is_on_curve_check() {
        // The identity point (all zeros compresses to y=0... not valid);
        // a known on-curve key: the ed25519 base point compressed.
        let base = Pubkey::new([
            0x58, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66,
            0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66,
            0x66, 0x66, 0x66, 0x66,
        ]);
        assert!(base.is_on_curve());
    }

    #[test]
    fn test_keypair_resolver_reads_trailing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id.json");
        let mut bytes = vec![1u8; 32];
        bytes.extend(vec![9u8; 32]);
        std::fs::write(&path, serde_json::to_string(&bytes).unwrap()).unwrap();
        let pubkey = FsKeypairResolver.pubkey_for(&path).unwrap();
        assert_eq!(pubkey, Pubkey::new([9u8; 32]));
    }

    #[test]
    fn test_keypair_resolver_rejects_short_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(FsKeypairResolver.pubkey_for(&path).is_err());
    }
}
