//! Pure address derivation.
//!
//! Two strategies exist behind [`AddressDeriver`]: the seeded scheme used
//! by current deployments, and the legacy bump-search kept for accounts
//! created before seeded mode existed.

use sha2::{Digest, Sha256};

use crate::pubkey::Pubkey;
use crate::DerivationError;

const SEEDED_VM_PREFIX: &str = "fbv1:vm:";
const SEEDED_SEG_PREFIX: &str = "fbv1:sg:";
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Mapped segment account kinds and their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Weights,
    Ram,
}

impl SegmentKind {
    pub fn code(&self) -> u8 {
        match self {
            SegmentKind::Weights => 1,
            SegmentKind::Ram => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Weights => "weights",
            SegmentKind::Ram => "ram",
        }
    }

    /// Accepts the kind name or its numeric code.
    pub fn parse(raw: &str) -> Option<SegmentKind> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "weights" => Some(SegmentKind::Weights),
            "2" | "ram" => Some(SegmentKind::Ram),
            _ => None,
        }
    }
}

pub fn vm_seed_string(vm_seed: u64) -> String {
    format!("{SEEDED_VM_PREFIX}{vm_seed:016x}")
}

pub fn segment_seed_string(vm_seed: u64, kind: SegmentKind, slot: u8) -> String {
    format!("{SEEDED_SEG_PREFIX}{vm_seed:016x}:{:02x}{slot:02x}", kind.code())
}

/// Derives mapped-account addresses from `(program_id, authority, seed)`.
pub trait AddressDeriver {
    fn derive_vm(
        &self,
        program_id: &Pubkey,
        authority: &Pubkey,
        vm_seed: u64,
    ) -> Result<Pubkey, DerivationError>;

    fn derive_segment(
        &self,
        program_id: &Pubkey,
        authority: &Pubkey,
        vm_seed: u64,
        kind: SegmentKind,
        slot: u8,
    ) -> Result<Pubkey, DerivationError>;
}

/// `create_with_seed` scheme: `sha256(authority ‖ seed_string ‖ program_id)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SeededDeriver;

impl SeededDeriver {
    pub fn derive_with_seed(
        &self,
        authority: &Pubkey,
        seed: &str,
        program_id: &Pubkey,
    ) -> Result<Pubkey, DerivationError> {
        if seed.len() > 32 {
            return Err(DerivationError::SeedTooLong(seed.to_string()));
        }
        let mut hasher = Sha256::new();
        hasher.update(authority.as_bytes());
        hasher.update(seed.as_bytes());
        hasher.update(program_id.as_bytes());
        Ok(Pubkey::new(hasher.finalize().into()))
    }
}

impl AddressDeriver for SeededDeriver {
    fn derive_vm(
        &self,
        program_id: &Pubkey,
        authority: &Pubkey,
        vm_seed: u64,
    ) -> Result<Pubkey, DerivationError> {
        self.derive_with_seed(authority, &vm_seed_string(vm_seed), program_id)
    }

    fn derive_segment(
        &self,
        program_id: &Pubkey,
        authority: &Pubkey,
        vm_seed: u64,
        kind: SegmentKind,
        slot: u8,
    ) -> Result<Pubkey, DerivationError> {
        self.derive_with_seed(authority, &segment_seed_string(vm_seed, kind, slot), program_id)
    }
}

/// Bump-search scheme: highest bump whose digest lands off-curve wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyDeriver;

impl LegacyDeriver {
    pub fn find_program_address(
        &self,
        authority: &Pubkey,
        seed: &str,
        program_id: &Pubkey,
    ) -> Result<(Pubkey, u8), DerivationError> {
        if seed.len() > 32 {
            return Err(DerivationError::SeedTooLong(seed.to_string()));
        }
        for bump in (0..=255u8).rev() {
            let mut hasher = Sha256::new();
            hasher.update(authority.as_bytes());
            hasher.update(seed.as_bytes());
            hasher.update([bump]);
            hasher.update(program_id.as_bytes());
            hasher.update(PDA_MARKER);
            let candidate = Pubkey::new(hasher.finalize().into());
            if !candidate.is_on_curve() {
                return Ok((candidate, bump));
            }
        }
        Err(DerivationError::BumpExhausted)
    }
}

impl AddressDeriver for LegacyDeriver {
    fn derive_vm(
        &self,
        program_id: &Pubkey,
        authority: &Pubkey,
        vm_seed: u64,
    ) -> Result<Pubkey, DerivationError> {
        self.find_program_address(authority, &vm_seed_string(vm_seed), program_id)
            .map(|(pubkey, _)| pubkey)
    }

    fn derive_segment(
        &self,
        program_id: &Pubkey,
        authority: &Pubkey,
        vm_seed: u64,
        kind: SegmentKind,
        slot: u8,
    ) -> Result<Pubkey, DerivationError> {
        self.find_program_address(authority, &segment_seed_string(vm_seed, kind, slot), program_id)
            .map(|(pubkey, _)| pubkey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> Pubkey {
        Pubkey::new([3u8; 32])
    }

    fn program() -> Pubkey {
        Pubkey::new([5u8; 32])
    }

    #[test]
    fn test_seed_strings() {
        assert_eq!(vm_seed_string(7), "fbv1:vm:0000000000000007");
        assert_eq!(
            segment_seed_string(7, SegmentKind::Weights, 1),
            "fbv1:sg:0000000000000007:0101"
        );
        assert_eq!(
            segment_seed_string(0xAB, SegmentKind::Ram, 15),
            "fbv1:sg:00000000000000ab:020f"
        );
        assert!(vm_seed_string(u64::MAX).len() <= 32);
        assert!(segment_seed_string(u64::MAX, SegmentKind::Ram, 255).len() <= 32);
    }

    #[test]
    fn test_seeded_derivation_is_pure() {
        let deriver = SeededDeriver;
        let a = deriver.derive_vm(&program(), &authority(), 42).unwrap();
        let b = deriver.derive_vm(&program(), &authority(), 42).unwrap();
        assert_eq!(a, b);
        let other_seed = deriver.derive_vm(&program(), &authority(), 43).unwrap();
        assert_ne!(a, other_seed);
        let other_authority = deriver
            .derive_vm(&program(), &Pubkey::new([4u8; 32]), 42)
            .unwrap();
        assert_ne!(a, other_authority);
    }

    #[test]
    fn test_segment_derivation_varies_by_kind_and_slot() {
        let deriver = SeededDeriver;
        let weights = deriver
            .derive_segment(&program(), &authority(), 42, SegmentKind::Weights, 1)
            .unwrap();
        let ram2 = deriver
            .derive_segment(&program(), &authority(), 42, SegmentKind::Ram, 2)
            .unwrap();
        let ram3 = deriver
            .derive_segment(&program(), &authority(), 42, SegmentKind::Ram, 3)
            .unwrap();
        assert_ne!(weights, ram2);
        assert_ne!(ram2, ram3);
    }

    #[test]
    fn test_seed_length_guard() {
        let err = SeededDeriver
            .derive_with_seed(&authority(), &"x".repeat(33), &program())
            .unwrap_err();
        assert!(matches!(err, DerivationError::SeedTooLong(_)));
    }

    #[test]
    fn test_legacy_bump_search_lands_off_curve() {
        let (address, bump) = LegacyDeriver
            .find_program_address(&authority(), "legacy:vm", &program())
            .unwrap();
        assert!(!address.is_on_curve());
        let (again, bump_again) = LegacyDeriver
            .find_program_address(&authority(), "legacy:vm", &program())
            .unwrap();
        assert_eq!(address, again);
        assert_eq!(bump, bump_again);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(SegmentKind::parse("weights"), Some(SegmentKind::Weights));
        assert_eq!(SegmentKind::parse(" RAM "), Some(SegmentKind::Ram));
        assert_eq!(SegmentKind::parse("2"), Some(SegmentKind::Ram));
        assert_eq!(SegmentKind::parse("scratch"), None);
    }
}
