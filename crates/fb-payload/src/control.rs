//! FBM1 control block: the fixed structure at the head of scratch memory
//! that tells a guest where its input and output windows live.

use fb_manifest::constants::{ABI_VERSION, FBM1_MAGIC, MIN_CONTROL_SIZE};

use crate::PayloadError;

/// Packed size of the populated fields; the rest of the block is zero.
const CONTROL_FIELDS_LEN: usize = 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlock {
    pub magic: u32,
    pub abi_version: u32,
    pub flags: u32,
    pub status: u32,
    pub input_ptr: u32,
    pub input_len: u32,
    pub output_ptr: u32,
    pub output_len: u32,
    pub scratch_ptr: u32,
    pub scratch_len: u32,
    pub user_ptr: u32,
    pub user_len: u32,
    pub reserved0: u64,
}

fn fit_u32(value: u64, name: &str) -> Result<u32, PayloadError> {
    u32::try_from(value).map_err(|_| PayloadError::input(format!("{name} must fit in u32")))
}

/// Build a zero-padded control block of `control_size` bytes.
pub fn build_control_block(
    control_size: u64,
    input_ptr: u64,
    input_len: u64,
    output_ptr: u64,
    output_len: u64,
) -> Result<Vec<u8>, PayloadError> {
    if control_size < MIN_CONTROL_SIZE as u64 {
        return Err(PayloadError::input("abi.control_size must be >= 64"));
    }
    let words = [
        FBM1_MAGIC,
        ABI_VERSION,
        0, // flags
        0, // status
        fit_u32(input_ptr, "input_ptr")?,
        fit_u32(input_len, "input_len")?,
        fit_u32(output_ptr, "output_ptr")?,
        fit_u32(output_len, "output_len")?,
        0, // scratch_ptr
        0, // scratch_len
        0, // user_ptr
        0, // user_len
    ];
    let mut buf = vec![0u8; control_size as usize];
    for (i, word) in words.iter().enumerate() {
        buf[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    // reserved0 u64 follows the words and stays zero.
    Ok(buf)
}

/// Decode the control block at `control_offset` within scratch bytes.
pub fn parse_control_block(scratch: &[u8], control_offset: usize) -> Result<ControlBlock, PayloadError> {
    let end = control_offset
        .checked_add(MIN_CONTROL_SIZE as usize)
        .filter(|&end| end <= scratch.len())
        .ok_or_else(|| PayloadError::input("control block out of bounds"))?;
    let block = &scratch[control_offset..end];
    let word = |i: usize| u32::from_le_bytes(block[i * 4..i * 4 + 4].try_into().unwrap());
    Ok(ControlBlock {
        magic: word(0),
        abi_version: word(1),
        flags: word(2),
        status: word(3),
        input_ptr: word(4),
        input_len: word(5),
        output_ptr: word(6),
        output_len: word(7),
        scratch_ptr: word(8),
        scratch_len: word(9),
        user_ptr: word(10),
        user_len: word(11),
        reserved0: u64::from_le_bytes(block[48..CONTROL_FIELDS_LEN].try_into().unwrap()),
    })
}
