use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn fbkit() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("fbkit"))
}

fn write_file(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

/// A complete vector manifest with a linear q8 weights layout.
fn linear_manifest(input_dim: usize, output_dim: usize) -> String {
    format!(
        r#"
[model]
id = "demo-model"
version = "0.1.0"
arch = "rv64imac"
endianness = "little"
vaddr_bits = 32

[abi]
entry = 4096
control_offset = 0
control_size = 64
input_offset = 1024
input_max = 4096
output_offset = 8192
output_max = 1024
scratch_min = 262144
alignment = 4
reserved_tail = 32

[schema]
type = "vector"

[schema.vector]
input_dtype = "i32"
input_shape = [{input_dim}]
output_dtype = "i32"
output_shape = [{output_dim}]

[[segments]]
index = 0
kind = "scratch"
access = "rw"

[[segments]]
index = 1
kind = "weights"
access = "ro"
source = "weights:main"

[weights]
layout = "linear_q8"
quantization = "q8"
dtype = "i8"
header_format = "none"

[[weights.blobs]]
name = "main"
file = "weights.bin"
hash = "sha256:0000000000000000000000000000000000000000000000000000000000000000"
size_bytes = 100

[weights.scales]
w_scale_q16 = 65536

[limits]
max_instructions = 1000000
cu_budget = 200000
"#
    )
}

/// A 64-byte keypair file whose pubkey is the trailing 32 bytes.
fn write_keypair(dir: &Path, name: &str, pubkey_byte: u8) -> PathBuf {
    let mut bytes = vec![1u8; 32];
    bytes.extend(std::iter::repeat(pubkey_byte).take(32));
    let json = serde_json::to_string(&bytes).unwrap();
    write_file(dir, name, &json)
}

fn seeded_accounts(keypair: &Path, seed: u64, weights_slot: u8) -> String {
    format!(
        r#"
[cluster]
rpc_url = "http://127.0.0.1:8899"

[vm]
seed = {seed}
authority_keypair = "{}"

[[segments]]
index = 1
slot = {weights_slot}
kind = "weights"
writable = false

[[segments]]
index = 2
slot = 2
kind = "ram"
writable = true
"#,
        keypair.display()
    )
}

#[test]
fn validate_accepts_complete_manifest() {
    let dir = TempDir::new().unwrap();
    let manifest = write_file(dir.path(), "frostbite-model.toml", &linear_manifest(8, 2));
    fbkit()
        .arg("validate")
        .arg(&manifest)
        .assert()
        .success()
        .stdout(predicate::str::contains("OK:"));
}

#[test]
fn validate_collects_every_violation() {
    let dir = TempDir::new().unwrap();
    let broken = linear_manifest(8, 2)
        .replace("version = \"0.1.0\"", "version = \"not-semver\"")
        .replace("[limits]\nmax_instructions = 1000000\ncu_budget = 200000", "");
    let manifest = write_file(dir.path(), "frostbite-model.toml", &broken);
    fbkit()
        .arg("validate")
        .arg(&manifest)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Missing required table: [limits]"))
        .stderr(predicate::str::contains("version"));
}

#[test]
fn schema_hash_is_stable_across_runs() {
    let dir = TempDir::new().unwrap();
    let manifest = write_file(dir.path(), "frostbite-model.toml", &linear_manifest(8, 2));
    let first = fbkit()
        .arg("schema-hash")
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .success()
        .stdout(predicate::str::contains("schema_hash32: 0x"))
        .get_output()
        .stdout
        .clone();
    let second = fbkit()
        .arg("schema-hash")
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(first, second);
}

#[test]
fn convert_linear_reaches_full_scale_and_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let manifest = write_file(dir.path(), "frostbite-model.toml", &linear_manifest(4, 1));
    let input = write_file(
        dir.path(),
        "export.json",
        r#"{"w": [12.7, -6.35, 3.175, 0.0], "b": [0.5]}"#,
    );

    fbkit()
        .arg("convert")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--input")
        .arg(&input)
        .arg("--scale-q16")
        .arg("65536")
        .assert()
        .success()
        .stdout(predicate::str::contains("w_scale_q16 = 65536"));

    // scale_real = 1.0, so weights round directly to i8.
    let weights = dir.path().join("weights.bin");
    let blob = fs::read(&weights).unwrap();
    let mut expected = vec![13u8, 0xFA, 3, 0];
    expected.extend_from_slice(&32768i32.to_le_bytes());
    assert_eq!(blob, expected);

    let patched = fs::read_to_string(&manifest).unwrap();
    assert!(patched.contains("w_scale_q16 = 65536"));

    // Re-running reproduces the blob byte for byte.
    fbkit()
        .arg("convert")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--input")
        .arg(&input)
        .arg("--scale-q16")
        .arg("65536")
        .assert()
        .success();
    assert_eq!(fs::read(&weights).unwrap(), blob);
}

#[test]
fn pack_refreshes_blob_hashes() {
    let dir = TempDir::new().unwrap();
    let manifest = write_file(dir.path(), "frostbite-model.toml", &linear_manifest(4, 1));
    fs::write(dir.path().join("weights.bin"), b"abc").unwrap();

    fbkit()
        .arg("pack")
        .arg(&manifest)
        .arg("--update-size")
        .assert()
        .success()
        .stdout(predicate::str::contains("main: sha256:"));

    let patched = fs::read_to_string(&manifest).unwrap();
    assert!(patched.contains(
        "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    ));
    assert!(patched.contains("size_bytes = 3"));
}

#[test]
fn pack_check_leaves_manifest_untouched() {
    let dir = TempDir::new().unwrap();
    let manifest = write_file(dir.path(), "frostbite-model.toml", &linear_manifest(4, 1));
    fs::write(dir.path().join("weights.bin"), b"abc").unwrap();
    let before = fs::read_to_string(&manifest).unwrap();

    fbkit()
        .arg("pack")
        .arg(&manifest)
        .arg("--check")
        .assert()
        .success();
    assert_eq!(fs::read_to_string(&manifest).unwrap(), before);
}

#[test]
fn chunk_splits_weights_file() {
    let dir = TempDir::new().unwrap();
    let file = write_file(dir.path(), "weights.bin", "0123456789");
    let out_dir = dir.path().join("chunks");

    fbkit()
        .arg("chunk")
        .arg("--file")
        .arg(&file)
        .arg("--chunk-size")
        .arg("4")
        .arg("--out-dir")
        .arg(&out_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 3 chunk(s)"));

    assert_eq!(fs::read(out_dir.join("weights_chunk0.bin")).unwrap(), b"0123");
    assert_eq!(fs::read(out_dir.join("weights_chunk1.bin")).unwrap(), b"4567");
    assert_eq!(fs::read(out_dir.join("weights_chunk2.bin")).unwrap(), b"89");
}

#[test]
fn input_with_crc_produces_framed_payload() {
    let dir = TempDir::new().unwrap();
    let manifest = write_file(dir.path(), "frostbite-model.toml", &linear_manifest(25, 1));
    let values: Vec<String> = (0..25).map(|v| v.to_string()).collect();
    let data = write_file(dir.path(), "payload.json", &format!("[{}]", values.join(",")));
    let out = dir.path().join("input.bin");

    fbkit()
        .arg("input")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--data")
        .arg(&data)
        .arg("--out")
        .arg(&out)
        .arg("--header")
        .arg("--crc")
        .assert()
        .success();

    // 32-byte FBH1 header plus 25 i32 values.
    let bytes = fs::read(&out).unwrap();
    assert_eq!(bytes.len(), 132);
    assert_eq!(&bytes[0..4], b"FBH1");
    let flags = u16::from_le_bytes(bytes[6..8].try_into().unwrap());
    assert_eq!(flags & 1, 1, "crc flag set");
    let header_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    assert_eq!(header_len, 32);
    let payload_len = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
    assert_eq!(payload_len, 100);
    let crc = u32::from_le_bytes(bytes[20..24].try_into().unwrap());
    assert_ne!(crc, 0);
}

#[test]
fn output_decodes_raw_bytes() {
    let dir = TempDir::new().unwrap();
    let manifest = write_file(dir.path(), "frostbite-model.toml", &linear_manifest(4, 2));
    let mut raw = Vec::new();
    raw.extend_from_slice(&7i32.to_le_bytes());
    raw.extend_from_slice(&(-3i32).to_le_bytes());
    let bin = dir.path().join("out.bin");
    fs::write(&bin, &raw).unwrap();

    fbkit()
        .arg("output")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--bin")
        .arg(&bin)
        .assert()
        .success()
        .stdout(predicate::str::contains("output_format: i32"))
        .stdout(predicate::str::contains("[7,-3]"));
}

#[test]
fn guest_config_renders_constants() {
    let dir = TempDir::new().unwrap();
    let manifest = write_file(dir.path(), "frostbite-model.toml", &linear_manifest(8, 2));
    let guest_dir = dir.path().join("guest");

    fbkit()
        .arg("guest-config")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--guest")
        .arg(&guest_dir)
        .assert()
        .success();

    let config = fs::read_to_string(guest_dir.join("src/config.rs")).unwrap();
    assert!(config.contains("pub const INPUT_DIM: usize = 8;"));
    assert!(config.contains("pub const OUTPUT_DIM: usize = 2;"));
    assert!(config.contains("pub const EXPECTED_SCHEMA_ID: u32 = 0;"));
    assert!(config.contains("EXPECTED_SCHEMA_HASH"));
}

#[test]
fn accounts_derive_is_stable() {
    let dir = TempDir::new().unwrap();
    let keypair = write_keypair(dir.path(), "id.json", 7);
    let accounts = write_file(
        dir.path(),
        "frostbite-accounts.toml",
        &seeded_accounts(&keypair, 7, 1),
    );

    let first = fbkit()
        .arg("accounts")
        .arg("derive")
        .arg("--accounts")
        .arg(&accounts)
        .assert()
        .success()
        .stdout(predicate::str::contains("vm_seed: 7"))
        .stdout(predicate::str::contains("ro:"))
        .stdout(predicate::str::contains("rw:"))
        .get_output()
        .stdout
        .clone();
    let second = fbkit()
        .arg("accounts")
        .arg("derive")
        .arg("--accounts")
        .arg(&accounts)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(first, second);
}

#[test]
fn accounts_derive_rejects_weights_outside_slot_one() {
    let dir = TempDir::new().unwrap();
    let keypair = write_keypair(dir.path(), "id.json", 7);
    let body = format!(
        r#"
[vm]
seed = 7
authority_keypair = "{}"

[[segments]]
index = 1
slot = 2
kind = "weights"
writable = false
"#,
        keypair.display()
    );
    let accounts = write_file(dir.path(), "frostbite-accounts.toml", &body);

    fbkit()
        .arg("accounts")
        .arg("derive")
        .arg("--accounts")
        .arg(&accounts)
        .assert()
        .failure()
        .stderr(predicate::str::contains("PDA mode supports weights only at slot 1"));
}

#[test]
fn accounts_check_flags_seed_collisions() {
    let dir = TempDir::new().unwrap();
    let keypair = write_keypair(dir.path(), "id.json", 9);

    let other_dir = dir.path().join("other-project");
    fs::create_dir_all(&other_dir).unwrap();
    write_file(
        &other_dir,
        "frostbite-accounts.toml",
        &seeded_accounts(&keypair, 42, 1),
    );

    let registry = write_file(
        dir.path(),
        "projects.toml",
        &format!(
            r#"
[[projects]]
name = "other"
path = "{}"
manifest = "{}"
accounts = "frostbite-accounts.toml"
"#,
            other_dir.display(),
            other_dir.join("frostbite-model.toml").display()
        ),
    );

    let mine_dir = dir.path().join("mine");
    fs::create_dir_all(&mine_dir).unwrap();
    let mine = write_file(
        &mine_dir,
        "frostbite-accounts.toml",
        &seeded_accounts(&keypair, 42, 1),
    );

    fbkit()
        .arg("accounts")
        .arg("check")
        .arg("--accounts")
        .arg(&mine)
        .arg("--registry")
        .arg(&registry)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Seed collision"))
        .stderr(predicate::str::contains("other"));

    // A different seed passes.
    let fresh = write_file(
        &mine_dir,
        "fresh-accounts.toml",
        &seeded_accounts(&keypair, 43, 1),
    );
    fbkit()
        .arg("accounts")
        .arg("check")
        .arg("--accounts")
        .arg(&fresh)
        .arg("--registry")
        .arg(&registry)
        .assert()
        .success()
        .stdout(predicate::str::contains("No seed collisions"));
}
