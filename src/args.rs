use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use fb_payload::SchemaHashMode;

#[derive(Debug, Parser)]
#[command(name = "fbkit", author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate a manifest and report every violation.
    Validate(ValidateArgs),
    /// Compute the canonical schema hash.
    SchemaHash(SchemaHashArgs),
    /// Convert weights to the Frostbite layout.
    Convert(Box<ConvertArgs>),
    /// Compute blob hashes and update the manifest.
    Pack(PackArgs),
    /// Chunk weights for upload.
    Chunk(ChunkArgs),
    /// Pack an input payload for a model.
    Input(InputArgs),
    /// Decode model output bytes.
    Output(OutputArgs),
    /// Generate guest config constants.
    GuestConfig(GuestConfigArgs),
    /// Inspect and derive account mappings.
    Accounts(AccountsArgs),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum HashModeArg {
    Auto,
    Manifest,
    None,
}

impl From<HashModeArg> for SchemaHashMode {
    fn from(mode: HashModeArg) -> Self {
        match mode {
            HashModeArg::Auto => SchemaHashMode::Auto,
            HashModeArg::Manifest => SchemaHashMode::Manifest,
            HashModeArg::None => SchemaHashMode::None,
        }
    }
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to frostbite-model.toml.
    pub manifest: PathBuf,

    /// Emit violations as JSON lines.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SchemaHashArgs {
    /// Path to frostbite-model.toml.
    #[arg(long)]
    pub manifest: PathBuf,

    /// Write schema_hash32 into [schema.custom].
    #[arg(long)]
    pub update_manifest: bool,
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Path to frostbite-model.toml.
    #[arg(long)]
    pub manifest: PathBuf,

    /// Path to input tensors (.json).
    #[arg(long)]
    pub input: PathBuf,

    /// Force a template instead of inferring from weights.layout.
    #[arg(long)]
    pub template: Option<String>,

    /// Output weights.bin path.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Override linear scale.
    #[arg(long)]
    pub scale_q16: Option<i64>,

    /// Override MLP W1 scale.
    #[arg(long)]
    pub w1_scale_q16: Option<i64>,

    /// Override MLP W2 scale.
    #[arg(long)]
    pub w2_scale_q16: Option<i64>,

    /// Override MLP3 W3 scale.
    #[arg(long)]
    pub w3_scale_q16: Option<i64>,

    /// Override MLP3 W4 scale.
    #[arg(long)]
    pub w4_scale_q16: Option<i64>,

    /// Override input dimension.
    #[arg(long)]
    pub input_dim: Option<usize>,

    /// Override output dimension.
    #[arg(long)]
    pub output_dim: Option<usize>,

    /// Override hidden dimension (MLP).
    #[arg(long)]
    pub hidden_dim: Option<usize>,

    /// Hidden dimension 1 (MLP2/MLP3).
    #[arg(long)]
    pub hidden_dim1: Option<usize>,

    /// Hidden dimension 2 (MLP2/MLP3).
    #[arg(long)]
    pub hidden_dim2: Option<usize>,

    /// Hidden dimension 3 (MLP3).
    #[arg(long)]
    pub hidden_dim3: Option<usize>,

    /// Two-tower input dim for tower A.
    #[arg(long)]
    pub input_dim_a: Option<usize>,

    /// Two-tower input dim for tower B.
    #[arg(long)]
    pub input_dim_b: Option<usize>,

    /// Two-tower embedding dimension.
    #[arg(long)]
    pub embed_dim: Option<usize>,

    /// Tree count (GBDT).
    #[arg(long)]
    pub tree_count: Option<usize>,

    /// Nodes per tree.
    #[arg(long)]
    pub tree_node_count: Option<usize>,

    /// Omit bias terms.
    #[arg(long)]
    pub no_bias: bool,

    /// Map input keys (dst=src), e.g. --keymap w=linear.weight.
    #[arg(long)]
    pub keymap: Vec<String>,

    /// Do not update weights.scales in the manifest.
    #[arg(long)]
    pub no_update_manifest: bool,

    /// Run pack to update hash/size after conversion.
    #[arg(long)]
    pub pack: bool,
}

#[derive(Debug, Args)]
pub struct PackArgs {
    /// Path to frostbite-model.toml.
    pub manifest: PathBuf,

    /// Update size_bytes from file sizes.
    #[arg(long)]
    pub update_size: bool,

    /// Print updates without writing the manifest.
    #[arg(long)]
    pub check: bool,

    /// Create missing weights files using size_bytes.
    #[arg(long)]
    pub create_missing: bool,
}

#[derive(Debug, Args)]
pub struct ChunkArgs {
    /// Path to frostbite-model.toml.
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Weights file to chunk (bypasses the manifest).
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Override chunk size in bytes.
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Output directory for chunks.
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Path to frostbite-model.toml.
    #[arg(long)]
    pub manifest: PathBuf,

    /// JSON payload file (or - for stdin).
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Raw input binary (custom schema).
    #[arg(long)]
    pub input_bin: Option<PathBuf>,

    /// Output payload path (default: input.bin next to the manifest).
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Force the FBH1 header.
    #[arg(long)]
    pub header: bool,

    /// Disable the FBH1 header.
    #[arg(long)]
    pub no_header: bool,

    /// Include CRC32 in the FBH1 header.
    #[arg(long)]
    pub crc: bool,

    /// Schema hash mode for the FBH1 header.
    #[arg(long, value_enum, default_value_t = HashModeArg::Auto)]
    pub schema_hash: HashModeArg,
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Path to frostbite-model.toml.
    #[arg(long)]
    pub manifest: PathBuf,

    /// File holding the raw output region bytes.
    #[arg(long, conflicts_with = "scratch")]
    pub bin: Option<PathBuf>,

    /// File holding a scratch image; the output region is located via the
    /// control block and abi offsets.
    #[arg(long)]
    pub scratch: Option<PathBuf>,

    /// Output format (auto derives it from the schema).
    #[arg(long, default_value = "auto")]
    pub format: String,

    /// Use abi.output_max when the control block reports output_len 0.
    #[arg(long)]
    pub use_max: bool,

    /// Write the raw output bytes to a file.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct GuestConfigArgs {
    /// Path to frostbite-model.toml.
    #[arg(long)]
    pub manifest: PathBuf,

    /// Guest crate directory (default: ./guest next to the manifest).
    #[arg(long)]
    pub guest: Option<PathBuf>,

    /// Force a template instead of inferring from weights.layout.
    #[arg(long)]
    pub template: Option<String>,

    /// Schema hash mode for EXPECTED_SCHEMA_HASH.
    #[arg(long, value_enum, default_value_t = HashModeArg::Auto)]
    pub schema_hash: HashModeArg,
}

#[derive(Debug, Args)]
pub struct AccountsArgs {
    #[command(subcommand)]
    pub command: AccountsCommand,
}

#[derive(Debug, Subcommand)]
pub enum AccountsCommand {
    /// Derive every mapped account address.
    Derive(AccountsDeriveArgs),
    /// Print the resolved account mapping.
    Show(AccountsShowArgs),
    /// Run invariant and seed-collision checks.
    Check(AccountsCheckArgs),
}

#[derive(Debug, Args)]
pub struct AccountsDeriveArgs {
    /// Accounts file (frostbite-accounts.toml).
    #[arg(long)]
    pub accounts: PathBuf,

    /// Override the program id.
    #[arg(long)]
    pub program_id: Option<String>,

    /// Override the payer keypair path.
    #[arg(long)]
    pub payer: Option<String>,

    /// Use the legacy bump-search derivation.
    #[arg(long)]
    pub legacy: bool,
}

#[derive(Debug, Args)]
pub struct AccountsShowArgs {
    /// Accounts file (frostbite-accounts.toml).
    #[arg(long)]
    pub accounts: PathBuf,

    /// Override the program id.
    #[arg(long)]
    pub program_id: Option<String>,

    /// Override the payer keypair path.
    #[arg(long)]
    pub payer: Option<String>,
}

#[derive(Debug, Args)]
pub struct AccountsCheckArgs {
    /// Accounts file (frostbite-accounts.toml).
    #[arg(long)]
    pub accounts: PathBuf,

    /// Override the program id.
    #[arg(long)]
    pub program_id: Option<String>,

    /// Override the payer keypair path.
    #[arg(long)]
    pub payer: Option<String>,

    /// Project registry path (default: ~/.frostbite/projects.toml).
    #[arg(long)]
    pub registry: Option<PathBuf>,

    /// Override the RPC URL used for fingerprinting and probing.
    #[arg(long)]
    pub rpc_url: Option<String>,

    /// Probe the cluster for an existing VM account.
    #[arg(long)]
    pub probe: bool,
}
