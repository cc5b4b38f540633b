use clap::Parser;

/// hdscout — HD-wallet chain discovery against a JSON-RPC address-index
/// backend.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Backend JSON-RPC URL.
    #[arg(long, default_value = "http://127.0.0.1:3005", env = "HDSCOUT_BACKEND_URL")]
    pub backend_url: String,

    /// Backend username (optional).
    #[arg(long, env = "HDSCOUT_BACKEND_USER")]
    pub backend_user: Option<String>,

    /// Backend password (optional).
    #[arg(long, env = "HDSCOUT_BACKEND_PASS")]
    pub backend_pass: Option<String>,

    /// Account-level extended public key. Chains 0 (external) and 1
    /// (change) below it are discovered.
    #[arg(long, env = "HDSCOUT_XPUB")]
    pub xpub: String,

    /// Address version for base58check encoding, network-dependent
    /// (0 is Bitcoin mainnet P2PKH, 111 testnet).
    #[arg(long, default_value = "0")]
    pub address_version: u32,

    /// Trailing unused addresses required before a chain settles.
    #[arg(long, default_value = "20")]
    pub gap_length: u32,

    /// Addresses derived per batch.
    #[arg(long, default_value = "20")]
    pub chunk_size: u32,

    /// Cap outbound backend requests per second.
    #[arg(long)]
    pub requests_per_second: Option<u32>,

    /// JSON file to restore state from and persist state to.
    #[arg(long)]
    pub state_file: Option<std::path::PathBuf>,

    /// Keep following live notifications after the initial scan settles;
    /// stop with ctrl-c.
    #[arg(long)]
    pub watch: bool,
}
