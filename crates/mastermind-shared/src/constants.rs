/// Application name
pub const APP_NAME: &str = "Masterminds";

/// Lamports in one SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Ed25519 public key size in bytes (Solana account address)
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes (Solana transaction signature)
pub const SIGNATURE_SIZE: usize = 64;

/// Fee charged to create a group, in SOL. Paid even for free groups.
pub const DEFAULT_CREATE_PRICE_SOL: f64 = 6.9;

/// Share of a join price routed to the platform address.
pub const DEFAULT_PLATFORM_FEE_FRACTION: f64 = 0.01;

/// Default Solana cluster the wallet authorizes against
pub const DEFAULT_CLUSTER: &str = "devnet";

/// Default Solana JSON-RPC endpoint
pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";

/// Default HTTP API port (backend)
pub const DEFAULT_HTTP_PORT: u16 = 3001;

/// Native system program id (base58)
pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";

/// Commitment level a payment signature must reach before it counts as proof
pub const PAYMENT_COMMITMENT: &str = "confirmed";

/// Domain separation prefix for signed group-deletion proofs
pub const DELETE_PROOF_CONTEXT: &str = "mastermind:delete-group:";

/// Username bounds
pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 20;

/// Maximum chat message length in characters
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Maximum group name length in characters
pub const MAX_GROUP_NAME_LEN: usize = 80;
