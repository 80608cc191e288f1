pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SECRET_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

/// Sender recorded on reward transactions.
pub const MINING_SENDER: &str = "MINING";
pub const MINING_REWARD: u64 = 10;
/// Leading zero bits required of a proof hash (two zero hex digits).
pub const POW_TARGET_DIFFICULTY: u32 = 8;
pub const GENESIS_PROOF: u64 = 100;
