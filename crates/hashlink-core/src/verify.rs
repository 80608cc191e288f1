use crate::constants::{MINING_REWARD, POW_TARGET_DIFFICULTY};
use crate::pow::valid_proof;
use crate::wallet::verify_detached;
use crate::{hash_block, Amount, Balance, Block, Transaction};
use tracing::debug;

/// Rules a chain is checked against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsensusParams {
    pub difficulty: u32,
    pub mining_reward: Amount,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            difficulty: POW_TARGET_DIFFICULTY,
            mining_reward: MINING_REWARD,
        }
    }
}

/// Funds check. Rewards mint supply and always pass.
pub fn verify_transaction<F>(tx: &Transaction, balance_of: F) -> bool
where
    F: Fn(&str) -> Balance,
{
    match tx {
        Transaction::Reward { .. } => true,
        Transaction::Transfer { sender, amount, .. } => balance_of(sender) >= Balance::from(*amount),
    }
}

pub fn verify_signature(tx: &Transaction) -> bool {
    match tx {
        Transaction::Reward { .. } => true,
        Transaction::Transfer {
            sender, signature, ..
        } => verify_detached(sender, &tx.canonical_bytes(), signature),
    }
}

/// Full integrity check of a chain, independent of how its blocks were admitted.
///
/// Every block after genesis must link to its predecessor's hash, sit at its own
/// index, end in exactly one reward of `params.mining_reward`, carry valid transfer
/// signatures, and carry a proof valid for its non-reward transactions.
pub fn verify_chain(chain: &[Block], params: &ConsensusParams) -> bool {
    let Some((genesis, rest)) = chain.split_first() else {
        debug!("empty chain");
        return false;
    };
    if *genesis != Block::genesis() {
        debug!("genesis block does not match");
        return false;
    }

    let mut previous = genesis;
    for (offset, block) in rest.iter().enumerate() {
        let index = offset as u64 + 1;
        if block.index != index {
            debug!(index, found = block.index, "block index out of sequence");
            return false;
        }
        if block.previous_hash != hash_block(previous) {
            debug!(index, "previous hash mismatch");
            return false;
        }
        let Some((reward, transfers)) = block.transactions.split_last() else {
            debug!(index, "block has no reward transaction");
            return false;
        };
        if !matches!(reward, Transaction::Reward { amount, .. } if *amount == params.mining_reward)
        {
            debug!(index, "block does not end in a well-formed reward");
            return false;
        }
        if transfers.iter().any(|tx| tx.is_reward() || !verify_signature(tx)) {
            debug!(index, "block carries an invalid transaction");
            return false;
        }
        if !valid_proof(transfers, &block.previous_hash, block.proof, params.difficulty) {
            debug!(index, proof = block.proof, "invalid proof of work");
            return false;
        }
        previous = block;
    }
    true
}
