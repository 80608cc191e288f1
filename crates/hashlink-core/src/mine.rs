use crate::pow::{guess_meets, proof_prefix, SearchError};
use crate::Transaction;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Searches nonces in parallel and returns the same proof as the sequential
/// [`crate::pow::proof_of_work`]: the smallest nonce that satisfies the target.
pub fn proof_of_work_parallel(
    txs: &[Transaction],
    last_hash: &str,
    difficulty: u32,
    cancel: &AtomicBool,
) -> Result<u64, SearchError> {
    let prefix = proof_prefix(txs, last_hash);

    // A raised cancel flag makes every remaining guess "match", which stops all
    // workers; the winner is then re-checked so a cancelled search is told apart.
    let found = (0u64..u64::MAX)
        .into_par_iter()
        .find_first(|nonce| {
            cancel.load(Ordering::Relaxed) || guess_meets(&prefix, *nonce, difficulty)
        })
        .ok_or(SearchError::Exhausted)?;

    if !guess_meets(&prefix, found, difficulty) {
        return Err(SearchError::Cancelled);
    }

    info!(proof = found, difficulty, "parallel proof-of-work search finished");
    Ok(found)
}
