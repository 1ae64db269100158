/// Structural block checks that need no account state.
use crate::error::{NodeError, Result};
use crate::ledger::core::chain::Block;
use std::collections::HashSet;

/// Rejects intra-block duplicates and malformed reward placement: at most
/// one reward transaction per block, and it must come last (it is appended
/// after the selected pool transactions during assembly).
pub fn check_block_structure(block: &Block) -> Result<()> {
    let mut seen = HashSet::new();
    for tx in &block.transactions {
        if !seen.insert(tx.id.as_str()) {
            return Err(NodeError::DuplicateTransaction(tx.id.clone()));
        }
    }

    let reward_count = block.transactions.iter().filter(|tx| tx.is_reward()).count();
    if reward_count > 1 {
        return Err(NodeError::InvalidBlock(format!(
            "block carries {} reward transactions, at most one is allowed",
            reward_count
        )));
    }
    if reward_count == 1 && !block.transactions.last().map(|tx| tx.is_reward()).unwrap_or(false) {
        return Err(NodeError::InvalidBlock(
            "reward transaction must be the last in the block".to_string(),
        ));
    }

    Ok(())
}
