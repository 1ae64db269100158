//! Stake-weighted proposer election
//!
//! Every honest node must agree on the expected proposer for height h+1
//! before it is produced, so the draw is seeded from the previous block's
//! header hash: identical validator sets plus identical seeds yield
//! identical winners on every node.

use crate::crypto;
use crate::ledger::Validator;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Derive the election seed for the height following the block with the
/// given header hash.
pub fn election_seed(parent_hash: &str) -> [u8; 32] {
    let mut seed = [0u8; 32];
    match hex::decode(parent_hash) {
        Ok(bytes) if bytes.len() == 32 => seed.copy_from_slice(&bytes),
        // Non-hex or odd-length input still needs a stable seed.
        _ => seed = crypto::sha256(parent_hash.as_bytes()),
    }
    seed
}

/// Pick the proposer among active validators: a point is drawn in
/// [0, total_stake) and the first validator whose cumulative stake crosses
/// it wins. `validators` must be the address-sorted active set.
pub fn elect_proposer(validators: &[&Validator], seed: [u8; 32]) -> Option<String> {
    let total_stake: u64 = validators.iter().map(|v| v.stake).sum();
    if total_stake == 0 {
        return None;
    }

    let mut rng = StdRng::from_seed(seed);
    let point = rng.gen_range(0..total_stake);

    let mut cumulative = 0u64;
    for validator in validators {
        cumulative += validator.stake;
        if point < cumulative {
            return Some(validator.address.clone());
        }
    }
    None
}
