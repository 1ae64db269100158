/// Validation logic for transactions, separated from type definitions.
///
/// Validation is a pure function of the transaction and a given account
/// state; it mutates nothing. Block application calls this against the
/// evolving post-previous-block state, the pool calls it against the tip.
use crate::config::ChainParams;
use crate::crypto;
use crate::error::{NodeError, Result};
use crate::ledger::AccountState;
use crate::transaction::types::{Transaction, TxKind, NETWORK_SENDER};

impl Transaction {
    /// Stateless checks: identifier integrity, amount/fee rules, and the
    /// signature (recovered public key must hash to the sender address).
    pub fn validate_stateless(&self) -> Result<()> {
        self.validate_size()?;

        if self.id != self.compute_id() {
            return Err(NodeError::InvalidTransaction(
                "identifier does not match content hash".to_string(),
            ));
        }

        match self.kind {
            TxKind::ContractDeploy | TxKind::ContractCall => {
                return Err(NodeError::InvalidTransaction(format!(
                    "transaction kind {} is reserved",
                    self.kind.as_str()
                )));
            }
            TxKind::Reward => {
                if self.sender != NETWORK_SENDER {
                    return Err(NodeError::InvalidTransaction(
                        "reward sender must be the network".to_string(),
                    ));
                }
                if self.fee != 0 {
                    return Err(NodeError::InvalidTransaction(
                        "reward fee must be zero".to_string(),
                    ));
                }
                // Rewards are synthesized by the ledger and carry no signature.
                return Ok(());
            }
            TxKind::Transfer | TxKind::Stake | TxKind::Unstake => {
                if self.amount == 0 {
                    return Err(NodeError::InvalidTransaction(
                        "amount must be positive".to_string(),
                    ));
                }
            }
        }

        if !crypto::is_valid_address(&self.sender) {
            return Err(NodeError::InvalidTransaction(format!(
                "malformed sender address: {}",
                self.sender
            )));
        }

        let signature = self.signature_bytes()?;
        let recovered = crypto::recover_address(&self.signing_bytes(), &signature)
            .map_err(|_| NodeError::InvalidSignature)?;
        if recovered != self.sender {
            return Err(NodeError::InvalidSignature);
        }

        Ok(())
    }

    /// Full validation against the given account state. Pure: the state is
    /// not modified.
    pub fn validate(&self, state: &AccountState, params: &ChainParams) -> Result<()> {
        self.validate_stateless()?;

        if self.is_reward() {
            // Supply bounds are enforced at the ledger level where the
            // running minted total is known.
            return Ok(());
        }

        let sender = state
            .account(&self.sender)
            .ok_or_else(|| NodeError::UnknownSender(self.sender.clone()))?;

        if sender.sequence != self.sequence {
            return Err(NodeError::InvalidSequence {
                expected: sender.sequence,
                got: self.sequence,
            });
        }

        match self.kind {
            TxKind::Transfer => {
                let needed = self.amount.saturating_add(self.fee);
                if sender.balance < needed {
                    return Err(NodeError::InsufficientBalance {
                        needed,
                        available: sender.balance,
                    });
                }
            }
            TxKind::Stake => {
                if self.amount < params.min_stake {
                    return Err(NodeError::StakeBelowMinimum {
                        amount: self.amount,
                        min_stake: params.min_stake,
                    });
                }
                let needed = self.amount.saturating_add(self.fee);
                if sender.balance < needed {
                    return Err(NodeError::InsufficientBalance {
                        needed,
                        available: sender.balance,
                    });
                }
            }
            TxKind::Unstake => {
                if sender.staked < self.amount {
                    return Err(NodeError::InsufficientStake {
                        needed: self.amount,
                        staked: sender.staked,
                    });
                }
                if sender.balance < self.fee {
                    return Err(NodeError::InsufficientBalance {
                        needed: self.fee,
                        available: sender.balance,
                    });
                }
            }
            TxKind::Reward | TxKind::ContractDeploy | TxKind::ContractCall => unreachable!(),
        }

        Ok(())
    }
}
