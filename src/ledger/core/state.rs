use crate::config::ChainParams;
use crate::error::{NodeError, Result};
use crate::transaction::{Transaction, TxKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A user account. Created lazily on first mention as sender or recipient,
/// never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    pub balance: u64,
    pub sequence: u64,
    pub staked: u64,
}

impl Account {
    fn new(address: String) -> Self {
        Account { address, balance: 0, sequence: 0, staked: 0 }
    }
}

/// A validator record. Registered on first stake; deactivated when stake
/// falls below the minimum but retained for historical queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    pub address: String,
    pub stake: u64,
    pub active: bool,
    pub last_produced: Option<u64>,
    pub blocks_produced: u64,
    pub registered_at: u64,
}

/// Reversible journal of the account and validator mutations one block
/// performed. Pre-images are pushed in touch order; reverting walks them
/// backwards, so repeated touches of the same entry are harmless.
#[derive(Debug, Clone, Default)]
pub struct BlockUndo {
    accounts: Vec<(String, Option<Account>)>,
    validators: Vec<(String, Option<Validator>)>,
    /// Reward units this block minted.
    pub minted: u64,
}

/// The mutable ledger state: accounts and the validator registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountState {
    pub accounts: HashMap<String, Account>,
    pub validators: HashMap<String, Validator>,
}

impl AccountState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(&self, address: &str) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn validator(&self, address: &str) -> Option<&Validator> {
        self.validators.get(address)
    }

    /// Active validators in address order. The ordering matters: proposer
    /// election walks this list deterministically on every node.
    pub fn active_validators(&self) -> Vec<&Validator> {
        let mut active: Vec<&Validator> = self.validators.values().filter(|v| v.active).collect();
        active.sort_by(|a, b| a.address.cmp(&b.address));
        active
    }

    pub fn has_active_validators(&self) -> bool {
        self.validators.values().any(|v| v.active)
    }

    fn snapshot_account(&self, address: &str, undo: &mut BlockUndo) {
        undo.accounts.push((address.to_string(), self.accounts.get(address).cloned()));
    }

    fn snapshot_validator(&self, address: &str, undo: &mut BlockUndo) {
        undo.validators.push((address.to_string(), self.validators.get(address).cloned()));
    }

    fn ensure_account(&mut self, address: &str) -> &mut Account {
        self.accounts
            .entry(address.to_string())
            .or_insert_with(|| Account::new(address.to_string()))
    }

    /// Apply a validated transaction. Callers must have run
    /// `Transaction::validate` against this state first; this only performs
    /// the arithmetic and records pre-images into `undo`.
    pub fn apply_transaction(
        &mut self,
        tx: &Transaction,
        params: &ChainParams,
        undo: &mut BlockUndo,
    ) -> Result<()> {
        match tx.kind {
            TxKind::Reward => {
                self.snapshot_account(&tx.recipient, undo);
                let recipient = self.ensure_account(&tx.recipient);
                recipient.balance = recipient.balance.saturating_add(tx.amount);
                undo.minted += tx.amount;
            }
            TxKind::Transfer => {
                self.snapshot_account(&tx.sender, undo);
                self.snapshot_account(&tx.recipient, undo);

                let debit = tx.amount.saturating_add(tx.fee);
                let sender = self.ensure_account(&tx.sender);
                sender.balance = sender
                    .balance
                    .checked_sub(debit)
                    .ok_or(NodeError::InsufficientBalance { needed: debit, available: sender.balance })?;
                sender.sequence += 1;

                let recipient = self.ensure_account(&tx.recipient);
                recipient.balance = recipient.balance.saturating_add(tx.amount);
            }
            TxKind::Stake => {
                self.snapshot_account(&tx.sender, undo);
                self.snapshot_validator(&tx.sender, undo);

                let debit = tx.amount.saturating_add(tx.fee);
                let sender = self.ensure_account(&tx.sender);
                sender.balance = sender
                    .balance
                    .checked_sub(debit)
                    .ok_or(NodeError::InsufficientBalance { needed: debit, available: sender.balance })?;
                sender.staked += tx.amount;
                sender.sequence += 1;
                let staked = sender.staked;

                let validator = self
                    .validators
                    .entry(tx.sender.clone())
                    .or_insert_with(|| Validator {
                        address: tx.sender.clone(),
                        stake: 0,
                        active: false,
                        last_produced: None,
                        blocks_produced: 0,
                        registered_at: tx.timestamp,
                    });
                validator.stake = staked;
                validator.active = staked >= params.min_stake;
            }
            TxKind::Unstake => {
                self.snapshot_account(&tx.sender, undo);
                self.snapshot_validator(&tx.sender, undo);

                let sender = self.ensure_account(&tx.sender);
                sender.staked = sender
                    .staked
                    .checked_sub(tx.amount)
                    .ok_or(NodeError::InsufficientStake { needed: tx.amount, staked: sender.staked })?;
                sender.balance = sender
                    .balance
                    .checked_sub(tx.fee)
                    .ok_or(NodeError::InsufficientBalance { needed: tx.fee, available: sender.balance })?
                    .saturating_add(tx.amount);
                sender.sequence += 1;
                let staked = sender.staked;

                if let Some(validator) = self.validators.get_mut(&tx.sender) {
                    validator.stake = staked;
                    if staked < params.min_stake {
                        validator.active = false;
                    }
                }
            }
            TxKind::ContractDeploy | TxKind::ContractCall => {
                return Err(NodeError::InvalidTransaction(format!(
                    "transaction kind {} is reserved",
                    tx.kind.as_str()
                )));
            }
        }
        Ok(())
    }

    /// Record a produced block against the proposer's validator entry.
    pub fn record_production(&mut self, proposer: &str, height: u64, undo: &mut BlockUndo) {
        self.snapshot_validator(proposer, undo);
        if let Some(validator) = self.validators.get_mut(proposer) {
            validator.last_produced = Some(height);
            validator.blocks_produced += 1;
        }
    }

    /// Roll the state back to before the block whose journal this is.
    pub fn revert(&mut self, undo: &BlockUndo) {
        for (address, prev) in undo.validators.iter().rev() {
            match prev {
                Some(v) => {
                    self.validators.insert(address.clone(), v.clone());
                }
                None => {
                    self.validators.remove(address);
                }
            }
        }
        for (address, prev) in undo.accounts.iter().rev() {
            match prev {
                Some(a) => {
                    self.accounts.insert(address.clone(), a.clone());
                }
                None => {
                    self.accounts.remove(address);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn credit_for_test(&mut self, address: &str, amount: u64) {
        let account = self.ensure_account(address);
        account.balance += amount;
    }

    #[cfg(test)]
    pub(crate) fn account_mut_for_test(&mut self, address: &str) -> &mut Account {
        self.ensure_account(address)
    }
}
