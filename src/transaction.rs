//! Transaction module split into types and validation for better modularity

pub mod types;
pub mod validation;

pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainParams;
    use crate::crypto::KeyPair;
    use crate::error::NodeError;
    use crate::ledger::AccountState;

    fn test_params() -> ChainParams {
        ChainParams::default()
    }

    fn signed_transfer(keypair: &KeyPair, recipient: &str, amount: u64, fee: u64, sequence: u64) -> Transaction {
        let mut tx = Transaction::new(
            TxKind::Transfer,
            keypair.address(),
            recipient.to_string(),
            amount,
            fee,
            1_700_000_000_000,
            None,
            sequence,
        );
        tx.sign(keypair).unwrap();
        tx
    }

    #[test]
    fn test_id_is_content_hash() {
        let keypair = KeyPair::generate();
        let tx = signed_transfer(&keypair, "aur1000000000000000000000000000000000000babe", 10, 1, 0);
        assert_eq!(tx.id, tx.compute_id());
        assert_eq!(tx.id.len(), 64);
    }

    #[test]
    fn test_signature_does_not_change_id() {
        let keypair = KeyPair::generate();
        let mut tx = Transaction::new(
            TxKind::Transfer,
            keypair.address(),
            "aur1000000000000000000000000000000000000babe".to_string(),
            10,
            1,
            1_700_000_000_000,
            None,
            0,
        );
        let unsigned_id = tx.id.clone();
        tx.sign(&keypair).unwrap();
        assert_eq!(tx.id, unsigned_id);
    }

    #[test]
    fn test_valid_transfer_passes() {
        let keypair = KeyPair::generate();
        let mut state = AccountState::new();
        state.credit_for_test(&keypair.address(), 100);

        let tx = signed_transfer(&keypair, "aur1000000000000000000000000000000000000babe", 10, 1, 0);
        assert!(tx.validate(&state, &test_params()).is_ok());
    }

    #[test]
    fn test_unsigned_transfer_rejected() {
        let keypair = KeyPair::generate();
        let mut state = AccountState::new();
        state.credit_for_test(&keypair.address(), 100);

        let tx = Transaction::new(
            TxKind::Transfer,
            keypair.address(),
            "aur1000000000000000000000000000000000000babe".to_string(),
            10,
            1,
            1_700_000_000_000,
            None,
            0,
        );
        assert!(tx.validate(&state, &test_params()).is_err());
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let sender = KeyPair::generate();
        let forger = KeyPair::generate();
        let mut state = AccountState::new();
        state.credit_for_test(&sender.address(), 100);

        let mut tx = Transaction::new(
            TxKind::Transfer,
            sender.address(),
            "aur1000000000000000000000000000000000000babe".to_string(),
            10,
            1,
            1_700_000_000_000,
            None,
            0,
        );
        tx.sign(&forger).unwrap();

        let result = tx.validate(&state, &test_params());
        assert!(matches!(result, Err(NodeError::InvalidSignature)));
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let keypair = KeyPair::generate();
        let state = AccountState::new();

        let tx = signed_transfer(&keypair, "aur1000000000000000000000000000000000000babe", 10, 1, 0);
        let result = tx.validate(&state, &test_params());
        assert!(matches!(result, Err(NodeError::UnknownSender(_))));
    }

    #[test]
    fn test_stale_sequence_rejected() {
        let keypair = KeyPair::generate();
        let mut state = AccountState::new();
        state.credit_for_test(&keypair.address(), 100);
        state.account_mut_for_test(&keypair.address()).sequence = 3;

        let tx = signed_transfer(&keypair, "aur1000000000000000000000000000000000000babe", 10, 1, 2);
        let result = tx.validate(&state, &test_params());
        assert!(matches!(result, Err(NodeError::InvalidSequence { expected: 3, got: 2 })));
    }

    #[test]
    fn test_overspend_rejected() {
        let keypair = KeyPair::generate();
        let mut state = AccountState::new();
        state.credit_for_test(&keypair.address(), 10);

        let tx = signed_transfer(&keypair, "aur1000000000000000000000000000000000000babe", 10, 1, 0);
        let result = tx.validate(&state, &test_params());
        assert!(matches!(result, Err(NodeError::InsufficientBalance { .. })));
    }

    #[test]
    fn test_stake_below_minimum_rejected() {
        let keypair = KeyPair::generate();
        let params = test_params();
        let mut state = AccountState::new();
        state.credit_for_test(&keypair.address(), params.min_stake * 2);

        let mut tx = Transaction::new(
            TxKind::Stake,
            keypair.address(),
            keypair.address(),
            params.min_stake - 1,
            1,
            1_700_000_000_000,
            None,
            0,
        );
        tx.sign(&keypair).unwrap();

        let result = tx.validate(&state, &params);
        assert!(matches!(result, Err(NodeError::StakeBelowMinimum { .. })));
    }

    #[test]
    fn test_reward_needs_no_signature() {
        let state = AccountState::new();
        let tx = Transaction::reward(
            "aur1000000000000000000000000000000000000babe".to_string(),
            5,
            1_700_000_000_000,
            1,
        );
        assert!(tx.validate(&state, &test_params()).is_ok());
    }

    #[test]
    fn test_reserved_kind_rejected() {
        let keypair = KeyPair::generate();
        let mut tx = Transaction::new(
            TxKind::ContractDeploy,
            keypair.address(),
            keypair.address(),
            1,
            0,
            1_700_000_000_000,
            Some("0xdeadbeef".to_string()),
            0,
        );
        tx.sign(&keypair).unwrap();
        assert!(tx.validate_stateless().is_err());
    }
}
