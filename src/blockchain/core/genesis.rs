use crate::crypto::{hash_from_str, Address, Hash};
use crate::error::ChainError;
use crate::miner::{self, CancelToken};
use crate::transaction::{BlockTransaction, Tx, TxOutput, DOC_ADDRESS_KEY, DOC_ID_KEY, DOC_NAME_KEY, INTRODUCE_DOC_ID};

use super::chain::{subsidy_at, Block, BlockFlag, ChainParams, SealedBlock};
use super::state::{AccountStates, StateDelta};
use super::validation::{apply_block, fill_state_commitment};

pub const GENESIS_PUBLISHER_NAME: &str = "WOTvision";
pub const GENESIS_ADDRESS: &str = "WAm0N27skTxuE-iqkKgTz-zJIqImheNRkuuvGj2xzz7hw";
pub const GENESIS_TIMESTAMP: i64 = 1_518_733_930;
pub const GENESIS_NONCE: u64 = 1037;
pub const GENESIS_TX_HASH: &str = "fVIKStrlv1Ggoj4x2HTskbdzj6uyezyfO3CJyaiPyPo";
pub const GENESIS_STATE_COMMITMENT: &str = "S6QfOaMbH3FoSomyAk3rMAGkXnAPjwSH2Ro-Fy8hZ6Q";
pub const GENESIS_HASH: &str = "AL1-tYGJ6xLluBQwReJygIjtk4JHVNmJbPd8nc27uk4";

const GENESIS_RAW_TX: &str = r#"{"v":1,"k":"WAm0N27skTxuE-iqkKgTz-zJIqImheNRkuuvGj2xzz7hw","n":0,"f":["coinbase"],"o":[{"k":"WAm0N27skTxuE-iqkKgTz-zJIqImheNRkuuvGj2xzz7hw","a":1000000}],"m":0,"d":{"_id":"_intro","_key":"WAm0N27skTxuE-iqkKgTz-zJIqImheNRkuuvGj2xzz7hw","_name":"WOTvision","comment":"Peace among worlds!","genesis":"The Guardian, 15th Feb 2018: Trump again emphasizes mental health over gun control after Florida shooting"}}"#;

/// The hard-coded genesis block of the main chain.
pub fn genesis_block() -> Result<Block, ChainError> {
    Ok(Block {
        previous_hash: None,
        timestamp: GENESIS_TIMESTAMP,
        nonce: GENESIS_NONCE,
        flags: vec![BlockFlag::Genesis],
        transactions: vec![BlockTransaction {
            tx_hash: hash_from_str(GENESIS_TX_HASH)?,
            flags: Vec::new(),
            raw_tx: GENESIS_RAW_TX.to_string(),
            signature: None,
        }],
        state_commitment: hash_from_str(GENESIS_STATE_COMMITMENT)?,
    })
}

pub fn genesis_hash() -> Result<Hash, ChainError> {
    hash_from_str(GENESIS_HASH)
}

/// Startup self-check: the configured genesis must be internally consistent.
///
/// Checks the transaction hash, the coinbase, the state commitment, the
/// block hash and the proof of work. Every failure maps to `GenesisMismatch`.
pub fn verify_genesis(params: &ChainParams) -> Result<(SealedBlock, StateDelta), ChainError> {
    let block = &params.genesis;
    if !block.is_genesis() || block.previous_hash.is_some() {
        return Err(ChainError::GenesisMismatch(
            "block is not flagged as genesis or has a parent".to_string(),
        ));
    }

    let delta = apply_block(&AccountStates::new(), block, 0)
        .map_err(|e| ChainError::GenesisMismatch(e.to_string()))?;

    let sealed = SealedBlock::seal(block.clone())?;
    if let Some(expected) = params.expected_genesis_hash {
        if sealed.hash() != expected {
            return Err(ChainError::GenesisMismatch(format!(
                "genesis hashes to {}",
                sealed.hash_str()
            )));
        }
    }
    if !miner::verify_seal(&sealed.hash(), params.difficulty_bits) {
        return Err(ChainError::GenesisMismatch(format!(
            "genesis {} does not meet difficulty {}",
            sealed.hash_str(),
            params.difficulty_bits
        )));
    }
    Ok((sealed, delta))
}

/// Builds and mines a fresh genesis block introducing `founder` as its first publisher.
pub fn build_genesis<K, V>(
    publisher_name: &str,
    founder: Address,
    facts: impl IntoIterator<Item = (K, V)>,
    timestamp: i64,
    difficulty_bits: u32,
) -> Result<SealedBlock, ChainError>
where
    K: Into<String>,
    V: Into<String>,
{
    let mut tx = Tx::coinbase(vec![TxOutput::new(founder, subsidy_at(0))])
        .with_published_data(facts)
        .with_published_data([
            (DOC_ID_KEY, INTRODUCE_DOC_ID.to_string()),
            (DOC_NAME_KEY, publisher_name.to_string()),
            (DOC_ADDRESS_KEY, founder.to_string()),
        ]);
    tx.signing_address = Some(founder);

    let mut block = Block {
        previous_hash: None,
        timestamp,
        nonce: 0,
        flags: vec![BlockFlag::Genesis],
        transactions: vec![BlockTransaction::unsigned(&tx)?],
        state_commitment: [0u8; 32],
    };
    fill_state_commitment(&AccountStates::new(), &mut block, 0)?;
    miner::mine(block, difficulty_bits, &CancelToken::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::core::publisher::PublisherEvent;
    use crate::blockchain::GENESIS_DIFFICULTY_BITS;
    use crate::crypto::{hash256, KeyPair, Signer};

    #[test]
    fn test_hard_coded_genesis_verifies() {
        let params = ChainParams::mainnet().unwrap();
        let (sealed, delta) = verify_genesis(&params).unwrap();
        assert_eq!(sealed.hash_str(), GENESIS_HASH);
        assert_eq!(sealed.hash()[0], 0);
        assert!(sealed.hash()[1] >= 0x80);

        let founder: Address = GENESIS_ADDRESS.parse().unwrap();
        assert_eq!(delta.states[&founder].balance, subsidy_at(0));
        assert_eq!(delta.states[&founder].nonce, 0);
        assert_eq!(delta.facts.len(), 2);
        match &delta.publisher_events[0] {
            PublisherEvent::Introduced(record) => {
                assert_eq!(record.display_name, GENESIS_PUBLISHER_NAME);
                assert_eq!(record.address, founder);
                assert_eq!(record.publisher_id, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_genesis_tx_hash_binds_raw_bytes() {
        let block = genesis_block().unwrap();
        assert_eq!(hash256(GENESIS_RAW_TX.as_bytes()), block.transactions[0].tx_hash);
    }

    #[test]
    fn test_tampered_genesis_rejected() {
        let mut params = ChainParams::mainnet().unwrap();
        params.genesis.timestamp += 1;
        assert!(matches!(verify_genesis(&params), Err(ChainError::GenesisMismatch(_))));

        let mut params = ChainParams::mainnet().unwrap();
        params.genesis.state_commitment = hash256(b"{}");
        assert!(matches!(verify_genesis(&params), Err(ChainError::GenesisMismatch(_))));

        let mut params = ChainParams::mainnet().unwrap();
        params.genesis.transactions[0].raw_tx = GENESIS_RAW_TX.replace("1000000", "2000000");
        assert!(matches!(verify_genesis(&params), Err(ChainError::GenesisMismatch(_))));
    }

    #[test]
    fn test_mainnet_difficulty_is_exact() {
        let mut params = ChainParams::mainnet().unwrap();
        params.difficulty_bits = GENESIS_DIFFICULTY_BITS - 1;
        params.expected_genesis_hash = None;
        assert!(matches!(verify_genesis(&params), Err(ChainError::GenesisMismatch(_))));
    }

    #[test]
    fn test_built_genesis_verifies() {
        let founder = KeyPair::generate().address();
        let sealed = build_genesis("Founder", founder, [("motto", "hello")], 1_700_000_000, 4).unwrap();
        let params = ChainParams::devnet(sealed.clone(), 4);
        let (verified, delta) = verify_genesis(&params).unwrap();
        assert_eq!(verified, sealed);
        assert_eq!(delta.states[&founder].balance, subsidy_at(0));
        assert_eq!(delta.facts[0].key, "motto");
    }
}
