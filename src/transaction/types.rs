/// Transaction types for wotchain
use crate::codec::{self, b64_hash};
use crate::crypto::{encode_base64url, hash256, Address, Hash, Signer};
use crate::error::ChainError;
use std::collections::BTreeMap;

/// Maximum raw transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

pub const CURRENT_TX_VERSION: u32 = 1;

/// Reserved `published_data` keys. Keys starting with `_` are never stored as facts.
pub const DOC_ID_KEY: &str = "_id";
pub const DOC_ADDRESS_KEY: &str = "_key";
pub const DOC_NAME_KEY: &str = "_name";
pub const DOC_NEW_ADDRESS_KEY: &str = "_newkey";
/// Document id marking a publisher introduction (or key rotation).
pub const INTRODUCE_DOC_ID: &str = "_intro";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxFlag {
    Coinbase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    /// Mints the block reward; carries no signature.
    Coinbase,
    /// Signed by `signing_address`.
    Standard,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TxOutput {
    #[serde(rename = "k")]
    pub recipient: Address,
    #[serde(rename = "a")]
    pub amount: u64,
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TxOutput {
    pub fn new(recipient: Address, amount: u64) -> Self {
        TxOutput {
            recipient,
            amount,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// A transaction as it is signed. Blocks carry it serialized, see [`BlockTransaction`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Tx {
    #[serde(rename = "v")]
    pub version: u32,
    #[serde(rename = "k", default, skip_serializing_if = "Option::is_none")]
    pub signing_address: Option<Address>,
    /// Must equal the signer's on-chain nonce + 1 when the tx is applied.
    #[serde(rename = "n", default)]
    pub replay_nonce: u64,
    #[serde(rename = "f", default)]
    pub flags: Vec<TxFlag>,
    #[serde(rename = "o", default)]
    pub outputs: Vec<TxOutput>,
    #[serde(rename = "m", default)]
    pub miner_fee_amount: u64,
    #[serde(rename = "d", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub published_data: BTreeMap<String, String>,
}

impl Tx {
    pub fn coinbase(outputs: Vec<TxOutput>) -> Self {
        Tx {
            version: CURRENT_TX_VERSION,
            signing_address: None,
            replay_nonce: 0,
            flags: vec![TxFlag::Coinbase],
            outputs,
            miner_fee_amount: 0,
            published_data: BTreeMap::new(),
        }
    }

    pub fn transfer(
        signing_address: Address,
        replay_nonce: u64,
        outputs: Vec<TxOutput>,
        miner_fee_amount: u64,
    ) -> Self {
        Tx {
            version: CURRENT_TX_VERSION,
            signing_address: Some(signing_address),
            replay_nonce,
            flags: Vec::new(),
            outputs,
            miner_fee_amount,
            published_data: BTreeMap::new(),
        }
    }

    pub fn with_published_data<K, V>(mut self, data: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.published_data
            .extend(data.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn kind(&self) -> TxKind {
        if self.flags.contains(&TxFlag::Coinbase) {
            TxKind::Coinbase
        } else {
            TxKind::Standard
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.kind() == TxKind::Coinbase
    }

    /// Sum of all outputs, `None` on overflow.
    pub fn total_output(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
    }

    /// Classifies `published_data`; `None` when the tx publishes nothing.
    pub fn document(&self) -> Result<Option<DocumentPayload>, ChainError> {
        DocumentPayload::parse(&self.published_data)
    }
}

/// `published_data` classified by its reserved keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentPayload {
    /// `_id == "_intro"`: register `address` as a new publisher.
    Introduce {
        name: String,
        address: Address,
        fields: BTreeMap<String, String>,
    },
    /// `_id == "_intro"` with `_newkey`: move the publisher of `address` to `new_address`.
    Rotate {
        name: String,
        address: Address,
        new_address: Address,
        fields: BTreeMap<String, String>,
    },
    /// Any other document id.
    Fact {
        id: String,
        claimed_address: Option<Address>,
        fields: BTreeMap<String, String>,
    },
}

impl DocumentPayload {
    pub fn parse(data: &BTreeMap<String, String>) -> Result<Option<Self>, ChainError> {
        if data.is_empty() {
            return Ok(None);
        }
        let id = data.get(DOC_ID_KEY).ok_or_else(|| {
            ChainError::MissingDocumentId("published data has no _id".to_string())
        })?;
        let parse_address = |key: &str| -> Result<Option<Address>, ChainError> {
            data.get(key)
                .map(|s| {
                    s.parse::<Address>()
                        .map_err(|e| ChainError::Malformed(format!("{} is not an address: {}", key, e)))
                })
                .transpose()
        };
        let fields: BTreeMap<String, String> = data
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let claimed_address = parse_address(DOC_ADDRESS_KEY)?;

        if id != INTRODUCE_DOC_ID {
            return Ok(Some(DocumentPayload::Fact {
                id: id.clone(),
                claimed_address,
                fields,
            }));
        }

        let name = data
            .get(DOC_NAME_KEY)
            .cloned()
            .ok_or_else(|| ChainError::Malformed("publisher introduction without _name".to_string()))?;
        let address = claimed_address
            .ok_or_else(|| ChainError::Malformed("publisher introduction without _key".to_string()))?;

        Ok(Some(match parse_address(DOC_NEW_ADDRESS_KEY)? {
            Some(new_address) => DocumentPayload::Rotate {
                name,
                address,
                new_address,
                fields,
            },
            None => DocumentPayload::Introduce {
                name,
                address,
                fields,
            },
        }))
    }

    pub fn document_id(&self) -> &str {
        match self {
            DocumentPayload::Introduce { .. } | DocumentPayload::Rotate { .. } => INTRODUCE_DOC_ID,
            DocumentPayload::Fact { id, .. } => id,
        }
    }

    pub fn claimed_address(&self) -> Option<&Address> {
        match self {
            DocumentPayload::Introduce { address, .. } | DocumentPayload::Rotate { address, .. } => {
                Some(address)
            }
            DocumentPayload::Fact {
                claimed_address, ..
            } => claimed_address.as_ref(),
        }
    }

    /// Non-reserved key/value pairs, stored as facts.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        match self {
            DocumentPayload::Introduce { fields, .. }
            | DocumentPayload::Rotate { fields, .. }
            | DocumentPayload::Fact { fields, .. } => fields,
        }
    }
}

/// Wire envelope of a [`Tx`] inside a block.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockTransaction {
    /// `hash256` of `raw_tx`.
    #[serde(rename = "h", with = "b64_hash")]
    pub tx_hash: Hash,
    #[serde(rename = "f", default)]
    pub flags: Vec<TxFlag>,
    /// The exact bytes that were hashed and signed.
    #[serde(rename = "t")]
    pub raw_tx: String,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl BlockTransaction {
    /// Serializes and signs `tx` with `signer`.
    pub fn signed(tx: &Tx, signer: &dyn Signer) -> Result<Self, ChainError> {
        let raw_tx = codec::encode_tx(tx)?;
        let signature = signer.sign(raw_tx.as_bytes())?;
        Ok(BlockTransaction {
            tx_hash: hash256(raw_tx.as_bytes()),
            flags: Vec::new(),
            raw_tx,
            signature: Some(encode_base64url(&signature)),
        })
    }

    /// Envelope without a signature, as used for coinbase transactions.
    pub fn unsigned(tx: &Tx) -> Result<Self, ChainError> {
        let raw_tx = codec::encode_tx(tx)?;
        Ok(BlockTransaction {
            tx_hash: hash256(raw_tx.as_bytes()),
            flags: Vec::new(),
            raw_tx,
            signature: None,
        })
    }

    pub fn raw_tx_bytes(&self) -> &[u8] {
        self.raw_tx.as_bytes()
    }

    pub fn hash_str(&self) -> String {
        encode_base64url(&self.tx_hash)
    }
}
