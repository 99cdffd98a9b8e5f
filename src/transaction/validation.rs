/// Stateless verification of block transactions, shared by mempool admission and block validation.
use crate::codec;
use crate::crypto::{decode_base64url, hash256};
use crate::error::ChainError;
use crate::transaction::types::{BlockTransaction, Tx, TxKind, MAX_TRANSACTION_SIZE};

impl BlockTransaction {
    /// Checks hash binding, decoding, document id and signature.
    ///
    /// Never consults chain state. Coinbase transactions skip the signature
    /// check entirely; a signature attached to one is ignored.
    pub fn verify_basics(&self) -> Result<Tx, ChainError> {
        let raw = self.raw_tx_bytes();
        if raw.len() > MAX_TRANSACTION_SIZE {
            return Err(ChainError::Malformed(format!(
                "Transaction too large: {} bytes (max: {})",
                raw.len(),
                MAX_TRANSACTION_SIZE
            )));
        }

        if hash256(raw) != self.tx_hash {
            return Err(ChainError::HashMismatch(format!(
                "Invalid tx hash: {}",
                self.hash_str()
            )));
        }

        let tx = codec::decode_tx(raw)?;

        // Fails with MissingDocumentId when data is present without _id
        tx.document()?;

        match tx.kind() {
            TxKind::Coinbase => {}
            TxKind::Standard => self.verify_signature(&tx)?,
        }
        Ok(tx)
    }

    fn verify_signature(&self, tx: &Tx) -> Result<(), ChainError> {
        let signer = tx.signing_address.ok_or_else(|| {
            ChainError::BadSignature(format!("Unsigned non-coinbase tx: {}", self.hash_str()))
        })?;
        let signature = self.signature.as_deref().ok_or_else(|| {
            ChainError::BadSignature(format!("Missing signature: {}", self.hash_str()))
        })?;
        let signature = decode_base64url(signature)
            .map_err(|e| ChainError::BadSignature(format!("{}: {}", self.hash_str(), e)))?;

        match signer.verify(self.raw_tx_bytes(), &signature) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ChainError::BadSignature(format!(
                "Signature doesn't match signing address: {}",
                self.hash_str()
            ))),
            Err(e) => Err(ChainError::BadSignature(format!("{}: {}", self.hash_str(), e))),
        }
    }
}

/// Free-standing form of [`BlockTransaction::verify_basics`].
pub fn verify_basics(block_tx: &BlockTransaction) -> Result<Tx, ChainError> {
    block_tx.verify_basics()
}
