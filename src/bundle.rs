//! Bundle validation, serialization and id derivation.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use solana_sdk::transaction::{Transaction, VersionedTransaction};

use crate::{config::BundleEncoding, errors::SubmitError};

/// A signed transaction that can be placed in a bundle.
pub trait SignedTransaction {
    /// Bytes of the first signature, if the transaction carries any.
    fn first_signature(&self) -> Option<&[u8]>;

    /// Wire serialization of the signed transaction.
    fn serialize(&self) -> Result<Vec<u8>, String>;
}

impl SignedTransaction for VersionedTransaction {
    fn first_signature(&self) -> Option<&[u8]> {
        self.signatures.first().map(|sig| sig.as_ref())
    }

    fn serialize(&self) -> Result<Vec<u8>, String> {
        bincode::serialize(self).map_err(|e| e.to_string())
    }
}

impl SignedTransaction for Transaction {
    fn first_signature(&self) -> Option<&[u8]> {
        self.signatures.first().map(|sig| sig.as_ref())
    }

    fn serialize(&self) -> Result<Vec<u8>, String> {
        bincode::serialize(self).map_err(|e| e.to_string())
    }
}

/// A transaction that is already in wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    /// First signature bytes, as found at the head of the wire payload.
    pub signature: Vec<u8>,
    /// Full wire bytes.
    pub wire: Vec<u8>,
}

impl SignedTransaction for RawTransaction {
    fn first_signature(&self) -> Option<&[u8]> {
        if self.signature.is_empty() {
            None
        } else {
            Some(&self.signature)
        }
    }

    fn serialize(&self) -> Result<Vec<u8>, String> {
        Ok(self.wire.clone())
    }
}

/// A validated bundle, encoded once and shared by every endpoint call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBundle {
    bundle_id: String,
    transactions: Vec<String>,
    encoding: BundleEncoding,
}

impl EncodedBundle {
    /// Validates and encodes `txs`.
    ///
    /// The bundle id is the base58 form of the first transaction's first
    /// signature, not a digest of the whole bundle.
    pub fn encode<T: SignedTransaction>(
        txs: &[T],
        encoding: BundleEncoding,
    ) -> Result<Self, SubmitError> {
        let bundle_id = Self::derive_id(txs)?;

        let transactions = txs
            .iter()
            .enumerate()
            .map(|(index, tx)| {
                tx.serialize()
                    .map(|bytes| encode_bytes(&bytes, encoding))
                    .map_err(|message| SubmitError::Serialize { index, message })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            bundle_id,
            transactions,
            encoding,
        })
    }

    /// Derives the bundle id without serializing anything.
    pub fn derive_id<T: SignedTransaction>(txs: &[T]) -> Result<String, SubmitError> {
        let first = txs.first().ok_or(SubmitError::EmptyBundle)?;
        let signature = first
            .first_signature()
            .filter(|sig| !sig.is_empty())
            .ok_or(SubmitError::MissingSignature)?;
        Ok(bs58::encode(signature).into_string())
    }

    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }

    pub fn transactions(&self) -> &[String] {
        &self.transactions
    }

    pub fn encoding(&self) -> BundleEncoding {
        self.encoding
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

fn encode_bytes(bytes: &[u8], encoding: BundleEncoding) -> String {
    match encoding {
        BundleEncoding::Base58 => bs58::encode(bytes).into_string(),
        BundleEncoding::Base64 => BASE64_STANDARD.encode(bytes),
    }
}
