//! Paying for cluster operations on the companion chain.
//!
//! Every store or compute call is preceded by a two-phase exchange: the
//! cluster quotes the operation, the wallet pays the quote on chain and the
//! resulting [`PaymentReceipt`] is handed to the call it was quoted for.

use std::fmt;
use chrono::{
    DateTime, Utc
};
use k256::ecdsa::{
    signature::Signer,
    Signature,
    SigningKey,
    VerifyingKey,
};
use log::info;
use serde::{
    Serialize, Deserialize
};
use sha2::{
    Digest, Sha256
};
use uuid::Uuid;

use crate::{
    client::NillionClient,
    error::{
        Error,
        Result,
    },
    keys::identifier_of,
    operation::Operation,
};

pub const NILLION_ADDRESS_PREFIX: &str = "nillion";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentsConfig {
    pub chain_id: String,
    pub grpc_endpoint: String,
}

pub fn create_payments_config(chain_id: &str, grpc_endpoint: &str) -> PaymentsConfig {
    PaymentsConfig {
        chain_id: chain_id.to_string(),
        grpc_endpoint: grpc_endpoint.to_string(),
    }
}

/// A funded account on the payments chain.
#[derive(Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    address: String,
}

impl Wallet {
    pub fn from_private_key(bytes: &[u8], prefix: &str) -> Result<Self> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| Error::InvalidPrivateKey(e.to_string()))?;
        let address = format!(
            "{prefix}{}",
            hex::encode(identifier_of(signing_key.verifying_key()))
        );
        Ok(Self {
            signing_key,
            address,
        })
    }

    pub fn from_hex(hex_key: &str, prefix: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| Error::InvalidPrivateKey(e.to_string()))?;
        Self::from_private_key(&bytes, prefix)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: Uuid,
    pub operation_digest: [u8; 32],
    pub cost_unil: u64,
    pub expires_at: DateTime<Utc>,
}

impl Quote {
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.operation_digest);
        hasher.update(self.cost_unil.to_be_bytes());
        hasher.update(self.expires_at.timestamp_millis().to_be_bytes());
        hasher.finalize().into()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// proof that a quote was paid; not `Clone`, it is handed over exactly once
#[derive(Debug)]
pub struct PaymentReceipt {
    pub quote: Quote,
    pub payer: String,
    pub tx_hash: TxHash,
    // payer's signature over the quote digest
    pub signature: Signature,
}

#[async_trait::async_trait]
pub trait PaymentsClient: Send + Sync {
    /// Pay a quote from the wallet and return the transaction hash.
    async fn pay(
        &self,
        wallet: &Wallet,
        quote: &Quote,
    ) -> Result<TxHash>;
}

// quote the operation, pay for it, and bundle the proof of payment
pub async fn get_quote_and_pay<C, P>(
    client: &C,
    operation: &Operation,
    wallet: &Wallet,
    payments: &P,
    cluster_id: &str,
) -> Result<PaymentReceipt>
where
    C: NillionClient + ?Sized,
    P: PaymentsClient + ?Sized,
{
    let quote = client.request_quote(cluster_id, operation).await?;
    if quote.operation_digest != operation.digest() {
        return Err(Error::QuoteRejected(format!(
            "quote `{}` was issued for a different operation than {operation}",
            quote.id
        )));
    }
    info!("Quote `{}` for {operation}: {}unil", quote.id, quote.cost_unil);

    let tx_hash = payments.pay(wallet, &quote).await?;
    info!("Paid quote `{}` with transaction `{tx_hash}`", quote.id);

    let signature = wallet.sign(&quote.digest());
    Ok(PaymentReceipt {
        quote,
        payer: wallet.address().to_string(),
        tx_hash,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::signature::Verifier;

    // test-only key; any 32 bytes below the curve order will do
    const PRIVATE_KEY: &str = "9a975f567428d054f2bf3092812e6c42f901ce07d9711bc77ee2cd81101f42c5";

    #[test]
    fn wallet_from_hex_key() {
        let wallet = Wallet::from_hex(PRIVATE_KEY, NILLION_ADDRESS_PREFIX).unwrap();
        assert!(wallet.address().starts_with(NILLION_ADDRESS_PREFIX));
        assert_eq!(wallet.address().len(), NILLION_ADDRESS_PREFIX.len() + 40);
        assert_eq!(
            wallet.address(),
            Wallet::from_hex(PRIVATE_KEY, NILLION_ADDRESS_PREFIX).unwrap().address()
        );

        // debug output never leaks the key
        assert!(!format!("{wallet:?}").contains(PRIVATE_KEY));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        let zero = "00".repeat(32);
        for key in ["", "zz", "abcd", zero.as_str()] {
            assert!(
                matches!(Wallet::from_hex(key, NILLION_ADDRESS_PREFIX), Err(Error::InvalidPrivateKey(_))),
                "`{key}` should be rejected"
            );
        }
    }

    #[test]
    fn wallet_signatures_verify_against_its_key() {
        let wallet = Wallet::from_hex(PRIVATE_KEY, NILLION_ADDRESS_PREFIX).unwrap();
        let quote = Quote {
            id: Uuid::new_v4(),
            operation_digest: [7u8; 32],
            cost_unil: 10,
            expires_at: Utc::now(),
        };
        let signature = wallet.sign(&quote.digest());
        assert!(wallet.verifying_key().verify(&quote.digest(), &signature).is_ok());
        assert!(wallet.verifying_key().verify(&[0u8; 32], &signature).is_err());
    }
}
