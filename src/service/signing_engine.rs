//! 签名引擎
//!
//! 把账户存储和各链签名原语组合起来。所有操作都是确定性的，
//! 且不修改存储；私钥只在 `with_key_material` 的闭包内可见。

use std::sync::Arc;

use crate::domain::account::KeyStore;
use crate::domain::chain_config::ChainFamily;
use crate::error::Result;
use crate::service::eip712::TypedData;
use crate::service::evm_signer::{self, EvmSignature};
use crate::service::solana_signer::{self, WireTransaction, SIGNATURE_LENGTH};
use crate::service::transaction_builder::{
    EvmTransactionRequest, SignedTransaction, TransactionBuilder,
};

#[derive(Debug, Clone)]
pub struct SigningEngine {
    keys: Arc<KeyStore>,
}

impl SigningEngine {
    pub fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    fn sign_evm_hash(&self, signer: &str, hash: &[u8; 32]) -> Result<EvmSignature> {
        self.keys.with_key_material(ChainFamily::Evm, signer, |key| {
            let signing_key = evm_signer::signing_key(key.as_bytes())?;
            evm_signer::sign_prehash(&signing_key, hash)
        })?
    }

    /// EIP-191 personal_sign
    pub fn personal_sign(&self, signer: &str, message: &[u8]) -> Result<EvmSignature> {
        self.sign_evm_hash(signer, &evm_signer::hash_personal_message(message))
    }

    /// eth_sign：直接签 32 字节哈希
    pub fn sign_hash(&self, signer: &str, hash: &[u8; 32]) -> Result<EvmSignature> {
        self.sign_evm_hash(signer, hash)
    }

    /// EIP-712 v4
    pub fn sign_typed_data(&self, signer: &str, typed: &TypedData) -> Result<EvmSignature> {
        let hash = typed.signing_hash()?;
        self.sign_evm_hash(signer, &hash)
    }

    pub fn sign_evm_transaction(
        &self,
        signer: &str,
        request: &EvmTransactionRequest,
        chain_id: u64,
    ) -> Result<SignedTransaction> {
        let tx = TransactionBuilder::build(request, chain_id)?;
        let signature = self.sign_evm_hash(signer, &tx.signing_hash())?;
        tx.encode_signed(&signature)
    }

    pub fn sign_solana_message(&self, signer: &str, message: &[u8]) -> Result<[u8; SIGNATURE_LENGTH]> {
        self.keys
            .with_key_material(ChainFamily::Solana, signer, |key| {
                solana_signer::sign_message(key.as_bytes(), message)
            })?
    }

    pub fn sign_solana_transaction(&self, signer: &str, wire: &[u8]) -> Result<WireTransaction> {
        self.keys
            .with_key_material(ChainFamily::Solana, signer, |key| {
                solana_signer::sign_transaction(key.as_bytes(), wire)
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountSpec;
    use crate::error::WalletError;
    use crate::service::evm_signer::{hash_personal_message, recover_address};
    use crate::service::solana_signer::verify_message;

    const EVM_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const EVM_ADDRESS: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";
    const SOL_KEY: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";
    const SOL_ADDRESS: &str = "FVen3X669xLzsi6N2V91DoiyzHzg1uAgqiT8jZ9nS96Z";

    fn engine() -> SigningEngine {
        let report = KeyStore::load(&[AccountSpec::evm(EVM_KEY), AccountSpec::solana(SOL_KEY)]);
        assert!(report.failures.is_empty());
        SigningEngine::new(Arc::new(report.store))
    }

    #[test]
    fn test_personal_sign_is_deterministic() {
        let engine = engine();
        let a = engine.personal_sign(EVM_ADDRESS, b"hello world").unwrap();
        let b = engine
            .personal_sign(&EVM_ADDRESS.to_lowercase(), b"hello world")
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.to_hex(),
            "0x0d5df3f9681b000a5b3a1d4252803318136714deba10c578f9b33718ad9c816e5520a6f19168136aa11e38d691d28a422bce4be3bf290fdb8efe45cdaefb20251c"
        );
        assert_eq!(
            recover_address(&hash_personal_message(b"hello world"), &a).unwrap(),
            EVM_ADDRESS
        );
    }

    #[test]
    fn test_unknown_signer_is_signing_error() {
        let engine = engine();
        assert!(matches!(
            engine.personal_sign("0x0000000000000000000000000000000000000001", b"x"),
            Err(WalletError::SigningError(_))
        ));
        assert!(matches!(
            engine.sign_solana_message(EVM_ADDRESS, b"x"),
            Err(WalletError::SigningError(_))
        ));
    }

    #[test]
    fn test_solana_message_signature_verifies() {
        let engine = engine();
        let sig = engine.sign_solana_message(SOL_ADDRESS, b"hello solana").unwrap();
        assert_eq!(
            hex::encode(sig),
            "06a6b1fe4407780868e4a50c2cf8e2e1547701a71e199e0a5df46ede9602a445fdf6418bf358ad48977880e4e8d8ebcdca411ff859b85cc3268bba8a7f4f3400"
        );
        let public_key = bs58::decode(SOL_ADDRESS).into_vec().unwrap();
        assert!(verify_message(&public_key, b"hello solana", &sig));
    }

    #[test]
    fn test_transaction_signature_recovers_signer() {
        let engine = engine();
        let request: EvmTransactionRequest = serde_json::from_value(serde_json::json!({
            "to": "0x3535353535353535353535353535353535353535",
            "value": "0x10",
            "nonce": "0x0"
        }))
        .unwrap();
        let signed = engine.sign_evm_transaction(EVM_ADDRESS, &request, 1).unwrap();
        let again = engine.sign_evm_transaction(EVM_ADDRESS, &request, 1).unwrap();
        assert_eq!(signed, again);
    }
}
