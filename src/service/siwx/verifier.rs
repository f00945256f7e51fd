//! SIWX 签名验证器
//!
//! - EIP-155：EIP-191 personal_sign，secp256k1 公钥恢复后比对地址
//! - Solana：ed25519，地址即 base58 公钥

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::domain::ChainNamespace;
use crate::error::{AppKitError, Result};
use crate::service::siwx::SiwxSession;

pub trait SiwxVerifier: Send + Sync {
    fn namespace(&self) -> ChainNamespace;

    /// 格式错误返回 `Err`，签名不匹配返回 `Ok(false)`
    fn verify(&self, session: &SiwxSession) -> Result<bool>;
}

/// EIP-191 消息哈希
pub fn eip191_hash(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// 从签名恢复 EVM 地址（小写 0x 格式）
pub fn recover_eip191_signer(message: &str, signature_hex: &str) -> Result<String> {
    let sig_bytes = hex::decode(signature_hex.trim_start_matches("0x"))
        .map_err(|e| AppKitError::Siwx(format!("invalid signature hex: {}", e)))?;
    if sig_bytes.len() != 65 {
        return Err(AppKitError::Siwx(format!(
            "invalid signature length: {}",
            sig_bytes.len()
        )));
    }

    let signature = Signature::from_slice(&sig_bytes[..64])
        .map_err(|_| AppKitError::Siwx("invalid signature".to_string()))?;

    // v 可能是 27/28 或 0/1
    let v = sig_bytes[64];
    let recovery_id = RecoveryId::from_byte(if v >= 27 { v - 27 } else { v })
        .ok_or_else(|| AppKitError::Siwx("invalid recovery id".to_string()))?;

    let verifying_key =
        VerifyingKey::recover_from_prehash(&eip191_hash(message), &signature, recovery_id)
            .map_err(|_| AppKitError::SignatureVerification)?;

    let public_key = verifying_key.to_encoded_point(false);
    let addr_hash = Keccak256::digest(&public_key.as_bytes()[1..]);
    Ok(format!("0x{}", hex::encode(&addr_hash[12..])))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Eip155Verifier;

impl SiwxVerifier for Eip155Verifier {
    fn namespace(&self) -> ChainNamespace {
        ChainNamespace::Eip155
    }

    fn verify(&self, session: &SiwxSession) -> Result<bool> {
        let recovered = match recover_eip191_signer(&session.message, &session.signature) {
            Ok(address) => address,
            Err(AppKitError::SignatureVerification) => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(recovered.eq_ignore_ascii_case(session.address()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SolanaVerifier;

impl SiwxVerifier for SolanaVerifier {
    fn namespace(&self) -> ChainNamespace {
        ChainNamespace::Solana
    }

    fn verify(&self, session: &SiwxSession) -> Result<bool> {
        let public_key: [u8; 32] = bs58::decode(session.address())
            .into_vec()
            .map_err(|e| AppKitError::Siwx(format!("invalid address: {}", e)))?
            .try_into()
            .map_err(|_| AppKitError::Siwx("address is not a 32-byte public key".to_string()))?;

        let signature: [u8; 64] = bs58::decode(&session.signature)
            .into_vec()
            .map_err(|e| AppKitError::Siwx(format!("invalid signature: {}", e)))?
            .try_into()
            .map_err(|_| AppKitError::Siwx("signature is not 64 bytes".to_string()))?;

        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&public_key)
            .map_err(|_| AppKitError::Siwx("invalid ed25519 public key".to_string()))?;
        let signature = ed25519_dalek::Signature::from_bytes(&signature);

        Ok(verifying_key
            .verify_strict(session.message.as_bytes(), &signature)
            .is_ok())
    }
}


#[cfg(test)]
mod tests {
    use super::test_keys::*;
    use super::*;
    use crate::service::siwx::{SiwxMessage, SiwxMessageData};
    use ed25519_dalek::Signer;

    fn session(address: &str, message: &str, signature: String) -> SiwxSession {
        SiwxSession {
            data: SiwxMessageData {
                account_address: address.to_string(),
                chain_id: "eip155:1".parse().unwrap(),
                network_name: "Ethereum".to_string(),
                domain: "example.com".to_string(),
                uri: "https://example.com".to_string(),
                version: "1".to_string(),
                nonce: "n".to_string(),
                statement: None,
                resources: vec![],
                request_id: None,
                issued_at: chrono::Utc::now(),
                expiration_time: None,
                not_before: None,
            },
            message: message.to_string(),
            signature,
        }
    }

    #[test]
    fn test_eip155_valid_signature() {
        let key = evm_key(7);
        let address = evm_address(&key);
        let message = "example.com wants you to sign in";
        let s = session(&address.to_uppercase().replace("0X", "0x"), message, evm_sign(&key, message));
        assert!(Eip155Verifier.verify(&s).unwrap());
    }

    #[test]
    fn test_eip155_wrong_signer() {
        let key = evm_key(7);
        let other = evm_address(&evm_key(9));
        let message = "hello";
        let s = session(&other, message, evm_sign(&key, message));
        assert!(!Eip155Verifier.verify(&s).unwrap());
    }

    #[test]
    fn test_eip155_tampered_message() {
        let key = evm_key(3);
        let address = evm_address(&key);
        let s = session(&address, "hello!", evm_sign(&key, "hello"));
        assert!(!Eip155Verifier.verify(&s).unwrap_or(false));
    }

    #[test]
    fn test_eip155_malformed_signature() {
        let s = session("0xabc", "hello", "0x1234".to_string());
        assert!(Eip155Verifier.verify(&s).is_err());
    }

    #[test]
    fn test_solana_signature() {
        let key = ed25519_dalek::SigningKey::from_bytes(&[5u8; 32]);
        let address = bs58::encode(key.verifying_key().to_bytes()).into_string();
        let message = SiwxMessage::new(session(&address, "", String::new()).data).to_string();
        let signature = bs58::encode(key.sign(message.as_bytes()).to_bytes()).into_string();

        let valid = session(&address, &message, signature.clone());
        assert!(SolanaVerifier.verify(&valid).unwrap());

        let tampered = session(&address, "other", signature);
        assert!(!SolanaVerifier.verify(&tampered).unwrap());
    }
}
