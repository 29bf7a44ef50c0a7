//! secp256k1 signing of unsigned transaction envelopes.
//!
//! The digest is SHA-256 over the raw envelope bytes, left-padded with
//! zeros to 32 bytes; signatures are exported in DER form.

use super::error::ForgeError;
use once_cell::sync::Lazy;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::fmt;

static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Shared signing/verification context
pub fn context() -> &'static Secp256k1<All> {
    &SECP
}

/// Left-pad `bytes` with zeros to exactly 32 bytes
pub fn pad32(bytes: &[u8]) -> Result<[u8; 32], ForgeError> {
    if bytes.len() > 32 {
        return Err(ForgeError::SigningFailed(format!(
            "digest is {} bytes, expected at most 32",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}

/// Message to sign for a hex-encoded unsigned envelope
pub fn message_for(unsigned_hex: &str) -> Result<Message, ForgeError> {
    let raw = hex::decode(unsigned_hex)
        .map_err(|e| ForgeError::SigningFailed(format!("unsigned transaction is not hex: {}", e)))?;
    let digest = Sha256::digest(&raw);
    Ok(Message::from_digest(pad32(&digest)?))
}

/// An account's private key and derived public key.
pub struct SigningKey {
    secret: SecretKey,
    public_hex: String,
}

impl SigningKey {
    /// Parse a hex private key (optional `0x` prefix)
    pub fn from_hex(private_key: &str) -> Result<Self, ForgeError> {
        let trimmed = private_key.trim();
        let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let raw = hex::decode(hex_part)
            .map_err(|e| ForgeError::SigningFailed(format!("private key is not hex: {}", e)))?;
        let secret = SecretKey::from_slice(&raw)
            .map_err(|e| ForgeError::SigningFailed(format!("invalid private key: {}", e)))?;
        let public = PublicKey::from_secret_key(context(), &secret);
        Ok(Self {
            secret,
            public_hex: hex::encode(public.serialize_uncompressed()),
        })
    }

    /// Uncompressed public key, hex without prefix
    pub fn public_key_hex(&self) -> &str {
        &self.public_hex
    }

    /// DER signature (hex) over the unsigned envelope
    pub fn sign_unsigned(&self, unsigned_hex: &str) -> Result<String, ForgeError> {
        let message = message_for(unsigned_hex)?;
        let signature = context().sign_ecdsa(&message, &self.secret);
        Ok(hex::encode(signature.serialize_der()))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("public_key", &self.public_hex)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::ecdsa::Signature;

    const KEY: &str = "0x0101010101010101010101010101010101010101010101010101010101010101";

    #[test]
    fn test_pad32_left_pads() {
        let padded = pad32(&[0xab, 0xcd]).unwrap();
        assert_eq!(&padded[..30], &[0u8; 30]);
        assert_eq!(&padded[30..], &[0xab, 0xcd]);
        assert!(pad32(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_public_key_is_uncompressed_hex() {
        let key = SigningKey::from_hex(KEY).unwrap();
        assert_eq!(key.public_key_hex().len(), 130);
        assert!(key.public_key_hex().starts_with("04"));
    }

    #[test]
    fn test_signature_verifies_against_digest() {
        let key = SigningKey::from_hex(KEY).unwrap();
        let unsigned = hex::encode(b"some unsigned envelope");
        let sig_hex = key.sign_unsigned(&unsigned).unwrap();

        let sig = Signature::from_der(&hex::decode(&sig_hex).unwrap()).unwrap();
        let public = PublicKey::from_slice(&hex::decode(key.public_key_hex()).unwrap()).unwrap();
        let message = message_for(&unsigned).unwrap();
        assert!(context().verify_ecdsa(&message, &sig, &public).is_ok());
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(matches!(SigningKey::from_hex("zz"), Err(ForgeError::SigningFailed(_))));
        assert!(matches!(SigningKey::from_hex("00"), Err(ForgeError::SigningFailed(_))));
        let key = SigningKey::from_hex(KEY).unwrap();
        assert!(key.sign_unsigned("not-hex").is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = SigningKey::from_hex(KEY).unwrap();
        assert!(format!("{:?}", key).contains("<redacted>"));
    }
}
