use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("public key must be 32 hex-encoded bytes")]
    InvalidKey,
    #[error("signature header is not a hex-encoded ed25519 signature")]
    Malformed,
    #[error("signature does not match request")]
    Mismatch,
}

/// Checks the Ed25519 signature the platform attaches to every interaction
/// request. The signed message is the timestamp header followed by the raw
/// body.
#[derive(Debug, Clone)]
pub struct InteractionVerifier {
    key: VerifyingKey,
}

impl InteractionVerifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    pub fn from_hex(public_key: &str) -> Result<Self, SignatureError> {
        let bytes: [u8; 32] = hex::decode(public_key.trim())
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(SignatureError::InvalidKey)?;
        VerifyingKey::from_bytes(&bytes)
            .map(Self::new)
            .map_err(|_| SignatureError::InvalidKey)
    }

    pub fn verify(
        &self,
        timestamp: &str,
        body: &[u8],
        signature_hex: &str,
    ) -> Result<(), SignatureError> {
        let raw = hex::decode(signature_hex.trim()).map_err(|_| SignatureError::Malformed)?;
        let signature = Signature::from_slice(&raw).map_err(|_| SignatureError::Malformed)?;

        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);
        self.key
            .verify(&message, &signature)
            .map_err(|_| SignatureError::Mismatch)
    }
}
