use crate::ExchangeError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Serialize};

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
/// Seed followed by the public key, the layout peers exchange as `secretKey`.
pub const SECRET_KEY_LEN: usize = 64;

/// Ed25519 public key identifying a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "base64_serde")] [u8; PUBLIC_KEY_LEN]);

/// Detached Ed25519 signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "base64_serde")] [u8; SIGNATURE_LEN]);

/// This device's long-term signing keypair
pub struct Keypair {
    signing_key: ed25519_dalek::SigningKey,
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key().to_base64())
            .finish_non_exhaustive()
    }
}

impl Keypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let signing_key = ed25519_dalek::SigningKey::generate(&mut rng);
        Self { signing_key }
    }

    /// Rebuild from the 64-byte `seed || public` form.
    ///
    /// Fails if the embedded public key does not belong to the seed.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, ExchangeError> {
        let arr: [u8; SECRET_KEY_LEN] = bytes.try_into().map_err(|_| {
            ExchangeError::Decode(format!("invalid secret key length: {}", bytes.len()))
        })?;
        let signing_key = ed25519_dalek::SigningKey::from_keypair_bytes(&arr)
            .map_err(|e| ExchangeError::Crypto(format!("secret key rejected: {e}")))?;
        Ok(Self { signing_key })
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_LEN] {
        self.signing_key.to_keypair_bytes()
    }

    pub fn secret_key_base64(&self) -> String {
        STANDARD.encode(self.secret_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message, producing a detached signature
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }

    /// Countersign a peer's key: a detached signature over its raw bytes.
    pub fn sign_public_key(&self, peer: &PublicKey) -> Signature {
        self.sign(peer.as_bytes())
    }
}

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a scanned key.
    ///
    /// Malformed base64 or a wrong length is a decode error; 32 bytes that are
    /// not a curve point are a crypto error.
    pub fn from_base64(s: &str) -> Result<Self, ExchangeError> {
        let bytes = STANDARD
            .decode(s)
            .map_err(|e| ExchangeError::Decode(format!("public key is not base64: {e}")))?;
        let arr: [u8; PUBLIC_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            ExchangeError::Decode(format!("invalid public key length: {}", bytes.len()))
        })?;
        ed25519_dalek::VerifyingKey::from_bytes(&arr)
            .map_err(|e| ExchangeError::Crypto(format!("public key rejected: {e}")))?;
        Ok(Self(arr))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Verify a detached signature made by this key
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), ExchangeError> {
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&self.0)
            .map_err(|e| ExchangeError::Crypto(e.to_string()))?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        verifying_key
            .verify(message, &sig)
            .map_err(|e| ExchangeError::Crypto(format!("signature verification failed: {e}")))
    }

    /// A short, human-readable fingerprint suitable for terminal output.
    pub fn fingerprint_short(&self) -> String {
        let b64 = self.to_base64();
        let prefix: String = b64.chars().take(8).collect();
        let suffix: String = b64
            .chars()
            .rev()
            .take(6)
            .collect::<String>()
            .chars()
            .rev()
            .collect();
        format!("{prefix}…{suffix}")
    }
}

impl Signature {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, ExchangeError> {
        let bytes = STANDARD
            .decode(s)
            .map_err(|e| ExchangeError::Decode(format!("signature is not base64: {e}")))?;
        let arr: [u8; SIGNATURE_LEN] = bytes.as_slice().try_into().map_err(|_| {
            ExchangeError::Decode(format!("invalid signature length: {}", bytes.len()))
        })?;
        Ok(Signature(arr))
    }
}

mod base64_serde {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(s).map_err(serde::de::Error::custom)?;
        bytes.as_slice().try_into().map_err(|_| {
            serde::de::Error::custom(format!("expected {} bytes, got {}", N, bytes.len()))
        })
    }
}
