use crate::payload::PayloadCodec;
use crate::storage::{Storage, StoreOp};
use crate::{ExchangeError, Keypair};
use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::info;
use serde::{Deserialize, Serialize};

pub const KEYPAIR_KEY: &str = "myKeyPair";

/// Owns this device's signing keypair inside a `Storage`.
#[derive(Debug, Clone)]
pub struct IdentityStore<S> {
    storage: S,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredKeypair {
    public_key: String,
    secret_key: String,
}

impl<S: Storage> IdentityStore<S> {
    pub fn open(storage: S) -> Self {
        Self { storage }
    }

    /// The persisted keypair, if this device already has one.
    pub fn get(&self) -> Result<Option<Keypair>, ExchangeError> {
        let json = match self.storage.get(KEYPAIR_KEY) {
            Ok(Some(json)) => json,
            Ok(None) => return Ok(None),
            Err(err) => return Err(ExchangeError::Persistence(err)),
        };

        let stored: StoredKeypair = serde_json::from_str(&json)
            .context("parsing stored identity")
            .map_err(ExchangeError::Persistence)?;
        let secret = STANDARD
            .decode(stored.secret_key.as_bytes())
            .context("decoding stored secret key")
            .map_err(ExchangeError::Persistence)?;
        let keypair = Keypair::from_secret_bytes(&secret).map_err(|e| {
            ExchangeError::persistence(anyhow::anyhow!("stored identity is corrupt: {e}"))
        })?;

        if keypair.public_key().to_base64() != stored.public_key {
            return Err(ExchangeError::persistence(anyhow::anyhow!(
                "stored identity is corrupt: public key does not match secret key"
            )));
        }
        Ok(Some(keypair))
    }

    pub fn save(&self, keypair: &Keypair) -> Result<(), ExchangeError> {
        let stored = StoredKeypair {
            public_key: keypair.public_key().to_base64(),
            secret_key: keypair.secret_key_base64(),
        };
        let json = serde_json::to_string(&stored).map_err(ExchangeError::persistence)?;
        self.storage
            .apply(&[StoreOp::put(KEYPAIR_KEY, json)])
            .context("writing identity")
            .map_err(ExchangeError::Persistence)
    }

    /// Load the device identity, creating and persisting one on first run.
    pub fn load(&self) -> Result<Keypair, ExchangeError> {
        if let Some(keypair) = self.get()? {
            return Ok(keypair);
        }
        let keypair = Keypair::generate();
        self.save(&keypair)?;
        info!(
            "created device identity {}",
            keypair.public_key().fingerprint_short()
        );
        Ok(keypair)
    }

    /// The text of this device's own QR code, loading the identity if needed.
    pub fn public_key_uri(&self, codec: &PayloadCodec) -> Result<String, ExchangeError> {
        Ok(codec.public_key_uri(&self.load()?.public_key()))
    }
}
