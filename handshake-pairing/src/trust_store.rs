use crate::storage::{Storage, StoreOp};
use crate::{ExchangeError, PublicKey, Signature};
use anyhow::Context;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

const VERIFIED_PREFIX: &str = "verified-";
const CREATED_AT_SUFFIX: &str = "-createdAt";

/// A peer key this device has accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedEntry {
    /// Peer's public key, exactly as scanned
    pub public_key: String,
    /// The peer's signature blob that came with the key
    pub signed_key: String,
    /// Missing for entries written before timestamps were recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl VerifiedEntry {
    pub fn new(public_key: impl Into<String>, signed_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            signed_key: signed_key.into(),
            created_at: Some(Utc::now()),
        }
    }

    /// Whether `signed_key` is the peer's signature over `my_public_key`.
    ///
    /// Informational only; entries are accepted either way.
    pub fn countersigned_by_peer(&self, my_public_key: &PublicKey) -> bool {
        let Ok(peer) = PublicKey::from_base64(&self.public_key) else {
            return false;
        };
        let Ok(signature) = Signature::from_base64(&self.signed_key) else {
            return false;
        };
        peer.verify(my_public_key.as_bytes(), &signature).is_ok()
    }
}

fn verified_key(public_key: &str) -> String {
    format!("{VERIFIED_PREFIX}{public_key}")
}

fn created_at_key(public_key: &str) -> String {
    format!("{public_key}{CREATED_AT_SUFFIX}")
}

/// The set of verified peer keys, mirrored in a `Storage`.
///
/// Every mutation is committed to storage before it is reflected in memory.
pub struct TrustStore<S> {
    storage: S,
    entries: Vec<VerifiedEntry>,
}

impl<S: Storage> TrustStore<S> {
    /// Rebuild the store from persisted `verified-*` keys
    pub fn load(storage: S) -> Result<Self, ExchangeError> {
        let keys = storage.keys().map_err(ExchangeError::Persistence)?;

        let mut entries = Vec::new();
        for key in keys {
            let Some(public_key) = key.strip_prefix(VERIFIED_PREFIX) else {
                continue;
            };
            if let Err(err) = PublicKey::from_base64(public_key) {
                warn!("skipping persisted entry {key}: {err}");
                continue;
            }
            let Some(signed_key) = storage.get(&key).map_err(ExchangeError::Persistence)? else {
                continue;
            };
            let created_at = storage
                .get(&created_at_key(public_key))
                .map_err(ExchangeError::Persistence)?
                .and_then(|ts| match DateTime::parse_from_rfc3339(&ts) {
                    Ok(dt) => Some(dt.with_timezone(&Utc)),
                    Err(err) => {
                        warn!("ignoring bad timestamp for {public_key}: {err}");
                        None
                    }
                });
            entries.push(VerifiedEntry {
                public_key: public_key.to_string(),
                signed_key,
                created_at,
            });
        }

        Ok(Self { storage, entries })
    }

    pub fn has(&self, public_key: &str) -> bool {
        self.entries.iter().any(|e| e.public_key == public_key)
    }

    pub fn get(&self, public_key: &str) -> Option<&VerifiedEntry> {
        self.entries.iter().find(|e| e.public_key == public_key)
    }

    /// Entries in insertion order
    pub fn list(&self) -> &[VerifiedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert unless the key is already present; returns whether it was added.
    pub fn add(&mut self, entry: VerifiedEntry) -> Result<bool, ExchangeError> {
        if self.has(&entry.public_key) {
            return Ok(false);
        }
        PublicKey::from_base64(&entry.public_key)?;

        let mut ops = vec![StoreOp::put(
            verified_key(&entry.public_key),
            entry.signed_key.clone(),
        )];
        if let Some(created_at) = entry.created_at {
            ops.push(StoreOp::put(
                created_at_key(&entry.public_key),
                created_at.to_rfc3339(),
            ));
        }
        self.storage
            .apply(&ops)
            .with_context(|| format!("persisting verified key {}", entry.public_key))
            .map_err(ExchangeError::Persistence)?;

        info!("verified key {}", entry.public_key);
        self.entries.push(entry);
        Ok(true)
    }

    /// Remove every entry, from storage first and then from memory.
    pub fn clear(&mut self) -> Result<(), ExchangeError> {
        // Also sweep persisted keys that `load` skipped, so nothing `verified-*`
        // survives a clear.
        let keys = self.storage.keys().map_err(ExchangeError::Persistence)?;
        let mut ops = Vec::new();
        for key in keys {
            if let Some(public_key) = key.strip_prefix(VERIFIED_PREFIX) {
                ops.push(StoreOp::delete(created_at_key(public_key)));
                ops.push(StoreOp::delete(key));
            }
        }

        self.storage
            .apply(&ops)
            .context("clearing verified keys")
            .map_err(ExchangeError::Persistence)?;

        info!("cleared {} verified keys", self.entries.len());
        self.entries.clear();
        Ok(())
    }
}
