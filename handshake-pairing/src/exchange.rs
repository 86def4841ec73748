//! The scan-then-sign protocol step.
//!
//! A scan is classified, the peer's key is countersigned with this device's
//! identity, and a signed peer key is recorded as verified. Signing happens
//! before any trust mutation, so a bad key never leaves partial state behind.

use crate::payload::{OutboundPayload, PayloadCodec, ScanPayload};
use crate::storage::Storage;
use crate::trust_store::{TrustStore, VerifiedEntry};
use crate::{ExchangeError, Keypair, PublicKey};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Info,
    Warning,
    Error,
}

/// A transient message for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, message)
    }

    fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Everything one scan produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// The response to show back to the peer; `None` on failure
    pub response: Option<OutboundPayload>,
    /// The entry added to the trust store, if any
    pub inserted: Option<VerifiedEntry>,
    pub notification: Notification,
}

impl ScanOutcome {
    pub fn is_success(&self) -> bool {
        self.response.is_some()
    }

    fn failed(err: &ExchangeError) -> Self {
        Self {
            response: None,
            inserted: None,
            notification: Notification::error(format!("Failed to process QR code: {err}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExchangeEngine {
    codec: PayloadCodec,
}

impl ExchangeEngine {
    pub fn new(codec: PayloadCodec) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &PayloadCodec {
        &self.codec
    }

    /// Handle one decoded scan.
    ///
    /// Never fails: errors become an error notification, with the trust store
    /// left exactly as it was and no response produced.
    pub fn process_scan<S: Storage>(
        &self,
        scanned: &str,
        identity: &Keypair,
        trust: &mut TrustStore<S>,
    ) -> ScanOutcome {
        match self.try_process_scan(scanned, identity, trust) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("scan rejected: {err}");
                ScanOutcome::failed(&err)
            }
        }
    }

    fn try_process_scan<S: Storage>(
        &self,
        scanned: &str,
        identity: &Keypair,
        trust: &mut TrustStore<S>,
    ) -> Result<ScanOutcome, ExchangeError> {
        match self.codec.classify(scanned)? {
            ScanPayload::PublicKeyOnly(peer_key) => {
                let response = countersign(identity, &peer_key)?;
                Ok(ScanOutcome {
                    response: Some(response),
                    inserted: None,
                    notification: Notification::success("Response QR code generated"),
                })
            }
            ScanPayload::SignedKey {
                public_key,
                signed_key,
            } => {
                let response = countersign(identity, &public_key)?;

                if trust.has(&public_key) {
                    return Ok(ScanOutcome {
                        response: Some(response),
                        inserted: None,
                        notification: Notification::info("Key already verified"),
                    });
                }

                let entry = VerifiedEntry::new(public_key, signed_key);
                if !entry.countersigned_by_peer(&identity.public_key()) {
                    debug!(
                        "signature from {} does not cover this device's key",
                        entry.public_key
                    );
                }
                trust.add(entry.clone())?;
                Ok(ScanOutcome {
                    response: Some(response),
                    inserted: Some(entry),
                    notification: Notification::success("New key verified and saved"),
                })
            }
        }
    }
}

/// Sign the peer's raw key bytes with this device's identity.
fn countersign(identity: &Keypair, peer_key: &str) -> Result<OutboundPayload, ExchangeError> {
    let peer = PublicKey::from_base64(peer_key)?;
    let signature = identity.sign_public_key(&peer);
    Ok(OutboundPayload::new(&identity.public_key(), &signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::percent_encode;
    use crate::storage::StoreOp;
    use crate::{Signature, SqliteStorage};
    use anyhow::anyhow;
    use k9::assert_equal;

    fn setup() -> (ExchangeEngine, Keypair, TrustStore<SqliteStorage>) {
        let trust = TrustStore::load(SqliteStorage::in_memory().unwrap()).unwrap();
        (ExchangeEngine::default(), Keypair::generate(), trust)
    }

    fn signed_payload(public_key: &str, signed_key: &str) -> String {
        percent_encode(&format!(
            r#"{{"publicKey":"{public_key}","signedKey":"{signed_key}"}}"#
        ))
    }

    fn assert_countersigned(response: &OutboundPayload, me: &Keypair, peer: &PublicKey) {
        assert_equal!(response.public_key, me.public_key().to_base64());
        let sig = Signature::from_base64(&response.signed_key).unwrap();
        me.public_key().verify(peer.as_bytes(), &sig).unwrap();
    }

    #[test]
    fn signed_key_is_recorded_and_answered() {
        let (engine, me, mut trust) = setup();
        let peer = Keypair::generate().public_key();

        let outcome =
            engine.process_scan(&signed_payload(&peer.to_base64(), "S2"), &me, &mut trust);

        assert_equal!(outcome.notification.kind, NotificationKind::Success);
        assert_countersigned(outcome.response.as_ref().unwrap(), &me, &peer);
        assert_equal!(trust.len(), 1);
        let entry = &trust.list()[0];
        assert_equal!(entry.public_key, peer.to_base64());
        assert_equal!(entry.signed_key, "S2".to_string());
        assert_equal!(outcome.inserted.as_ref(), Some(entry));
    }

    #[test]
    fn rescan_is_deduplicated_but_answered_again() {
        let (engine, me, mut trust) = setup();
        let peer = Keypair::generate().public_key();
        let scanned = signed_payload(&peer.to_base64(), "S1");

        let first = engine.process_scan(&scanned, &me, &mut trust);
        let created_at = trust.list()[0].created_at;
        let second = engine.process_scan(
            &signed_payload(&peer.to_base64(), "S-other"),
            &me,
            &mut trust,
        );

        assert_equal!(trust.len(), 1);
        assert_equal!(trust.list()[0].signed_key, "S1".to_string());
        assert_equal!(trust.list()[0].created_at, created_at);
        assert_equal!(second.inserted, None);
        assert_equal!(second.notification.kind, NotificationKind::Info);
        assert!(first.is_success());
        assert_countersigned(second.response.as_ref().unwrap(), &me, &peer);
    }

    #[test]
    fn bare_key_is_answered_without_trust_mutation() {
        let (engine, me, mut trust) = setup();
        let peer = Keypair::generate().public_key();

        let raw = engine.process_scan(&percent_encode(&peer.to_base64()), &me, &mut trust);
        let via_url = engine.process_scan(
            &engine.codec().public_key_uri(&peer),
            &me,
            &mut trust,
        );

        for outcome in [raw, via_url] {
            assert_countersigned(outcome.response.as_ref().unwrap(), &me, &peer);
            assert_equal!(outcome.inserted, None);
        }
        assert!(trust.is_empty());
    }

    #[test]
    fn bad_input_mutates_nothing() {
        let (engine, me, mut trust) = setup();
        let short_key = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            [1u8; 31],
        );

        for scanned in [
            "not-base64!!".to_string(),
            signed_payload("not-base64!!", "S"),
            signed_payload(&short_key, "S"),
            "https://triple-handshake.vercel.app?public_key=%%%".to_string(),
        ] {
            let outcome = engine.process_scan(&scanned, &me, &mut trust);
            assert_equal!(outcome.response, None);
            assert_equal!(outcome.inserted, None);
            assert_equal!(outcome.notification.kind, NotificationKind::Error);
        }
        assert!(trust.is_empty());
    }

    #[test]
    fn malformed_escape_is_rejected_before_recording() {
        let (engine, me, mut trust) = setup();
        let peer = Keypair::generate().public_key();
        let scanned = format!(
            "{}%FF%22%7D",
            percent_encode(&format!(
                r#"{{"publicKey":"{}","signedKey":"S"#,
                peer.to_base64()
            ))
        );

        let outcome = engine.process_scan(&scanned, &me, &mut trust);

        assert_equal!(outcome.response, None);
        assert_equal!(outcome.inserted, None);
        assert_equal!(outcome.notification.kind, NotificationKind::Error);
        assert!(outcome.notification.message.contains("percent-encoding"));
        assert!(trust.is_empty());
    }

    struct FailingWrites(SqliteStorage);

    impl Storage for FailingWrites {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.0.get(key)
        }

        fn keys(&self) -> anyhow::Result<Vec<String>> {
            self.0.keys()
        }

        fn apply(&self, _ops: &[StoreOp]) -> anyhow::Result<()> {
            Err(anyhow!("disk full"))
        }
    }

    #[test]
    fn storage_failure_yields_no_response() {
        let engine = ExchangeEngine::default();
        let me = Keypair::generate();
        let mut trust =
            TrustStore::load(FailingWrites(SqliteStorage::in_memory().unwrap())).unwrap();
        let peer = Keypair::generate().public_key();

        let outcome =
            engine.process_scan(&signed_payload(&peer.to_base64(), "S"), &me, &mut trust);

        assert_equal!(outcome.response, None);
        assert_equal!(outcome.notification.kind, NotificationKind::Error);
        assert!(outcome.notification.message.contains("disk full"));
        assert!(trust.is_empty());
    }
}
