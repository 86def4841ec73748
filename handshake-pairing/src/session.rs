use crate::exchange::{ExchangeEngine, Notification, ScanOutcome};
use crate::identity_store::IdentityStore;
use crate::payload::OutboundPayload;
use crate::storage::Storage;
use crate::trust_store::TrustStore;
use crate::{ExchangeError, Keypair};
use anyhow::Result;
use log::{debug, warn};

/// A restartable source of decoded QR text, such as a camera scanner.
pub trait ScanSource {
    fn start(&mut self) -> Result<()>;

    /// The next decoded payload, or `None` once the source is exhausted.
    fn next_scan(&mut self) -> Result<Option<String>>;

    fn stop(&mut self);
}

/// Decodes a QR code out of a still image.
pub trait ImageDecoder {
    fn decode(&self, image: &[u8]) -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingScan,
    ResponseReady(OutboundPayload),
}

/// One device's exchange session: its identity, its verified peers, and the
/// response currently on display.
///
/// All mutations go through `&mut self`, so two scans can never race on the
/// same trust store.
pub struct ExchangeSession<S> {
    engine: ExchangeEngine,
    identity: Keypair,
    trust: TrustStore<S>,
    state: SessionState,
}

impl<S: Storage + Clone> ExchangeSession<S> {
    /// Load (or create) the identity and the trust store from one storage.
    pub fn open(storage: S, engine: ExchangeEngine) -> Result<Self, ExchangeError> {
        let identity = IdentityStore::open(storage.clone()).load()?;
        let trust = TrustStore::load(storage)?;
        Ok(Self::new(engine, identity, trust))
    }
}

impl<S: Storage> ExchangeSession<S> {
    pub fn new(engine: ExchangeEngine, identity: Keypair, trust: TrustStore<S>) -> Self {
        Self {
            engine,
            identity,
            trust,
            state: SessionState::AwaitingScan,
        }
    }

    pub fn identity(&self) -> &Keypair {
        &self.identity
    }

    pub fn trust(&self) -> &TrustStore<S> {
        &self.trust
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Text of this device's own QR code
    pub fn public_key_uri(&self) -> String {
        self.engine
            .codec()
            .public_key_uri(&self.identity.public_key())
    }

    pub fn current_response(&self) -> Option<&OutboundPayload> {
        match &self.state {
            SessionState::ResponseReady(payload) => Some(payload),
            SessionState::AwaitingScan => None,
        }
    }

    /// The current response encoded as QR text
    pub fn current_response_text(&self) -> Result<Option<String>> {
        self.current_response()
            .map(|payload| self.engine.codec().encode(payload))
            .transpose()
    }

    /// Process a decoded scan. A success replaces the current response; a
    /// failure leaves the session as it was.
    pub fn handle_scan(&mut self, scanned: &str) -> ScanOutcome {
        let outcome = self
            .engine
            .process_scan(scanned, &self.identity, &mut self.trust);
        if let Some(response) = &outcome.response {
            self.state = SessionState::ResponseReady(response.clone());
        }
        outcome
    }

    /// Process an uploaded image through the decode collaborator.
    pub fn handle_upload(&mut self, decoder: &dyn ImageDecoder, image: &[u8]) -> ScanOutcome {
        match decoder.decode(image) {
            Ok(Some(text)) => self.handle_scan(&text),
            Ok(None) => ScanOutcome {
                response: None,
                inserted: None,
                notification: Notification::warning("No QR code found in image"),
            },
            Err(err) => {
                warn!("image decode failed: {err:#}");
                ScanOutcome {
                    response: None,
                    inserted: None,
                    notification: Notification::error(format!(
                        "Failed to read QR code from image: {err:#}"
                    )),
                }
            }
        }
    }

    /// Feed scans from `source` until one succeeds or the source runs dry.
    ///
    /// The source is always stopped before returning. Returns the successful
    /// outcome, if any.
    pub fn run(
        &mut self,
        source: &mut dyn ScanSource,
        mut on_outcome: impl FnMut(&ScanOutcome),
    ) -> Result<Option<ScanOutcome>> {
        source.start()?;
        let result = self.drain(source, &mut on_outcome);
        source.stop();
        debug!("scan source stopped");
        result
    }

    fn drain(
        &mut self,
        source: &mut dyn ScanSource,
        on_outcome: &mut impl FnMut(&ScanOutcome),
    ) -> Result<Option<ScanOutcome>> {
        while let Some(scanned) = source.next_scan()? {
            let outcome = self.handle_scan(&scanned);
            on_outcome(&outcome);
            if outcome.is_success() {
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }

    /// Drop every verified key.
    pub fn clear_verified(&mut self) -> Result<(), ExchangeError> {
        self.trust.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::NotificationKind;
    use crate::SqliteStorage;
    use anyhow::anyhow;
    use k9::assert_equal;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeScanSource {
        scans: VecDeque<String>,
        started: bool,
        stopped: bool,
        fail_after: Option<usize>,
    }

    impl FakeScanSource {
        fn with(scans: &[&str]) -> Self {
            Self {
                scans: scans.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    impl ScanSource for FakeScanSource {
        fn start(&mut self) -> Result<()> {
            self.started = true;
            Ok(())
        }

        fn next_scan(&mut self) -> Result<Option<String>> {
            if let Some(n) = self.fail_after {
                if n == 0 {
                    return Err(anyhow!("camera disconnected"));
                }
                self.fail_after = Some(n - 1);
            }
            Ok(self.scans.pop_front())
        }

        fn stop(&mut self) {
            self.stopped = true;
        }
    }

    struct FixedDecoder(Option<String>);

    impl ImageDecoder for FixedDecoder {
        fn decode(&self, _image: &[u8]) -> Result<Option<String>> {
            Ok(self.0.clone())
        }
    }

    fn session() -> ExchangeSession<SqliteStorage> {
        ExchangeSession::open(SqliteStorage::in_memory().unwrap(), ExchangeEngine::default())
            .unwrap()
    }

    #[test]
    fn open_reuses_persisted_identity() {
        let storage = SqliteStorage::in_memory().unwrap();
        let a = ExchangeSession::open(storage.clone(), ExchangeEngine::default()).unwrap();
        let b = ExchangeSession::open(storage, ExchangeEngine::default()).unwrap();

        assert_equal!(a.identity().public_key(), b.identity().public_key());
    }

    #[test]
    fn run_stops_at_first_success() {
        let mut session = session();
        let peer = Keypair::generate().public_key().to_base64();
        let mut source = FakeScanSource::with(&["garbage", peer.as_str(), "never-read"]);
        let mut seen = vec![];

        let outcome = session
            .run(&mut source, |o| seen.push(o.notification.kind))
            .unwrap()
            .unwrap();

        assert_equal!(
            seen,
            vec![NotificationKind::Error, NotificationKind::Success]
        );
        assert!(source.started && source.stopped);
        assert_equal!(source.scans.len(), 1);
        assert_equal!(
            session.state(),
            &SessionState::ResponseReady(outcome.response.unwrap())
        );
        assert!(session.current_response_text().unwrap().is_some());
    }

    #[test]
    fn run_stops_source_on_error() {
        let mut session = session();
        let mut source = FakeScanSource {
            fail_after: Some(0),
            ..Default::default()
        };

        assert!(session.run(&mut source, |_| {}).is_err());
        assert!(source.stopped);
        assert_equal!(session.state(), &SessionState::AwaitingScan);
    }

    #[test]
    fn failed_scan_keeps_previous_response() {
        let mut session = session();
        let peer = Keypair::generate().public_key().to_base64();

        session.handle_scan(&peer);
        let before = session.current_response().cloned();
        session.handle_scan("not-base64!!");

        assert!(before.is_some());
        assert_equal!(session.current_response().cloned(), before);
    }

    #[test]
    fn upload_without_qr_code_warns() {
        let mut session = session();

        let outcome = session.handle_upload(&FixedDecoder(None), b"png");
        assert_equal!(outcome.notification.kind, NotificationKind::Warning);
        assert_equal!(session.state(), &SessionState::AwaitingScan);
    }

    #[test]
    fn upload_goes_through_the_engine() {
        let mut session = session();
        let peer = Keypair::generate();
        let payload = format!(
            r#"{{"publicKey":"{}","signedKey":"{}"}}"#,
            peer.public_key().to_base64(),
            peer.sign_public_key(&session.identity().public_key()).to_base64()
        );

        let outcome = session.handle_upload(&FixedDecoder(Some(payload)), b"png");
        assert!(outcome.is_success());
        assert_equal!(session.trust().len(), 1);
        assert!(session.trust().list()[0]
            .countersigned_by_peer(&session.identity().public_key()));

        session.clear_verified().unwrap();
        assert!(session.trust().is_empty());
    }
}
