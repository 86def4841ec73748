mod error;
mod exchange;
mod identity_store;
mod keypair;
mod payload;
mod qr;
mod session;
mod storage;
mod trust_store;

pub use error::ExchangeError;
pub use exchange::{ExchangeEngine, Notification, NotificationKind, ScanOutcome};
pub use identity_store::{IdentityStore, KEYPAIR_KEY};
pub use keypair::{Keypair, PublicKey, Signature, PUBLIC_KEY_LEN, SIGNATURE_LEN};
pub use payload::{
    percent_decode, percent_encode, OutboundPayload, PayloadCodec, ScanPayload,
    DEFAULT_EXCHANGE_URL,
};
pub use qr::{render_qr_ascii, render_qr_svg};
pub use session::{ExchangeSession, ImageDecoder, ScanSource, SessionState};
pub use storage::{SqliteStorage, Storage, StoreOp};
pub use trust_store::{TrustStore, VerifiedEntry};
