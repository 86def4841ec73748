use crate::{ExchangeError, PublicKey, Signature};
use anyhow::Result;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

/// Base of the URL shown in this device's own QR code
pub const DEFAULT_EXCHANGE_URL: &str = "https://triple-handshake.vercel.app";

const PUBLIC_KEY_PARAM: &str = "public_key=";

/// Characters left untouched by URI-component encoding
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// A scanned QR payload, classified by shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPayload {
    /// A bare public key, either from the exchange URL or as raw text
    PublicKeyOnly(String),
    /// A peer's key together with its signature over ours
    SignedKey {
        public_key: String,
        signed_key: String,
    },
}

/// The response shown back to the peer after a successful scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPayload {
    /// This device's public key
    pub public_key: String,
    /// This device's signature over the peer's raw public key
    pub signed_key: String,
}

impl OutboundPayload {
    pub fn new(public_key: &PublicKey, signature: &Signature) -> Self {
        Self {
            public_key: public_key.to_base64(),
            signed_key: signature.to_base64(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Classifies scanned text and encodes responses for display.
#[derive(Debug, Clone)]
pub struct PayloadCodec {
    key_url_prefix: String,
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new(DEFAULT_EXCHANGE_URL)
    }
}

impl PayloadCodec {
    pub fn new(exchange_url: &str) -> Self {
        Self {
            key_url_prefix: format!("{exchange_url}?{PUBLIC_KEY_PARAM}"),
        }
    }

    /// The text of this device's own QR code
    pub fn public_key_uri(&self, public_key: &PublicKey) -> String {
        format!("{}{}", self.key_url_prefix, public_key.to_base64())
    }

    /// Percent-decode and classify scanned text.
    ///
    /// Fails only when the escapes do not decode to UTF-8.
    pub fn classify(&self, scanned: &str) -> Result<ScanPayload, ExchangeError> {
        Ok(self.classify_decoded(&percent_decode(scanned)?))
    }

    /// Classify already-decoded text.
    ///
    /// Anything that is neither the exchange URL nor a signed JSON object is
    /// taken as a raw key; bad keys are caught at signing.
    pub fn classify_decoded(&self, text: &str) -> ScanPayload {
        if let Some(key) = text.strip_prefix(self.key_url_prefix.as_str()) {
            return ScanPayload::PublicKeyOnly(key.to_string());
        }

        if let Some((public_key, signed_key)) = signed_key_fields(text) {
            return ScanPayload::SignedKey {
                public_key,
                signed_key,
            };
        }

        ScanPayload::PublicKeyOnly(text.to_string())
    }

    /// Compact JSON, percent-encoded as a whole: the inverse of `classify`.
    pub fn encode(&self, payload: &OutboundPayload) -> Result<String> {
        Ok(percent_encode(&payload.to_json()?))
    }
}

/// Both fields of a JSON object, present as non-empty strings.
fn signed_key_fields(text: &str) -> Option<(String, String)> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;
    let public_key = object.get("publicKey")?.as_str()?;
    let signed_key = object.get("signedKey")?.as_str()?;
    if public_key.is_empty() || signed_key.is_empty() {
        return None;
    }
    Some((public_key.to_string(), signed_key.to_string()))
}

pub fn percent_encode(text: &str) -> String {
    utf8_percent_encode(text, URI_COMPONENT).to_string()
}

/// Undo URI-component encoding. A `%` not followed by two hex digits is kept
/// as is; escapes that decode to invalid UTF-8 are an error.
pub fn percent_decode(text: &str) -> Result<String, ExchangeError> {
    percent_decode_str(text)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|err| ExchangeError::Decode(format!("malformed percent-encoding: {err}")))
}
