use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::NaiveDate;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::signature;

/// Calendar-day format used on the wire and in API parameters
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const NONCE_LEN: usize = 16;

#[derive(thiserror::Error, Debug)]
pub enum CredentialError {
    #[error("Failed to generate nonce")]
    NonceGeneration,

    #[error("JSON serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Signed per-day credential carried in a ticket QR code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub ticket_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    #[serde(serialize_with = "serialize_date")]
    pub date: NaiveDate,
    pub ticket_code: String,
    pub nonce: String,
    pub signature: String,
}

/// Credential exactly as it was scanned, before any field is interpreted
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCredential {
    ticket_id: String,
    event_id: String,
    user_id: String,
    date: String,
    ticket_code: String,
    nonce: String,
    signature: String,
}

fn serialize_date<S: serde::Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&date.format(DATE_FORMAT).to_string())
}

/// Parses a UUID only if it is already in canonical hyphenated lowercase form,
/// so that every accepted payload has exactly one textual representation.
fn canonical_uuid(raw: &str) -> Option<Uuid> {
    let id = Uuid::parse_str(raw).ok()?;
    (id.hyphenated().to_string() == raw).then_some(id)
}

/// Parses a strict `YYYY-MM-DD` local calendar date
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let date = NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()?;
    (date.format(DATE_FORMAT).to_string() == raw).then_some(date)
}

impl Credential {
    /// Decodes scanned text into a credential.
    ///
    /// Malformed, truncated or incomplete input yields `None`; it never errors.
    /// The signature is not checked here, see [`CredentialCodec::verify`].
    pub fn decode(raw_text: &str) -> Option<Self> {
        let raw: RawCredential = serde_json::from_str(raw_text.trim()).ok()?;

        if raw.ticket_code.is_empty() || raw.nonce.is_empty() || raw.signature.is_empty() {
            return None;
        }

        Some(Self {
            ticket_id: canonical_uuid(&raw.ticket_id)?,
            event_id: canonical_uuid(&raw.event_id)?,
            user_id: canonical_uuid(&raw.user_id)?,
            date: parse_date(&raw.date)?,
            ticket_code: raw.ticket_code,
            nonce: raw.nonce,
            signature: raw.signature,
        })
    }

    /// Serializes the credential to the JSON text rendered into the QR code
    pub fn to_payload(&self) -> Result<String, CredentialError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Field-delimited string the signature is computed over
    fn signing_string(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.ticket_id,
            self.event_id,
            self.user_id,
            self.date.format(DATE_FORMAT),
            self.ticket_code,
            self.nonce
        )
    }
}

/// Encodes and verifies credentials with an injected HMAC key.
///
/// Replacing the key invalidates every credential issued under the old one.
pub struct CredentialCodec {
    key: hmac::Key,
    rng: SystemRandom,
}

impl CredentialCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: signature::key_from_secret(secret),
            rng: SystemRandom::new(),
        }
    }

    /// Builds a freshly signed credential for one ticket and one day
    pub fn encode(
        &self,
        ticket_id: Uuid,
        event_id: Uuid,
        user_id: Uuid,
        ticket_code: &str,
        date: NaiveDate,
    ) -> Result<Credential, CredentialError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CredentialError::NonceGeneration)?;

        let mut credential = Credential {
            ticket_id,
            event_id,
            user_id,
            date,
            ticket_code: ticket_code.to_string(),
            nonce: URL_SAFE_NO_PAD.encode(nonce_bytes),
            signature: String::new(),
        };
        credential.signature = signature::sign(&credential.signing_string(), &self.key);

        Ok(credential)
    }

    /// Recomputes the signature over the received fields and compares in constant time
    pub fn verify(&self, credential: &Credential) -> bool {
        signature::verify(&credential.signing_string(), &credential.signature, &self.key)
    }

    /// Decodes and verifies in one step
    pub fn open(&self, raw_text: &str) -> Option<Credential> {
        Credential::decode(raw_text).filter(|c| self.verify(c))
    }
}
