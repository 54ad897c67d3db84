use ring::hmac;

/// Signs `payload` with HMAC-SHA256 and returns the tag as lowercase hex
pub fn sign(payload: &str, key: &hmac::Key) -> String {
    hex::encode(hmac::sign(key, payload.as_bytes()).as_ref())
}

/// Checks a hex signature against `payload`.
///
/// The tag comparison is constant time. Anything that is not a hex string of the
/// right length is reported as unverified rather than as an error.
pub fn verify(payload: &str, signature: &str, key: &hmac::Key) -> bool {
    let Ok(tag) = hex::decode(signature) else {
        return false;
    };

    hmac::verify(key, payload.as_bytes(), &tag).is_ok()
}

/// Builds an HMAC-SHA256 key from raw secret bytes
pub fn key_from_secret(secret: &[u8]) -> hmac::Key {
    hmac::Key::new(hmac::HMAC_SHA256, secret)
}
