//! Webhook authenticity check over the raw request body.
//!
//! Two header forms are accepted:
//! - the shared secret itself (GitLab's `X-Gitlab-Token` style)
//! - `sha256=<hex>` where `<hex>` is HMAC-SHA256(secret, body)
//!
//! The body must be the exact bytes received. Parsing and re-serialising the
//! JSON first changes key order and whitespace and breaks the HMAC.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::errors::AuthenticationError;

type HmacSha256 = Hmac<Sha256>;

const SHA256_PREFIX: &str = "sha256=";

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify a delivery. A missing header or an empty configured secret is
    /// always rejected.
    pub fn verify(&self, body: &[u8], header: Option<&str>) -> Result<(), AuthenticationError> {
        let header = header.ok_or(AuthenticationError::MissingHeader)?;
        if self.is_valid(body, header) {
            Ok(())
        } else {
            Err(AuthenticationError::Mismatch)
        }
    }

    #[must_use]
    pub fn is_valid(&self, body: &[u8], header: &str) -> bool {
        if self.secret.is_empty() {
            return false;
        }
        let header = header.trim();

        if let Some(provided) = header.strip_prefix(SHA256_PREFIX) {
            let Some(expected) = hmac_hex(self.secret.as_bytes(), body) else {
                return false;
            };
            let provided = provided.to_ascii_lowercase();
            return constant_time_eq(expected.as_bytes(), provided.as_bytes());
        }

        constant_time_eq(self.secret.as_bytes(), header.as_bytes())
    }

    /// The `sha256=<hex>` header value for `body`.
    pub fn sign(&self, body: &[u8]) -> Option<String> {
        hmac_hex(self.secret.as_bytes(), body).map(|hex| format!("{}{}", SHA256_PREFIX, hex))
    }
}

fn hmac_hex(secret: &[u8], body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Length is checked first; only equal-length inputs reach the constant-time
/// comparison.
fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(provided).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "s3cr3t";
    const BODY: &[u8] = br#"{"object_kind":"note","object_attributes":{"note":"@claude hi"}}"#;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(SECRET)
    }

    #[test]
    fn test_hmac_header_verifies() {
        let v = verifier();
        let header = v.sign(BODY).unwrap();
        assert!(header.starts_with("sha256="));
        assert_eq!(header.len(), "sha256=".len() + 64);
        assert!(v.is_valid(BODY, &header));
        assert_eq!(v.verify(BODY, Some(&header)), Ok(()));
    }

    #[test]
    fn test_single_byte_mutation_fails() {
        let v = verifier();
        let header = v.sign(BODY).unwrap();
        for i in 0..BODY.len() {
            let mut mutated = BODY.to_vec();
            mutated[i] ^= 0x01;
            assert!(!v.is_valid(&mutated, &header), "mutation at byte {} verified", i);
        }
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let v = verifier();
        let header = v.sign(BODY).unwrap();
        assert!(!v.is_valid(BODY, &header[..header.len() - 2]));
        assert!(!v.is_valid(BODY, &format!("{}00", header)));
        assert!(!v.is_valid(BODY, "sha256="));
    }

    #[test]
    fn test_uppercase_hex_accepted() {
        let v = verifier();
        let header = v.sign(BODY).unwrap();
        let upper = format!("sha256={}", header["sha256=".len()..].to_uppercase());
        assert!(v.is_valid(BODY, &upper));
    }

    #[test]
    fn test_raw_secret_header_verifies() {
        let v = verifier();
        assert!(v.is_valid(BODY, SECRET));
        assert!(v.is_valid(b"anything", SECRET));
        assert!(!v.is_valid(BODY, "s3cr3"));
        assert!(!v.is_valid(BODY, "s3cr3t!"));
    }

    #[test]
    fn test_reserialized_body_fails() {
        let v = verifier();
        let header = v.sign(BODY).unwrap();
        let value: serde_json::Value = serde_json::from_slice(BODY).unwrap();
        let pretty = serde_json::to_vec_pretty(&value).unwrap();
        assert!(!v.is_valid(&pretty, &header));
    }

    #[test]
    fn test_missing_header_rejected() {
        assert_eq!(
            verifier().verify(BODY, None),
            Err(AuthenticationError::MissingHeader)
        );
    }

    #[test]
    fn test_empty_secret_rejects_everything() {
        let v = SignatureVerifier::new("");
        assert!(!v.is_valid(BODY, ""));
        let header = v.sign(BODY).unwrap();
        assert!(!v.is_valid(BODY, &header));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let header = SignatureVerifier::new("other").sign(BODY).unwrap();
        assert_eq!(
            verifier().verify(BODY, Some(&header)),
            Err(AuthenticationError::Mismatch)
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", verifier());
        assert!(!rendered.contains(SECRET));
    }
}
