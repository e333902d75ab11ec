//! Webhook signature verification.
//!
//! GitHub signs every delivery with an HMAC of the raw request body keyed by
//! the webhook secret and sends it as `<algorithm>=<hex digest>`. The body must
//! be verified before anything parses it.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::error::SignatureError;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Header carrying the `sha256=` signature.
pub const SIGNATURE_256_HEADER: &str = "X-Hub-Signature-256";
/// Legacy header carrying the `sha1=` signature.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
}

impl SignatureAlgorithm {
    pub fn prefix(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1 => "sha1",
            SignatureAlgorithm::Sha256 => "sha256",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "sha1" => Some(SignatureAlgorithm::Sha1),
            "sha256" => Some(SignatureAlgorithm::Sha256),
            _ => None,
        }
    }
}

/// Split `<algorithm>=<hex digest>` into its parts.
pub fn parse_signature_header(header: &str) -> Result<(SignatureAlgorithm, &str), SignatureError> {
    let (prefix, digest) = header
        .trim()
        .split_once('=')
        .ok_or(SignatureError::MalformedHeader)?;
    let algorithm =
        SignatureAlgorithm::from_prefix(prefix).ok_or(SignatureError::MalformedHeader)?;

    if digest.is_empty() || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SignatureError::MalformedHeader);
    }

    Ok((algorithm, digest))
}

fn hex_mac<M: Mac + KeyInit>(secret: &[u8], body: &[u8]) -> Option<String> {
    let mut mac = <M as KeyInit>::new_from_slice(secret).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Lowercase hex HMAC of `body` keyed by `secret`.
pub fn compute_signature(algorithm: SignatureAlgorithm, secret: &str, body: &[u8]) -> Option<String> {
    match algorithm {
        SignatureAlgorithm::Sha1 => hex_mac::<HmacSha1>(secret.as_bytes(), body),
        SignatureAlgorithm::Sha256 => hex_mac::<HmacSha256>(secret.as_bytes(), body),
    }
}

/// The full header value GitHub would send for `body`.
pub fn signature_header(algorithm: SignatureAlgorithm, secret: &str, body: &[u8]) -> Option<String> {
    compute_signature(algorithm, secret, body)
        .map(|digest| format!("{}={}", algorithm.prefix(), digest))
}

/// Verify `header` against the raw request `body`.
///
/// The hex digests are compared in constant time.
pub fn verify_signature(body: &[u8], header: &str, secret: &str) -> Result<(), SignatureError> {
    let (algorithm, digest) = parse_signature_header(header)?;
    let expected = compute_signature(algorithm, secret, body).ok_or(SignatureError::Mismatch)?;

    let provided = digest.to_ascii_lowercase();
    if expected.as_bytes().ct_eq(provided.as_bytes()).into() {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
