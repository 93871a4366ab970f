//! Random values bound to an authorization request
//!
//! The PKCE code verifier and S256 challenge (RFC 7636) and the OpenID nonce.
//! Both the verifier and the nonce are stashed into the token before the
//! redirect and checked when the callback comes back.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::constants::{NONCE_LENGTH, VERIFIER_LENGTH};

/// Random URL-safe string of exactly `len` characters.
///
/// Draws `2 * len` random bytes and truncates their base64url encoding, so
/// the output only contains `[A-Za-z0-9_-]`.
pub fn random_string(len: usize) -> String {
    let mut bytes = vec![0u8; len * 2];
    rand::rng().fill(bytes.as_mut_slice());
    let mut encoded = URL_SAFE_NO_PAD.encode(&bytes);
    encoded.truncate(len);
    encoded
}

/// Generate a PKCE code verifier.
pub fn generate_verifier() -> String {
    random_string(VERIFIER_LENGTH)
}

/// Generate the nonce sent with OpenID authentication requests.
pub fn generate_nonce() -> String {
    random_string(NONCE_LENGTH)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`, no padding.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}
