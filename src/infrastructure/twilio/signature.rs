//! `X-Twilio-Signature` request validation
//!
//! The provider signs each webhook with HMAC-SHA1 keyed by the account auth
//! token, over the full request URL followed by every POST parameter name
//! and value, sorted by name. The digest is sent base64-encoded.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// Compute the signature the provider would send for `url` and `params`
pub fn sign(auth_token: &str, url: &str, params: &[(String, String)]) -> String {
    let mac = digest(auth_token, url, params);
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Check `signature` against `url` and `params`, in constant time
pub fn verify(auth_token: &str, url: &str, params: &[(String, String)], signature: &str) -> bool {
    let expected = match STANDARD.decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    digest(auth_token, url, params).verify_slice(&expected).is_ok()
}

fn digest(auth_token: &str, url: &str, params: &[(String, String)]) -> HmacSha1 {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();

    // HMAC accepts keys of any length
    let mut mac = match HmacSha1::new_from_slice(auth_token.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA1 accepts any key length"),
    };
    mac.update(url.as_bytes());
    for (name, value) in sorted {
        mac.update(name.as_bytes());
        mac.update(value.as_bytes());
    }
    mac
}
