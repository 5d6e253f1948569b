//! Request signing for the UCloud API and UFile.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// UCloud API signature: SHA1 hex of every `key` + `value` pair in key order, followed by
/// the private key.
pub fn api_signature(params: &BTreeMap<String, String>, private_key: &str) -> String {
    let mut hasher = Sha1::new();
    for (key, value) in params {
        hasher.update(key.as_bytes());
        hasher.update(value.as_bytes());
    }
    hasher.update(private_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// UFile string to sign: method, content MD5, content type, date (or expiry), resource.
pub fn ufile_string_to_sign(
    method: &str,
    content_md5: &str,
    content_type: &str,
    date: &str,
    bucket: &str,
    key: &str,
) -> String {
    format!("{method}\n{content_md5}\n{content_type}\n{date}\n/{bucket}/{key}")
}

/// Base64 HMAC-SHA1 of `string_to_sign` under the private key.
pub fn ufile_signature(private_key: &str, string_to_sign: &str) -> String {
    let mut mac = match HmacSha1::new_from_slice(private_key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC can take key of any size"),
    };
    mac.update(string_to_sign.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Value of the `Authorization` header for a UFile request.
pub fn ufile_authorization(public_key: &str, private_key: &str, string_to_sign: &str) -> String {
    format!(
        "UCloud {public_key}:{}",
        ufile_signature(private_key, string_to_sign)
    )
}
