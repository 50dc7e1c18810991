//! Request signing for the UCloud public API.
//!
//! The signature is the hex SHA-1 digest of every parameter, sorted by key
//! and written as `key` immediately followed by `value`, with the private
//! key appended at the end.

use std::collections::BTreeMap;

use sha1::{Digest, Sha1};

/// Concatenates the sorted parameters into the string that gets signed.
pub(super) fn string_to_sign(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .fold(String::new(), |mut acc, (key, value)| {
            acc.push_str(key);
            acc.push_str(value);
            acc
        })
}

/// Returns the lower-case hex signature for `params`.
pub(super) fn sign(params: &BTreeMap<String, String>, private_key: &str) -> String {
    let mut payload = string_to_sign(params);
    payload.push_str(private_key);
    let digest = Sha1::digest(payload.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
