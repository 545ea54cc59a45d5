//! Request signature verification.
//!
//! The signing string is `name=value` for each signed field, in sorted field
//! order, joined with `&`, followed by a salt chosen by `_sign_ver`. The
//! signature is the lowercase hex MD5 of that string.

use std::collections::HashMap;

use md5::{Digest, Md5};

/// Query parameter carrying the client signature.
pub const SIGN_PARAM: &str = "_sign";

/// Query parameter selecting the salt.
pub const SIGN_VERSION_PARAM: &str = "_sign_ver";

/// Query parameter carrying the client unix timestamp.
pub const TIMESTAMP_PARAM: &str = "_timestamp";

/// Computes and checks request signatures.
#[derive(Debug, Clone)]
pub struct Signer {
    fields: Vec<String>,
    default_salt: String,
    salts: HashMap<String, String>,
}

impl Signer {
    pub fn new(mut fields: Vec<String>, default_salt: String, salts: HashMap<String, String>) -> Self {
        fields.sort();
        fields.dedup();
        Self {
            fields,
            default_salt,
            salts,
        }
    }

    /// Signed field names, in signing order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    fn salt_for(&self, query: &HashMap<String, String>) -> &str {
        let version = query
            .get(SIGN_VERSION_PARAM)
            .map(|v| parse_int(v))
            .unwrap_or(0);
        self.salts
            .get(&version.to_string())
            .map(String::as_str)
            .unwrap_or(&self.default_salt)
    }

    /// The string that gets hashed. Missing fields contribute an empty value.
    pub fn signing_string(&self, query: &HashMap<String, String>) -> String {
        let joined = self
            .fields
            .iter()
            .map(|name| {
                let value = query.get(name).map(String::as_str).unwrap_or("");
                format!("{}={}", name, value)
            })
            .collect::<Vec<_>>()
            .join("&");
        joined + self.salt_for(query)
    }

    /// Expected `_sign` value for `query`.
    pub fn sign(&self, query: &HashMap<String, String>) -> String {
        hex::encode(Md5::digest(self.signing_string(query).as_bytes()))
    }

    /// Whether the `_sign` parameter matches the expected signature.
    pub fn verify(&self, query: &HashMap<String, String>) -> bool {
        let provided = query.get(SIGN_PARAM).map(String::as_str).unwrap_or("");
        provided == self.sign(query)
    }
}

/// Lenient integer parse: integers, then floats (truncated), else 0.
pub fn parse_int(raw: &str) -> i64 {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        .unwrap_or(0)
}
