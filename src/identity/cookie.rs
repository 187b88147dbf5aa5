//! Session cookie codec.
//!
//! The cookie value is the session id followed by a checksum: the sum of the id's character
//! codes in decimal. A value whose checksum does not match is rejected before any lookup.

use chrono::{DateTime, Utc};

use super::session::SESSION_ID_LEN;

pub const SESSION_COOKIE: &str = "_session_id";

pub fn checksum(id: &str) -> u64 {
    id.chars().map(|c| c as u64).sum()
}

pub fn encode_session_cookie(id: &str) -> String {
    format!("{}{}", id, checksum(id))
}

/// Split a cookie value into its session id, verifying the checksum. Returns `None` for
/// anything malformed or tampered with.
pub fn decode_session_cookie(value: &str) -> Option<String> {
    let value = value.trim();
    if value.len() <= SESSION_ID_LEN || !value.is_char_boundary(SESSION_ID_LEN) { return None; }
    let (id, sum) = value.split_at(SESSION_ID_LEN);
    if !id.chars().all(|c| c.is_ascii_hexdigit()) { return None; }
    if !sum.chars().all(|c| c.is_ascii_digit()) { return None; }
    let parsed: u64 = sum.parse().ok()?;
    if parsed == checksum(id) { Some(id.to_string()) } else { None }
}

/// Extract a cookie value by name from a raw `Cookie` header.
pub fn parse_cookie(header: &str, name: &str) -> Option<String> {
    for part in header.split(';') {
        let p = part.trim();
        if let Some((k, v)) = p.split_once('=') {
            if k.trim() == name { return Some(v.trim().to_string()); }
        }
    }
    None
}

/// RFC 7231 IMF-fixdate, as used by the `Expires` attribute.
pub fn http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn set_session_cookie(id: &str, expires_at: DateTime<Utc>, path: &str) -> String {
    format!(
        "{}={}; Path={}; Expires={}; HttpOnly; SameSite=Strict",
        SESSION_COOKIE,
        encode_session_cookie(id),
        path,
        http_date(expires_at)
    )
}

pub fn clear_session_cookie(path: &str) -> String {
    format!("{}=deleted; Path={}; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Strict", SESSION_COOKIE, path)
}
