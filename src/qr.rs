//! QR payload encode/decode for the registration and scan flows.
//!
//! The payload is the only carrier of context between registration and the
//! simulated scan: a JSON triple embedded as the `data` query parameter of
//! the image endpoint URL. The "scan" re-parses a previously generated URL;
//! no optical input is involved.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const QR_ENDPOINT: &str = "https://api.qrserver.com/v1/create-qr-code/";
pub const QR_SIZE: &str = "200x200";

/// Wire keys match the stored JSON: `control`, `materia`, `hora`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    pub control: String,
    pub materia: String,
    pub hora: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedPayload(pub String);

impl fmt::Display for MalformedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed QR payload: {}", self.0)
    }
}

impl std::error::Error for MalformedPayload {}

/// Builds the full image URL the shell renders as an `<img>` source.
pub fn encode_qr_url(payload: &QrPayload) -> String {
    // Serializing a struct of plain strings cannot fail.
    let json = serde_json::to_string(payload).unwrap_or_default();
    format!(
        "{}?size={}&data={}",
        QR_ENDPOINT,
        QR_SIZE,
        encode_uri_component(&json)
    )
}

/// Inverse of [`encode_qr_url`]: pulls the `data` parameter back out of a
/// generated URL (or accepts a bare query string) and parses the triple.
pub fn decode_qr_url(token: &str) -> Result<QrPayload, MalformedPayload> {
    let query = token.split_once('?').map(|(_, q)| q).unwrap_or(token);
    let mut data: Option<&str> = None;
    for pair in query.split('&') {
        if let Some(v) = pair.strip_prefix("data=") {
            data = Some(v);
        }
    }
    let Some(raw) = data else {
        return Err(MalformedPayload("missing data parameter".to_string()));
    };
    let decoded = decode_uri_component(raw)
        .ok_or_else(|| MalformedPayload("invalid percent encoding".to_string()))?;
    let value: serde_json::Value = serde_json::from_str(&decoded)
        .map_err(|e| MalformedPayload(format!("payload is not valid JSON: {}", e)))?;
    Ok(QrPayload {
        control: required_field(&value, "control")?,
        materia: required_field(&value, "materia")?,
        hora: required_field(&value, "hora")?,
    })
}

fn required_field(value: &serde_json::Value, key: &str) -> Result<String, MalformedPayload> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| MalformedPayload(format!("missing {}", key)))
}

// The browser shell historically produced the payload with
// encodeURIComponent, so the unreserved set here matches that function.
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(b, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
}

fn encode_uri_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(char::from_digit((b >> 4) as u32, 16).unwrap_or('0').to_ascii_uppercase());
            out.push(char::from_digit((b & 0x0f) as u32, 16).unwrap_or('0').to_ascii_uppercase());
        }
    }
    out
}

fn decode_uri_component(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return None;
            }
            let hi = hex_val(bytes[i + 1])?;
            let lo = hex_val(bytes[i + 2])?;
            out.push(hi * 16 + lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(control: &str, materia: &str, hora: &str) -> QrPayload {
        QrPayload {
            control: control.to_string(),
            materia: materia.to_string(),
            hora: hora.to_string(),
        }
    }

    #[test]
    fn encode_targets_image_endpoint_with_fixed_size() {
        let url = encode_qr_url(&payload("101", "Física", "08:00"));
        assert!(url.starts_with(QR_ENDPOINT));
        assert!(url.contains("size=200x200"));
        assert!(url.contains("data="));
    }

    #[test]
    fn round_trip_preserves_triple() {
        let cases = [
            payload("101", "Física", "08:00"),
            payload("A-17", "Matemáticas", "07:00"),
            payload("x y", "Química & Lab", "15:00"),
            payload("ñ", "programación", "12:00"),
        ];
        for p in cases {
            let url = encode_qr_url(&p);
            assert_eq!(decode_qr_url(&url).expect("decode"), p);
        }
    }

    #[test]
    fn decode_accepts_bare_query_string() {
        let p = payload("42", "Historia", "09:00");
        let url = encode_qr_url(&p);
        let query = url.split_once('?').map(|(_, q)| q).expect("query");
        assert_eq!(decode_qr_url(query).expect("decode"), p);
    }

    #[test]
    fn decode_rejects_missing_data_parameter() {
        let err = decode_qr_url("https://example.com/?size=200x200").unwrap_err();
        assert!(err.0.contains("data"));
    }

    #[test]
    fn decode_rejects_broken_percent_encoding() {
        assert!(decode_qr_url("?data=%2").is_err());
        assert!(decode_qr_url("?data=%zz").is_err());
    }

    #[test]
    fn decode_rejects_non_json_payload() {
        assert!(decode_qr_url("?data=not-json").is_err());
    }

    #[test]
    fn decode_rejects_missing_fields() {
        // hora absent
        let err = decode_qr_url("?data=%7B%22control%22%3A%221%22%2C%22materia%22%3A%22F%22%7D")
            .unwrap_err();
        assert!(err.0.contains("hora"));
    }
}
