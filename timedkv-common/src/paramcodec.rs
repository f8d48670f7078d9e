//! Wire codec for RPC parameter maps: tab-separated records (with an
//! optional per-column transfer encoding) and `application/x-www-form-urlencoded`.

use base64::Engine as _;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::BTreeMap;

/// A finite mapping from byte-string keys to byte-string values. The
/// reserved empty-string key carries protocol-level metadata (the raw
/// request/status line).
pub type ParamMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// Column transfer encoding, as named by the `colenc` media-type attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColEnc {
    /// `B`: RFC 4648 standard-alphabet Base64, no line wrapping.
    Base64,
    /// `Q`: quoted-printable-style, `=HH` for bytes outside printable ASCII.
    Quoted,
    /// `U`: URL percent-encoding.
    Url,
}

impl ColEnc {
    pub fn as_attr(self) -> &'static str {
        match self {
            ColEnc::Base64 => "B",
            ColEnc::Quoted => "Q",
            ColEnc::Url => "U",
        }
    }

    pub fn from_attr(s: &str) -> Option<ColEnc> {
        match s {
            "B" => Some(ColEnc::Base64),
            "Q" => Some(ColEnc::Quoted),
            "U" => Some(ColEnc::Url),
            _ => None,
        }
    }
}

const FORM_ENCODE_SET: &AsciiSet = &CONTROLS.add(b' ').add(b'&').add(b'=').add(b'%').add(b'+');

fn encode_column(bytes: &[u8], enc: ColEnc) -> String {
    match enc {
        ColEnc::Base64 => base64::engine::general_purpose::STANDARD.encode(bytes),
        ColEnc::Url => utf8_percent_encode(&String::from_utf8_lossy(bytes), FORM_ENCODE_SET).to_string(),
        ColEnc::Quoted => encode_quoted(bytes),
    }
}

fn decode_column(s: &str, enc: ColEnc) -> Result<Vec<u8>, String> {
    match enc {
        ColEnc::Base64 => base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| format!("invalid base64 column: {e}")),
        ColEnc::Url => Ok(percent_decode_str(s).collect()),
        ColEnc::Quoted => decode_quoted(s),
    }
}

fn encode_quoted(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x21..=0x7e).contains(&b) && b != b'=' {
            out.push(b as char);
        } else {
            out.push_str(&format!("={:02X}", b));
        }
    }
    out
}

fn decode_quoted(s: &str) -> Result<Vec<u8>, String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'=' {
            if i + 2 >= bytes.len() {
                return Err("truncated quoted-printable escape".to_string());
            }
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).map_err(|e| e.to_string())?;
            let byte = u8::from_str_radix(hex, 16).map_err(|e| format!("bad escape {hex}: {e}"))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Chooses the most compact encoding (in declaration order base64 < quoted
/// < url) that preserves every byte, or `None` if the map can be sent raw.
pub fn choose_encoding(map: &ParamMap) -> Option<ColEnc> {
    let needs_encoding = map
        .iter()
        .any(|(k, v)| needs_column_encoding(k) || needs_column_encoding(v));
    if !needs_encoding {
        return None;
    }
    // Quoted-printable and URL percent-encoding are both most compact for
    // mostly-ASCII payloads with a few stray bytes; base64 wins for dense
    // binary. Pick by measuring all three and keeping the smallest.
    let quoted_len: usize = map
        .iter()
        .map(|(k, v)| encode_quoted(k).len() + encode_quoted(v).len())
        .sum();
    let url_len: usize = map
        .iter()
        .map(|(k, v)| encode_column(k, ColEnc::Url).len() + encode_column(v, ColEnc::Url).len())
        .sum();
    let base64_len: usize = map
        .iter()
        .map(|(k, v)| {
            base64::engine::general_purpose::STANDARD.encode(k).len()
                + base64::engine::general_purpose::STANDARD.encode(v).len()
        })
        .sum();
    if quoted_len <= url_len && quoted_len <= base64_len {
        Some(ColEnc::Quoted)
    } else if url_len <= base64_len {
        Some(ColEnc::Url)
    } else {
        Some(ColEnc::Base64)
    }
}

fn needs_column_encoding(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .any(|&b| !(0x20..=0x7e).contains(&b) || b == b'\t' || b == b'\n' || b == b'\r')
}

/// Encodes a parameter map as TSV, encoding every column with `enc` when given.
pub fn encode_tsv(map: &ParamMap, enc: Option<ColEnc>) -> Vec<u8> {
    let mut out = Vec::new();
    for (k, v) in map {
        match enc {
            Some(enc) => {
                out.extend_from_slice(encode_column(k, enc).as_bytes());
                out.push(b'\t');
                out.extend_from_slice(encode_column(v, enc).as_bytes());
            }
            None => {
                out.extend_from_slice(k);
                out.push(b'\t');
                out.extend_from_slice(v);
            }
        }
        out.push(b'\n');
    }
    out
}

/// Decodes a TSV body into a parameter map. `enc` must match the `colenc`
/// attribute (if any) the sender declared in the Content-Type.
pub fn decode_tsv(body: &[u8], enc: Option<ColEnc>) -> Result<ParamMap, String> {
    let mut map = ParamMap::new();
    for line in body.split(|&b| b == b'\n') {
        let line = if line.last() == Some(&b'\r') { &line[..line.len() - 1] } else { line };
        if line.is_empty() {
            continue;
        }
        let tab = line.iter().position(|&b| b == b'\t').ok_or_else(|| "missing tab in TSV line".to_string())?;
        let (raw_key, raw_val) = (&line[..tab], &line[tab + 1..]);
        let (key, val) = match enc {
            Some(enc) => {
                let key_str = std::str::from_utf8(raw_key).map_err(|e| e.to_string())?;
                let val_str = std::str::from_utf8(raw_val).map_err(|e| e.to_string())?;
                (decode_column(key_str, enc)?, decode_column(val_str, enc)?)
            }
            None => (raw_key.to_vec(), raw_val.to_vec()),
        };
        map.insert(key, val);
    }
    Ok(map)
}

/// Encodes a parameter map as `application/x-www-form-urlencoded`.
pub fn encode_form(map: &ParamMap) -> Vec<u8> {
    let mut parts = Vec::new();
    for (k, v) in map {
        parts.push(format!(
            "{}={}",
            utf8_percent_encode(&String::from_utf8_lossy(k), FORM_ENCODE_SET),
            utf8_percent_encode(&String::from_utf8_lossy(v), FORM_ENCODE_SET)
        ));
    }
    parts.join("&").into_bytes()
}

/// Decodes a query string or `application/x-www-form-urlencoded` body.
pub fn decode_form(body: &[u8]) -> Result<ParamMap, String> {
    let body_str = std::str::from_utf8(body).map_err(|e| e.to_string())?;
    let mut map = ParamMap::new();
    if body_str.is_empty() {
        return Ok(map);
    }
    for pair in body_str.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut it = pair.splitn(2, '=');
        let key = it.next().unwrap_or("");
        let val = it.next().unwrap_or("");
        let key: Vec<u8> = percent_decode_str(&key.replace('+', " ")).collect();
        let val: Vec<u8> = percent_decode_str(&val.replace('+', " ")).collect();
        map.insert(key, val);
    }
    Ok(map)
}

/// Convenience accessors treating parameter values as UTF-8 strings; the
/// procedures layer works almost entirely in terms of named string params.
pub fn get_str<'a>(map: &'a ParamMap, key: &str) -> Option<&'a str> {
    map.get(key.as_bytes()).and_then(|v| std::str::from_utf8(v).ok())
}

pub fn insert_str(map: &mut ParamMap, key: &str, value: impl Into<String>) {
    map.insert(key.as_bytes().to_vec(), value.into().into_bytes());
}

pub fn insert_bytes(map: &mut ParamMap, key: &str, value: impl Into<Vec<u8>>) {
    map.insert(key.as_bytes().to_vec(), value.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsv_round_trip_raw() {
        let mut map = ParamMap::new();
        insert_str(&mut map, "key", "value");
        insert_str(&mut map, "", "GET /rpc/echo HTTP/1.1");
        let body = encode_tsv(&map, None);
        let decoded = decode_tsv(&body, None).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn tsv_round_trip_base64_binary() {
        let mut map = ParamMap::new();
        map.insert(vec![0, 1, 2, 9, 10], vec![255, 254, 0, 13]);
        let body = encode_tsv(&map, Some(ColEnc::Base64));
        let decoded = decode_tsv(&body, Some(ColEnc::Base64)).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn tsv_round_trip_quoted_binary() {
        let mut map = ParamMap::new();
        map.insert(b"k\t1".to_vec(), vec![0, 7, 61, 127, 200]);
        let body = encode_tsv(&map, Some(ColEnc::Quoted));
        let decoded = decode_tsv(&body, Some(ColEnc::Quoted)).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn tsv_round_trip_url_binary() {
        let mut map = ParamMap::new();
        map.insert(b"a b".to_vec(), vec![0, 37, 38, 61]);
        let body = encode_tsv(&map, Some(ColEnc::Url));
        let decoded = decode_tsv(&body, Some(ColEnc::Url)).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn choose_encoding_picks_none_for_printable() {
        let mut map = ParamMap::new();
        insert_str(&mut map, "key", "plain-value");
        assert_eq!(choose_encoding(&map), None);
    }

    #[test]
    fn choose_encoding_picks_some_for_binary() {
        let mut map = ParamMap::new();
        map.insert(b"key".to_vec(), vec![0, 1, 2, 255]);
        assert!(choose_encoding(&map).is_some());
    }

    #[test]
    fn form_round_trip() {
        let mut map = ParamMap::new();
        insert_str(&mut map, "key", "hello world");
        insert_str(&mut map, "xt", "60");
        let body = encode_form(&map);
        let decoded = decode_form(&body).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn form_decodes_plus_as_space() {
        let decoded = decode_form(b"key=hello+world").unwrap();
        assert_eq!(decoded.get(b"key".as_slice()).unwrap(), b"hello world");
    }
}
