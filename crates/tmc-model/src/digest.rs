use crate::error::RepoError;
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};

const DIGEST_LEN: usize = 12;

/// Convert CRLF and lone CR line endings to LF.
pub fn normalize_line_endings(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'\r' => {
                out.push(b'\n');
                if raw.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

fn parse_object(raw: &[u8]) -> Result<Map<String, Value>, RepoError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(RepoError::InvalidInput("empty TM content".to_owned()));
    }
    let normalized = normalize_line_endings(raw);
    match serde_json::from_slice::<Value>(&normalized) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(RepoError::InvalidInput(
            "TM content must be a JSON object".to_owned(),
        )),
        Err(e) => Err(RepoError::InvalidInput(format!("TM content is not valid JSON: {e}"))),
    }
}

/// Re-serialize a TM with its `id` field set to `id` and moved to the front.
///
/// Output is pretty-printed JSON with LF line endings; the order of all other
/// keys is kept.
pub fn with_id(raw: &[u8], id: &str) -> Result<Vec<u8>, RepoError> {
    let map = parse_object(raw)?;
    let mut out = Map::with_capacity(map.len() + 1);
    out.insert("id".to_owned(), Value::String(id.to_owned()));
    for (k, v) in map {
        if k != "id" {
            out.insert(k, v);
        }
    }
    Ok(serde_json::to_vec_pretty(&Value::Object(out))?)
}

/// Compute the content digest of a TM.
///
/// Returns the 12-hex-char SHA-1 prefix and the normalized bytes it was
/// computed over (line endings LF, `id` set to the empty string).
pub fn compute_digest(raw: &[u8]) -> Result<(String, Vec<u8>), RepoError> {
    let normalized = with_id(raw, "")?;
    let hash = Sha1::digest(&normalized);
    let mut hex = hex::encode(hash);
    hex.truncate(DIGEST_LEN);
    Ok((hex, normalized))
}
