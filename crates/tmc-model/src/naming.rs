//! Sanitization of TM name segments and derivation of new ids.

use crate::error::RepoError;
use crate::id::{parse_strict_semver, TmId, TmVersion, NAME_LENGTH_LIMIT, TIMESTAMP_FORMAT};
use crate::thing_model::ThingModel;
use chrono::{DateTime, Utc};

fn transliterate_umlauts(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'ä' => out.push_str("ae"),
            'ö' => out.push_str("oe"),
            'ü' => out.push_str("ue"),
            'Ä' => out.push_str("Ae"),
            'Ö' => out.push_str("Oe"),
            'Ü' => out.push_str("Ue"),
            'ß' => out.push_str("ss"),
            c => out.push(c),
        }
    }
    out
}

fn sanitize(s: &str, lowercase: bool) -> String {
    let ascii = deunicode::deunicode(&transliterate_umlauts(s));
    let ascii = if lowercase { ascii.to_lowercase() } else { ascii };
    let mut out = String::with_capacity(ascii.len());
    let mut pending_dash = false;
    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Sanitize an author or manufacturer name: transliterated to ASCII,
/// lowercased, non-alphanumeric runs collapsed to `-`.
pub fn sanitize_name(s: &str) -> String {
    sanitize(s, true)
}

/// Sanitize an mpn or a single optional-path segment. Case is preserved.
pub fn sanitize_segment(s: &str) -> String {
    sanitize(s, false)
}

/// Sanitize an optional path: every segment sanitized, empty segments dropped.
pub fn sanitize_path(s: &str) -> String {
    s.split('/')
        .map(sanitize_segment)
        .filter(|seg| !seg.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Derive a new TM id from the TM header, an optional path, a creation time
/// and the content digest.
pub fn derive_id(
    tm: &ThingModel,
    opt_path: &str,
    now: DateTime<Utc>,
    hash: &str,
) -> Result<TmId, RepoError> {
    let author = sanitize_name(tm.author().unwrap_or_default());
    let manufacturer = sanitize_name(tm.manufacturer().unwrap_or_default());
    let mpn = sanitize_segment(tm.mpn().unwrap_or_default());
    for (field, value) in [
        ("schema:author", &author),
        ("schema:manufacturer", &manufacturer),
        ("schema:mpn", &mpn),
    ] {
        if value.is_empty() {
            return Err(RepoError::InvalidInput(format!(
                "{field} is missing or has no usable characters"
            )));
        }
    }

    let raw_version = tm.version_model().unwrap_or("0.0.0");
    let base = parse_strict_semver(raw_version).ok_or_else(|| {
        RepoError::InvalidInput(format!("version.model is not a valid semver: {raw_version}"))
    })?;

    let id = TmId {
        author,
        manufacturer,
        mpn,
        opt_path: sanitize_path(opt_path),
        version: TmVersion::new(base, now.format(TIMESTAMP_FORMAT).to_string(), hash),
    };
    let len = id.name().len();
    if len > NAME_LENGTH_LIMIT {
        return Err(RepoError::NameTooLong {
            len,
            limit: NAME_LENGTH_LIMIT,
        });
    }
    Ok(id)
}
