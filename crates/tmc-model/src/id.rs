//! Structured Thing Model ids.
//!
//! A TM id is a slash-joined path
//! `<author>[/<manufacturer>]/<mpn>[/<optPath>]/v<semver>-<timestamp>-<hash>.tm.json`.
//! The author segment is omitted when it equals the manufacturer and there is
//! no optional path, which keeps rendering and parsing inverse to each other.

use crate::error::RepoError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

pub const TM_FILE_EXTENSION: &str = ".tm.json";

/// Maximum length of a rendered TM name.
pub const NAME_LENGTH_LIMIT: usize = 255;

/// `chrono` format of the 14-digit UTC timestamp in a version filename.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const TIMESTAMP_LEN: usize = 14;
const HASH_LEN: usize = 12;

/// The version filename part of a TM id: `v<semver>-<timestamp>-<hash>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmVersion {
    pub base: semver::Version,
    pub timestamp: String,
    pub hash: String,
}

impl TmVersion {
    pub fn new(base: semver::Version, timestamp: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            base,
            timestamp: timestamp.into(),
            hash: hash.into(),
        }
    }

    /// Parse a pseudo-version, with or without the `.tm.json` extension.
    pub fn parse(s: &str) -> Result<Self, RepoError> {
        let s = s.strip_suffix(TM_FILE_EXTENSION).unwrap_or(s);
        let invalid = || RepoError::InvalidId(format!("invalid version filename: {s}"));

        let rest = s.strip_prefix('v').ok_or_else(invalid)?;
        let (rest, hash) = rest.rsplit_once('-').ok_or_else(invalid)?;
        if hash.len() != HASH_LEN || !hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(invalid());
        }
        let (semver_str, timestamp) = rest.rsplit_once('-').ok_or_else(invalid)?;
        if timestamp.len() != TIMESTAMP_LEN || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let base = parse_strict_semver(semver_str).ok_or_else(invalid)?;

        Ok(Self {
            base,
            timestamp: timestamp.to_owned(),
            hash: hash.to_owned(),
        })
    }

    /// `v<semver>` without timestamp and hash.
    pub fn base_string(&self) -> String {
        format!("v{}", self.base)
    }
}

impl fmt::Display for TmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}-{}-{}", self.base, self.timestamp, self.hash)
    }
}

/// Parse `major.minor.patch[-pre]`, with an optional leading `v`. Build metadata is rejected.
pub fn parse_strict_semver(s: &str) -> Option<semver::Version> {
    let s = s.strip_prefix('v').unwrap_or(s);
    let v = semver::Version::parse(s).ok()?;
    if v.build.is_empty() {
        Some(v)
    } else {
        None
    }
}

/// A parsed TM id.
///
/// Equality ignores the timestamp: the same content created at different
/// instants is the same TM.
#[derive(Debug, Clone)]
pub struct TmId {
    pub author: String,
    pub manufacturer: String,
    pub mpn: String,
    pub opt_path: String,
    pub version: TmVersion,
}

impl TmId {
    pub fn parse(s: &str) -> Result<Self, RepoError> {
        let path = s
            .strip_suffix(TM_FILE_EXTENSION)
            .ok_or_else(|| RepoError::InvalidId(format!("missing {TM_FILE_EXTENSION} suffix: {s}")))?;
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() < 3 {
            return Err(RepoError::InvalidId(format!(
                "expected at least 3 path segments: {s}"
            )));
        }
        if parts.iter().any(|p| p.is_empty() || *p == "." || *p == "..") {
            return Err(RepoError::InvalidId(format!("empty or relative path segment: {s}")));
        }

        let version = TmVersion::parse(parts[parts.len() - 1])?;
        let name_parts = &parts[..parts.len() - 1];
        let (author, manufacturer, mpn, opt_path) = if name_parts.len() == 2 {
            (name_parts[0], name_parts[0], name_parts[1], String::new())
        } else {
            (
                name_parts[0],
                name_parts[1],
                name_parts[2],
                name_parts[3..].join("/"),
            )
        };

        let id = Self {
            author: author.to_owned(),
            manufacturer: manufacturer.to_owned(),
            mpn: mpn.to_owned(),
            opt_path,
            version,
        };
        let name_len = id.name().len();
        if name_len > NAME_LENGTH_LIMIT {
            return Err(RepoError::NameTooLong {
                len: name_len,
                limit: NAME_LENGTH_LIMIT,
            });
        }
        Ok(id)
    }

    /// The TM name: the id without its version filename.
    pub fn name(&self) -> String {
        let mut name = if self.author == self.manufacturer && self.opt_path.is_empty() {
            format!("{}/{}", self.author, self.mpn)
        } else {
            format!("{}/{}/{}", self.author, self.manufacturer, self.mpn)
        };
        if !self.opt_path.is_empty() {
            name.push('/');
            name.push_str(&self.opt_path);
        }
        name
    }

    /// `v<semver>-<timestamp>-<hash>.tm.json`
    pub fn version_file_name(&self) -> String {
        format!("{}{TM_FILE_EXTENSION}", self.version)
    }

    /// The version filename without extension; names the id-level attachment directory.
    pub fn version_stem(&self) -> String {
        self.version.to_string()
    }

    /// Same TM except possibly the timestamp, compared field by field.
    pub fn same_base(&self, other: &TmId) -> bool {
        self.name() == other.name() && self.version.base == other.version.base
    }

    /// Order by descending semver, then descending timestamp.
    pub fn cmp_newest_first(&self, other: &TmId) -> Ordering {
        other
            .version
            .base
            .cmp(&self.version.base)
            .then_with(|| other.version.timestamp.cmp(&self.version.timestamp))
    }
}

impl PartialEq for TmId {
    fn eq(&self, other: &Self) -> bool {
        self.author == other.author
            && self.manufacturer == other.manufacturer
            && self.mpn == other.mpn
            && self.opt_path == other.opt_path
            && self.version.base == other.version.base
            && self.version.hash == other.version.hash
    }
}

impl Eq for TmId {}

impl Hash for TmId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.author.hash(state);
        self.manufacturer.hash(state);
        self.mpn.hash(state);
        self.opt_path.hash(state);
        self.version.base.hash(state);
        self.version.hash.hash(state);
    }
}

impl fmt::Display for TmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name(), self.version_file_name())
    }
}

impl FromStr for TmId {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TmId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TmId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// True if `s` has the shape of a TM id (ends in `.tm.json`).
pub fn looks_like_tm_id(s: &str) -> bool {
    s.ends_with(TM_FILE_EXTENSION)
}
