use crate::error::RepoError;
use std::fmt;
use std::str::FromStr;

/// `name[:semver]`: a TM name with an optional, possibly partial, version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchName {
    pub name: String,
    pub semver: Option<String>,
}

impl FetchName {
    pub fn parse(s: &str) -> Result<Self, RepoError> {
        let (name, semver) = match s.split_once(':') {
            Some((name, v)) => (name, Some(v.strip_prefix('v').unwrap_or(v))),
            None => (s, None),
        };
        let name = name.trim_matches('/');
        if name.is_empty() || name.split('/').count() < 2 {
            return Err(RepoError::InvalidInput(format!("invalid fetch name: {s}")));
        }
        if let Some(v) = semver {
            if !valid_partial_semver(v) {
                return Err(RepoError::InvalidInput(format!(
                    "invalid semantic version in fetch name: {s}"
                )));
            }
        }
        Ok(Self {
            name: name.to_owned(),
            semver: semver.map(str::to_owned),
        })
    }

    /// True if `version` is selected by this name's semver part.
    ///
    /// `1` selects every `1.x.y`, `1.2` every `1.2.y`; a full version must match exactly.
    pub fn matches(&self, version: &semver::Version) -> bool {
        let Some(wanted) = &self.semver else {
            return true;
        };
        let (core, pre) = match wanted.split_once('-') {
            Some((c, p)) => (c, Some(p)),
            None => (wanted.as_str(), None),
        };
        let parts: Vec<u64> = core.split('.').filter_map(|p| p.parse().ok()).collect();
        let actual = [version.major, version.minor, version.patch];
        if parts.iter().zip(actual.iter()).any(|(w, a)| w != a) {
            return false;
        }
        match pre {
            Some(p) => version.pre.as_str() == p,
            None if parts.len() == 3 => version.pre.is_empty(),
            None => true,
        }
    }
}

fn valid_partial_semver(v: &str) -> bool {
    let core = v.split_once('-').map_or(v, |(c, _)| c);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return false;
    }
    if !parts
        .iter()
        .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
    {
        return false;
    }
    // A pre-release only makes sense on a full version.
    v == core || (parts.len() == 3 && semver::Version::parse(v).is_ok())
}

impl fmt::Display for FetchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.semver {
            Some(v) => write!(f, "{}:{v}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for FetchName {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> semver::Version {
        semver::Version::parse(s).unwrap()
    }

    #[test]
    fn parse_plain_and_versioned() {
        let plain = FetchName::parse("a-corp/eagle/BT2000").unwrap();
        assert_eq!(plain.semver, None);
        let versioned = FetchName::parse("a-corp/eagle/BT2000:v1.2").unwrap();
        assert_eq!(versioned.name, "a-corp/eagle/BT2000");
        assert_eq!(versioned.semver.as_deref(), Some("1.2"));
        assert_eq!(versioned.to_string(), "a-corp/eagle/BT2000:1.2");
    }

    #[test]
    fn parse_rejects_bad_input() {
        for bad in ["", "single", "a/b:1.x", "a/b:1.2.3.4", "a/b:1-rc", "a/b:"] {
            assert!(FetchName::parse(bad).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn partial_versions_match_by_component() {
        let major = FetchName::parse("a/b:1").unwrap();
        assert!(major.matches(&v("1.0.0")));
        assert!(major.matches(&v("1.9.3")));
        assert!(!major.matches(&v("2.0.0")));

        let minor = FetchName::parse("a/b:1.2").unwrap();
        assert!(minor.matches(&v("1.2.7")));
        assert!(!minor.matches(&v("1.3.0")));

        let full = FetchName::parse("a/b:1.2.3").unwrap();
        assert!(full.matches(&v("1.2.3")));
        assert!(!full.matches(&v("1.2.3-rc.1")));

        let pre = FetchName::parse("a/b:1.2.3-rc.1").unwrap();
        assert!(pre.matches(&v("1.2.3-rc.1")));
        assert!(!pre.matches(&v("1.2.3")));
    }
}
