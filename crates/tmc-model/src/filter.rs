use serde::{Deserialize, Serialize};

/// How `SearchParams::name` is compared to TM names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NameFilterType {
    #[default]
    FullMatch,
    /// Matches the name itself and every name below it, segment by segment.
    Prefix,
}

/// Exact-match field filters plus a free-text query.
///
/// Fields AND together; values within one field OR together. Empty fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    #[serde(default)]
    pub author: Vec<String>,
    #[serde(default)]
    pub manufacturer: Vec<String>,
    #[serde(default)]
    pub mpn: Vec<String>,
    #[serde(default, rename = "externalID")]
    pub external_id: Vec<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub name_filter_type: NameFilterType,
    #[serde(default)]
    pub query: String,
}

impl SearchParams {
    pub fn is_empty(&self) -> bool {
        self.author.is_empty()
            && self.manufacturer.is_empty()
            && self.mpn.is_empty()
            && self.external_id.is_empty()
            && self.name.is_empty()
            && self.query.trim().is_empty()
    }

    pub fn with_name(name: impl Into<String>, name_filter_type: NameFilterType) -> Self {
        Self {
            name: name.into(),
            name_filter_type,
            ..Self::default()
        }
    }

    /// True if `candidate` passes the name term.
    pub fn matches_name(&self, candidate: &str) -> bool {
        let wanted = self.name.trim_matches('/');
        if wanted.is_empty() {
            return true;
        }
        match self.name_filter_type {
            NameFilterType::FullMatch => candidate == wanted,
            NameFilterType::Prefix => {
                candidate == wanted
                    || candidate
                        .strip_prefix(wanted)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }

    /// Lowercased whitespace-separated query tokens.
    pub fn query_tokens(&self) -> Vec<String> {
        self.query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect()
    }
}

impl SearchParams {
    /// Query parameters of `GET /inventory` that express these filters.
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut q = Vec::new();
        for (key, values) in [
            ("filter.author", &self.author),
            ("filter.manufacturer", &self.manufacturer),
            ("filter.mpn", &self.mpn),
            ("filter.externalID", &self.external_id),
        ] {
            if !values.is_empty() {
                q.push((key, values.join(",")));
            }
        }
        if !self.name.is_empty() {
            q.push(("filter.name", self.name.clone()));
            if self.name_filter_type == NameFilterType::Prefix {
                q.push(("filter.nameMatch", "prefix".to_owned()));
            }
        }
        if !self.query.trim().is_empty() {
            q.push(("search", self.query.clone()));
        }
        q
    }

    /// Inverse of [`SearchParams::to_query`]; unknown keys are ignored.
    pub fn from_query<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = SearchParams::default();
        for (k, v) in pairs {
            let v = v.as_ref();
            match k.as_ref() {
                "filter.author" => params.author.extend(split_terms(v)),
                "filter.manufacturer" => params.manufacturer.extend(split_terms(v)),
                "filter.mpn" => params.mpn.extend(split_terms(v)),
                "filter.externalID" => params.external_id.extend(split_terms(v)),
                "filter.name" => v.trim_matches('/').clone_into(&mut params.name),
                "filter.nameMatch" if v == "prefix" => {
                    params.name_filter_type = NameFilterType::Prefix;
                }
                "search" => v.clone_into(&mut params.query),
                _ => {}
            }
        }
        params
    }
}

/// Split a comma-separated filter value into trimmed non-empty terms.
pub fn split_terms(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

/// True if `set` is empty or contains `value`.
pub fn matches_any(set: &[String], value: &str) -> bool {
    set.is_empty() || set.iter().any(|s| s == value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matches_whole_segments() {
        let p = SearchParams::with_name("a-corp/eagle", NameFilterType::Prefix);
        assert!(p.matches_name("a-corp/eagle"));
        assert!(p.matches_name("a-corp/eagle/BT2000"));
        assert!(!p.matches_name("a-corp/eagles/BT2000"));

        let full = SearchParams::with_name("a-corp/eagle", NameFilterType::FullMatch);
        assert!(!full.matches_name("a-corp/eagle/BT2000"));
    }

    #[test]
    fn terms_split_and_trimmed() {
        assert_eq!(split_terms(" a, b ,,c"), ["a", "b", "c"]);
        assert!(split_terms("").is_empty());
    }

    #[test]
    fn empty_params() {
        assert!(SearchParams::default().is_empty());
        let p = SearchParams {
            query: "  ".to_owned(),
            ..SearchParams::default()
        };
        assert!(p.is_empty());
        assert!(matches_any(&[], "x"));
    }

    #[test]
    fn query_parameters_round_trip() {
        let p = SearchParams {
            author: vec!["a-corp".to_owned(), "b-corp".to_owned()],
            mpn: vec!["BT2000".to_owned()],
            name: "a-corp/eagle".to_owned(),
            name_filter_type: NameFilterType::Prefix,
            query: "temperature sensor".to_owned(),
            ..SearchParams::default()
        };
        let q = p.to_query();
        assert!(q.contains(&("filter.author", "a-corp,b-corp".to_owned())));
        assert_eq!(SearchParams::from_query(q), p);
        assert!(SearchParams::default().to_query().is_empty());
    }
}
