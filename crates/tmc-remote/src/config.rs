use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tmc_model::RepoError;
use url::Url;

/// Placeholder in `loc` replaced by the repository-relative path of a file.
pub const ID_PLACEHOLDER: &str = "{{ID}}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Auth {
    Bearer(String),
    Basic { username: String, password: String },
}

/// Location and credentials of a remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub loc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl RemoteConfig {
    pub fn new(loc: &str) -> Self {
        Self {
            loc: loc.to_owned(),
            auth: None,
            headers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_bearer(mut self, token: &str) -> Self {
        self.auth = Some(Auth::Bearer(token.to_owned()));
        self
    }

    #[must_use]
    pub fn with_basic(mut self, username: &str, password: &str) -> Self {
        self.auth = Some(Auth::Basic {
            username: username.to_owned(),
            password: password.to_owned(),
        });
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_owned(), value.to_owned());
        self
    }

    /// Reject locations that are not http(s) URLs or carry more than one `{{ID}}`.
    pub fn validate(&self) -> Result<(), RepoError> {
        let placeholders = self.loc.matches(ID_PLACEHOLDER).count();
        if placeholders > 1 {
            return Err(RepoError::InvalidRepoSpec(format!(
                "{ID_PLACEHOLDER} may appear at most once in {}",
                self.loc
            )));
        }
        let probe = self.loc.replace(ID_PLACEHOLDER, "x");
        let url = Url::parse(&probe)
            .map_err(|e| RepoError::InvalidRepoSpec(format!("invalid loc {}: {e}", self.loc)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RepoError::InvalidRepoSpec(format!(
                "loc must be an http(s) URL: {}",
                self.loc
            )));
        }
        Ok(())
    }

    pub fn is_templated(&self) -> bool {
        self.loc.contains(ID_PLACEHOLDER)
    }

    /// Base URL without a trailing slash, for path joins.
    pub fn base(&self) -> &str {
        self.loc.trim_end_matches('/')
    }

    /// URL of a repository-relative file.
    ///
    /// With a template the whole path is substituted as one percent-encoded
    /// value, otherwise it is appended segment by segment.
    pub fn file_url(&self, rel: &str) -> String {
        if self.is_templated() {
            return self
                .loc
                .replacen(ID_PLACEHOLDER, &urlencoding::encode(rel), 1);
        }
        format!("{}/{}", self.base(), encode_path(rel))
    }
}

/// Percent-encode each `/`-separated segment of `path`.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paths_without_template() {
        let c = RemoteConfig::new("https://tm.example.com/catalog/");
        assert_eq!(
            c.file_url(".tmc/tm-catalog.toc.json"),
            "https://tm.example.com/catalog/.tmc/tm-catalog.toc.json"
        );
        assert_eq!(
            c.file_url("a/b c/README.md"),
            "https://tm.example.com/catalog/a/b%20c/README.md"
        );
    }

    #[test]
    fn template_in_path_and_query() {
        let path = RemoteConfig::new("https://api.example.com/files/{{ID}}/raw");
        assert_eq!(
            path.file_url("a/b/c.tm.json"),
            "https://api.example.com/files/a%2Fb%2Fc.tm.json/raw"
        );
        let query = RemoteConfig::new("https://api.example.com/raw?ref=main&file={{ID}}");
        assert_eq!(
            query.file_url("a/b"),
            "https://api.example.com/raw?ref=main&file=a%2Fb"
        );
    }

    #[test]
    fn validation() {
        assert!(RemoteConfig::new("https://x.org/{{ID}}").validate().is_ok());
        assert!(RemoteConfig::new("https://x.org/{{ID}}/{{ID}}")
            .validate()
            .is_err());
        assert!(RemoteConfig::new("ftp://x.org").validate().is_err());
        assert!(RemoteConfig::new("not a url").validate().is_err());
    }

    #[test]
    fn auth_serde_shape() {
        let c = RemoteConfig::new("https://x.org")
            .with_basic("u", "p")
            .with_header("X-Api-Key", "k");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["auth"]["basic"]["username"], "u");
        assert_eq!(json["headers"]["X-Api-Key"], "k");
        let back: RemoteConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);

        let bearer: RemoteConfig =
            serde_json::from_str(r#"{"loc":"https://x.org","auth":{"bearer":"t"}}"#).unwrap();
        assert_eq!(bearer.auth, Some(Auth::Bearer("t".to_owned())));
    }
}
