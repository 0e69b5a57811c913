//! The subset of a Thing Model document the catalog reads.

use crate::error::RepoError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Link {
    #[serde(default)]
    pub rel: String,
    #[serde(default)]
    pub href: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Named {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ModelVersionField {
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Form {
    #[serde(default)]
    href: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Affordance {
    #[serde(default)]
    forms: Vec<Form>,
}

/// Header fields of a TM. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThingModel {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "schema:author")]
    author: Option<Named>,
    #[serde(default, rename = "schema:manufacturer")]
    manufacturer: Option<Named>,
    #[serde(default, rename = "schema:mpn")]
    mpn: Option<String>,
    #[serde(default)]
    version: Option<ModelVersionField>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    forms: Vec<Form>,
    #[serde(default)]
    properties: BTreeMap<String, Affordance>,
    #[serde(default)]
    actions: BTreeMap<String, Affordance>,
    #[serde(default)]
    events: BTreeMap<String, Affordance>,
}

impl ThingModel {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, RepoError> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| RepoError::InvalidInput(format!("TM content is not valid JSON: {e}")))?;
        if !value.is_object() {
            return Err(RepoError::InvalidInput(
                "TM content must be a JSON object".to_owned(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| RepoError::InvalidInput(format!("malformed TM header: {e}")))
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_ref().and_then(|n| n.name.as_deref())
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.manufacturer.as_ref().and_then(|n| n.name.as_deref())
    }

    pub fn mpn(&self) -> Option<&str> {
        self.mpn.as_deref()
    }

    pub fn version_model(&self) -> Option<&str> {
        self.version.as_ref().and_then(|v| v.model.as_deref())
    }

    /// The href of the first `original` link: where the TM was imported from.
    pub fn external_id(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == "original")
            .map(|l| l.href.as_str())
    }

    /// Sorted unique URL schemes of `base` and every form href.
    pub fn protocols(&self) -> Vec<String> {
        let hrefs = self
            .base
            .iter()
            .chain(self.forms.iter().filter_map(|f| f.href.as_ref()))
            .chain(
                self.properties
                    .values()
                    .chain(self.actions.values())
                    .chain(self.events.values())
                    .flat_map(|a| a.forms.iter().filter_map(|f| f.href.as_ref())),
            );
        let mut schemes = BTreeSet::new();
        for href in hrefs {
            if let Some(scheme) = url_scheme(href) {
                schemes.insert(scheme);
            }
        }
        schemes.into_iter().collect()
    }
}

fn url_scheme(href: &str) -> Option<String> {
    let (scheme, _) = href.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        Some(scheme.to_ascii_lowercase())
    } else {
        None
    }
}
