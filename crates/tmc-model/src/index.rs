//! The table of contents of a repository.
//!
//! Entries are kept sorted by TM name so lookups are binary searches; versions
//! within an entry are sorted newest first. The index is a plain tree and
//! versions do not point back at their entry: owners are found by name.

use crate::attachment::{Attachment, AttachmentContainerRef};
use crate::error::RepoError;
use crate::filter::{matches_any, SearchParams};
use crate::id::TmId;
use crate::thing_model::ThingModel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexMeta {
    pub created: DateTime<Utc>,
}

impl Default for IndexMeta {
    fn default() -> Self {
        Self {
            created: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaName {
    pub name: String,
}

impl SchemaName {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelVersion {
    pub model: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionLinks {
    /// Repository-relative path of the TM file.
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexVersion {
    #[serde(rename = "tmID")]
    pub tm_id: String,
    #[serde(default)]
    pub description: String,
    pub version: ModelVersion,
    pub digest: String,
    pub timestamp: String,
    #[serde(default, rename = "externalID", skip_serializing_if = "String::is_empty")]
    pub external_id: String,
    #[serde(default)]
    pub links: VersionLinks,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<String>,
}

impl IndexVersion {
    /// Build the index record of a stored TM.
    pub fn from_tm(id: &TmId, tm: &ThingModel) -> Self {
        let tm_id = id.to_string();
        Self {
            description: tm.description.clone().unwrap_or_default(),
            version: ModelVersion {
                model: tm
                    .version_model()
                    .map_or_else(|| format!("v{}", id.version.base), str::to_owned),
            },
            digest: id.version.hash.clone(),
            timestamp: id.version.timestamp.clone(),
            external_id: tm.external_id().unwrap_or_default().to_owned(),
            links: VersionLinks {
                content: tm_id.clone(),
            },
            attachments: Vec::new(),
            protocols: tm.protocols(),
            tm_id,
        }
    }

    fn base_version(&self) -> Option<semver::Version> {
        TmId::parse(&self.tm_id)
            .ok()
            .map(|id| id.version.base)
            .or_else(|| semver::Version::parse(self.version.model.trim_start_matches('v')).ok())
    }

    /// Descending by semver, then by timestamp.
    pub fn cmp_newest_first(&self, other: &IndexVersion) -> Ordering {
        let by_semver = match (self.base_version(), other.base_version()) {
            (Some(a), Some(b)) => b.cmp(&a),
            _ => other.version.model.cmp(&self.version.model),
        };
        by_semver
            .then_with(|| other.timestamp.cmp(&self.timestamp))
            .then_with(|| self.tm_id.cmp(&other.tm_id))
    }

    /// Same TM id up to the timestamp.
    pub fn same_tm(&self, other: &IndexVersion) -> bool {
        match (TmId::parse(&self.tm_id), TmId::parse(&other.tm_id)) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.tm_id == other.tm_id,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub name: String,
    pub author: SchemaName,
    pub manufacturer: SchemaName,
    pub mpn: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub versions: Vec<IndexVersion>,
}

impl IndexEntry {
    pub fn new(id: &TmId) -> Self {
        Self {
            name: id.name(),
            author: SchemaName::new(&id.author),
            manufacturer: SchemaName::new(&id.manufacturer),
            mpn: id.mpn.clone(),
            attachments: Vec::new(),
            versions: Vec::new(),
        }
    }

    pub fn find_version(&self, tm_id: &str) -> Option<&IndexVersion> {
        self.versions.iter().find(|v| v.tm_id == tm_id)
    }

    pub fn sort_versions(&mut self) {
        self.versions.sort_by(IndexVersion::cmp_newest_first);
    }

    /// Add versions from another copy of this entry, dropping duplicates.
    ///
    /// Of two versions with equal TM ids the one with the newer timestamp is kept.
    pub fn merge_versions(&mut self, other: Vec<IndexVersion>) {
        for v in other {
            match self.versions.iter_mut().find(|e| e.same_tm(&v)) {
                Some(existing) => {
                    if v.timestamp > existing.timestamp {
                        *existing = v;
                    }
                }
                None => self.versions.push(v),
            }
        }
        self.sort_versions();
    }

    fn matches(&self, params: &SearchParams, tokens: &[String]) -> bool {
        if !matches_any(&params.author, &self.author.name)
            || !matches_any(&params.manufacturer, &self.manufacturer.name)
            || !matches_any(&params.mpn, &self.mpn)
            || !params.matches_name(&self.name)
        {
            return false;
        }
        if !params.external_id.is_empty()
            && !self
                .versions
                .iter()
                .any(|v| params.external_id.iter().any(|e| *e == v.external_id))
        {
            return false;
        }
        tokens.iter().all(|token| self.contains_text(token))
    }

    fn contains_text(&self, token: &str) -> bool {
        let hit = |s: &str| s.to_lowercase().contains(token);
        hit(&self.name)
            || hit(&self.author.name)
            || hit(&self.manufacturer.name)
            || hit(&self.mpn)
            || self.versions.iter().any(|v| hit(&v.description))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Index {
    #[serde(default)]
    pub meta: IndexMeta,
    #[serde(default)]
    pub data: Vec<IndexEntry>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn position(&self, name: &str) -> Result<usize, usize> {
        self.data.binary_search_by(|e| e.name.as_str().cmp(name))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&IndexEntry> {
        self.position(name).ok().map(|i| &self.data[i])
    }

    pub fn find_by_name_mut(&mut self, name: &str) -> Option<&mut IndexEntry> {
        match self.position(name) {
            Ok(i) => Some(&mut self.data[i]),
            Err(_) => None,
        }
    }

    /// Look up a version by its exact TM id string.
    pub fn find_by_tm_id(&self, tm_id: &str) -> Option<(&IndexEntry, &IndexVersion)> {
        let id = TmId::parse(tm_id).ok()?;
        let entry = self.find_by_name(&id.name())?;
        entry.find_version(tm_id).map(|v| (entry, v))
    }

    pub fn find_attachment_container(
        &self,
        container: &AttachmentContainerRef,
    ) -> Option<&Vec<Attachment>> {
        match container {
            AttachmentContainerRef::TmName(name) => self.find_by_name(name).map(|e| &e.attachments),
            AttachmentContainerRef::TmId(id) => self.find_by_tm_id(id).map(|(_, v)| &v.attachments),
        }
    }

    fn find_attachment_container_mut(
        &mut self,
        container: &AttachmentContainerRef,
    ) -> Option<&mut Vec<Attachment>> {
        match container {
            AttachmentContainerRef::TmName(name) => {
                self.find_by_name_mut(name).map(|e| &mut e.attachments)
            }
            AttachmentContainerRef::TmId(id) => {
                let name = TmId::parse(id).ok()?.name();
                let entry = self.find_by_name_mut(&name)?;
                entry
                    .versions
                    .iter_mut()
                    .find(|v| v.tm_id == *id)
                    .map(|v| &mut v.attachments)
            }
        }
    }

    /// Replace the attachment list of an existing container.
    pub fn insert_attachments(
        &mut self,
        container: &AttachmentContainerRef,
        mut attachments: Vec<Attachment>,
    ) -> Result<(), RepoError> {
        let slot = self
            .find_attachment_container_mut(container)
            .ok_or_else(|| not_found(container))?;
        attachments.sort();
        attachments.dedup_by(|a, b| a.name == b.name);
        *slot = attachments;
        Ok(())
    }

    /// Insert or update the version described by `tm`, whose `id` field must be a TM id.
    pub fn insert(&mut self, tm: &ThingModel) -> Result<TmId, RepoError> {
        let raw_id = tm
            .id
            .as_deref()
            .ok_or_else(|| RepoError::InvalidInput("TM has no id".to_owned()))?;
        let id = TmId::parse(raw_id)?;
        self.insert_version(&id, IndexVersion::from_tm(&id, tm));
        Ok(id)
    }

    /// Upsert a version under its TM name. An updated version keeps its attachments.
    pub fn insert_version(&mut self, id: &TmId, mut version: IndexVersion) {
        let name = id.name();
        let pos = match self.position(&name) {
            Ok(i) => i,
            Err(i) => {
                self.data.insert(i, IndexEntry::new(id));
                i
            }
        };
        let entry = &mut self.data[pos];
        match entry.versions.iter_mut().find(|v| v.tm_id == version.tm_id) {
            Some(existing) => {
                version.attachments = std::mem::take(&mut existing.attachments);
                *existing = version;
            }
            None => entry.versions.push(version),
        }
        entry.sort_versions();
    }

    /// Remove a version. Returns whether anything changed and, when the
    /// version was the last of its name, the name that disappeared.
    pub fn delete(&mut self, tm_id: &str) -> (bool, Option<String>) {
        let Ok(id) = TmId::parse(tm_id) else {
            return (false, None);
        };
        let name = id.name();
        let Ok(pos) = self.position(&name) else {
            return (false, None);
        };
        let entry = &mut self.data[pos];
        let before = entry.versions.len();
        entry.versions.retain(|v| v.tm_id != tm_id);
        if entry.versions.len() == before {
            return (false, None);
        }
        if entry.versions.is_empty() {
            self.data.remove(pos);
            return (true, Some(name));
        }
        (true, None)
    }

    /// Keep only the entries matching `params`.
    pub fn filter(&mut self, params: &SearchParams) {
        if params.is_empty() {
            return;
        }
        let tokens = params.query_tokens();
        self.data.retain(|e| e.matches(params, &tokens));
    }

    pub fn sort(&mut self) {
        self.data.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in &mut self.data {
            entry.sort_versions();
        }
    }

    /// Union with another index. Entries present on both sides get their
    /// versions merged and de-duplicated.
    pub fn merge(&mut self, other: Index) {
        for entry in other.data {
            match self.position(&entry.name) {
                Ok(i) => {
                    let mine = &mut self.data[i];
                    for a in entry.attachments {
                        if !mine.attachments.iter().any(|m| m.name == a.name) {
                            mine.attachments.push(a);
                        }
                    }
                    mine.attachments.sort();
                    mine.merge_versions(entry.versions);
                }
                Err(i) => self.data.insert(i, entry),
            }
        }
    }

    /// Sorted TM names.
    pub fn names(&self) -> Vec<String> {
        self.data.iter().map(|e| e.name.clone()).collect()
    }

    pub fn version_count(&self) -> usize {
        self.data.iter().map(|e| e.versions.len()).sum()
    }
}

fn not_found(container: &AttachmentContainerRef) -> RepoError {
    match container {
        AttachmentContainerRef::TmName(n) => RepoError::name_not_found(n),
        AttachmentContainerRef::TmId(i) => RepoError::tm_not_found(i),
    }
}
