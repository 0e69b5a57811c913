//! Query results annotated with the repository each version was found in.

use crate::attachment::Attachment;
use crate::index::{Index, IndexEntry, IndexVersion, SchemaName};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FoundVersion {
    #[serde(flatten)]
    pub version: IndexVersion,
    /// Name of the repository holding this version.
    #[serde(default, rename = "repo", skip_serializing_if = "String::is_empty")]
    pub found_in: String,
}

impl FoundVersion {
    fn cmp_newest_first(&self, other: &FoundVersion) -> Ordering {
        self.version
            .cmp_newest_first(&other.version)
            .then_with(|| self.found_in.cmp(&other.found_in))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FoundEntry {
    pub name: String,
    pub author: SchemaName,
    pub manufacturer: SchemaName,
    pub mpn: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub versions: Vec<FoundVersion>,
}

impl FoundEntry {
    pub fn from_entry(entry: IndexEntry, repo: &str) -> Self {
        Self {
            name: entry.name,
            author: entry.author,
            manufacturer: entry.manufacturer,
            mpn: entry.mpn,
            attachments: entry.attachments,
            versions: entry
                .versions
                .into_iter()
                .map(|version| FoundVersion {
                    version,
                    found_in: repo.to_owned(),
                })
                .collect(),
        }
    }

    /// Merge versions of the same TM name from another repository.
    ///
    /// Versions with equal TM ids are collapsed to the one with the newest
    /// timestamp; on a tie the repository name that sorts first wins, so the
    /// outcome does not depend on merge order.
    pub fn merge(&mut self, other: FoundEntry) {
        for a in other.attachments {
            if !self.attachments.iter().any(|m| m.name == a.name) {
                self.attachments.push(a);
            }
        }
        self.attachments.sort();

        for v in other.versions {
            match self
                .versions
                .iter_mut()
                .find(|e| e.version.same_tm(&v.version))
            {
                Some(existing) => {
                    let newer = v.version.timestamp > existing.version.timestamp;
                    let tie_wins = v.version.timestamp == existing.version.timestamp
                        && v.found_in < existing.found_in;
                    if newer || tie_wins {
                        *existing = v;
                    }
                }
                None => self.versions.push(v),
            }
        }
        self.versions.sort_by(FoundVersion::cmp_newest_first);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub entries: Vec<FoundEntry>,
}

impl SearchResult {
    pub fn from_index(index: Index, repo: &str) -> Self {
        Self {
            entries: index
                .data
                .into_iter()
                .map(|e| FoundEntry::from_entry(e, repo))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union of two results, ordered by TM name.
    pub fn merge(mut self, other: SearchResult) -> SearchResult {
        for entry in other.entries {
            match self
                .entries
                .binary_search_by(|e| e.name.as_str().cmp(&entry.name))
            {
                Ok(i) => self.entries[i].merge(entry),
                Err(i) => self.entries.insert(i, entry),
            }
        }
        self
    }

    pub fn find(&self, name: &str) -> Option<&FoundEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i])
    }
}
