use crate::error::RepoError;
use crate::id::{looks_like_tm_id, TmId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Directory holding attachments, next to the version files of a TM name.
pub const ATTACHMENTS_DIR: &str = ".attachments";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
}

impl Attachment {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
        }
    }

    /// An attachment whose media type is guessed from its file name.
    pub fn guessed(name: impl Into<String>) -> Self {
        let name = name.into();
        let media_type = guess_media_type(&name);
        Self { name, media_type }
    }
}

/// Guess a media type from a file name; `application/octet-stream` when unknown.
pub fn guess_media_type(file_name: &str) -> String {
    if file_name.ends_with(".tm.json") || file_name.ends_with(".jsonld") {
        return "application/json".to_owned();
    }
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_owned()
}

/// Check that an attachment name is a single plain file name.
pub fn validate_attachment_name(name: &str) -> Result<(), RepoError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(RepoError::InvalidInput(format!(
            "invalid attachment name: {name:?}"
        )));
    }
    Ok(())
}

/// What an attachment container is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentContainerRef {
    /// Shared by every version of a TM name.
    TmName(String),
    /// Bound to one TM id.
    TmId(String),
}

impl AttachmentContainerRef {
    /// Interpret a string as a TM id when it has the id suffix, otherwise as a TM name.
    pub fn parse(s: &str) -> Self {
        if looks_like_tm_id(s) {
            Self::TmId(s.to_owned())
        } else {
            Self::TmName(s.trim_end_matches('/').to_owned())
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::TmName(v) | Self::TmId(v) => v,
        }
    }

    /// Repository-relative directory holding the container's files.
    pub fn dir(&self) -> Result<String, RepoError> {
        match self {
            Self::TmName(name) => Ok(format!("{name}/{ATTACHMENTS_DIR}")),
            Self::TmId(id) => {
                let tm_id = TmId::parse(id)?;
                Ok(format!(
                    "{}/{ATTACHMENTS_DIR}/{}",
                    tm_id.name(),
                    tm_id.version_stem()
                ))
            }
        }
    }

    /// Repository-relative path of one attachment file.
    pub fn file_path(&self, attachment: &str) -> Result<String, RepoError> {
        validate_attachment_name(attachment)?;
        Ok(format!("{}/{attachment}", self.dir()?))
    }
}

impl fmt::Display for AttachmentContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TmName(v) => write!(f, "TM name {v}"),
            Self::TmId(v) => write!(f, "TM id {v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_dirs() {
        let name = AttachmentContainerRef::parse("a-corp/eagle/BT2000");
        assert_eq!(name.dir().unwrap(), "a-corp/eagle/BT2000/.attachments");
        assert_eq!(
            name.file_path("README.md").unwrap(),
            "a-corp/eagle/BT2000/.attachments/README.md"
        );

        let id = AttachmentContainerRef::parse(
            "a-corp/eagle/BT2000/v1.0.0-20240108140117-5cb3f3b8a0c4.tm.json",
        );
        assert!(matches!(id, AttachmentContainerRef::TmId(_)));
        assert_eq!(
            id.dir().unwrap(),
            "a-corp/eagle/BT2000/.attachments/v1.0.0-20240108140117-5cb3f3b8a0c4"
        );
    }

    #[test]
    fn rejects_path_like_attachment_names() {
        let name = AttachmentContainerRef::TmName("a/b".to_owned());
        for bad in ["", "..", "x/y", "a\\b"] {
            assert!(name.file_path(bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn media_types_guessed() {
        assert_eq!(guess_media_type("README.md"), "text/markdown");
        assert_eq!(guess_media_type("cfg.json"), "application/json");
        assert_eq!(guess_media_type("x.tm.json"), "application/json");
        assert_eq!(guess_media_type("blob"), "application/octet-stream");
    }

    #[test]
    fn serializes_camel_case() {
        let a = Attachment::new("README.md", "text/markdown");
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, r#"{"name":"README.md","mediaType":"text/markdown"}"#);
    }
}
