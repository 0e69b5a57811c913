//! Thing Model identity, content digest, index model, and repository contract for tmc.
//!
//! This crate defines the model layer shared by every repository backend:
//! structured TM ids (`TmId`) and their canonical rendering, the id-stripping
//! content digest (`compute_digest`), id derivation from TM metadata
//! (`derive_id`), the in-memory `Index` with filtering and merging, the
//! cross-repository `SearchResult`, and the `Repository` trait that the file,
//! object, HTTP, and peer backends implement.

pub mod attachment;
pub mod cancel;
pub mod digest;
pub mod error;
pub mod fetch_name;
pub mod filter;
pub mod id;
pub mod index;
pub mod naming;
pub mod repository;
pub mod search;
pub mod thing_model;

pub use attachment::{
    guess_media_type, validate_attachment_name, Attachment, AttachmentContainerRef,
    ATTACHMENTS_DIR,
};
pub use cancel::CancelToken;
pub use digest::{compute_digest, normalize_line_endings, with_id};
pub use error::{ConflictKind, NotFoundKind, RepoError, TmConflict};
pub use fetch_name::FetchName;
pub use filter::{matches_any, split_terms, NameFilterType, SearchParams};
pub use id::{
    looks_like_tm_id, parse_strict_semver, TmId, TmVersion, NAME_LENGTH_LIMIT, TIMESTAMP_FORMAT,
    TM_FILE_EXTENSION,
};
pub use index::{Index, IndexEntry, IndexMeta, IndexVersion, ModelVersion, SchemaName, VersionLinks};
pub use naming::{derive_id, sanitize_name, sanitize_path, sanitize_segment};
pub use repository::{
    complete_from_listing, CheckResult, CheckResultKind, CompletionKind, ImportOptions, ImportResult, ImportResultKind,
    RepoSpec, Repository,
};
pub use search::{FoundEntry, FoundVersion, SearchResult};
pub use thing_model::{Link, ThingModel};
