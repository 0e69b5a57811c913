pub mod attachment;
pub mod check;
pub mod completions;
pub mod delete;
pub mod fetch;
pub mod import;
pub mod index;
pub mod list;
pub mod man_pages;
pub mod repo;
pub mod versions;

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tmc_core::{Catalog, ChildError, CoreError};
use tmc_model::{CancelToken, RepoError, RepoSpec};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_VALIDATION_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

const VALIDATION_PREFIX: &str = "validation error:";
const STORE_PREFIX: &str = "store error:";

/// What every catalog command runs against.
pub struct Session {
    pub catalog: Catalog,
    pub spec: RepoSpec,
    pub ctx: CancelToken,
    pub json: bool,
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Colour a status word for terminal output.
pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "OK" | "imported" => Style::new().green().apply_to(status).to_string(),
        "WARN" | "warning" => Style::new().yellow().apply_to(status).to_string(),
        "ERROR" | "failed" => Style::new().red().bold().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

/// Exit code class of a domain error.
pub fn exit_code_of(err: &RepoError) -> u8 {
    match err {
        RepoError::InvalidInput(_)
        | RepoError::InvalidId(_)
        | RepoError::NameTooLong { .. }
        | RepoError::Conflict(_)
        | RepoError::AttachmentExists(_) => EXIT_VALIDATION_ERROR,
        RepoError::Io(_)
        | RepoError::LockFailed(_)
        | RepoError::NoIndex(_)
        | RepoError::IndexMismatch(_)
        | RepoError::IntegrityFailed(_)
        | RepoError::RepoAccessFailed(_) => EXIT_STORE_ERROR,
        _ => EXIT_FAILURE,
    }
}

/// Render a core error as a message whose prefix carries its exit code class.
pub fn describe(err: &CoreError) -> String {
    let mut msg = match err.repo_error().map(exit_code_of) {
        Some(EXIT_VALIDATION_ERROR) => format!("{VALIDATION_PREFIX} {err}"),
        Some(EXIT_STORE_ERROR) => format!("{STORE_PREFIX} {err}"),
        _ => err.to_string(),
    };
    for child in err.children() {
        msg.push_str(&format!("\n  {child}"));
    }
    msg
}

pub fn exit_code_for_message(msg: &str) -> u8 {
    if msg.starts_with(VALIDATION_PREFIX) {
        EXIT_VALIDATION_ERROR
    } else if msg.starts_with(STORE_PREFIX) {
        EXIT_STORE_ERROR
    } else {
        EXIT_FAILURE
    }
}

/// Print per-repository failures of a partial result to stderr.
pub fn warn_partial(errors: &[ChildError]) {
    for e in errors {
        eprintln!("warning: {e}");
    }
}
