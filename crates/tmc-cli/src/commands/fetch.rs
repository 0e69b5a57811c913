use super::{describe, json_pretty, warn_partial, Session, EXIT_SUCCESS};
use std::io::Write;
use std::path::Path;

/// Fetch a TM by id or `name[:semver]`, to stdout or to `output`.
///
/// When `output` is a directory the TM is written under its id path.
pub fn run(
    session: &Session,
    target: &str,
    output: Option<&Path>,
    restore_id: bool,
) -> Result<u8, String> {
    let fetched = session
        .catalog
        .fetch_any(&session.ctx, &session.spec, target, restore_id)
        .map_err(|e| describe(&e))?;
    warn_partial(&fetched.errors);
    let (id, content) = fetched.data;

    let Some(output) = output else {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(&content)
            .and_then(|()| stdout.write_all(b"\n"))
            .map_err(|e| format!("failed to write output: {e}"))?;
        return Ok(EXIT_SUCCESS);
    };

    let path = if output.is_dir() {
        output.join(&id)
    } else {
        output.to_path_buf()
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    std::fs::write(&path, &content)
        .map_err(|e| format!("failed to write {}: {e}", path.display()))?;

    if session.json {
        let payload = serde_json::json!({ "tmID": id, "path": path });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("fetched {id} to {}", path.display());
    }
    Ok(EXIT_SUCCESS)
}
