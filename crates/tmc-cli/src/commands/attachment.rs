use super::{describe, json_pretty, warn_partial, Session, EXIT_SUCCESS};
use std::io::Write;
use std::path::Path;
use tmc_model::{Attachment, AttachmentContainerRef};

/// Attach `file` to a TM name or TM id.
pub fn import(
    session: &Session,
    container: &str,
    file: &Path,
    name: Option<&str>,
    media_type: Option<&str>,
    force: bool,
) -> Result<u8, String> {
    let container = AttachmentContainerRef::parse(container);
    let name = match name {
        Some(n) => n.to_owned(),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| format!("validation error: {} has no file name", file.display()))?,
    };
    let attachment = match media_type {
        Some(mt) => Attachment::new(&name, mt),
        None => Attachment::guessed(&name),
    };
    let content =
        std::fs::read(file).map_err(|e| format!("failed to read {}: {e}", file.display()))?;
    session
        .catalog
        .import_attachment(&session.ctx, &session.spec, &container, &attachment, &content, force)
        .map_err(|e| describe(&e))?;
    if session.json {
        let payload = serde_json::json!({ "container": container.value(), "attachment": attachment });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("attached {name} to {}", container.value());
    }
    Ok(EXIT_SUCCESS)
}

pub fn fetch(
    session: &Session,
    container: &str,
    name: &str,
    output: Option<&Path>,
) -> Result<u8, String> {
    let container = AttachmentContainerRef::parse(container);
    let found = session
        .catalog
        .fetch_attachment(&session.ctx, &session.spec, &container, name)
        .map_err(|e| describe(&e))?;
    warn_partial(&found.errors);
    match output {
        Some(out) => {
            let path = if out.is_dir() { out.join(name) } else { out.to_path_buf() };
            std::fs::write(&path, &found.data)
                .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
            println!("fetched {name} to {}", path.display());
        }
        None => std::io::stdout()
            .lock()
            .write_all(&found.data)
            .map_err(|e| format!("failed to write output: {e}"))?,
    }
    Ok(EXIT_SUCCESS)
}

pub fn delete(session: &Session, container: &str, name: &str) -> Result<u8, String> {
    let container = AttachmentContainerRef::parse(container);
    session
        .catalog
        .delete_attachment(&session.ctx, &session.spec, &container, name)
        .map_err(|e| describe(&e))?;
    println!("deleted {name} from {}", container.value());
    Ok(EXIT_SUCCESS)
}
