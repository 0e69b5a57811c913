use super::{describe, json_pretty, warn_partial, Session, EXIT_SUCCESS};

pub fn run(session: &Session, name: &str) -> Result<u8, String> {
    let found = session
        .catalog
        .versions(&session.ctx, &session.spec, name)
        .map_err(|e| describe(&e))?;
    warn_partial(&found.errors);

    if session.json {
        println!("{}", json_pretty(&found.data)?);
        return Ok(EXIT_SUCCESS);
    }
    println!("{:<10} {:<16} {:<12} ID", "VERSION", "TIMESTAMP", "REPO");
    for v in &found.data {
        println!(
            "{:<10} {:<16} {:<12} {}",
            v.version.version.model, v.version.timestamp, v.found_in, v.version.tm_id
        );
        if !v.version.description.is_empty() {
            println!("  {}", v.version.description);
        }
    }
    Ok(EXIT_SUCCESS)
}
