use super::{describe, json_pretty, spin_fail, spin_ok, spinner, warn_partial, Session, EXIT_SUCCESS};

pub fn run(session: &Session, ids: &[String]) -> Result<u8, String> {
    let pb = (!session.json).then(|| spinner("indexing…"));
    let result = session
        .catalog
        .index(&session.ctx, &session.spec, ids)
        .map_err(|e| {
            if let Some(pb) = &pb {
                spin_fail(pb, "indexing failed");
            }
            describe(&e)
        })?;
    if let Some(pb) = &pb {
        spin_ok(pb, &format!("indexed {} repositories", result.data));
    }
    warn_partial(&result.errors);

    if session.json {
        let payload = serde_json::json!({
            "indexed": result.data,
            "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
