use super::{describe, json_pretty, Session, EXIT_SUCCESS};

pub fn run(session: &Session, id: &str, force: bool) -> Result<u8, String> {
    if !force {
        return Err("validation error: deleting a TM is permanent; pass --force".to_owned());
    }
    session
        .catalog
        .delete(&session.ctx, &session.spec, id)
        .map_err(|e| describe(&e))?;
    if session.json {
        println!("{}", json_pretty(&serde_json::json!({ "deleted": id }))?);
    } else {
        println!("deleted {id}");
    }
    Ok(EXIT_SUCCESS)
}
