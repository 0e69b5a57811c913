use super::{
    colorize_status, describe, json_pretty, Session, EXIT_STORE_ERROR, EXIT_SUCCESS,
};
use tmc_model::{CheckResultKind, NameFilterType, SearchParams};

/// Verify index and files of every addressed repository.
pub fn run(session: &Session, name: Option<&str>) -> Result<u8, String> {
    let filter = name.map_or_else(SearchParams::default, |n| {
        SearchParams::with_name(n, NameFilterType::Prefix)
    });
    let checks = session
        .catalog
        .check_integrity(&session.ctx, &session.spec, &filter)
        .map_err(|e| describe(&e))?;

    let mut failed = false;
    let mut payload = Vec::new();
    for check in &checks {
        match &check.results {
            Ok(results) => {
                failed |= results.iter().any(|r| r.kind == CheckResultKind::Error);
                if session.json {
                    payload.push(serde_json::json!({ "repo": check.repo, "results": results }));
                } else {
                    for r in results.iter().filter(|r| r.kind != CheckResultKind::Ok) {
                        println!(
                            "{:<6} {}: {} {}",
                            colorize_status(&r.kind.to_string()),
                            check.repo,
                            r.resource,
                            r.message
                        );
                    }
                    let ok = results.iter().filter(|r| r.kind == CheckResultKind::Ok).count();
                    println!("{}: {ok}/{} resources OK", check.repo, results.len());
                }
            }
            Err(e) => {
                failed = true;
                if session.json {
                    payload.push(serde_json::json!({ "repo": check.repo, "error": e.to_string() }));
                } else {
                    println!("{:<6} {}: {e}", colorize_status("ERROR"), check.repo);
                }
            }
        }
    }
    if session.json {
        println!("{}", json_pretty(&payload)?);
    }
    Ok(if failed { EXIT_STORE_ERROR } else { EXIT_SUCCESS })
}
