use super::{
    colorize_status, describe, exit_code_for_message, json_pretty, Session, EXIT_FAILURE,
    EXIT_SUCCESS,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tmc_model::ImportOptions;

/// Import a file, or every `*.json` file below a directory.
pub fn run(session: &Session, path: &Path, opts: &ImportOptions) -> Result<u8, String> {
    let pb = if path.is_dir() && !session.json {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} importing {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(path.display().to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        Some(pb)
    } else {
        None
    };

    let results = session
        .catalog
        .import_path(&session.ctx, &session.spec, path, opts);
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }
    let results = results.map_err(|e| describe(&e))?;

    let mut code = EXIT_SUCCESS;
    let mut report = Vec::with_capacity(results.len());
    for file in &results {
        let entry = match &file.result {
            Ok(res) => {
                let status = if res.is_warning() { "warning" } else { "imported" };
                serde_json::json!({
                    "file": file.file,
                    "status": status,
                    "tmID": res.tm_id,
                    "message": res.message,
                    "code": res.conflict.as_ref().map(tmc_model::TmConflict::code),
                })
            }
            Err(e) => {
                let msg = describe(e);
                let this = exit_code_for_message(&msg);
                if code == EXIT_SUCCESS || this == EXIT_FAILURE {
                    code = this;
                }
                serde_json::json!({
                    "file": file.file,
                    "status": "failed",
                    "message": msg,
                    "code": e.code(),
                })
            }
        };
        report.push(entry);
    }

    if session.json {
        println!("{}", json_pretty(&report)?);
    } else {
        for entry in &report {
            let status = entry["status"].as_str().unwrap_or_default();
            let subject = entry["tmID"]
                .as_str()
                .map_or_else(|| entry["file"].to_string(), str::to_owned);
            match entry["message"].as_str().filter(|m| !m.is_empty()) {
                Some(msg) => println!("{:<9} {subject}: {msg}", colorize_status(status)),
                None => println!("{:<9} {subject}", colorize_status(status)),
            }
        }
    }
    Ok(code)
}
