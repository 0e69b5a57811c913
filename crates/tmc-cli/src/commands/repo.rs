use super::{describe, json_pretty, EXIT_SUCCESS};
use std::path::Path;
use tmc_core::{Config, RepoConfig, RepoKind};
use tmc_remote::Auth;

pub struct AddArgs {
    pub name: String,
    pub kind: RepoKind,
    pub loc: Option<String>,
    pub description: Option<String>,
    pub bearer: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub prefix: Option<String>,
}

fn kind_name(repo: &RepoConfig) -> &'static str {
    match repo.kind {
        Some(RepoKind::File) => "file",
        Some(RepoKind::Http) => "http",
        Some(RepoKind::Tmc) => "tmc",
        Some(RepoKind::S3) => "s3",
        None => "?",
    }
}

pub fn add(config_path: &Path, mut config: Config, args: AddArgs) -> Result<u8, String> {
    let repo = RepoConfig {
        kind: Some(args.kind),
        loc: args.loc,
        description: args.description,
        auth: args.bearer.map(Auth::Bearer),
        bucket: args.bucket,
        region: args.region,
        endpoint: args.endpoint,
        prefix: args.prefix,
        ..RepoConfig::default()
    };
    config.add(&args.name, repo).map_err(|e| describe(&e))?;
    config.save(config_path).map_err(|e| describe(&e))?;
    println!("added repository {}", args.name);
    Ok(EXIT_SUCCESS)
}

pub fn remove(config_path: &Path, mut config: Config, name: &str) -> Result<u8, String> {
    config.remove(name).map_err(|e| describe(&e))?;
    config.save(config_path).map_err(|e| describe(&e))?;
    println!("removed repository {name}");
    Ok(EXIT_SUCCESS)
}

pub fn set_enabled(
    config_path: &Path,
    mut config: Config,
    name: &str,
    enabled: bool,
) -> Result<u8, String> {
    config.set_enabled(name, enabled).map_err(|e| describe(&e))?;
    config.save(config_path).map_err(|e| describe(&e))?;
    let state = if enabled { "enabled" } else { "disabled" };
    println!("{state} repository {name}");
    Ok(EXIT_SUCCESS)
}

pub fn list(config: &Config, json: bool) -> Result<u8, String> {
    if json {
        println!("{}", json_pretty(&config.redacted())?);
        return Ok(EXIT_SUCCESS);
    }
    if config.repos().is_empty() {
        println!("no repositories configured");
        return Ok(EXIT_SUCCESS);
    }
    println!("{:<16} {:<5} {:<8} {:<40} DESCRIPTION", "NAME", "TYPE", "ENABLED", "LOCATION");
    for (name, repo) in config.repos() {
        let loc = repo
            .loc
            .clone()
            .or_else(|| repo.bucket.as_ref().map(|b| format!("s3://{b}")))
            .unwrap_or_default();
        println!(
            "{:<16} {:<5} {:<8} {:<40} {}",
            name,
            kind_name(repo),
            repo.is_enabled(),
            loc,
            repo.description.as_deref().unwrap_or("")
        );
    }
    Ok(EXIT_SUCCESS)
}

/// Print one repository's settings with environment-supplied secrets masked.
pub fn show(config: &Config, name: &str) -> Result<u8, String> {
    config.get(name).map_err(|e| e.to_string())?;
    let redacted = config.redacted();
    println!("{}", json_pretty(&redacted["repos"][name])?);
    Ok(EXIT_SUCCESS)
}
