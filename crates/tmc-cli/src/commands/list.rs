use super::{describe, json_pretty, warn_partial, Session, EXIT_SUCCESS};
use tmc_model::{NameFilterType, SearchParams};

pub struct ListArgs {
    pub name: Option<String>,
    pub author: Vec<String>,
    pub manufacturer: Vec<String>,
    pub mpn: Vec<String>,
    pub search: Option<String>,
}

impl ListArgs {
    fn search_params(&self) -> SearchParams {
        SearchParams {
            author: self.author.clone(),
            manufacturer: self.manufacturer.clone(),
            mpn: self.mpn.clone(),
            name: self.name.clone().unwrap_or_default(),
            name_filter_type: NameFilterType::Prefix,
            query: self.search.clone().unwrap_or_default(),
            ..SearchParams::default()
        }
    }
}

pub fn run(session: &Session, args: &ListArgs) -> Result<u8, String> {
    let found = session
        .catalog
        .list(&session.ctx, &session.spec, &args.search_params())
        .map_err(|e| describe(&e))?;
    warn_partial(&found.errors);
    let entries = found.data.entries;

    if session.json {
        println!("{}", json_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("no thing models found");
    } else {
        println!(
            "{:<40} {:<16} {:<16} {:<8} REPO",
            "NAME", "AUTHOR", "MANUFACTURER", "VERSIONS"
        );
        for e in &entries {
            let mut repos: Vec<&str> = e.versions.iter().map(|v| v.found_in.as_str()).collect();
            repos.sort_unstable();
            repos.dedup();
            println!(
                "{:<40} {:<16} {:<16} {:<8} {}",
                e.name,
                e.author.name,
                e.manufacturer.name,
                e.versions.len(),
                repos.join(",")
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
