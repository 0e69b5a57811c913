mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use commands::{exit_code_for_message, Session, EXIT_FAILURE};
use std::path::PathBuf;
use std::process::ExitCode;
use tmc_core::{install_signal_handler, Catalog, Config, RepoKind};
use tmc_model::{ImportOptions, RepoSpec};

#[derive(Debug, Parser)]
#[command(name = "tmc", version, about = "Federated catalog for W3C WoT Thing Models")]
struct Cli {
    /// Configuration file [default: $TMC_CONFIG or ~/.config/tmc/config.json].
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use only this configured repository.
    #[arg(long, short = 'r', global = true, conflicts_with = "directory")]
    repo: Option<String>,

    /// Use this directory as an ad-hoc file repository.
    #[arg(long, short = 'd', global = true)]
    directory: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List TM names, optionally below a name prefix.
    List {
        name: Option<String>,
        /// Only TMs by this author (repeatable).
        #[arg(long)]
        author: Vec<String>,
        /// Only TMs by this manufacturer (repeatable).
        #[arg(long)]
        manufacturer: Vec<String>,
        /// Only TMs with this part number (repeatable).
        #[arg(long)]
        mpn: Vec<String>,
        /// Substring search over names and descriptions.
        #[arg(long, short = 's')]
        search: Option<String>,
    },
    /// List the versions of a TM name.
    Versions { name: String },
    /// Fetch a TM by id, or the newest one matching name[:semver].
    Fetch {
        target: String,
        /// Write to this file, or below this directory.
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Put the original external id back into the `id` field.
        #[arg(long, default_value_t = false)]
        restore_id: bool,
    },
    /// Import a TM file, or every *.json file below a directory.
    Import {
        path: PathBuf,
        /// Import even if identical content is already stored.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Optional path inserted into the id after the part number.
        #[arg(long, default_value = "")]
        opt_path: String,
    },
    /// Delete a TM version.
    Delete {
        id: String,
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Rebuild the index, or update it for the given ids.
    Index { ids: Vec<String> },
    /// Verify that index and stored files agree.
    Check { name: Option<String> },
    /// Manage attachments of TM names and TM ids.
    #[command(subcommand)]
    Attachment(AttachmentCommand),
    /// Manage configured repositories.
    #[command(subcommand)]
    Repo(RepoCommand),
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum AttachmentCommand {
    /// Attach a file to a TM name or TM id.
    Import {
        container: String,
        file: PathBuf,
        /// Attachment name [default: file name].
        #[arg(long)]
        name: Option<String>,
        /// Media type [default: guessed from the name].
        #[arg(long)]
        media_type: Option<String>,
        /// Overwrite an existing attachment.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Print or save an attachment.
    Fetch {
        container: String,
        name: String,
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Remove an attachment.
    Delete { container: String, name: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    File,
    Http,
    Tmc,
    S3,
}

impl From<KindArg> for RepoKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::File => RepoKind::File,
            KindArg::Http => RepoKind::Http,
            KindArg::Tmc => RepoKind::Tmc,
            KindArg::S3 => RepoKind::S3,
        }
    }
}

#[derive(Debug, Subcommand)]
enum RepoCommand {
    /// Add a repository to the configuration.
    Add {
        name: String,
        #[arg(long = "type", value_enum)]
        kind: KindArg,
        /// Directory, URL, or URL template with {{ID}}.
        loc: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Bearer token, or $VAR to read it from the environment.
        #[arg(long)]
        bearer: Option<String>,
        #[arg(long)]
        bucket: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Remove a repository from the configuration.
    Remove { name: String },
    /// Include a repository in federated reads.
    Enable { name: String },
    /// Exclude a repository from federated reads.
    Disable { name: String },
    /// List configured repositories.
    List,
    /// Show one repository's settings.
    Show { name: String },
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TMC_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();
    init_logging(&cli);

    let result = run(cli);
    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for_message(&msg))
        }
    }
}

fn run(cli: Cli) -> Result<u8, String> {
    match cli.command {
        Commands::Completions { shell } => return commands::completions::run::<Cli>(shell),
        Commands::ManPages { ref dir } => return commands::man_pages::run::<Cli>(dir),
        _ => {}
    }

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .map_err(|e| format!("failed to load {}: {e}", config_path.display()))?;

    let action = match cli.command {
        Commands::Repo(action) => action,
        other => {
            let session = Session {
                catalog: Catalog::new(config),
                spec: RepoSpec::new(cli.repo.as_deref(), cli.directory.clone())
                    .map_err(|e| e.to_string())?,
                ctx: install_signal_handler(),
                json: cli.json,
            };
            return run_catalog(&session, other);
        }
    };

    match action {
        RepoCommand::Add {
            name,
            kind,
            loc,
            description,
            bearer,
            bucket,
            region,
            endpoint,
            prefix,
        } => commands::repo::add(
            &config_path,
            config,
            commands::repo::AddArgs {
                name,
                kind: kind.into(),
                loc,
                description,
                bearer,
                bucket,
                region,
                endpoint,
                prefix,
            },
        ),
        RepoCommand::Remove { name } => commands::repo::remove(&config_path, config, &name),
        RepoCommand::Enable { name } => {
            commands::repo::set_enabled(&config_path, config, &name, true)
        }
        RepoCommand::Disable { name } => {
            commands::repo::set_enabled(&config_path, config, &name, false)
        }
        RepoCommand::List => commands::repo::list(&config, cli.json),
        RepoCommand::Show { name } => commands::repo::show(&config, &name),
    }
}

fn run_catalog(session: &Session, command: Commands) -> Result<u8, String> {
    match command {
        Commands::List {
            name,
            author,
            manufacturer,
            mpn,
            search,
        } => commands::list::run(
            session,
            &commands::list::ListArgs {
                name,
                author,
                manufacturer,
                mpn,
                search,
            },
        ),
        Commands::Versions { name } => commands::versions::run(session, &name),
        Commands::Fetch {
            target,
            output,
            restore_id,
        } => commands::fetch::run(session, &target, output.as_deref(), restore_id),
        Commands::Import {
            path,
            force,
            opt_path,
        } => commands::import::run(session, &path, &ImportOptions { force, opt_path }),
        Commands::Delete { id, force } => commands::delete::run(session, &id, force),
        Commands::Index { ids } => commands::index::run(session, &ids),
        Commands::Check { name } => commands::check::run(session, name.as_deref()),
        Commands::Attachment(AttachmentCommand::Import {
            container,
            file,
            name,
            media_type,
            force,
        }) => commands::attachment::import(
            session,
            &container,
            &file,
            name.as_deref(),
            media_type.as_deref(),
            force,
        ),
        Commands::Attachment(AttachmentCommand::Fetch {
            container,
            name,
            output,
        }) => commands::attachment::fetch(session, &container, &name, output.as_deref()),
        Commands::Attachment(AttachmentCommand::Delete { container, name }) => {
            commands::attachment::delete(session, &container, &name)
        }
        Commands::Repo(_) | Commands::Completions { .. } | Commands::ManPages { .. } => {
            Ok(EXIT_FAILURE)
        }
    }
}
