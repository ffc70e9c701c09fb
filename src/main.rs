//! Knowledge Hub CLI entry point.

use clap::Parser;
use kh::cli::commands;
use kh::cli::{Cli, Commands};
use kh::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    // Resolve effective JSON mode: --json OR non-TTY stdout
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    // Run the command and handle errors
    match run(&cli, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info,reqwest=info,hyper=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    let db = cli.db.as_ref();
    let actor = cli.actor.as_deref();

    match &cli.command {
        Commands::Init { force, dimensions } => {
            commands::init::execute(db, *force, *dimensions, json)
        }
        Commands::Version => commands::version::execute(json),
        Commands::Status => commands::status::execute(db, actor, json),

        // Sessions and capture
        Commands::Session { command } => commands::session::execute(command, db, actor, json),
        Commands::Capture(args) => commands::capture::execute(args, db, actor, json),

        // Ingestion and index maintenance
        Commands::Ingest { command } => commands::ingest::execute(command, db, actor, json),

        // Retrieval
        Commands::Search(args) => commands::search::execute(args, db, json),
        Commands::Graph(args) => commands::graph::execute(args, db, json),
    }
}
