#![deny(clippy::mod_module_files)]
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use git_metapack::config::MetapackConfig;
use git_metapack::{MetapackContext, Repository};

mod commands;

/// Write and query metapacks for git packfiles
#[derive(Debug, Parser)]
#[command(name = "git-metapack", version)]
struct Cli {
    /// Objects directory [default: config, $GIT_OBJECT_DIRECTORY, .git/objects]
    #[arg(long, global = true, value_name = "DIR")]
    objects_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate metapacks for the named packs, or for every pack
    Write(commands::write::WriteArgs),
    /// Look a commit up in the commit metapacks
    Commit(commands::commit::CommitArgs),
    /// Print the precomputed diff of a commit against its parent
    Diff(commands::diff::DiffArgs),
    /// Report which packs have usable metapacks
    Verify,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("git-metapack: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn init_logging() {
    let default_level = "info";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Ok(false) means the lookup missed or verification found gaps.
fn run(cli: Cli) -> Result<bool> {
    let config = MetapackConfig::load()?;
    let objects_dir = cli.objects_dir.unwrap_or_else(|| config.objects_dir.clone());
    let repo = Repository::open(&objects_dir)
        .with_context(|| format!("Failed to open objects directory {:?}", objects_dir))?;

    let stdout = std::io::stdout();
    let mut output = stdout.lock();

    let found = match &cli.command {
        Command::Write(args) => {
            commands::write::handle(&repo, &config, args, &mut output)?;
            true
        }
        Command::Commit(args) => {
            let ctx = MetapackContext::open(&repo);
            commands::commit::handle(&ctx, args, &mut output)?
        }
        Command::Diff(args) => {
            let ctx = MetapackContext::open(&repo);
            commands::diff::handle(&ctx, args, &mut output)?
        }
        Command::Verify => {
            let ctx = MetapackContext::open(&repo);
            commands::verify::handle(&ctx, &config.default_types, &mut output)?
        }
    };

    output.flush()?;
    Ok(found)
}
