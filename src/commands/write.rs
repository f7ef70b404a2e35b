use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use git_metapack::config::MetapackConfig;
use git_metapack::pack::Pack;
use git_metapack::repo::PackOverlay;
use git_metapack::store::ObjectStore;
use git_metapack::{ContentType, Repository};

#[derive(Debug, Args)]
pub struct WriteArgs {
    /// Write the commit metapack
    #[arg(long)]
    pub commits: bool,

    /// Write the tree metapack
    #[arg(long)]
    pub trees: bool,

    /// Process every pack in the objects directory
    #[arg(long, conflicts_with = "packs")]
    pub all: bool,

    /// Pack index (.idx) files to process
    #[arg(value_name = "IDX")]
    pub packs: Vec<PathBuf>,
}

impl WriteArgs {
    /// Types named on the command line, else the configured defaults
    fn content_types(&self, config: &MetapackConfig) -> Vec<ContentType> {
        let mut types = Vec::new();
        if self.commits {
            types.push(ContentType::Commits);
        }
        if self.trees {
            types.push(ContentType::Trees);
        }
        if types.is_empty() {
            types = config.default_types.clone();
        }
        types
    }
}

/// Handle the write command
/// Prints the path of every metapack published
pub fn handle<W: Write>(
    repo: &Repository,
    config: &MetapackConfig,
    args: &WriteArgs,
    output: &mut W,
) -> Result<()> {
    let types = args.content_types(config);
    if types.is_empty() {
        anyhow::bail!("no metapack types selected (use --commits, --trees or default_types)");
    }

    let packs = select_packs(repo, args)?;
    if packs.is_empty() {
        tracing::info!("no packs found in {:?}", repo.pack_dir());
        return Ok(());
    }

    let bar = if args.all {
        let bar = ProgressBar::new((packs.len() * types.len()) as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {msg} [{bar:40.cyan/blue}] {pos}/{len} metapacks ({eta})")
                .context("Failed to create progress template")?
                .progress_chars("█▓░"),
        );
        bar.set_message("Writing metapacks");
        Some(bar)
    } else {
        None
    };

    for pack in &packs {
        let overlay;
        let store: &dyn ObjectStore = if repo.packs().iter().any(|p| Arc::ptr_eq(p, pack)) {
            repo
        } else {
            overlay = PackOverlay::new(pack, repo);
            &overlay
        };
        for content_type in &types {
            let path = content_type.write(pack.as_ref(), store).with_context(|| {
                format!(
                    "Failed to write {} metapack for {:?}",
                    content_type,
                    pack.idx_path()
                )
            })?;
            writeln!(output, "{}", path.display())?;
            if let Some(bar) = &bar {
                bar.inc(1);
            }
        }
    }

    if let Some(bar) = bar {
        bar.finish_with_message("Metapacks written");
    }
    Ok(())
}

fn select_packs(repo: &Repository, args: &WriteArgs) -> Result<Vec<Arc<Pack>>> {
    if args.all {
        return Ok(repo.packs().to_vec());
    }
    if args.packs.is_empty() {
        anyhow::bail!("name at least one pack index, or use --all");
    }

    let mut packs = Vec::with_capacity(args.packs.len());
    for idx_path in &args.packs {
        let pack = match repo.pack_for_index(idx_path) {
            Some(pack) => pack.clone(),
            None => Arc::new(
                Pack::open(idx_path)
                    .with_context(|| format!("Failed to open pack {:?}", idx_path))?,
            ),
        };
        packs.push(pack);
    }
    Ok(packs)
}
