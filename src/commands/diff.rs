use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::io::Write;

use git_metapack::{MetapackContext, ObjectId, TreeDiffRecord};

#[derive(Debug, Args)]
pub struct DiffArgs {
    /// Print a JSON array instead of raw diff lines
    #[arg(long)]
    pub json: bool,

    /// Commit whose changes to print
    #[arg(value_name = "COMMIT")]
    pub commit: String,

    /// Its (only) parent
    #[arg(value_name = "PARENT")]
    pub parent: String,
}

#[derive(Debug, Serialize)]
struct DiffOutput {
    path: String,
    old_mode: String,
    new_mode: String,
    old_id: Option<ObjectId>,
    new_id: Option<ObjectId>,
}

impl From<&TreeDiffRecord<'_>> for DiffOutput {
    fn from(record: &TreeDiffRecord<'_>) -> Self {
        DiffOutput {
            path: record.path.to_string(),
            old_mode: format!("{:06o}", record.old_mode),
            new_mode: format!("{:06o}", record.new_mode),
            old_id: record.old_id,
            new_id: record.new_id,
        }
    }
}

/// Write one record in `git diff-tree --raw` layout (without the status letter)
fn write_raw<W: Write>(output: &mut W, record: &TreeDiffRecord<'_>) -> std::io::Result<()> {
    write!(
        output,
        ":{:06o} {:06o} {} {}\t",
        record.old_mode,
        record.new_mode,
        record.old_id.unwrap_or(ObjectId::NULL),
        record.new_id.unwrap_or(ObjectId::NULL),
    )?;
    output.write_all(record.path)?;
    writeln!(output)
}

/// Handle the diff command
/// Returns false when no tree metapack has this commit/parent pair
pub fn handle<W: Write>(ctx: &MetapackContext, args: &DiffArgs, output: &mut W) -> Result<bool> {
    let commit = ObjectId::from_hex(&args.commit)
        .with_context(|| format!("bad commit id {:?}", args.commit))?;
    let parent = ObjectId::from_hex(&args.parent)
        .with_context(|| format!("bad parent id {:?}", args.parent))?;

    let Some(records) = ctx.tree_diff(&commit, &parent) else {
        tracing::debug!("no precomputed diff for {} against {}", commit, parent);
        return Ok(false);
    };

    if args.json {
        let out: Vec<DiffOutput> = records.map(|r| DiffOutput::from(&r)).collect();
        writeln!(output, "{}", serde_json::to_string_pretty(&out)?)?;
    } else {
        for record in records {
            write_raw(output, &record)?;
        }
    }
    Ok(true)
}
