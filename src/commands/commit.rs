use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::io::Write;

use git_metapack::{CommitRecord, MetapackContext, ObjectId};

#[derive(Debug, Args)]
pub struct CommitArgs {
    /// Print a JSON object instead of text
    #[arg(long)]
    pub json: bool,

    /// Full hex commit id
    #[arg(value_name = "ID")]
    pub id: String,
}

#[derive(Debug, Serialize)]
struct CommitOutput {
    id: ObjectId,
    timestamp: u32,
    date: Option<String>,
    tree: ObjectId,
    parent1: Option<ObjectId>,
    parent2: Option<ObjectId>,
}

fn rfc3339(timestamp: u32) -> Option<String> {
    chrono::DateTime::from_timestamp(i64::from(timestamp), 0).map(|dt| dt.to_rfc3339())
}

/// Handle the commit command
/// Returns false when no commit metapack has the commit
pub fn handle<W: Write>(ctx: &MetapackContext, args: &CommitArgs, output: &mut W) -> Result<bool> {
    let id = ObjectId::from_hex(&args.id).with_context(|| format!("bad commit id {:?}", args.id))?;

    let Some(record) = ctx.commit(&id) else {
        tracing::debug!("{} not found in any commit metapack", id);
        return Ok(false);
    };

    if args.json {
        let out = to_output(id, &record);
        writeln!(output, "{}", serde_json::to_string_pretty(&out)?)?;
    } else {
        writeln!(
            output,
            "{} {} {} {} {}",
            record.timestamp,
            record.tree,
            record.parent1.unwrap_or(ObjectId::NULL),
            record.parent2.unwrap_or(ObjectId::NULL),
            rfc3339(record.timestamp).unwrap_or_default()
        )?;
    }
    Ok(true)
}

fn to_output(id: ObjectId, record: &CommitRecord) -> CommitOutput {
    CommitOutput {
        id,
        timestamp: record.timestamp,
        date: rfc3339(record.timestamp),
        tree: record.tree,
        parent1: record.parent1,
        parent2: record.parent2,
    }
}
