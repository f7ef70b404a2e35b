use anyhow::Result;
use std::io::Write;

use git_metapack::{ContentType, MetapackContext};

/// Handle the verify command
/// One line per pack; returns false if any pack lacks a usable metapack of
/// the `expected` types
pub fn handle<W: Write>(
    ctx: &MetapackContext,
    expected: &[ContentType],
    output: &mut W,
) -> Result<bool> {
    let mut complete = true;
    for entry in ctx.packs() {
        write!(output, "{}", entry.pack().pack_path().display())?;
        for content_type in ContentType::ALL {
            let usable = entry.has(content_type);
            if !usable && expected.contains(&content_type) {
                complete = false;
            }
            let count = match content_type {
                ContentType::Commits => entry.commits().map(|c| c.len()),
                ContentType::Trees => entry.trees().map(|t| t.len()),
            };
            match count {
                Some(n) => write!(output, " {}:{}", content_type, n)?,
                None => write!(output, " {}:-", content_type)?,
            }
        }
        writeln!(output)?;
    }

    if !complete {
        tracing::warn!("some packs are missing metapacks; run `git-metapack write --all`");
    }
    Ok(complete)
}
