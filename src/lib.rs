#![deny(clippy::mod_module_files)]
//! Metapacks for git packfiles
//!
//! A metapack is an optional side file next to a `.pack` that answers one
//! kind of history question without inflating objects: the commit metapack
//! stores each commit's timestamp, tree and parents; the tree metapack stores
//! precomputed first-parent tree diffs. Metapacks are bound to the exact pack
//! they were generated from and are ignored whenever they do not match it.

pub mod codec;
pub mod config;
pub mod diff;
pub mod error;
pub mod metapack;
pub mod object;
pub mod pack;
pub mod repo;
pub mod store;

pub use error::{Error, Result};
pub use metapack::{
    CommitMetapack, CommitRecord, ContentType, MetapackContext, TreeDiffIter, TreeDiffRecord,
    TreeMetapack,
};
pub use object::ObjectId;
pub use repo::Repository;
