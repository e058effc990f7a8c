//! Offline maintenance of the feeds being served.
//!
//! Every directory directly beneath the public directory is a feed. `update`
//! pulls new episodes into its `feed.xml` from the upstream feeds listed in its
//! `source.txt`, and `refresh` re-applies the channel metadata from its
//! `feed0.xml` template.

use std::path::{Path, PathBuf};

mod description;
mod refresh;
mod update;
mod xml;

pub use refresh::refresh_all;
pub use update::{FeedUpdater, UpdateOptions, SOURCE_FILE};

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),
}

/// The feed directories directly beneath `public_dir`, sorted by name.
/// Hidden directories are skipped, since they are never served.
pub async fn feed_dirs(public_dir: &Path) -> Result<Vec<PathBuf>, FeedError> {
    let mut dirs = Vec::new();
    let mut entries = tokio::fs::read_dir(public_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }

    dirs.sort();
    Ok(dirs)
}
