//! Per-owner data layout under the data directory.
//!
//! `sessions/<email>/*.session` holds the worker login sessions,
//! `scraped_data/<email>/` receives scrape output.

use std::path::{Path, PathBuf};

use anyhow::Context;

const SESSIONS_DIR: &str = "sessions";
const SCRAPED_DATA_DIR: &str = "scraped_data";
const SESSION_EXT: &str = "session";

/// The owner id becomes a path segment; reject anything that could escape it.
fn owner_segment(owner: &str) -> anyhow::Result<&str> {
    let owner = owner.trim();
    if owner.is_empty()
        || owner == "."
        || owner == ".."
        || owner.contains(['/', '\\', '\0'])
    {
        anyhow::bail!("owner id is not usable as a directory name: {owner:?}");
    }
    Ok(owner)
}

pub fn sessions_dir(data_dir: &Path, owner: &str) -> anyhow::Result<PathBuf> {
    Ok(data_dir.join(SESSIONS_DIR).join(owner_segment(owner)?))
}

pub fn scraped_data_dir(data_dir: &Path, owner: &str) -> anyhow::Result<PathBuf> {
    Ok(data_dir.join(SCRAPED_DATA_DIR).join(owner_segment(owner)?))
}

pub async fn ensure_scraped_data_dir(data_dir: &Path, owner: &str) -> anyhow::Result<PathBuf> {
    let dir = scraped_data_dir(data_dir, owner)?;
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

/// First `*.session` file in the owner's session directory, by name.
///
/// `Ok(None)` when the directory is missing or holds no sessions.
pub async fn first_session_file(data_dir: &Path, owner: &str) -> anyhow::Result<Option<PathBuf>> {
    let dir = sessions_dir(data_dir, owner)?;
    let mut rd = match tokio::fs::read_dir(&dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {}", dir.display())),
    };

    let mut sessions = Vec::new();
    while let Some(entry) = rd
        .next_entry()
        .await
        .with_context(|| format!("read {}", dir.display()))?
    {
        let path = entry.path();
        let is_session = path.extension().is_some_and(|ext| ext == SESSION_EXT);
        if is_session && entry.file_type().await.is_ok_and(|t| t.is_file()) {
            sessions.push(path);
        }
    }
    sessions.sort();
    Ok(sessions.into_iter().next())
}
