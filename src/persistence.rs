//! Durable JSON snapshots with atomic replacement
//!
//! Every persisted record (subscriptions, dedup state) is written as a whole
//! file: serialize to a sibling `.tmp` file, fsync, then rename over the
//! target. A crash mid-write leaves either the old or the new file, never a
//! partial one.

use {
    serde::{de::DeserializeOwned, Serialize},
    std::{
        fs::{self, File},
        io::Write,
        path::{Path, PathBuf},
    },
};

#[derive(Debug)]
pub enum PersistenceError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        PersistenceError::Io(err)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err)
    }
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::Io(e) => write!(f, "IO error: {}", e),
            PersistenceError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for PersistenceError {}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Save a value as pretty JSON, replacing `path` atomically
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_vec_pretty(value)?;
    let tmp = temp_path(path);

    {
        let mut file = File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    log::debug!("Saved {} bytes to {}", json.len(), path.display());
    Ok(())
}

/// Load a JSON snapshot, falling back to `T::default()` when the file is
/// absent, unreadable or corrupt. Never fails.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        log::info!("No existing snapshot file found: {}", path.display());
        return T::default();
    }

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::warn!("⚠️  Failed to read {}: {} (starting empty)", path.display(), e);
            return T::default();
        }
    };

    match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("⚠️  Corrupt snapshot {}: {} (starting empty)", path.display(), e);
            preserve_copy(path, "unrecognized");
            T::default()
        }
    }
}

/// Copy `path` to `<name>.<tag>-<unix ts>` next to it, so the next atomic
/// write cannot destroy data this process did not understand. Returns the
/// copy's path, or `None` if the copy failed (logged).
pub fn preserve_copy(path: &Path, tag: &str) -> Option<PathBuf> {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}-{}", tag, current_timestamp()));
    let backup = path.with_file_name(name);

    match fs::copy(path, &backup) {
        Ok(_) => {
            log::warn!("💾 Kept a copy of {} at {}", path.display(), backup.display());
            Some(backup)
        }
        Err(e) => {
            log::error!("❌ Could not back up {}: {}", path.display(), e);
            None
        }
    }
}

/// Helper to get current Unix timestamp
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
