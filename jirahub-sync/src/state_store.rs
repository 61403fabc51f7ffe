//! Sync state store: the cursor and the failed-issue set, across runs.
//!
//! Persists a [`SyncState`] JSON document at `<home>/.jirahub/state.json`
//! unless a path is given. Writes go to `<path>.tmp` and are renamed into
//! place. Older placeholder files holding a single timestamp line still
//! load.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jirahub_core::config::parse_timestamp;
use jirahub_core::types::IssueRef;

use crate::error::{io_err, SyncError};

/// On-disk sync state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncState {
    /// Latest update time of a fully processed issue.
    pub cursor: Option<DateTime<Utc>>,
    /// Issues to retry on the next run regardless of update time.
    #[serde(default)]
    pub failed: BTreeSet<IssueRef>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SyncStateCompat {
    Structured(SyncState),
    Stamp(String),
}

/// `<home>/.jirahub/state.json`
pub fn default_path_at(home: &Path) -> PathBuf {
    home.join(".jirahub").join("state.json")
}

/// Load the state at `path`; an empty state when the file does not exist.
pub fn load(path: &Path) -> Result<SyncState, SyncError> {
    if !path.exists() {
        return Ok(SyncState::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(SyncState::default());
    }
    match serde_json::from_str::<SyncStateCompat>(&contents) {
        Ok(SyncStateCompat::Structured(state)) => Ok(state),
        Ok(SyncStateCompat::Stamp(stamp)) => from_stamp(&stamp, path),
        Err(err) => match parse_timestamp(contents.trim()) {
            Some(cursor) => Ok(SyncState {
                cursor: Some(cursor),
                failed: BTreeSet::new(),
            }),
            None => Err(SyncError::Json(err)),
        },
    }
}

fn from_stamp(stamp: &str, path: &Path) -> Result<SyncState, SyncError> {
    let cursor = parse_timestamp(stamp.trim()).ok_or_else(|| {
        io_err(
            path,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unrecognised timestamp {stamp:?}"),
            ),
        )
    })?;
    Ok(SyncState {
        cursor: Some(cursor),
        failed: BTreeSet::new(),
    })
}

/// Save `state` to `path` atomically, creating parent directories.
pub fn save(path: &Path, state: &SyncState) -> Result<(), SyncError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid sync state path"),
        ));
    };
    if !dir.as_os_str().is_empty() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }

    let json = serde_json::to_string_pretty(state)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use jirahub_core::types::Source;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn empty_state_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let state = load(&default_path_at(tmp.path())).unwrap();
        assert_eq!(state, SyncState::default());
    }

    #[test]
    fn save_creates_directories_and_cleans_tmp() {
        let tmp = TempDir::new().unwrap();
        let path = default_path_at(tmp.path());
        let state = SyncState {
            cursor: Some(Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap()),
            failed: BTreeSet::from([IssueRef::new(Source::Jira, "WID-3")]),
        };
        save(&path, &state).unwrap();
        assert!(!tmp.path().join(".jirahub/state.json.tmp").exists());
        assert_eq!(load(&path).unwrap(), state);

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"failed\""), "{json}");
        assert!(json.contains("\"jira\""), "{json}");
    }

    #[test]
    fn legacy_placeholder_line_loads_as_cursor() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("placeholder");
        std::fs::write(&path, "2020-05-01T10:00:00+00:00\n").unwrap();
        let state = load(&path).unwrap();
        assert_eq!(state.cursor, Some(Utc.with_ymd_and_hms(2020, 5, 1, 10, 0, 0).unwrap()));
        assert!(state.failed.is_empty());
    }

    #[test]
    fn document_without_failed_defaults_to_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, r#"{"cursor":"2020-05-01T10:00:00Z"}"#).unwrap();
        let state = load(&path).unwrap();
        assert!(state.cursor.is_some());
        assert!(state.failed.is_empty());
    }

    #[test]
    fn garbage_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load(&path), Err(SyncError::Json(_))));
    }
}
