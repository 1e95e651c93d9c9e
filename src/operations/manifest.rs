// Manifest Builder
// Snapshot of the local tree used as the sync baseline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::utilities::{paths, patterns::METADATA_DIR, write_atomic, IgnoreMatcher};

pub const MANIFEST_VERSION: u32 = 1;

/// Manifest file name inside the metadata directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Size and modification time of one local file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    /// Milliseconds since the Unix epoch
    pub mtime: i64,
}

/// Local snapshot: relative `/`-separated key -> stat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: u32,
    pub sync_id: String,
    pub root: PathBuf,
    /// Milliseconds since the Unix epoch
    pub generated_at: i64,
    pub files: BTreeMap<String, FileStat>,
}

/// Local changes between two manifests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDelta {
    pub changed_or_new: Vec<String>,
    pub deleted: Vec<String>,
}

impl ManifestDelta {
    pub fn is_empty(&self) -> bool {
        self.changed_or_new.is_empty() && self.deleted.is_empty()
    }
}

impl Manifest {
    /// Walk `root_dir`, skipping ignored entries, and record every regular file.
    ///
    /// Unreadable entries, symlinks and special files are skipped.
    pub fn build(root_dir: &Path, ignore: &IgnoreMatcher) -> Result<Self> {
        let metadata = fs::metadata(root_dir).map_err(|e| SyncError::io(root_dir, e))?;
        if !metadata.is_dir() {
            return Err(SyncError::NoWorkspace(root_dir.to_path_buf()));
        }

        let mut files = BTreeMap::new();

        let walker = walkdir::WalkDir::new(root_dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 {
                    return true;
                }
                match paths::relative_key(root_dir, e.path()) {
                    Some(rel) => !ignore.matches(&rel, e.file_type().is_dir()),
                    None => false,
                }
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let Some(rel) = paths::relative_key(root_dir, entry.path()) else {
                continue;
            };

            match entry.metadata() {
                Ok(meta) => {
                    let mtime = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_millis() as i64)
                        .unwrap_or(0);
                    files.insert(rel, FileStat { size: meta.len(), mtime });
                }
                Err(e) => debug!(path = %rel, error = %e, "skipping file without metadata"),
            }
        }

        debug!(files = files.len(), root = %root_dir.display(), "manifest built");

        Ok(Self {
            version: MANIFEST_VERSION,
            sync_id: Uuid::new_v4().to_string(),
            root: root_dir.to_path_buf(),
            generated_at: chrono::Utc::now().timestamp_millis(),
            files,
        })
    }

    /// Default manifest location for a workspace
    pub fn path_for(workspace_root: &Path) -> PathBuf {
        workspace_root.join(METADATA_DIR).join(MANIFEST_FILE)
    }

    /// Load a saved manifest. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::io(path, e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| SyncError::Manifest {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Save atomically as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        write_atomic(path, json.as_bytes())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|source| SyncError::Manifest {
            path: self.root.clone(),
            source,
        })
    }

    /// Files added or modified since `previous`, and files it had that are gone now
    pub fn changes_since(&self, previous: &Manifest) -> ManifestDelta {
        let changed_or_new = self
            .files
            .iter()
            .filter(|(key, stat)| previous.files.get(*key) != Some(*stat))
            .map(|(key, _)| key.clone())
            .collect();

        let deleted = previous
            .files
            .keys()
            .filter(|key| !self.files.contains_key(*key))
            .cloned()
            .collect();

        ManifestDelta {
            changed_or_new,
            deleted,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Absolute local path for a manifest key
    pub fn local_path(&self, key: &str) -> PathBuf {
        paths::local_path(&self.root, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::create_dir_all(root.join(".board-sync")).unwrap();
        fs::write(root.join("main.py"), b"x").unwrap();
        fs::write(root.join("lib/util.py"), b"hello").unwrap();
        fs::write(root.join("build/out.py"), b"ignored").unwrap();
        fs::write(root.join(".board-sync/manifest.json"), b"{}").unwrap();
        dir
    }

    #[test]
    fn test_build_skips_ignored() {
        let dir = workspace();
        let ignore = IgnoreMatcher::new(&[".board-sync/", "build/"]).unwrap();
        let manifest = Manifest::build(dir.path(), &ignore).unwrap();

        let keys: Vec<&str> = manifest.files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["lib/util.py", "main.py"]);
        assert_eq!(manifest.files["main.py"].size, 1);
        assert_eq!(manifest.files["lib/util.py"].size, 5);
        assert_eq!(manifest.version, MANIFEST_VERSION);
    }

    #[test]
    fn test_build_has_no_side_effects_and_fresh_ids() {
        let dir = workspace();
        let ignore = IgnoreMatcher::defaults();
        let first = Manifest::build(dir.path(), &ignore).unwrap();
        let second = Manifest::build(dir.path(), &ignore).unwrap();

        assert_eq!(first.files, second.files);
        assert_ne!(first.sync_id, second.sync_id);
        assert!(first.changes_since(&second).is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = workspace();
        let manifest = Manifest::build(dir.path(), &IgnoreMatcher::defaults()).unwrap();
        let path = Manifest::path_for(dir.path());

        manifest.save(&path).unwrap();
        let loaded = Manifest::load(&path).unwrap().unwrap();
        assert_eq!(loaded, manifest);

        let json = fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"syncId\""));
        assert!(json.contains("\"generatedAt\""));
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Manifest::load(&dir.path().join("nope.json")).unwrap().is_none());
    }

    #[test]
    fn test_changes_since() {
        let dir = workspace();
        let ignore = IgnoreMatcher::defaults();
        let before = Manifest::build(dir.path(), &ignore).unwrap();

        fs::write(dir.path().join("main.py"), b"changed").unwrap();
        fs::write(dir.path().join("new.py"), b"n").unwrap();
        fs::remove_file(dir.path().join("lib/util.py")).unwrap();

        let after = Manifest::build(dir.path(), &ignore).unwrap();
        let delta = after.changes_since(&before);
        assert_eq!(delta.changed_or_new, vec!["main.py", "new.py"]);
        assert_eq!(delta.deleted, vec!["lib/util.py"]);
    }
}
