// Sync Planner
// Turns diffs and listings into a flat, ordered list of device operations

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::{DiffResult, Manifest};
use crate::device::DeviceEntry;
use crate::utilities::{paths, IgnoreMatcher};

/// A single device operation, consumed once by the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOperation {
    MkDir { path: String },
    Upload { local: PathBuf, device: String },
    Download { device: String, local: PathBuf },
    Delete { device: String, is_dir: bool },
}

impl SyncOperation {
    /// Device path the operation acts on
    pub fn device_path(&self) -> &str {
        match self {
            Self::MkDir { path } => path,
            Self::Upload { device, .. } | Self::Download { device, .. } | Self::Delete { device, .. } => {
                device
            }
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::MkDir { .. } => "mkdir",
            Self::Upload { .. } => "upload",
            Self::Download { .. } => "download",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Ordered operations for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub operations: Vec<SyncOperation>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Number of operations that move file content
    pub fn transfer_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, SyncOperation::Upload { .. } | SyncOperation::Download { .. }))
            .count()
    }
}

/// Strict ancestors of every path at or below the root, deduplicated,
/// shallowest first
fn ancestor_dirs<'a>(files: impl IntoIterator<Item = &'a String>, device_root: &str) -> Vec<String> {
    let dirs: BTreeSet<String> = files
        .into_iter()
        .flat_map(|f| paths::parent_dirs(f))
        .filter(|d| paths::is_under_root(d, device_root))
        .collect();

    let mut dirs: Vec<String> = dirs.into_iter().collect();
    dirs.sort_by(|a, b| paths::depth(a).cmp(&paths::depth(b)).then_with(|| a.cmp(b)));
    dirs
}

fn local_for(device_path: &str, local_root: &Path, device_root: &str) -> PathBuf {
    paths::local_path(local_root, &paths::to_local_relative(device_path, device_root))
}

/// Deepest first so children go before their parents
fn sort_deepest_first(ops: &mut [SyncOperation]) {
    ops.sort_by(|a, b| {
        paths::depth(b.device_path())
            .cmp(&paths::depth(a.device_path()))
            .then_with(|| a.device_path().cmp(b.device_path()))
    });
}

/// Upload changed and local-only files. `prune` also deletes device-only files.
pub fn plan_push(diff: &DiffResult, local_root: &Path, device_root: &str, prune: bool) -> SyncPlan {
    let mut operations: Vec<SyncOperation> = ancestor_dirs(&diff.local_only, device_root)
        .into_iter()
        .map(|path| SyncOperation::MkDir { path })
        .collect();

    let uploads: BTreeSet<&String> = diff.changed.iter().chain(&diff.local_only).collect();
    operations.extend(uploads.into_iter().map(|device| SyncOperation::Upload {
        local: local_for(device, local_root, device_root),
        device: device.clone(),
    }));

    if prune {
        let mut deletes: Vec<SyncOperation> = diff
            .device_only
            .iter()
            .map(|device| SyncOperation::Delete {
                device: device.clone(),
                is_dir: false,
            })
            .collect();
        sort_deepest_first(&mut deletes);
        operations.extend(deletes);
    }

    SyncPlan { operations }
}

/// Download changed and device-only files. Local files are never removed.
pub fn plan_pull(diff: &DiffResult, local_root: &Path, device_root: &str) -> SyncPlan {
    let downloads: BTreeSet<&String> = diff.changed.iter().chain(&diff.device_only).collect();
    SyncPlan {
        operations: downloads
            .into_iter()
            .map(|device| SyncOperation::Download {
                device: device.clone(),
                local: local_for(device, local_root, device_root),
            })
            .collect(),
    }
}

/// Upload every manifest file, creating every directory on the way
pub fn plan_baseline_push(manifest: &Manifest, local_root: &Path, device_root: &str) -> SyncPlan {
    let files: Vec<String> = manifest
        .files
        .keys()
        .map(|key| paths::to_device_path(key, device_root))
        .collect();

    let mut operations: Vec<SyncOperation> = ancestor_dirs(&files, device_root)
        .into_iter()
        .map(|path| SyncOperation::MkDir { path })
        .collect();

    operations.extend(manifest.files.keys().zip(files).map(|(key, device)| SyncOperation::Upload {
        local: paths::local_path(local_root, key),
        device,
    }));

    SyncPlan { operations }
}

/// Download every non-ignored device file under the root
pub fn plan_baseline_pull(
    entries: &[DeviceEntry],
    ignore: &IgnoreMatcher,
    local_root: &Path,
    device_root: &str,
) -> SyncPlan {
    let files: BTreeSet<String> = entries
        .iter()
        .filter(|e| !e.is_dir && paths::is_under_root(&e.path, device_root))
        .filter(|e| {
            let rel = paths::to_local_relative(&e.path, device_root);
            !rel.is_empty() && !ignore.matches(&rel, false)
        })
        .map(|e| paths::normalize_path(&e.path))
        .collect();

    SyncPlan {
        operations: files
            .into_iter()
            .map(|device| SyncOperation::Download {
                local: local_for(&device, local_root, device_root),
                device,
            })
            .collect(),
    }
}

/// Delete `target` and everything below it, children first, target last.
///
/// `subtree` is a listing of `target` and may be empty for a plain file.
pub fn plan_delete(target: &DeviceEntry, subtree: &[DeviceEntry]) -> SyncPlan {
    let target_path = paths::normalize_path(&target.path);
    let mut operations: Vec<SyncOperation> = subtree
        .iter()
        .filter(|e| {
            let path = paths::normalize_path(&e.path);
            path != target_path && paths::is_under_root(&path, &target_path)
        })
        .map(|e| SyncOperation::Delete {
            device: paths::normalize_path(&e.path),
            is_dir: e.is_dir,
        })
        .collect();
    sort_deepest_first(&mut operations);

    operations.push(SyncOperation::Delete {
        device: target_path,
        is_dir: target.is_dir,
    });

    SyncPlan { operations }
}

/// Delete every entry below the device root, children first. The root stays.
pub fn plan_wipe(entries: &[DeviceEntry], device_root: &str) -> SyncPlan {
    let root = paths::normalize_path(device_root);
    let mut operations: Vec<SyncOperation> = entries
        .iter()
        .map(|e| (paths::normalize_path(&e.path), e.is_dir))
        .filter(|(path, _)| *path != root && paths::is_under_root(path, device_root))
        .map(|(device, is_dir)| SyncOperation::Delete { device, is_dir })
        .collect();
    sort_deepest_first(&mut operations);

    SyncPlan { operations }
}

/// Create `device_path` and every ancestor, shallowest first
pub fn plan_mkdir(device_path: &str) -> SyncPlan {
    let path = paths::normalize_path(device_path);
    let mut operations: Vec<SyncOperation> = paths::parent_dirs(&path)
        .into_iter()
        .map(|path| SyncOperation::MkDir { path })
        .collect();
    if path != "/" {
        operations.push(SyncOperation::MkDir { path });
    }

    SyncPlan { operations }
}
