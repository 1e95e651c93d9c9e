// Diff Engine
// Classifies files as changed, local-only or device-only

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use tracing::debug;

use super::Manifest;
use crate::arbiter::checkpoint;
use crate::device::{DeviceEntry, DeviceError, DeviceTransport};
use crate::error::{Result, SyncError};
use crate::utilities::{digest_file, paths, IgnoreMatcher};

/// How files present on both sides are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareMode {
    /// SHA-256 when the device can compute it, size otherwise
    #[default]
    Checksum,
    /// Byte size only
    Size,
}

impl FromStr for CompareMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "checksum" | "hash" | "sha256" => Ok(Self::Checksum),
            "size" => Ok(Self::Size),
            other => Err(SyncError::Config(format!(
                "unknown compare mode '{}' (expected checksum or size)",
                other
            ))),
        }
    }
}

/// Outcome of comparing the workspace with the device.
///
/// All three sets hold absolute device paths of files, never directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub changed: BTreeSet<String>,
    pub local_only: BTreeSet<String>,
    pub device_only: BTreeSet<String>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.local_only.is_empty() && self.device_only.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changed.len() + self.local_only.len() + self.device_only.len()
    }

    /// Flagged paths plus every ancestor directory of each, for tree views
    pub fn decorations(&self) -> BTreeSet<String> {
        self.changed
            .iter()
            .chain(&self.local_only)
            .chain(&self.device_only)
            .flat_map(|path| {
                paths::parent_dirs(path)
                    .into_iter()
                    .chain(std::iter::once(path.clone()))
            })
            .collect()
    }
}

/// Compares a local manifest with a device listing
#[derive(Debug, Clone)]
pub struct DiffEngine {
    ignore: IgnoreMatcher,
    device_root: String,
    compare: CompareMode,
}

impl DiffEngine {
    pub fn new(ignore: IgnoreMatcher, device_root: impl Into<String>, compare: CompareMode) -> Self {
        Self {
            ignore,
            device_root: device_root.into(),
            compare,
        }
    }

    pub fn device_root(&self) -> &str {
        &self.device_root
    }

    /// Device files under the root that the ignore rules let through, keyed by
    /// device path
    pub fn filter_device<'a>(&self, entries: &'a [DeviceEntry]) -> BTreeMap<String, &'a DeviceEntry> {
        entries
            .iter()
            .filter(|e| !e.is_dir)
            .filter(|e| paths::is_under_root(&e.path, &self.device_root))
            .filter_map(|e| {
                let rel = paths::to_local_relative(&e.path, &self.device_root);
                if rel.is_empty() || self.ignore.matches(&rel, false) {
                    None
                } else {
                    Some((paths::normalize_path(&e.path), e))
                }
            })
            .collect()
    }

    /// Compute the diff. Only `Cancelled` and a missing port abort; any other
    /// comparison failure marks the file as changed.
    pub async fn diff(
        &self,
        manifest: &Manifest,
        device_entries: &[DeviceEntry],
        transport: &dyn DeviceTransport,
    ) -> Result<DiffResult> {
        let device = self.filter_device(device_entries);
        let mut result = DiffResult::default();
        let mut matched = BTreeSet::new();

        for (key, stat) in &manifest.files {
            if self.ignore.matches(key, false) {
                continue;
            }

            let device_path = paths::to_device_path(key, &self.device_root);
            let Some(remote) = device.get(&device_path) else {
                result.local_only.insert(device_path);
                continue;
            };
            matched.insert(device_path.clone());

            if stat.size != remote.size {
                result.changed.insert(device_path);
                continue;
            }

            if self.compare == CompareMode::Size {
                continue;
            }

            checkpoint()?;
            let same = self
                .checksums_match(manifest, key, &device_path, transport)
                .await?;
            if !same {
                result.changed.insert(device_path);
            }
        }

        result.device_only = device
            .into_keys()
            .filter(|path| !matched.contains(path))
            .collect();

        debug!(
            changed = result.changed.len(),
            local_only = result.local_only.len(),
            device_only = result.device_only.len(),
            "diff computed"
        );

        Ok(result)
    }

    /// Sizes already match. Falls back to that when no device digest exists.
    async fn checksums_match(
        &self,
        manifest: &Manifest,
        key: &str,
        device_path: &str,
        transport: &dyn DeviceTransport,
    ) -> Result<bool> {
        let local_path = manifest.local_path(key);
        let local = tokio::task::spawn_blocking(move || digest_file(&local_path)).await;

        let local = match local {
            Ok(Ok(digest)) => digest,
            Ok(Err(e)) => {
                debug!(path = key, error = %e, "local digest failed, treating as changed");
                return Ok(false);
            }
            Err(e) => {
                debug!(path = key, error = %e, "digest task failed, treating as changed");
                return Ok(false);
            }
        };

        match transport.checksum(device_path).await {
            Ok(Some(remote)) => Ok(remote.eq_ignore_ascii_case(&local)),
            Ok(None) => Ok(true),
            Err(e) if e.is_fatal() => Err(SyncError::Device(e)),
            Err(DeviceError::Unsupported(_)) => Ok(true),
            Err(e) => {
                debug!(path = device_path, error = %e, "device digest failed, treating as changed");
                Ok(false)
            }
        }
    }
}
