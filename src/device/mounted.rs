// Mounted Transport
// Treats a directory on the host (a board's mass-storage drive) as the device

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::{DeviceEntry, DeviceError, DeviceTransport, ListEntry, PortInfo};
use crate::utilities::{atomic::temp_sibling, checksum::digest_file, paths};

/// Device filesystem exposed as a host directory, e.g. a CIRCUITPY drive
#[derive(Debug, Clone)]
pub struct MountedTransport {
    mount_point: PathBuf,
}

impl MountedTransport {
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
        }
    }

    /// Host path for an absolute device path
    fn host_path(&self, device_path: &str) -> PathBuf {
        paths::local_path(&self.mount_point, device_path)
    }

    fn map_io(path: &Path, device_path: &str, e: std::io::Error) -> DeviceError {
        if e.kind() == std::io::ErrorKind::NotFound {
            DeviceError::NotFound(device_path.to_string())
        } else {
            DeviceError::io(path, e)
        }
    }
}

#[async_trait]
impl DeviceTransport for MountedTransport {
    async fn list(&self, path: &str) -> Result<Vec<ListEntry>, DeviceError> {
        let dir = self.host_path(path);
        let mut reader = fs::read_dir(&dir)
            .await
            .map_err(|e| Self::map_io(&dir, path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| DeviceError::io(&dir, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| DeviceError::io(entry.path(), e))?;
            entries.push(ListEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: file_type.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat_tree(&self, root: &str) -> Result<Vec<DeviceEntry>, DeviceError> {
        let mut entries = Vec::new();
        let mut pending = vec![paths::normalize_path(root)];

        while let Some(dir) = pending.pop() {
            let host_dir = self.host_path(&dir);
            let mut reader = fs::read_dir(&host_dir)
                .await
                .map_err(|e| Self::map_io(&host_dir, &dir, e))?;

            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| DeviceError::io(&host_dir, e))?
            {
                let device_path =
                    paths::join_device(&dir, &entry.file_name().to_string_lossy());
                let metadata = match entry.metadata().await {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(path = %device_path, error = %e, "skipping unreadable entry");
                        continue;
                    }
                };
                let mtime = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);

                if metadata.is_dir() {
                    entries.push(DeviceEntry {
                        path: device_path.clone(),
                        is_dir: true,
                        size: 0,
                        mtime,
                    });
                    pending.push(device_path);
                } else if metadata.is_file() {
                    entries.push(DeviceEntry {
                        path: device_path,
                        is_dir: false,
                        size: metadata.len(),
                        mtime,
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, DeviceError> {
        let host = self.host_path(path);
        fs::read(&host).await.map_err(|e| Self::map_io(&host, path, e))
    }

    async fn write(&self, local: &Path, path: &str) -> Result<(), DeviceError> {
        let host = self.host_path(path);
        let staged = temp_sibling(&host);

        fs::copy(local, &staged)
            .await
            .map_err(|e| Self::map_io(&staged, path, e))?;
        if let Err(e) = fs::rename(&staged, &host).await {
            let _ = fs::remove_file(&staged).await;
            return Err(DeviceError::io(&host, e));
        }
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<(), DeviceError> {
        let host = self.host_path(path);
        match fs::create_dir(&host).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(Self::map_io(&host, path, e)),
        }
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<(), DeviceError> {
        let host = self.host_path(path);
        let metadata = match fs::metadata(&host).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(DeviceError::io(&host, e)),
        };

        let result = if metadata.is_dir() {
            if recursive {
                fs::remove_dir_all(&host).await
            } else {
                fs::remove_dir(&host).await
            }
        } else {
            fs::remove_file(&host).await
        };
        result.map_err(|e| DeviceError::io(&host, e))
    }

    async fn exists(&self, path: &str) -> Result<bool, DeviceError> {
        let host = self.host_path(path);
        fs::try_exists(&host)
            .await
            .map_err(|e| DeviceError::io(&host, e))
    }

    async fn checksum(&self, path: &str) -> Result<Option<String>, DeviceError> {
        let host = self.host_path(path);
        let digest = tokio::task::spawn_blocking({
            let host = host.clone();
            move || digest_file(&host)
        })
        .await
        .map_err(|e| DeviceError::Command {
            command: "checksum".to_string(),
            message: e.to_string(),
        })?;

        digest
            .map(Some)
            .map_err(|e| Self::map_io(&host, path, e))
    }

    async fn reset(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn list_ports(&self) -> Result<Vec<PortInfo>, DeviceError> {
        Ok(vec![PortInfo {
            port: self.mount_point.display().to_string(),
            description: "Mounted filesystem".to_string(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_and_tree() {
        let device = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let transport = MountedTransport::new(device.path());

        let src = local.path().join("main.py");
        std::fs::write(&src, b"print(1)").unwrap();

        transport.mkdir("/lib").await.unwrap();
        transport.mkdir("/lib").await.unwrap();
        transport.write(&src, "/lib/main.py").await.unwrap();

        assert_eq!(transport.read("/lib/main.py").await.unwrap(), b"print(1)");
        assert!(transport.exists("/lib/main.py").await.unwrap());

        let tree = transport.stat_tree("/").await.unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0], DeviceEntry { mtime: tree[0].mtime, ..DeviceEntry::dir("/lib") });
        assert_eq!(tree[1].path, "/lib/main.py");
        assert_eq!(tree[1].size, 8);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let device = tempfile::tempdir().unwrap();
        let transport = MountedTransport::new(device.path());
        std::fs::create_dir_all(device.path().join("a/b")).unwrap();
        std::fs::write(device.path().join("a/b/c.py"), b"x").unwrap();

        transport.delete("/a", true).await.unwrap();
        transport.delete("/a", true).await.unwrap();
        assert!(!transport.exists("/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_read_is_not_found() {
        let device = tempfile::tempdir().unwrap();
        let transport = MountedTransport::new(device.path());
        assert!(matches!(
            transport.read("/nope.py").await,
            Err(DeviceError::NotFound(_))
        ));
    }
}
