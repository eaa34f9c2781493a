use crate::error::ProvisioningError;
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tokio::net::unix::pipe;
use tracing::{debug, warn};

/// Named pipe the encoder writes its progress reports into
#[derive(Debug)]
pub struct ProgressChannel {
    path: PathBuf,
}

impl ProgressChannel {
    /// Create `<dir>/<pid>_progress`, replacing a stale file left at that path
    pub fn provision(dir: &Path, pid: u32) -> Result<Self, ProvisioningError> {
        std::fs::create_dir_all(dir).map_err(|source| ProvisioningError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(format!("{}_progress", pid));

        if path.symlink_metadata().is_ok() {
            debug!("Removing stale progress channel {}", path.display());
            std::fs::remove_file(&path).map_err(|source| ProvisioningError::StaleChannel {
                path: path.clone(),
                source,
            })?;
        }

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| ProvisioningError::InvalidPath { path: path.clone() })?;

        // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
        if rc != 0 {
            return Err(ProvisioningError::Fifo {
                path,
                source: io::Error::last_os_error(),
            });
        }

        debug!("Progress channel created at {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the read end without waiting for a writer
    ///
    /// On Linux the pipe is opened read-write, so the reader does not see
    /// end-of-input before the encoder has connected, nor between reconnects.
    pub fn open_receiver(&self) -> Result<pipe::Receiver, ProvisioningError> {
        let mut options = pipe::OpenOptions::new();
        #[cfg(target_os = "linux")]
        options.read_write(true);

        options
            .open_receiver(&self.path)
            .map_err(|source| ProvisioningError::Open {
                path: self.path.clone(),
                source,
            })
    }

    /// Delete the pipe from disk
    pub fn remove(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Progress channel {} removed", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove progress channel {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileTypeExt;
    use tempfile::TempDir;

    #[test]
    fn test_provision_creates_fifo() {
        let dir = TempDir::new().unwrap();
        let pipes = dir.path().join("pipes");

        let channel = ProgressChannel::provision(&pipes, 4242).unwrap();

        assert_eq!(channel.path(), pipes.join("4242_progress"));
        let file_type = std::fs::metadata(channel.path()).unwrap().file_type();
        assert!(file_type.is_fifo());
    }

    #[test]
    fn test_provision_replaces_stale_file() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("7_progress");
        std::fs::write(&stale, b"leftover").unwrap();

        let channel = ProgressChannel::provision(dir.path(), 7).unwrap();

        let file_type = std::fs::metadata(channel.path()).unwrap().file_type();
        assert!(file_type.is_fifo());
    }

    #[test]
    fn test_provision_fails_when_directory_is_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("pipes");
        std::fs::write(&blocker, b"").unwrap();

        let err = ProgressChannel::provision(&blocker, 1).unwrap_err();
        assert!(matches!(err, ProvisioningError::Directory { .. }));
    }

    #[test]
    fn test_remove_is_quiet_when_missing() {
        let dir = TempDir::new().unwrap();
        let channel = ProgressChannel::provision(dir.path(), 9).unwrap();

        channel.remove();
        assert!(!channel.path().exists());
        channel.remove();
    }

    #[tokio::test]
    async fn test_open_receiver_without_writer() {
        let dir = TempDir::new().unwrap();
        let channel = ProgressChannel::provision(dir.path(), 11).unwrap();

        assert!(channel.open_receiver().is_ok());
    }

    #[tokio::test]
    async fn test_open_receiver_failure_is_a_launch_failure() {
        let dir = TempDir::new().unwrap();
        let channel = ProgressChannel::provision(dir.path(), 13).unwrap();

        // Swapped for a regular file between provisioning and opening
        std::fs::remove_file(channel.path()).unwrap();
        std::fs::write(channel.path(), b"").unwrap();

        let err = channel.open_receiver().unwrap_err();
        assert!(matches!(err, ProvisioningError::Open { .. }));
        assert!(crate::error::FfwardenError::from(err).is_launch_failure());
    }
}
