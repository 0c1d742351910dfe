//! Identity marker files
//!
//! An empty file named after the leased MAC (`01-02-ab-...`) in the PXE
//! configuration directory. A boot loader keys off the name; the file is
//! owned by the invoking user so unprivileged tooling can fill it in.

use crate::error::{Error, Result};
use crate::network::MacAddr;
use nix::unistd::{Uid, chown};
use std::fs::{self, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A published identity marker file
#[derive(Debug, PartialEq, Eq)]
pub struct IdentityFile {
    path: PathBuf,
}

impl IdentityFile {
    /// Marker path for `mac` in `dir`
    pub fn path_for(dir: &Path, mac: &MacAddr) -> PathBuf {
        dir.join(mac.pxe_file_name())
    }

    /// Create the marker, world-readable and owned by `owner`
    ///
    /// On failure nothing is left on disk.
    pub fn publish(dir: &Path, mac: &MacAddr, owner: Uid) -> Result<Self> {
        let path = Self::path_for(dir, mac);

        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&path)
            .map_err(|e| Error::IdentityFile {
                action: "create",
                path: path.clone(),
                message: e.to_string(),
            })?;

        let marker = Self { path };
        marker.finish(owner).inspect_err(|_| {
            let _ = fs::remove_file(&marker.path);
        })?;

        debug!(path = %marker.path.display(), owner = %owner, "Identity file published");
        Ok(marker)
    }

    fn finish(&self, owner: Uid) -> Result<()> {
        chown(&self.path, Some(owner), None).map_err(|e| Error::IdentityFile {
            action: "chown",
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        fs::set_permissions(&self.path, Permissions::from_mode(0o644)).map_err(|e| {
            Error::IdentityFile {
                action: "chmod",
                path: self.path.clone(),
                message: e.to_string(),
            }
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the marker; an already missing file is fine
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::IdentityFile {
                action: "remove",
                path: self.path.clone(),
                message: e.to_string(),
            }),
        }
    }
}
