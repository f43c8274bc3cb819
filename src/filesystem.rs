//! Formatting, mounting and flushing wrappers.
//!
//! Mounts are scoped: a [`Mount`] unmounts itself on drop so an aborted run
//! never leaves the data or boot partition mounted. The success path calls
//! [`Mount::unmount`] explicitly to surface unmount failures.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use crate::process::Cmd;

/// Format a partition as exFAT with the given volume label.
pub fn format_exfat(partition: &str, label: &str) -> Result<()> {
    Cmd::new("/sbin/mkfs.exfat")
        .args(["-n", label, partition])
        .error_msg("mkfs.exfat failed")
        .run()?;
    Ok(())
}

/// A mounted partition, unmounted when dropped.
pub struct Mount {
    mount_point: PathBuf,
    mounted: bool,
}

impl Mount {
    /// Mount `partition` of type `fstype` on `mount_point`, creating the
    /// mount point if needed.
    pub fn new(partition: &str, fstype: &str, mount_point: &Path) -> Result<Self> {
        fs::create_dir_all(mount_point)?;
        Cmd::new("mount")
            .args(["-t", fstype, partition])
            .arg_path(mount_point)
            .error_msg("mount failed")
            .run()?;
        Ok(Self {
            mount_point: mount_point.to_path_buf(),
            mounted: true,
        })
    }

    /// Directory the partition is mounted on.
    pub fn path(&self) -> &Path {
        &self.mount_point
    }

    /// Unmount, reporting failure.
    pub fn unmount(mut self) -> Result<()> {
        self.mounted = false;
        sync();
        Cmd::new("umount")
            .arg_path(&self.mount_point)
            .error_msg("umount failed")
            .run()?;
        Ok(())
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        if self.mounted {
            let _ = Cmd::new("umount").arg_path(&self.mount_point).allow_fail().run();
        }
    }
}

/// Flush filesystem buffers to disk.
pub fn sync() {
    let _ = Cmd::new("sync").allow_fail().run();
}
