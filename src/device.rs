//! Loop-device attachment with scoped release.
//!
//! A [`LoopDevice`] detaches itself when dropped, so a failure anywhere in
//! the provisioning sequence still frees the device. The success path calls
//! [`LoopDevice::detach`] explicitly so release errors are reported instead
//! of swallowed.

use anyhow::{bail, Result};
use regex::Regex;
use std::path::Path;

use crate::process::Cmd;

/// An image file attached as a block device via losetup.
pub struct LoopDevice {
    path: String,
    attached: bool,
}

impl LoopDevice {
    /// Attach an image file to the first free loop device.
    pub fn attach(image: &Path) -> Result<Self> {
        let result = Cmd::new("/sbin/losetup")
            .args(["--find", "--show"])
            .arg_path(image)
            .error_msg("losetup failed to attach image")
            .run()?;

        let reported = result.stdout_trimmed();
        let device_re = Regex::new(r"(/dev/loop[0-9]+)\.?$").expect("loop device pattern");
        let path = match device_re.captures(reported) {
            Some(caps) => caps[1].to_string(),
            None => bail!("losetup returned an unexpected device name: '{reported}'"),
        };

        Ok(Self {
            path,
            attached: true,
        })
    }

    /// Device path, e.g. `/dev/loop0`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of partition `n` on this device, e.g. `/dev/loop0p2`.
    pub fn partition(&self, n: u32) -> String {
        format!("{}p{}", self.path, n)
    }

    /// Ask the kernel to re-read this device's partition table.
    pub fn partprobe(&self) -> Result<()> {
        Cmd::new("partprobe")
            .args(["-s", &self.path])
            .error_msg("partprobe failed")
            .run()?;
        Ok(())
    }

    /// Detach the device, reporting failure.
    pub fn detach(mut self) -> Result<()> {
        self.attached = false;
        Cmd::new("/sbin/losetup")
            .args(["--detach", &self.path])
            .error_msg("losetup failed to detach device")
            .run()?;
        Ok(())
    }
}

impl Drop for LoopDevice {
    fn drop(&mut self) {
        if self.attached {
            let _ = Cmd::new("/sbin/losetup")
                .args(["--detach", &self.path])
                .allow_fail()
                .run();
        }
    }
}
