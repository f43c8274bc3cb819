//! Boot-partition patching.
//!
//! The stock image's first boot runs a partition-resize hook that would
//! fight the layout this tool just created, so the kernel command line is
//! rewritten to boot straight into init. The on-device configuration files
//! are fetched from the configured repository and dropped next to it.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::device::LoopDevice;
use crate::filesystem::{self, Mount};
use crate::process::Cmd;

/// First-boot resize hook shipped by the stock image.
const RESIZE_INIT: &str = "init=/usr/lib/raspi-config/init_resize.sh";
const PLAIN_INIT: &str = "init=/sbin/init";

/// Drop the stock image's first-boot resize hook from the kernel command
/// line.
pub fn patch_cmdline(cmdline: &str) -> String {
    cmdline.replace(RESIZE_INIT, PLAIN_INIT)
}

fn fetch_into(repo_url: &str, name: &str, dir: &Path) -> Result<std::path::PathBuf> {
    let dest = dir.join(name);
    let url = format!("{repo_url}/{name}");
    Cmd::new("curl")
        .args(["-fsSL", "-o"])
        .arg_path(&dest)
        .arg(&url)
        .error_msg(format!("curl failed to fetch {name}"))
        .run()?;
    Ok(dest)
}

/// Mount the boot partition, fix `cmdline.txt` and install the on-device
/// configuration files.
pub fn patch_boot_partition(
    device: &LoopDevice,
    mount_point: &Path,
    repo_url: &str,
) -> Result<()> {
    let mount = Mount::new(&device.partition(1), "vfat", mount_point)?;

    println!("  fixing cmdline.txt");
    let cmdline_path = mount.path().join("cmdline.txt");
    let cmdline = fs::read_to_string(&cmdline_path).context("failed to read cmdline.txt")?;
    fs::write(&cmdline_path, patch_cmdline(&cmdline)).context("failed to write cmdline.txt")?;

    println!("  writing network configuration");
    fetch_into(repo_url, "device.conf", mount.path())?;

    println!("  writing on-device config script");
    let script = fetch_into(repo_url, "config-device.py", mount.path())?;
    let mut perms = fs::metadata(&script)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script, perms)?;

    filesystem::sync();
    mount.unmount()
}
