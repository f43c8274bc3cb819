//! Base-image fetching and qemu-img resizing.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ONE_GIB;
use crate::process::Cmd;

/// Round a byte count up to the next power of two (identity when already a
/// power of two).
pub fn round_to_power_of_two(size: u64) -> u64 {
    size.next_power_of_two()
}

/// Byte size to resize the image file to so qemu accepts it.
///
/// qemu expects image sizes to be whole-GiB multiples or powers of two;
/// anything else is rounded up to the next power of two.
pub fn qemu_adjusted_image_size(size: u64) -> u64 {
    if size % ONE_GIB == 0 {
        size
    } else {
        round_to_power_of_two(size)
    }
}

/// Last path segment of a URL, with any query or fragment stripped.
pub fn url_filename(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// Download and unpack the stock OS image, then copy it to `master.img`.
///
/// Both the zip download and the unpacked image are cached in the work
/// directory; an existing `master.img` short-circuits entirely, so re-runs
/// never re-download.
pub fn fetch_base_image(workdir: &Path, url: &str) -> Result<PathBuf> {
    let master = workdir.join("master.img");
    if master.exists() {
        println!("  master image already present at {}", master.display());
        return Ok(master);
    }

    let zip_name = url_filename(url);
    let img_name = Path::new(zip_name).with_extension("img");
    let img_path = workdir.join(&img_name);

    if !img_path.exists() {
        let zip_path = workdir.join(zip_name);
        println!("  downloading {url}");
        Cmd::new("curl")
            .args(["-L", "-o"])
            .arg_path(&zip_path)
            .args(["-C", "-", url])
            .error_msg("curl failed to download the base image")
            .run()?;
        Cmd::new("unzip")
            .arg("-d")
            .arg_path(workdir)
            .arg_path(&zip_path)
            .error_msg("unzip failed on the base image archive")
            .run()?;
    }

    fs::copy(&img_path, &master)
        .with_context(|| format!("failed to copy {} to master.img", img_path.display()))?;
    Ok(master)
}

/// Resize a raw image file with qemu-img.
pub fn resize_image(image: &Path, size: u64, shrink: bool) -> Result<()> {
    let mut cmd = Cmd::new("qemu-img").arg("resize");
    if shrink {
        cmd = cmd.arg("--shrink");
    }
    cmd.args(["-f", "raw"])
        .arg_path(image)
        .arg(size.to_string())
        .error_msg("qemu-img resize failed")
        .run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ONE_GB;

    #[test]
    fn test_round_to_power_of_two() {
        assert_eq!(round_to_power_of_two(7_000_000_000), 8_589_934_592);
        assert_eq!(round_to_power_of_two(ONE_GIB), ONE_GIB);
        assert_eq!(round_to_power_of_two(1), 1);
    }

    #[test]
    fn test_qemu_adjusted_size_rounds_non_gib_multiples() {
        // 32 GB is not a GiB multiple: next power of two is 32 GiB
        assert_eq!(qemu_adjusted_image_size(32 * ONE_GB), 34_359_738_368);
    }

    #[test]
    fn test_qemu_adjusted_size_keeps_gib_multiples() {
        assert_eq!(qemu_adjusted_image_size(2 * ONE_GIB), 2 * ONE_GIB);
        assert_eq!(qemu_adjusted_image_size(3 * ONE_GIB), 3 * ONE_GIB);
    }

    #[test]
    fn test_url_filename() {
        assert_eq!(
            url_filename("http://mirror.example.org/zim/beer_2021-12.zim"),
            "beer_2021-12.zim"
        );
        assert_eq!(url_filename("https://host/a/b/file.zip?x=1"), "file.zip");
        assert_eq!(url_filename("file.img"), "file.img");
    }
}
