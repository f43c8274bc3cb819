//! The image lifecycle driver.
//!
//! One provisioning run is a strictly sequential pipeline; any stage failure
//! aborts the rest and surfaces the stage name with the underlying error.
//! The loop device and the mounts are scoped guards, so an abort at any
//! stage still releases them.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::boot;
use crate::config::Config;
use crate::device::LoopDevice;
use crate::filesystem::{self, Mount};
use crate::geometry;
use crate::image;
use crate::payload;
use crate::preflight;
use crate::table;

/// Run the full provisioning sequence in `workdir`.
pub fn run(workdir: &Path, config: &Config) -> Result<()> {
    if !cfg!(target_os = "linux") {
        bail!("provisioning requires Linux (loop devices, fdisk, exFAT tooling)");
    }

    let image_size = image::qemu_adjusted_image_size(config.requested_image_size);
    config
        .validate(image_size)
        .context("erroneous size options")?;

    println!("Starting with workdir={}", workdir.display());
    fs::create_dir_all(workdir)?;

    let report = preflight::check_host_tools();
    if !report.all_passed() {
        report.print();
        bail!("missing host tools, aborting before any disk operation");
    }

    println!("=== Fetching base image ===");
    let master = image::fetch_base_image(workdir, &config.base_image_url)
        .context("fetch-base failed")?;
    println!("> OK");

    println!("=== Resizing image to {image_size} bytes ===");
    image::resize_image(&master, image_size, false).context("resize-image(grow) failed")?;
    println!("> OK");

    println!("=== Setting up a virtual loop device ===");
    let device = LoopDevice::attach(&master).context("attach-loop failed")?;
    device.partprobe().context("attach-loop failed")?;
    println!("> OK at {}", device.path());

    let table_text = table::read_table(device.path()).context("read-table failed")?;
    println!("Initial partition table:\n{table_text}");

    let boundaries = geometry::boundaries_from_text(&table_text, config.system_size, image_size)
        .context("compute-boundaries failed")?;
    println!("boundaries={boundaries:?}");

    println!("=== Expanding root filesystem ===");
    table::expand_root(&device, &boundaries).context("expand-root failed")?;
    println!("> OK");

    println!("{}", table::read_table(device.path()).context("read-table failed")?);

    println!("=== Adding data partition at end of disk ===");
    table::create_data_partition(&device, &boundaries)
        .context("create-data-partition failed")?;
    println!("> OK");

    println!("=== Formatting data partition ===");
    filesystem::format_exfat(&device.partition(3), &config.data_partition_label)
        .context("format-data-partition failed")?;
    println!("> OK");

    println!("=== Mounting data partition ===");
    let data_mount = Mount::new(
        &device.partition(3),
        "exfat",
        &workdir.join("data_volume"),
    )
    .context("mount-data failed")?;
    println!("> OK");

    println!("=== Staging payload ===");
    payload::stage_payload(workdir, data_mount.path(), config)
        .context("stage-payload failed")?;
    println!("> OK");

    println!("=== Unmounting data partition ===");
    data_mount.unmount().context("unmount-data failed")?;
    println!("> OK");

    println!("=== Patching boot partition ===");
    boot::patch_boot_partition(&device, &workdir.join("boot_volume"), &config.boot_repo_url)
        .context("patch-boot-partition failed")?;
    println!("> OK");

    println!("=== Releasing virtual device ({}) ===", device.path());
    device.detach().context("detach-loop failed")?;
    println!("> OK");

    println!("=== Shrinking image to minimal size ===");
    let payload_size =
        payload::remote_payload_size(&config.payload_url).context("resize-image(shrink) failed")?;
    let final_size = payload::shrunk_image_size(config.system_size, payload_size);
    image::resize_image(&master, final_size, true).context("resize-image(shrink) failed")?;
    println!("> OK, final size {final_size} bytes");

    println!("\nALL DONE. Boot the image and run the on-device script.");
    Ok(())
}
