//! Partition-table reading and mutation through fdisk.
//!
//! The mutations are destructive and order-dependent: the data partition is
//! deleted if a previous run left one behind, the root partition is deleted
//! and recreated at its new end sector, and the data partition is created
//! last. fdisk is driven through its interactive protocol, so each mutation
//! is a small scripted command sequence piped to stdin.
//!
//! After a write the kernel's view of the table lags the on-disk state.
//! Rather than sleeping a fixed interval, mutations poll the re-read table
//! until it reflects the requested layout, with a bounded timeout.

use anyhow::{bail, Context, Result};
use std::thread;
use std::time::{Duration, Instant};

use crate::device::LoopDevice;
use crate::geometry::{PartitionBoundaries, PartitionTable};
use crate::process::Cmd;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);
const SETTLE_INTERVAL: Duration = Duration::from_millis(500);

/// MBR type id for a native Linux partition.
const TYPE_LINUX: &str = "83";

/// MBR type id for a generic exFAT/NTFS data partition, so the host OS
/// treats it as a plain data volume.
const TYPE_DATA: &str = "7";

/// Read the raw partition table of a device via `fdisk -l`.
pub fn read_table(device: &str) -> Result<String> {
    let result = Cmd::new("fdisk")
        .args(["-l", device])
        .error_msg("fdisk failed to list the partition table")
        .run()?;
    Ok(result.stdout)
}

/// fdisk script deleting partition `index`.
pub fn delete_partition_script(index: u32) -> String {
    format!("d\n{index}\nw\n")
}

/// fdisk script deleting and recreating the root partition at its new
/// bounds. The type id is re-set explicitly because deletion and recreation
/// can reset it.
pub fn recreate_root_script(boundaries: &PartitionBoundaries) -> String {
    format!(
        "d\n2\nn\np\n2\n{}\n{}\nt\n2\n{TYPE_LINUX}\nw\n",
        boundaries.root_start, boundaries.root_end
    )
}

/// fdisk script creating the data partition with the generic data type id.
pub fn create_data_script(boundaries: &PartitionBoundaries) -> String {
    format!(
        "n\np\n3\n{}\n{}\nt\n3\n{TYPE_DATA}\nw\n",
        boundaries.data_start, boundaries.data_end
    )
}

/// A leftover data partition from a previous, partially provisioned run
/// must be deleted before the root partition is touched; deleting it first
/// is what makes expand-root idempotent.
pub fn has_stale_data_partition(table: &PartitionTable) -> bool {
    table.partitions.len() >= 3
}

fn run_fdisk_script(device: &str, script: &str) -> Result<()> {
    Cmd::new("fdisk")
        .arg(device)
        .input(script)
        .error_msg("fdisk failed to apply partition changes")
        .run()?;
    Ok(())
}

/// Poll the device's table until `check` accepts it, or fail after the
/// settle timeout.
fn wait_for_table(
    device: &LoopDevice,
    what: &str,
    check: impl Fn(&PartitionTable) -> bool,
) -> Result<()> {
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    loop {
        let text = read_table(device.path())?;
        if let Ok(table) = PartitionTable::parse(&text) {
            if check(&table) {
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            bail!(
                "partition table on {} did not settle ({what}) within {:?}",
                device.path(),
                SETTLE_TIMEOUT
            );
        }
        thread::sleep(SETTLE_INTERVAL);
    }
}

/// Resize the root partition in place to the computed bounds.
///
/// Re-runs on a partially provisioned image are handled by deleting the
/// third partition first when one exists, which makes this operation
/// idempotent for a given set of boundaries. Ends by growing the root
/// filesystem to fill the new partition.
pub fn expand_root(device: &LoopDevice, boundaries: &PartitionBoundaries) -> Result<()> {
    let table = PartitionTable::parse(&read_table(device.path())?)
        .context("cannot inspect the partition table before expanding root")?;
    println!("  {} partitions present", table.partitions.len());

    if has_stale_data_partition(&table) {
        println!("  deleting leftover data partition");
        run_fdisk_script(device.path(), &delete_partition_script(3))?;
        device.partprobe()?;
    }

    println!(
        "  recreating root partition at {}..{}",
        boundaries.root_start, boundaries.root_end
    );
    run_fdisk_script(device.path(), &recreate_root_script(boundaries))?;
    device.partprobe()?;

    wait_for_table(device, "root partition resized", |table| {
        table
            .root_partition()
            .map(|root| root.start == boundaries.root_start && root.end == boundaries.root_end)
            .unwrap_or(false)
    })?;

    println!("  resizing root filesystem");
    Cmd::new("resize2fs")
        .arg(device.partition(2))
        .error_msg("resize2fs failed on the root partition")
        .run()?;
    Ok(())
}

/// Create the data partition spanning the computed bounds.
pub fn create_data_partition(
    device: &LoopDevice,
    boundaries: &PartitionBoundaries,
) -> Result<()> {
    println!(
        "  creating data partition at {}..{}",
        boundaries.data_start, boundaries.data_end
    );
    run_fdisk_script(device.path(), &create_data_script(boundaries))?;
    device.partprobe()?;

    wait_for_table(device, "data partition created", |table| {
        table
            .partitions
            .iter()
            .any(|p| p.index == 3 && p.start == boundaries.data_start)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundaries() -> PartitionBoundaries {
        PartitionBoundaries {
            root_start: 98304,
            root_end: 13_671_936,
            data_start: 13_671_937,
            data_end: 62_491_870,
        }
    }

    #[test]
    fn test_delete_partition_script() {
        assert_eq!(delete_partition_script(3), "d\n3\nw\n");
    }

    #[test]
    fn test_recreate_root_script() {
        assert_eq!(
            recreate_root_script(&boundaries()),
            "d\n2\nn\np\n2\n98304\n13671936\nt\n2\n83\nw\n"
        );
    }

    #[test]
    fn test_stale_data_partition_detection() {
        let entry = |index, start, end, kind: &str| crate::geometry::PartitionEntry {
            index,
            start,
            end,
            kind: kind.to_string(),
        };
        let mut table = PartitionTable {
            total_sectors: 67_108_864,
            partitions: vec![
                entry(1, 8192, 98303, "W95 FAT32 (LBA)"),
                entry(2, 98304, 13_671_936, "Linux"),
            ],
        };
        assert!(!has_stale_data_partition(&table));

        // a partial previous run left partition 3 behind
        table
            .partitions
            .push(entry(3, 13_671_937, 62_491_870, "HPFS/NTFS/exFAT"));
        assert!(has_stale_data_partition(&table));
    }

    #[test]
    fn test_create_data_script() {
        assert_eq!(
            create_data_script(&boundaries()),
            "n\np\n3\n13671937\n62491870\nt\n3\n7\nw\n"
        );
    }
}
