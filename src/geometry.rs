//! Partition-table parsing and boundary calculation.
//!
//! Everything here is pure: the raw `fdisk -l` text goes in, sector-exact
//! boundaries for the resized root partition and the new data partition come
//! out. All the destructive work elsewhere in the crate trusts these numbers,
//! so parsing is strict — zero or multiple matches for a required line is a
//! hard error, never a silent pick.

use regex::Regex;
use thiserror::Error;

/// Addressable unit of the block device, in bytes.
pub const SECTOR_SIZE: u64 = 512;

/// Partition boundaries are rounded to multiples of this many sectors.
/// Misaligned boundaries are known to corrupt exfat-fuse volumes.
pub const ALIGNMENT_SECTORS: u64 = 128;

/// Unused slack reserved at the tail of the disk (4 MiB) so the data
/// partition never runs past the device after image-size rounding.
pub const END_MARGIN_BYTES: u64 = 4 * 1024 * 1024;

/// Errors raised while parsing a partition table or computing boundaries.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("cannot find the disk sector-count line in the partition table")]
    NoDiskLine,
    #[error("found {0} disk sector-count lines, expected exactly one")]
    AmbiguousDiskLine(usize),
    #[error("cannot find a Linux root partition in the partition table")]
    NoRootPartition,
    #[error("found {0} Linux partitions, expected exactly one root")]
    AmbiguousRootPartition(usize),
    #[error(
        "data partition would end at sector {data_end}, beyond the disk's {total_sectors} sectors"
    )]
    ExceedsDisk { data_end: u64, total_sectors: u64 },
    #[error(
        "disk size {disk_size} leaves no room for a data partition after the root partition and the {margin} byte end margin"
    )]
    DiskTooSmall { disk_size: u64, margin: u64 },
}

/// One partition descriptor line from `fdisk -l`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    /// Partition number on the device (1-based).
    pub index: u32,
    /// First sector.
    pub start: u64,
    /// Last sector (inclusive).
    pub end: u64,
    /// Type name as printed by fdisk, e.g. "Linux" or "W95 FAT32 (LBA)".
    pub kind: String,
}

/// Snapshot of a device's partition table, parsed from `fdisk -l` output.
///
/// Ephemeral by design: any mutation of the device invalidates it, so it is
/// parsed fresh each time and never stored across operations.
#[derive(Debug, Clone)]
pub struct PartitionTable {
    /// Total sector count of the device.
    pub total_sectors: u64,
    /// Partition descriptors in table order.
    pub partitions: Vec<PartitionEntry>,
}

impl PartitionTable {
    /// Parse `fdisk -l` output.
    ///
    /// The disk-identifier token differs between a loop-mounted image file
    /// (`foo.img: ...`) and a block device (`/dev/loop0: ...`); whichever
    /// pattern the text contains is the one used for both the disk line and
    /// the partition lines.
    pub fn parse(text: &str) -> Result<Self, GeometryError> {
        let target = if text.contains(".img") {
            r"[0-9a-zA-Z\.\-\_]+\.img"
        } else {
            r"/dev/[0-9a-z]+"
        };

        let disk_re = Regex::new(&format!(r"^Disk {target}:.*, (\d+) sectors$"))
            .expect("disk line pattern");
        let part_re = Regex::new(&format!(
            r"^{target}(\d+)\s+(?:\*\s+)?(\d+)\s+(\d+)\s+\d+\s+\S+\s+\S+\s+(.+?)\s*$"
        ))
        .expect("partition line pattern");

        let mut sector_counts = Vec::new();
        let mut partitions = Vec::new();
        for line in text.lines() {
            if let Some(caps) = disk_re.captures(line) {
                sector_counts.push(caps[1].parse::<u64>().unwrap_or(0));
                continue;
            }
            if let Some(caps) = part_re.captures(line) {
                partitions.push(PartitionEntry {
                    index: caps[1].parse().unwrap_or(0),
                    start: caps[2].parse().unwrap_or(0),
                    end: caps[3].parse().unwrap_or(0),
                    kind: caps[4].to_string(),
                });
            }
        }

        let total_sectors = match sector_counts.len() {
            0 => return Err(GeometryError::NoDiskLine),
            1 => sector_counts[0],
            n => return Err(GeometryError::AmbiguousDiskLine(n)),
        };
        if total_sectors == 0 {
            return Err(GeometryError::NoDiskLine);
        }

        Ok(Self {
            total_sectors,
            partitions,
        })
    }

    /// The single partition tagged `Linux` — the root filesystem.
    pub fn root_partition(&self) -> Result<&PartitionEntry, GeometryError> {
        let roots: Vec<_> = self
            .partitions
            .iter()
            .filter(|p| p.kind == "Linux")
            .collect();
        match roots.as_slice() {
            [root] => Ok(*root),
            [] => Err(GeometryError::NoRootPartition),
            many => Err(GeometryError::AmbiguousRootPartition(many.len())),
        }
    }
}

/// Sector boundaries for one provisioning run: the resized root partition
/// and the data partition appended after it.
///
/// Invariant: `root_start < root_end < data_start < data_end <= total
/// sectors`, with `root_end` aligned to [`ALIGNMENT_SECTORS`]. Immutable
/// once computed; both table mutations consume the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionBoundaries {
    pub root_start: u64,
    pub root_end: u64,
    pub data_start: u64,
    pub data_end: u64,
}

/// Round a sector down to the previous alignment multiple (identity when
/// already aligned).
pub fn round_down(sector: u64) -> u64 {
    sector - (sector % ALIGNMENT_SECTORS)
}

/// Round a sector up to the next alignment multiple (identity when already
/// aligned). Rounding up guarantees the root partition is never smaller
/// than requested.
pub fn round_up(sector: u64) -> u64 {
    if sector % ALIGNMENT_SECTORS == 0 {
        sector
    } else {
        round_down(sector) + ALIGNMENT_SECTORS
    }
}

/// Compute the boundaries for a resized root partition and a new data
/// partition from a parsed table snapshot.
///
/// The root partition is resized in place: its start sector is kept and its
/// end moves to the aligned sector equivalent of `root_size` bytes. The data
/// partition starts on the next sector and spans the remaining disk minus
/// the 4 MiB end margin.
pub fn compute_boundaries(
    table: &PartitionTable,
    root_size: u64,
    disk_size: u64,
) -> Result<PartitionBoundaries, GeometryError> {
    let root = table.root_partition()?;

    let root_start = root.start;
    let root_end = round_up(root_size / SECTOR_SIZE);
    let data_start = root_end + 1;

    let data_bytes = disk_size
        .checked_sub(root_size)
        .and_then(|rest| rest.checked_sub(END_MARGIN_BYTES))
        .ok_or(GeometryError::DiskTooSmall {
            disk_size,
            margin: END_MARGIN_BYTES,
        })?;
    let data_sectors = data_bytes / SECTOR_SIZE;
    let data_end = data_start + data_sectors;

    if data_end > table.total_sectors {
        return Err(GeometryError::ExceedsDisk {
            data_end,
            total_sectors: table.total_sectors,
        });
    }

    Ok(PartitionBoundaries {
        root_start,
        root_end,
        data_start,
        data_end,
    })
}

/// Parse raw table text and compute boundaries in one step.
pub fn boundaries_from_text(
    text: &str,
    root_size: u64,
    disk_size: u64,
) -> Result<PartitionBoundaries, GeometryError> {
    let table = PartitionTable::parse(text)?;
    compute_boundaries(&table, root_size, disk_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_aligned_is_identity() {
        assert_eq!(round_up(0), 0);
        assert_eq!(round_up(128), 128);
        assert_eq!(round_up(13_671_936), 13_671_936);
    }

    #[test]
    fn test_round_up_misaligned() {
        assert_eq!(round_up(1), 128);
        assert_eq!(round_up(127), 128);
        assert_eq!(round_up(129), 256);
    }

    #[test]
    fn test_round_down() {
        assert_eq!(round_down(129), 128);
        assert_eq!(round_down(128), 128);
        assert_eq!(round_down(127), 0);
    }

    #[test]
    fn test_parse_device_style_table() {
        let text = "\
Disk /dev/loop0: 32 GiB, 34359738368 bytes, 67108864 sectors
Units: sectors of 1 * 512 = 512 bytes

Device       Boot Start     End Sectors  Size Id Type
/dev/loop0p1       8192   98303   90112   44M  c W95 FAT32 (LBA)
/dev/loop0p2      98304 3717631 3619328  1.7G 83 Linux
";
        let table = PartitionTable::parse(text).unwrap();
        assert_eq!(table.total_sectors, 67108864);
        assert_eq!(table.partitions.len(), 2);
        let root = table.root_partition().unwrap();
        assert_eq!(root.index, 2);
        assert_eq!(root.start, 98304);
        assert_eq!(root.end, 3717631);
    }

    #[test]
    fn test_parse_image_style_table() {
        let text = "\
Disk master.img: 32 GiB, 34359738368 bytes, 67108864 sectors

Device      Boot Start     End Sectors  Size Id Type
master.img1       8192   98303   90112   44M  c W95 FAT32 (LBA)
master.img2      98304 3717631 3619328  1.7G 83 Linux
";
        let table = PartitionTable::parse(text).unwrap();
        assert_eq!(table.total_sectors, 67108864);
        assert_eq!(table.root_partition().unwrap().start, 98304);
    }

    #[test]
    fn test_parse_boot_flag() {
        let text = "\
Disk /dev/loop0: 32 GiB, 34359738368 bytes, 67108864 sectors

Device       Boot Start     End Sectors  Size Id Type
/dev/loop0p1 *     8192   98303   90112   44M  c W95 FAT32 (LBA)
/dev/loop0p2      98304 3717631 3619328  1.7G 83 Linux
";
        let table = PartitionTable::parse(text).unwrap();
        assert_eq!(table.partitions[0].start, 8192);
        assert_eq!(table.partitions[0].index, 1);
    }

    #[test]
    fn test_missing_disk_line() {
        let err = PartitionTable::parse("no table here").unwrap_err();
        assert_eq!(err, GeometryError::NoDiskLine);
    }

    #[test]
    fn test_ambiguous_disk_line() {
        let text = "\
Disk /dev/loop0: 32 GiB, 34359738368 bytes, 67108864 sectors
Disk /dev/loop1: 32 GiB, 34359738368 bytes, 67108864 sectors
";
        let err = PartitionTable::parse(text).unwrap_err();
        assert_eq!(err, GeometryError::AmbiguousDiskLine(2));
    }
}
