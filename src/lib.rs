//! imgforge - provisions bootable SBC images with a dedicated data partition.
//!
//! Takes a stock OS image, grows it, resizes the root partition in place,
//! appends an exFAT data partition, stages a payload onto it, patches the
//! boot partition and shrinks the image back to a minimal size.
//!
//! The geometry math lives in [`geometry`] and is pure; everything touching
//! a device goes through external tools (`fdisk`, `losetup`, `qemu-img`,
//! `mkfs.exfat`, ...) via the [`process::Cmd`] wrapper. [`provision`] owns
//! the ordering of the destructive steps.

pub mod boot;
pub mod config;
pub mod device;
pub mod filesystem;
pub mod geometry;
pub mod image;
pub mod payload;
pub mod preflight;
pub mod process;
pub mod provision;
pub mod table;
