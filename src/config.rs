//! Configuration for a provisioning run.
//!
//! URLs are read from environment variables (a `.env` file is loaded by the
//! CLI before this runs; environment always wins). Sizing values are
//! compiled defaults — they are carried in the struct rather than read from
//! module globals so the geometry code and the driver can be unit tested
//! with varied parameters.

use std::env;
use thiserror::Error;

/// Decimal gigabyte, the unit image sizes are expressed in.
pub const ONE_GB: u64 = 1_000_000_000;

/// Binary gibibyte, the granularity qemu accepts without power-of-two
/// rounding.
pub const ONE_GIB: u64 = 1 << 30;

/// Smallest workable root partition.
pub const MIN_SYSTEM_SIZE: u64 = 2 * ONE_GB;

const DEFAULT_BASE_IMAGE_URL: &str =
    "https://downloads.raspberrypi.org/raspios_oldstable_lite_armhf/images/\
     raspios_oldstable_lite_armhf-2021-12-02/2021-12-02-raspios-buster-armhf-lite.zip";

const DEFAULT_PAYLOAD_URL: &str =
    "http://mirror.download.kiwix.org/zim/stack_exchange/beer_stackexchange_com_2021-12.zim";

const DEFAULT_BOOT_REPO_URL: &str =
    "https://raw.githubusercontent.com/imgforge/boot-assets/main";

/// Sizing violations caught before any disk operation runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("root partition size {requested} is below the {minimum} byte minimum")]
    RootTooSmall { requested: u64, minimum: u64 },
    #[error("root partition size {root} must be smaller than the disk size {disk}")]
    RootNotBelowDisk { root: u64, disk: u64 },
}

/// Provisioning configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target size of the root (system) partition, in bytes.
    pub system_size: u64,
    /// Requested image size in bytes; rounded for qemu before use.
    pub requested_image_size: u64,
    /// URL of the stock OS image zip.
    pub base_image_url: String,
    /// URL of the payload staged onto the data partition.
    pub payload_url: String,
    /// Base URL the boot-partition config files are fetched from.
    pub boot_repo_url: String,
    /// Volume label for the exFAT data partition.
    pub data_partition_label: String,
    /// Keep a cached copy of a downloaded payload in the work directory.
    pub keep_payload_copy: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system_size: 7 * ONE_GB,
            requested_image_size: 32 * ONE_GB,
            base_image_url: DEFAULT_BASE_IMAGE_URL.to_string(),
            payload_url: DEFAULT_PAYLOAD_URL.to_string(),
            boot_repo_url: DEFAULT_BOOT_REPO_URL.to_string(),
            data_partition_label: "DATA".to_string(),
            keep_payload_copy: true,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("BASE_IMAGE_URL") {
            if !url.is_empty() {
                config.base_image_url = url;
            }
        }
        if let Ok(url) = env::var("PAYLOAD_URL") {
            if !url.is_empty() {
                config.payload_url = url;
            }
        }
        if let Ok(url) = env::var("BOOT_REPO_URL") {
            if !url.is_empty() {
                config.boot_repo_url = url;
            }
        }
        if let Ok(keep) = env::var("KEEP_PAYLOAD_COPY") {
            config.keep_payload_copy = !matches!(keep.as_str(), "0" | "false" | "no");
        }

        config
    }

    /// Check the sizing preconditions against the qemu-adjusted disk size.
    pub fn validate(&self, image_size: u64) -> Result<(), ConfigError> {
        if self.system_size < MIN_SYSTEM_SIZE {
            return Err(ConfigError::RootTooSmall {
                requested: self.system_size,
                minimum: MIN_SYSTEM_SIZE,
            });
        }
        if self.system_size >= image_size {
            return Err(ConfigError::RootNotBelowDisk {
                root: self.system_size,
                disk: image_size,
            });
        }
        Ok(())
    }

    /// Print the effective configuration.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  SYSTEM_SIZE: {}", self.system_size);
        println!("  REQUESTED_IMAGE_SIZE: {}", self.requested_image_size);
        println!("  BASE_IMAGE_URL: {}", self.base_image_url);
        println!("  PAYLOAD_URL: {}", self.payload_url);
        println!("  BOOT_REPO_URL: {}", self.boot_repo_url);
        println!("  KEEP_PAYLOAD_COPY: {}", self.keep_payload_copy);
    }
}
