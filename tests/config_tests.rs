//! Configuration loading and precondition checks.
//!
//! These mutate process environment variables, so they run serially.

use imgforge::config::{Config, ConfigError, MIN_SYSTEM_SIZE, ONE_GB};
use serial_test::serial;
use std::env;

fn clear_env() {
    env::remove_var("BASE_IMAGE_URL");
    env::remove_var("PAYLOAD_URL");
    env::remove_var("BOOT_REPO_URL");
    env::remove_var("KEEP_PAYLOAD_COPY");
}

#[test]
#[serial]
fn defaults_match_the_documented_sizing() {
    clear_env();
    let config = Config::load();

    assert_eq!(config.system_size, 7 * ONE_GB);
    assert_eq!(config.requested_image_size, 32 * ONE_GB);
    assert_eq!(config.data_partition_label, "DATA");
    assert!(config.keep_payload_copy);
}

#[test]
#[serial]
fn payload_url_is_overridable_from_the_environment() {
    clear_env();
    env::set_var("PAYLOAD_URL", "http://example.org/other.zim");
    let config = Config::load();
    clear_env();

    assert_eq!(config.payload_url, "http://example.org/other.zim");
}

#[test]
#[serial]
fn empty_payload_url_falls_back_to_default() {
    clear_env();
    env::set_var("PAYLOAD_URL", "");
    let config = Config::load();
    clear_env();

    assert!(config.payload_url.contains("kiwix"));
}

#[test]
#[serial]
fn keep_payload_copy_can_be_disabled() {
    clear_env();
    env::set_var("KEEP_PAYLOAD_COPY", "0");
    let config = Config::load();
    clear_env();

    assert!(!config.keep_payload_copy);
}

#[test]
#[serial]
fn root_below_minimum_is_a_precondition_error() {
    clear_env();
    let mut config = Config::load();
    config.system_size = ONE_GB;

    assert_eq!(
        config.validate(32 * ONE_GB),
        Err(ConfigError::RootTooSmall {
            requested: ONE_GB,
            minimum: MIN_SYSTEM_SIZE,
        })
    );
}

#[test]
#[serial]
fn root_not_smaller_than_disk_is_a_precondition_error() {
    clear_env();
    let mut config = Config::load();
    config.system_size = 8 * ONE_GB;

    assert_eq!(
        config.validate(8 * ONE_GB),
        Err(ConfigError::RootNotBelowDisk {
            root: 8 * ONE_GB,
            disk: 8 * ONE_GB,
        })
    );
}

#[test]
#[serial]
fn valid_sizes_pass_the_preconditions() {
    clear_env();
    let config = Config::load();
    assert_eq!(config.validate(34_359_738_368), Ok(()));
}
