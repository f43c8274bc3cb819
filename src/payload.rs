//! Payload staging onto the mounted data partition.
//!
//! The payload is either copied from a cached local file or downloaded
//! straight onto the mount. Two small metadata artifacts are written next to
//! it: a key-value env file naming the payload, and a placeholder empty URL
//! list consumed by downstream tooling.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::config::{Config, ONE_GB};
use crate::filesystem;
use crate::image::url_filename;
use crate::process::Cmd;

/// Env file naming the staged payload.
pub const PAYLOAD_ENV_FILE: &str = "payload.env";

/// Placeholder list for downstream metadata.
pub const URLS_FILE: &str = "urls.json";

/// Fetch or copy the payload into the mounted data partition and write the
/// metadata files alongside it.
pub fn stage_payload(workdir: &Path, mount_point: &Path, config: &Config) -> Result<()> {
    let filename = url_filename(&config.payload_url);
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .context("payload URL has no usable file name")?;

    // writability probe on the fresh mount
    fs::write(mount_point.join("test"), b"")?;

    let target = mount_point.join(filename);
    if target.exists() {
        println!("  payload already staged at {}", target.display());
    } else {
        let local = workdir.join(filename);
        if local.exists() {
            println!("  copying cached {} into {}", filename, mount_point.display());
            fs::copy(&local, &target)
                .with_context(|| format!("failed to copy cached payload {filename}"))?;
        } else {
            println!("  downloading {}", config.payload_url);
            Cmd::new("curl")
                .args(["-L", "-o"])
                .arg_path(&target)
                .args(["-C", "-", &config.payload_url])
                .error_msg("curl failed to download the payload")
                .run()?;

            if config.keep_payload_copy {
                println!("  keeping a copy of {} in {}", filename, workdir.display());
                fs::copy(&target, &local)
                    .with_context(|| format!("failed to cache payload {filename}"))?;
            }
        }
    }

    write_metadata(mount_point, stem)?;
    filesystem::sync();
    Ok(())
}

/// Write the payload env file and the placeholder URL list.
pub fn write_metadata(mount_point: &Path, payload_name: &str) -> Result<()> {
    let env_content = format!(
        "# name of the payload used for redirection\n\
         # date suffixes are resolved by the consumer, no need to include them\n\
         PAYLOAD_NAME={payload_name}\n"
    );
    fs::write(mount_point.join(PAYLOAD_ENV_FILE), env_content)
        .context("failed to write payload env file")?;

    let empty: Vec<String> = Vec::new();
    fs::write(mount_point.join(URLS_FILE), serde_json::to_string(&empty)?)
        .context("failed to write placeholder urls file")?;
    Ok(())
}

/// Extract the last Content-Length value from raw HTTP response headers.
pub fn parse_content_length(headers: &str) -> Option<u64> {
    headers
        .lines()
        .filter(|line| line.to_ascii_lowercase().starts_with("content-length:"))
        .last()?
        .split_once(':')
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Declared size of the payload, probed from the source's response headers.
pub fn remote_payload_size(url: &str) -> Result<u64> {
    let result = Cmd::new("curl")
        .args(["-sIL", url])
        .error_msg("curl failed to probe the payload size")
        .run()?;
    match parse_content_length(&result.stdout) {
        Some(size) => Ok(size),
        None => bail!("no Content-Length header in the response from {url}"),
    }
}

/// Minimal image size after provisioning: the system partition budget, the
/// payload, and a quarter-gigabyte of slack, rounded up to a whole
/// gigabyte.
pub fn shrunk_image_size(system_size: u64, payload_size: u64) -> u64 {
    let required = system_size + payload_size + ONE_GB / 4;
    required.div_ceil(ONE_GB) * ONE_GB
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_content_length() {
        let headers = "HTTP/1.1 200 OK\r\nContent-Type: application/zim\r\nContent-Length: 123456\r\n";
        assert_eq!(parse_content_length(headers), Some(123456));
    }

    #[test]
    fn test_parse_content_length_takes_last_header_block() {
        let headers = "HTTP/1.1 302 Found\r\nContent-Length: 0\r\n\r\nHTTP/1.1 200 OK\r\ncontent-length: 99\r\n";
        assert_eq!(parse_content_length(headers), Some(99));
    }

    #[test]
    fn test_parse_content_length_missing() {
        assert_eq!(parse_content_length("HTTP/1.1 200 OK\r\n"), None);
    }

    #[test]
    fn test_write_metadata() {
        let dir = TempDir::new().unwrap();
        write_metadata(dir.path(), "beer_stackexchange_com").unwrap();

        let env = fs::read_to_string(dir.path().join(PAYLOAD_ENV_FILE)).unwrap();
        assert!(env.contains("PAYLOAD_NAME=beer_stackexchange_com\n"));

        let urls = fs::read_to_string(dir.path().join(URLS_FILE)).unwrap();
        assert_eq!(urls, "[]");
    }

    #[test]
    fn test_shrunk_image_size_rounds_up_to_whole_gb() {
        // 7 GB system + 1.5 GB payload + 0.25 GB slack = 8.75 GB -> 9 GB
        assert_eq!(
            shrunk_image_size(7 * ONE_GB, 1_500_000_000),
            9 * ONE_GB
        );
    }

    #[test]
    fn test_shrunk_image_size_exact_gb() {
        // 2 GB + 0.75 GB + 0.25 GB = exactly 3 GB
        assert_eq!(shrunk_image_size(2 * ONE_GB, 750_000_000), 3 * ONE_GB);
    }
}
