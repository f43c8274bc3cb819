//! imgforge CLI entry point.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use imgforge::config::Config;
use imgforge::{preflight, provision};

#[derive(Parser)]
#[command(name = "imgforge")]
#[command(about = "Provision a bootable SBC image with a dedicated data partition")]
#[command(
    after_help = "Runs as root against a loop-mounted image file.\n\
                  URLs are configurable via .env or environment:\n  \
                  BASE_IMAGE_URL, PAYLOAD_URL, BOOT_REPO_URL, KEEP_PAYLOAD_COPY"
)]
struct Cli {
    /// Working directory for downloads and scratch files
    #[arg(default_value = ".")]
    workdir: PathBuf,

    /// Check host tools and exit
    #[arg(long)]
    preflight: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("ERROR: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present; environment variables win
    dotenvy::dotenv().ok();
    let config = Config::load();

    if cli.show_config {
        config.print();
        return Ok(());
    }

    if cli.preflight {
        let report = preflight::check_host_tools();
        report.print();
        if !report.all_passed() {
            bail!("{} preflight check(s) failed", report.fail_count());
        }
        return Ok(());
    }

    provision::run(&cli.workdir, &config)
}
