//! Host tool checks run before any destructive work.

use std::path::Path;

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed.
    Pass,
    /// Check failed - the run would fail partway through.
    Fail,
}

impl CheckResult {
    pub fn pass(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: Some(details.to_string()),
        }
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details.to_string()),
        }
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if all checks passed.
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    /// Count of failed checks.
    pub fn fail_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count()
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");
        for check in &self.checks {
            let icon = match check.status {
                CheckStatus::Pass => "✓",
                CheckStatus::Fail => "✗",
            };
            match &check.details {
                Some(details) => println!("  {icon} {}: {details}", check.name),
                None => println!("  {icon} {}", check.name),
            }
        }
        println!();
        if self.all_passed() {
            println!("All checks passed.");
        } else {
            println!("{} check(s) failed.", self.fail_count());
        }
    }
}

/// Tools the provisioning sequence shells out to, with package hints.
const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("fdisk", "fdisk"),
    ("losetup", "util-linux"),
    ("partprobe", "parted"),
    ("resize2fs", "e2fsprogs"),
    ("mkfs.exfat", "exfatprogs"),
    ("qemu-img", "qemu-utils"),
    ("curl", "curl"),
    ("unzip", "unzip"),
    ("mount", "util-linux"),
    ("umount", "util-linux"),
];

/// Check that every external tool the run needs is installed.
pub fn check_host_tools() -> PreflightReport {
    let mut checks = Vec::new();

    for (tool, package) in REQUIRED_TOOLS {
        // losetup and mkfs.exfat are invoked by absolute /sbin path, which
        // `which` misses when /sbin is not in PATH
        let sbin = Path::new("/sbin").join(tool);
        let found = which::which(tool).ok().or_else(|| sbin.exists().then(|| sbin.clone()));

        match found {
            Some(path) => checks.push(CheckResult::pass(tool, &path.display().to_string())),
            None => checks.push(CheckResult::fail(
                tool,
                &format!("not found - install the '{package}' package"),
            )),
        }
    }

    PreflightReport { checks }
}
