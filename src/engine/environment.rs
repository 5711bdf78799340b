use crate::engine::runner::{Invocation, ProcessRunner};
use crate::error::KilnError;
use semver::Version;
use std::path::Path;

/// Approximate peak memory of a single LLVM link job, in GiB.
const GIB_PER_LINK_JOB: u64 = 14;

/// Facts about the host that shape the toolchain build.
#[derive(Debug, Clone)]
pub struct Environment {
    pub cpus: usize,
    pub memory: Option<u64>,
    pub os: &'static str,
    pub arch: &'static str,
}

impl Environment {
    pub fn detect() -> Self {
        Environment {
            cpus: num_cpus::get(),
            memory: physical_memory(),
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        }
    }

    pub fn is_mac(&self) -> bool {
        self.os == "macos"
    }

    pub fn is_x86(&self) -> bool {
        matches!(self.arch, "x86" | "x86_64")
    }

    /// How many link jobs can run side by side without swapping.
    pub fn parallel_link_jobs(&self) -> usize {
        let by_memory = match self.memory {
            Some(bytes) => (bytes / (1 << 30) / GIB_PER_LINK_JOB) as usize,
            None => 1,
        };

        by_memory.clamp(1, self.cpus.max(1))
    }

    /// System libraries the freshly built LLVM libraries depend on.
    pub fn llvm_system_libs(&self) -> &'static str {
        if self.is_mac() {
            "-lz -lcurses -lm -lxml2"
        } else {
            "-lz -lrt -ltinfo -ldl -lpthread -lm"
        }
    }

    /// Fails with [`KilnError::ToolTooOld`] when `clang --version` reports less than `required`.
    pub async fn ensure_clang_version(
        &self,
        runner: &dyn ProcessRunner,
        cwd: &Path,
        required: &Version,
    ) -> anyhow::Result<Version> {
        let clang = runner.locate("clang")?;
        let output = runner
            .output(&Invocation::new(clang, cwd).arg("--version"))
            .await?;

        let found = parse_clang_version(&output).ok_or_else(|| KilnError::UnknownToolVersion {
            tool: "clang".to_string(),
            output: output.lines().next().unwrap_or_default().to_string(),
        })?;

        tracing::debug!("host clang version {}", found);
        if found < *required {
            return Err(KilnError::ToolTooOld {
                tool: "clang".to_string(),
                found,
                required: required.clone(),
            }
            .into());
        }

        Ok(found)
    }
}

#[cfg(unix)]
fn physical_memory() -> Option<u64> {
    // SAFETY: sysconf has no preconditions and only reads system configuration.
    let (pages, page_size) =
        unsafe { (libc::sysconf(libc::_SC_PHYS_PAGES), libc::sysconf(libc::_SC_PAGESIZE)) };

    if pages <= 0 || page_size <= 0 {
        return None;
    }

    Some(pages as u64 * page_size as u64)
}

#[cfg(not(unix))]
fn physical_memory() -> Option<u64> {
    None
}

/// Banners printed by `clang --version`; older Xcode toolchains say `Apple LLVM version`.
const VERSION_MARKERS: &[&str] = &["clang version", "LLVM version"];

/// Pulls `X.Y[.Z]` out of the first line carrying a known version banner.
pub fn parse_clang_version(output: &str) -> Option<Version> {
    let rest = output.lines().find_map(|line| {
        VERSION_MARKERS
            .iter()
            .find_map(|marker| line.split_once(*marker).map(|(_, rest)| rest.trim_start()))
    })?;
    let raw: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let mut parts = raw.split('.').filter(|x| !x.is_empty());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|x| x.parse().ok()).unwrap_or(0);
    let patch = parts.next().and_then(|x| x.parse().ok()).unwrap_or(0);

    Some(Version::new(major, minor, patch))
}
