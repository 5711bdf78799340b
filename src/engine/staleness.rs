//! Detects when the toolchain changed underneath an already built downstream
//! binary.
//!
//! Cargo does not know about files under the toolchain tree, so a rebuilt
//! LLVM would otherwise be linked into a stale incremental build. The check
//! is a plain modification-time comparison: anything under the toolchain root
//! newer than the downstream binary invalidates it, except for files the
//! toolchain build rewrites on every run.

use crate::utils::FileWalker;
use filetime::FileTime;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use wax::{Glob, Pattern};

/// Files under the toolchain root whose modification time says nothing about
/// the libraries the downstream binary links against.
#[derive(Debug)]
pub struct ExclusionPolicy {
    globs: Vec<Glob<'static>>,
}

impl ExclusionPolicy {
    pub fn new<I, S>(patterns: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut globs = vec![];
        for pattern in patterns {
            globs.push(Glob::from_str(pattern.as_ref())?);
        }

        Ok(ExclusionPolicy { globs })
    }

    /// Install-manifest bookkeeping, the ninja log and the installed clang
    /// headers, which `install-clang-headers` touches on every build.
    pub fn for_toolchain(version: &str) -> anyhow::Result<Self> {
        Self::new([
            "build/install_manifest_clang-headers.txt".to_string(),
            "build/.ninja_log".to_string(),
            format!("install/lib/clang/{}/include", version),
            format!("install/lib/clang/{}/include/**", version),
        ])
    }

    /// `relative` is relative to the toolchain root.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        self.globs.iter().any(|g| g.is_match(relative))
    }
}

/// First entry newer than `reference` that `exclude` does not filter out.
pub fn first_stale<I, F>(entries: I, reference: FileTime, exclude: F) -> Option<PathBuf>
where
    I: IntoIterator<Item = (PathBuf, FileTime)>,
    F: Fn(&Path) -> bool,
{
    entries
        .into_iter()
        .find(|(path, mtime)| *mtime > reference && !exclude(path.as_path()))
        .map(|(path, _)| path)
}

/// Returns the first toolchain entry that makes `artifact` stale, or `None`
/// when the artifact is fresh or does not exist yet.
pub async fn needs_downstream_clean(
    toolchain_root: &Path,
    artifact: &Path,
    policy: &ExclusionPolicy,
) -> anyhow::Result<Option<PathBuf>> {
    let reference = match tokio::fs::metadata(artifact).await {
        Ok(md) => FileTime::from_last_modification_time(&md),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no {} yet, nothing to clean", artifact.display());
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let mut walker = FileWalker::new_if_exists(toolchain_root, true).await?;
    let mut entries = vec![];
    while let Some((path, mtime)) = walker.next().await? {
        let relative = path
            .strip_prefix(toolchain_root)
            .map(Path::to_path_buf)
            .unwrap_or(path);
        entries.push((relative, mtime));
    }

    let stale = first_stale(entries, reference, |p| policy.is_excluded(p));
    if let Some(path) = &stale {
        tracing::debug!("{} is newer than {}", path.display(), artifact.display());
    }

    Ok(stale.map(|p| toolchain_root.join(p)))
}
