use crate::error::KilnError;
use std::io::ErrorKind;
use std::path::Path;

/// Appends `marker` to `path` unless some line already contains it.
///
/// The file itself is the only record of whether the patch was applied, so
/// calling this any number of times leaves the file identical to calling it
/// once. Returns `true` when the file was changed.
pub async fn ensure_contains(path: &Path, marker: &str) -> anyhow::Result<bool> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(KilnError::MissingFile(path.to_path_buf()).into());
        }
        Err(e) => return Err(e.into()),
    };

    if contains_marker(&contents, marker) {
        tracing::debug!("{} already contains `{}`", path.display(), marker);
        return Ok(false);
    }

    let mut patched = contents;
    if !patched.is_empty() && !patched.ends_with('\n') {
        patched.push('\n');
    }
    patched.push_str(marker);
    patched.push('\n');

    tokio::fs::write(path, patched).await?;
    tracing::debug!("added `{}` to {}", marker, path.display());

    Ok(true)
}

pub fn contains_marker(contents: &str, marker: &str) -> bool {
    contents.lines().any(|l| l.contains(marker))
}
