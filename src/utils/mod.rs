use filetime::FileTime;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::ReadDir;
use tokio::io;

/// Depth-first walk over a directory tree, yielding every entry below the root
/// together with its modification time.
pub struct FileWalker {
    include_directories: bool,
    stack: Vec<ReadDir>,
}

impl FileWalker {
    pub fn empty(include_directories: bool) -> Self {
        Self {
            include_directories,
            stack: vec![],
        }
    }

    pub async fn push(&mut self, path: impl AsRef<Path>) -> io::Result<&mut Self> {
        self.stack.push(tokio::fs::read_dir(path).await?);

        Ok(self)
    }

    /// Walks `path`, or nothing at all when `path` does not exist.
    pub async fn new_if_exists(
        path: impl AsRef<Path>,
        include_directories: bool,
    ) -> io::Result<Self> {
        let mut walker = Self::empty(include_directories);
        match walker.push(path).await {
            Ok(_) => Ok(walker),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(walker),
            Err(e) => Err(e),
        }
    }

    pub async fn next(&mut self) -> io::Result<Option<(PathBuf, FileTime)>> {
        loop {
            let next = {
                let top = if let Some(top) = self.stack.last_mut() {
                    top
                } else {
                    return Ok(None);
                };

                top.next_entry().await?
            };

            let next = if let Some(v) = next {
                v
            } else {
                self.stack.pop();
                continue;
            };

            let metadata = tokio::fs::symlink_metadata(next.path()).await?;
            let mtime = FileTime::from_last_modification_time(&metadata);

            if !metadata.is_dir() {
                return Ok(Some((next.path(), mtime)));
            }

            self.stack.push(tokio::fs::read_dir(next.path()).await?);

            if self.include_directories {
                return Ok(Some((next.path(), mtime)));
            }
        }
    }
}
