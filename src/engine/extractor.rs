use crate::definition::ArchiveSpec;
use crate::engine::EngineSettings;
use crate::error::KilnError;
use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, XzDecoder};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufRead, AsyncRead, ReadBuf};

#[derive(Debug)]
pub struct Extractor {
    settings: Arc<EngineSettings>,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
enum Compression {
    None,
    Gzip,
    Xz,
    Bz,
}

const GUESSES: &[(&str, Compression)] = &[
    (".tar.gz", Compression::Gzip),
    (".tgz", Compression::Gzip),
    (".tar.xz", Compression::Xz),
    (".tar.bz2", Compression::Bz),
    (".tar", Compression::None),
];

enum Decompressor<R: AsyncBufRead> {
    PassThrough(R),
    Xz(XzDecoder<R>),
    Gzip(GzipDecoder<R>),
    Bz(BzDecoder<R>),
}

impl<R: AsyncBufRead + Unpin> AsyncRead for Decompressor<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            Decompressor::PassThrough(r) => AsyncRead::poll_read(Pin::new(r), cx, buf),
            Decompressor::Xz(r) => AsyncRead::poll_read(Pin::new(r), cx, buf),
            Decompressor::Gzip(r) => AsyncRead::poll_read(Pin::new(r), cx, buf),
            Decompressor::Bz(r) => AsyncRead::poll_read(Pin::new(r), cx, buf),
        }
    }
}

fn guess_compression(archive: &Path) -> Option<Compression> {
    let name = archive.file_name().and_then(OsStr::to_str)?;
    GUESSES
        .iter()
        .find(|(ext, _)| name.ends_with(ext))
        .map(|(_, comp)| *comp)
}

impl Extractor {
    pub fn new(settings: Arc<EngineSettings>) -> Self {
        Extractor { settings }
    }

    /// Directory `spec` is unpacked into.
    pub fn parent_dir(&self, spec: &ArchiveSpec) -> PathBuf {
        self.settings.layout.toolchain.join(&spec.extract_into)
    }

    /// Canonical directory `spec` ends up in.
    pub fn target_dir(&self, spec: &ArchiveSpec) -> PathBuf {
        self.settings.layout.toolchain.join(spec.extracted_path())
    }

    /// Unpacks `archive` under its parent directory and renames the archive's
    /// top-level directory to the canonical name. Returns `false` without
    /// touching the archive when the canonical directory already exists.
    pub async fn ensure_extracted(&self, archive: &Path, spec: &ArchiveSpec) -> anyhow::Result<bool> {
        let parent = self.parent_dir(spec);
        let target = self.target_dir(spec);

        if tokio::fs::try_exists(&target).await? {
            tracing::debug!("{} already extracted", target.display());
            return Ok(false);
        }

        if !tokio::fs::try_exists(&parent).await? {
            return Err(KilnError::MissingFile(parent).into());
        }

        tracing::info!("extracting {}", archive.display());
        self.unpack(archive, &parent).await?;

        let unpacked = parent.join(&spec.archive_dir);
        if !tokio::fs::try_exists(&unpacked).await? {
            return Err(KilnError::UnexpectedArchiveLayout {
                archive: archive.to_path_buf(),
                dir: spec.archive_dir.clone(),
            }
            .into());
        }

        if unpacked != target {
            tokio::fs::rename(&unpacked, &target).await?;
        }

        Ok(true)
    }

    async fn unpack(&self, archive: &Path, dest: &Path) -> anyhow::Result<()> {
        let compr = match guess_compression(archive) {
            None => {
                anyhow::bail!("couldn't guess archive type of {}", archive.display())
            }

            Some(x) => x,
        };

        let read = OpenOptions::new()
            .read(true)
            .write(false)
            .create(false)
            .open(archive)
            .await?;

        let read = tokio::io::BufReader::new(read);
        let read = match compr {
            Compression::None => Decompressor::PassThrough(read),
            Compression::Gzip => Decompressor::Gzip(GzipDecoder::new(read)),
            Compression::Xz => Decompressor::Xz(XzDecoder::new(read)),
            Compression::Bz => Decompressor::Bz(BzDecoder::new(read)),
        };

        let mut archive = tokio_tar::Archive::new(read);
        archive.unpack(dest).await?;

        Ok(())
    }
}
