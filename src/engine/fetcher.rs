use crate::definition::ArchiveSpec;
use crate::engine::runner::{Invocation, ProcessRunner};
use crate::engine::EngineSettings;
use crate::error::KilnError;
use async_trait::async_trait;
use reqwest::Client;
use ring::digest::{Context, SHA256};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::OnceCell;

/// Moves bytes from a URL into a local file.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn download(&self, url: &str, dest: &Path) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct HttpTransport {
    http_client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        HttpTransport {
            http_client: Client::new(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(&self, url: &str, dest: &Path) -> anyhow::Result<()> {
        let req = self.http_client.get(url).build()?;
        let mut resp = self.http_client.execute(req).await?.error_for_status()?;

        let mut f = File::create(dest).await?;
        while let Some(chunk) = resp.chunk().await? {
            f.write_all(&chunk).await?;
        }

        f.sync_all().await?;
        Ok(())
    }
}

/// Local trust store backed by gpg.
#[derive(Debug)]
pub struct Keyring {
    runner: Arc<dyn ProcessRunner>,
}

impl Keyring {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Keyring { runner }
    }

    pub async fn import(&self, key: &Path, cwd: &Path) -> anyhow::Result<()> {
        if !tokio::fs::try_exists(key).await? {
            return Err(KilnError::MissingFile(key.to_path_buf()).into());
        }

        let gpg = self.runner.locate("gpg")?;
        self.runner
            .run(&Invocation::new(gpg, cwd).arg("--import").arg(key.display().to_string()))
            .await
    }

    pub async fn verify(&self, archive: &Path, signature: &Path) -> anyhow::Result<bool> {
        let gpg = self.runner.locate("gpg")?;
        let cwd = archive.parent().unwrap_or(Path::new("."));
        self.runner
            .status(
                &Invocation::new(gpg, cwd)
                    .arg("--verify")
                    .arg(signature.display().to_string())
                    .arg(archive.display().to_string()),
            )
            .await
            .map(|status| status.success())
    }
}

#[derive(Debug)]
pub struct Fetcher {
    settings: Arc<EngineSettings>,
    transport: Arc<dyn Transport>,
    keyring: Keyring,
    key_imported: OnceCell<()>,
}

#[derive(Debug)]
pub struct FetchedArchive {
    pub path: PathBuf,
    pub downloaded: bool,
}

#[derive(Debug)]
pub struct FetchError {
    kind: FetchErrorKind,
    url: String,
}

impl Error for FetchError {}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            FetchErrorKind::SignatureRejected => {
                write!(f, "signature verification failed")?;
            }
            FetchErrorKind::DigestMismatch { hashes } => {
                write!(f, "verification failed (")?;
                let mut first = true;
                for FailedHash {
                    algo,
                    found,
                    expected,
                } in hashes
                {
                    if !first {
                        write!(f, ", ")?;
                    }

                    first = false;
                    write!(
                        f,
                        "{} expected {} but found {}",
                        algo,
                        hex::encode(expected),
                        hex::encode(found)
                    )?;
                }
                write!(f, ")")?;
            }
        }

        write!(f, " for {}", self.url)
    }
}

#[derive(Debug)]
pub struct FailedHash {
    algo: &'static str,
    found: Box<[u8]>,
    expected: Box<[u8]>,
}

#[derive(Debug)]
pub enum FetchErrorKind {
    SignatureRejected,
    DigestMismatch { hashes: Vec<FailedHash> },
}

pub struct DigestPool<'a> {
    pool: Vec<(Context, &'a [u8], &'static str)>,
}

impl DigestPool<'_> {
    pub fn from_spec(spec: &ArchiveSpec) -> DigestPool<'_> {
        let mut pool = vec![];

        if let Some(sha) = &spec.sha256 {
            pool.push((Context::new(&SHA256), &sha[..], "sha256"));
        }

        DigestPool { pool }
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn update(&mut self, data: &[u8]) {
        for (ctx, _, _) in &mut self.pool {
            ctx.update(data);
        }
    }

    pub fn finish(self) -> Result<(), Vec<FailedHash>> {
        let mut failed_hash = vec![];

        for (ctx, comp, algo) in self.pool {
            let dig = ctx.finish();
            if dig.as_ref() != comp {
                failed_hash.push(FailedHash {
                    algo,
                    found: Box::from(dig.as_ref()),
                    expected: Box::from(comp),
                });
            }
        }

        if failed_hash.is_empty() {
            Ok(())
        } else {
            Err(failed_hash)
        }
    }
}

impl Fetcher {
    pub fn new(
        settings: Arc<EngineSettings>,
        transport: Arc<dyn Transport>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Fetcher {
            settings,
            transport,
            keyring: Keyring::new(runner),
            key_imported: OnceCell::new(),
        }
    }

    pub fn archive_path(&self, spec: &ArchiveSpec) -> PathBuf {
        self.settings.layout.deps.join(&spec.file_name)
    }

    /// Returns the local archive for `spec`, downloading and verifying it first
    /// unless a previous run already left it in place.
    pub async fn ensure_archive(
        &self,
        spec: &ArchiveSpec,
        public_key: &Path,
    ) -> anyhow::Result<FetchedArchive> {
        let path = self.archive_path(spec);
        if tokio::fs::try_exists(&path).await? {
            tracing::debug!("{} already downloaded", spec.file_name);
            return Ok(FetchedArchive {
                path,
                downloaded: false,
            });
        }

        self.key_imported
            .get_or_try_init(|| async {
                tracing::info!("importing public key {}", public_key.display());
                self.keyring
                    .import(public_key, &self.settings.layout.deps)
                    .await
            })
            .await?;

        let sig_path = self.settings.layout.deps.join(spec.signature_file_name());
        // An archive only appears under its final name once verified.
        let partial = self
            .settings
            .layout
            .deps
            .join(format!("{}.part", spec.file_name));

        tracing::info!("downloading {}", spec.url);
        let fetched = self.download_and_verify(spec, &partial, &sig_path).await;

        if let Err(e) = fetched {
            let _ = tokio::fs::remove_file(&partial).await;
            let _ = tokio::fs::remove_file(&sig_path).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, &path).await?;

        Ok(FetchedArchive {
            path,
            downloaded: true,
        })
    }

    async fn download_and_verify(
        &self,
        spec: &ArchiveSpec,
        path: &Path,
        sig_path: &Path,
    ) -> anyhow::Result<()> {
        self.transport.download(&spec.url, path).await?;
        self.transport.download(&spec.signature_url, sig_path).await?;

        if let Err(hashes) = self.verify_file(path, spec).await? {
            return Err(FetchError {
                kind: FetchErrorKind::DigestMismatch { hashes },
                url: spec.url.clone(),
            }
            .into());
        }

        if !self.keyring.verify(path, sig_path).await? {
            return Err(FetchError {
                kind: FetchErrorKind::SignatureRejected,
                url: spec.url.clone(),
            }
            .into());
        }

        Ok(())
    }

    pub async fn verify_file(
        &self,
        path: &Path,
        spec: &ArchiveSpec,
    ) -> anyhow::Result<Result<(), Vec<FailedHash>>> {
        let mut pool = DigestPool::from_spec(spec);
        if pool.is_empty() {
            return Ok(Ok(()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .create(false)
            .write(false)
            .open(path)
            .await?;

        let mut buffer = vec![0; 4096];

        loop {
            let r = file.read(&mut buffer).await?;
            if r == 0 {
                break;
            }

            pool.update(&buffer[..r]);
        }

        Ok(pool.finish())
    }
}
