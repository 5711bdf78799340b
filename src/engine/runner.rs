use crate::error::KilnError;
use async_trait::async_trait;
use std::ffi::OsStr;
use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

/// A fully described external process: program, arguments, working directory
/// and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Invocation {
            program: program.into(),
            args: vec![],
            cwd: cwd.into(),
            env: vec![],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// File name of the program, e.g. `cmake` for `/usr/bin/cmake`.
    pub fn program_name(&self) -> &str {
        self.program
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(&self.cwd);
        cmd.args(&self.args);
        cmd.envs(self.env.iter().map(|(k, v)| (k, v)));
        cmd
    }
}

impl Display for Invocation {
    /// Shell-like rendering, logged so a failing step can be rerun by hand.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "cd {} &&", self.cwd.display())?;
        for (k, v) in &self.env {
            write!(f, " {}='{}'", k, v)?;
        }
        write!(f, " {}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// The only way the pipeline starts external processes.
#[async_trait]
pub trait ProcessRunner: Send + Sync + Debug {
    /// Resolves a program name to an executable path.
    fn locate(&self, program: &str) -> Result<PathBuf, KilnError>;

    /// Runs the process with inherited stdio and reports how it exited.
    async fn status(&self, invocation: &Invocation) -> anyhow::Result<ExitStatus>;

    /// Runs the process and returns its captured standard output.
    async fn output(&self, invocation: &Invocation) -> anyhow::Result<String>;

    /// Runs the process, turning a non-zero exit into [`KilnError::ProcessFailed`].
    async fn run(&self, invocation: &Invocation) -> anyhow::Result<()> {
        tracing::debug!("running {}", invocation);
        let status = self.status(invocation).await?;
        if !status.success() {
            return Err(KilnError::ProcessFailed {
                program: invocation.program_name().to_string(),
                status: status.to_string(),
            }
            .into());
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    fn locate(&self, program: &str) -> Result<PathBuf, KilnError> {
        find_in_path(program, std::env::var_os("PATH").as_deref())
            .ok_or_else(|| KilnError::MissingTool(program.to_string()))
    }

    async fn status(&self, invocation: &Invocation) -> anyhow::Result<ExitStatus> {
        let mut proc = invocation.command().spawn()?;
        let ec = proc.wait().await?;
        if !ec.success() {
            tracing::error!("`{}` exited with {}", invocation.program_name(), ec);
        }

        Ok(ec)
    }

    async fn output(&self, invocation: &Invocation) -> anyhow::Result<String> {
        let out = invocation
            .command()
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !out.status.success() {
            return Err(KilnError::ProcessFailed {
                program: invocation.program_name().to_string(),
                status: out.status.to_string(),
            }
            .into());
        }

        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

pub fn find_in_path(program: &str, path: Option<&OsStr>) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    std::env::split_paths(path?)
        .map(|dir| dir.join(program))
        .find(|p| p.is_file())
}
