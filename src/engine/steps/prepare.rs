use crate::engine::build_state::BuildState;
use crate::engine::runner::Invocation;
use crate::engine::steps::{Check, Stage, Step};
use crate::engine::Engine;
use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;

/// Wipes every generated tree when `--clean-all` is given.
#[derive(Debug)]
pub struct Reset;

#[async_trait]
impl Step for Reset {
    const STAGE: Stage = Stage::Reset;

    async fn check(&self, _state: &mut BuildState, engine: &Engine) -> anyhow::Result<Check> {
        Ok(if engine.settings.clean_all {
            Check::Required("--clean-all requested".to_string())
        } else {
            Check::Satisfied
        })
    }

    async fn run(&self, _state: &mut BuildState, engine: &Engine) -> anyhow::Result<()> {
        let layout = &engine.settings.layout;
        for dir in [
            &layout.src,
            &layout.build,
            &layout.install,
            &layout.deps,
            &layout.ide,
        ] {
            remove_dir_if_exists(dir).await?;
        }

        let cargo = engine.runner.locate("cargo")?;
        engine
            .runner
            .run(&Invocation::new(cargo, &layout.downstream).arg("clean"))
            .await
    }
}

async fn remove_dir_if_exists(dir: &Path) -> anyhow::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            tracing::info!("removed {}", dir.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", dir.display())),
    }
}

/// Creates the download and build directories.
#[derive(Debug)]
pub struct Scaffold;

#[async_trait]
impl Step for Scaffold {
    const STAGE: Stage = Stage::Scaffold;

    async fn check(&self, _state: &mut BuildState, engine: &Engine) -> anyhow::Result<Check> {
        let layout = &engine.settings.layout;
        for dir in [&layout.deps, &layout.build] {
            if !tokio::fs::try_exists(dir).await? {
                return Ok(Check::Required(format!("{} is missing", dir.display())));
            }
        }

        Ok(Check::Satisfied)
    }

    async fn run(&self, _state: &mut BuildState, engine: &Engine) -> anyhow::Result<()> {
        let layout = &engine.settings.layout;
        for dir in [&layout.deps, &layout.build] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        Ok(())
    }
}

/// Keeps downloads and toolchain trees out of version control.
#[derive(Debug)]
pub struct IgnoreDeps;

#[async_trait]
impl Step for IgnoreDeps {
    const STAGE: Stage = Stage::IgnoreDeps;
    const FATAL: bool = false;

    async fn check(&self, _state: &mut BuildState, engine: &Engine) -> anyhow::Result<Check> {
        let file = engine.settings.layout.deps_ignore_file();
        Ok(if tokio::fs::try_exists(&file).await? {
            Check::Satisfied
        } else {
            Check::Required(format!("{} is missing", file.display()))
        })
    }

    async fn run(&self, _state: &mut BuildState, engine: &Engine) -> anyhow::Result<()> {
        tokio::fs::write(engine.settings.layout.deps_ignore_file(), "*\n").await?;
        Ok(())
    }
}
