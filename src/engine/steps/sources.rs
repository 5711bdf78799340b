use crate::engine::build_state::BuildState;
use crate::engine::patch::{contains_marker, ensure_contains};
use crate::engine::steps::{Check, Stage, Step};
use crate::engine::Engine;
use crate::error::KilnError;
use anyhow::Context;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Fetch;

#[async_trait]
impl Step for Fetch {
    const STAGE: Stage = Stage::Fetch;

    async fn check(&self, _state: &mut BuildState, engine: &Engine) -> anyhow::Result<Check> {
        for spec in &engine.plan.archives {
            let path = engine.fetcher.archive_path(spec);
            if !tokio::fs::try_exists(&path).await? {
                return Ok(Check::Required(format!("{} not downloaded", spec.file_name)));
            }
        }

        Ok(Check::Satisfied)
    }

    async fn run(&self, state: &mut BuildState, engine: &Engine) -> anyhow::Result<()> {
        let public_key = engine.settings.layout.root.join(&engine.plan.public_key);

        for spec in &engine.plan.archives {
            let fetched = engine
                .fetcher
                .ensure_archive(spec, &public_key)
                .await
                .with_context(|| format!("failed to fetch {}", spec.name))?;

            if fetched.downloaded {
                tracing::debug!("stored {}", fetched.path.display());
                state.downloaded.push(spec.name.clone());
            }
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct Extract;

#[async_trait]
impl Step for Extract {
    const STAGE: Stage = Stage::Extract;

    async fn check(&self, _state: &mut BuildState, engine: &Engine) -> anyhow::Result<Check> {
        for spec in &engine.plan.archives {
            let target = engine.extractor.target_dir(spec);
            if !tokio::fs::try_exists(&target).await? {
                return Ok(Check::Required(format!("{} not extracted", target.display())));
            }
        }

        Ok(Check::Satisfied)
    }

    async fn run(&self, state: &mut BuildState, engine: &Engine) -> anyhow::Result<()> {
        // Later archives unpack into trees created by earlier ones.
        for spec in &engine.plan.archives {
            let archive = engine.fetcher.archive_path(spec);
            let extracted = engine
                .extractor
                .ensure_extracted(&archive, spec)
                .await
                .with_context(|| format!("failed to extract {}", archive.display()))?;

            if extracted {
                state.extracted.push(spec.name.clone());
            }
        }

        Ok(())
    }
}

/// Registers the out-of-tree tool with the clang build.
#[derive(Debug)]
pub struct Patch;

#[async_trait]
impl Step for Patch {
    const STAGE: Stage = Stage::Patch;

    async fn check(&self, _state: &mut BuildState, engine: &Engine) -> anyhow::Result<Check> {
        let patch = match &engine.plan.patch {
            Some(p) => p,
            None => return Ok(Check::Satisfied),
        };

        let file = engine.settings.layout.toolchain.join(&patch.file);
        let contents = match tokio::fs::read_to_string(&file).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KilnError::MissingFile(file).into());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(if contains_marker(&contents, &patch.line) {
            Check::Satisfied
        } else {
            Check::Required(format!("{} lacks `{}`", file.display(), patch.line))
        })
    }

    async fn run(&self, _state: &mut BuildState, engine: &Engine) -> anyhow::Result<()> {
        if let Some(patch) = &engine.plan.patch {
            let file = engine.settings.layout.toolchain.join(&patch.file);
            ensure_contains(&file, &patch.line).await?;
        }

        Ok(())
    }
}
