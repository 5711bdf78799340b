use crate::engine::build_state::BuildState;
use crate::engine::configure::BuildVariant;
use crate::engine::runner::Invocation;
use crate::engine::staleness::{needs_downstream_clean, ExclusionPolicy};
use crate::engine::steps::{Check, Stage, Step};
use crate::engine::Engine;
use crate::error::KilnError;
use async_trait::async_trait;

/// Throws away cargo's incremental state once the toolchain moved under it.
#[derive(Debug)]
pub struct CleanDownstream;

#[async_trait]
impl Step for CleanDownstream {
    const STAGE: Stage = Stage::CleanDownstream;

    async fn check(&self, state: &mut BuildState, engine: &Engine) -> anyhow::Result<Check> {
        let policy = ExclusionPolicy::for_toolchain(&engine.plan.version)?;
        let stale = needs_downstream_clean(
            &engine.settings.layout.toolchain,
            &engine.downstream_binary(),
            &policy,
        )
        .await?;

        state.stale_entry = stale.clone();
        Ok(match stale {
            Some(path) => Check::Required(format!("{} changed since the last build", path.display())),
            None => Check::Satisfied,
        })
    }

    async fn run(&self, _state: &mut BuildState, engine: &Engine) -> anyhow::Result<()> {
        let cargo = engine.runner.locate("cargo")?;
        engine
            .runner
            .run(&Invocation::new(cargo, &engine.settings.layout.downstream).arg("clean"))
            .await
    }
}

#[derive(Debug)]
pub struct BuildDownstream;

impl BuildDownstream {
    fn invocation(&self, engine: &Engine) -> Result<Invocation, KilnError> {
        let settings = &engine.settings;
        let layout = &settings.layout;
        let cargo = engine.runner.locate("cargo")?;

        let mut invocation = Invocation::new(cargo, &layout.downstream).arg("build");
        if !engine.downstream.features.is_empty() {
            invocation = invocation
                .arg("--features")
                .arg(engine.downstream.features.join(","));
        }
        if settings.variant != BuildVariant::Debug {
            invocation = invocation.arg("--release");
        }
        if settings.verbose {
            invocation = invocation.arg("-vv");
        }

        invocation = invocation
            .env("LIBCURL_NO_PKG_CONFIG", "1")
            .env("ZLIB_NO_PKG_CONFIG", "1")
            .env("LLVM_CONFIG_PATH", layout.llvm_config().display().to_string())
            .env("LLVM_SYSTEM_LIBS", engine.environment.llvm_system_libs());

        if let Some(var) = &engine.downstream.lib_dir_env {
            invocation = invocation.env(var.as_str(), layout.build.join("lib").display().to_string());
        }

        Ok(invocation)
    }
}

#[async_trait]
impl Step for BuildDownstream {
    const STAGE: Stage = Stage::BuildDownstream;

    async fn check(&self, _state: &mut BuildState, _engine: &Engine) -> anyhow::Result<Check> {
        Ok(Check::Required("cargo decides what is out of date".to_string()))
    }

    async fn run(&self, state: &mut BuildState, engine: &Engine) -> anyhow::Result<()> {
        let llvm_config = engine.settings.layout.llvm_config();
        if !tokio::fs::try_exists(&llvm_config).await? {
            return Err(KilnError::MissingFile(llvm_config).into());
        }

        engine.runner.run(&self.invocation(engine)?).await?;
        state.binary = Some(engine.downstream_binary());

        Ok(())
    }
}
