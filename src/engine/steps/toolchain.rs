use crate::engine::build_state::BuildState;
use crate::engine::configure::needs_reconfigure;
use crate::engine::runner::Invocation;
use crate::engine::steps::{Check, Stage, Step};
use crate::engine::Engine;
use crate::error::KilnError;
use anyhow::Context;
use async_trait::async_trait;

/// Generates the Ninja build graph, and the Xcode project when asked for one.
#[derive(Debug)]
pub struct Configure;

impl Configure {
    fn cmake_args(&self, engine: &Engine, generator: &str) -> Result<Vec<String>, KilnError> {
        let layout = &engine.settings.layout;
        let mut args = vec![
            "-G".to_string(),
            generator.to_string(),
            layout.src.display().to_string(),
            "-Wno-dev".to_string(),
        ];

        args.extend(engine.host_compiler_args()?);
        args.push(format!("-DCMAKE_INSTALL_PREFIX={}", layout.install.display()));
        args.push(format!("-DCMAKE_BUILD_TYPE={}", engine.settings.variant));
        args.push(format!(
            "-DLLVM_PARALLEL_LINK_JOBS={}",
            engine.environment.parallel_link_jobs()
        ));
        args.push(format!(
            "-DLLVM_ENABLE_ASSERTIONS={}",
            if engine.settings.assertions { "1" } else { "0" }
        ));
        args.push("-DCMAKE_EXPORT_COMPILE_COMMANDS=1".to_string());
        args.push("-DLLVM_TEMPORARILY_ALLOW_OLD_TOOLCHAIN=1".to_string());

        for project in &engine.plan.external_projects {
            args.push(format!(
                "-DLLVM_EXTERNAL_{}_SOURCE_DIR={}",
                project.name,
                layout.root.join(&project.source_dir).display()
            ));
        }

        if engine.environment.is_x86() {
            args.push("-DLLVM_TARGETS_TO_BUILD=X86".to_string());
        }

        Ok(args)
    }
}

#[async_trait]
impl Step for Configure {
    const STAGE: Stage = Stage::Configure;

    async fn check(&self, state: &mut BuildState, engine: &Engine) -> anyhow::Result<Check> {
        // The IDE project is never inspected, only regenerated.
        let reason = if engine.settings.ide {
            Some("IDE project requested".to_string())
        } else {
            needs_reconfigure(
                &engine.settings.layout.build_graph_file(),
                engine.settings.variant,
            )
            .await?
        };

        state.reconfigure_reason = reason.clone();
        Ok(match reason {
            Some(reason) => Check::Required(reason),
            None => Check::Satisfied,
        })
    }

    async fn run(&self, _state: &mut BuildState, engine: &Engine) -> anyhow::Result<()> {
        let layout = &engine.settings.layout;
        let cmake = engine.runner.locate("cmake")?;

        engine
            .runner
            .run(&Invocation::new(&cmake, &layout.build).args(self.cmake_args(engine, "Ninja")?))
            .await?;

        if engine.settings.ide {
            tokio::fs::create_dir_all(&layout.ide)
                .await
                .with_context(|| format!("failed to create {}", layout.ide.display()))?;

            engine
                .runner
                .run(&Invocation::new(&cmake, &layout.ide).args(self.cmake_args(engine, "Xcode")?))
                .await?;
        }

        Ok(())
    }
}

/// Runs ninja on every invocation; it is incremental on its own.
#[derive(Debug)]
pub struct BuildToolchain;

#[async_trait]
impl Step for BuildToolchain {
    const STAGE: Stage = Stage::BuildToolchain;

    async fn check(&self, _state: &mut BuildState, _engine: &Engine) -> anyhow::Result<Check> {
        Ok(Check::Required("ninja decides what is out of date".to_string()))
    }

    async fn run(&self, _state: &mut BuildState, engine: &Engine) -> anyhow::Result<()> {
        let layout = &engine.settings.layout;
        let ninja = engine.runner.locate("ninja")?;

        let mut targets = engine.plan.targets.clone();
        if engine.settings.with_clang {
            targets.push("clang".to_string());
        }

        engine
            .runner
            .run(&Invocation::new(ninja, &layout.build).args(targets))
            .await?;

        // Installed clang headers are found relative to this directory.
        let bin = layout.install.join("bin");
        tokio::fs::create_dir_all(&bin)
            .await
            .with_context(|| format!("failed to create {}", bin.display()))?;

        Ok(())
    }
}
