use crate::definition::{Downstream, Plan};
use crate::engine::build_state::BuildState;
use crate::engine::configure::BuildVariant;
use crate::engine::environment::Environment;
use crate::engine::extractor::Extractor;
use crate::engine::fetcher::{Fetcher, HttpTransport, Transport};
use crate::engine::runner::{ProcessRunner, SystemRunner};
use crate::engine::steps::{Check, StepVTable, SORTED_STEPS};
use crate::error::KilnError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod build_state;
pub mod configure;
pub mod environment;
mod extractor;
pub mod fetcher;
mod patch;
pub mod runner;
mod staleness;
pub mod steps;

#[cfg(test)]
mod tests;

/// Every directory the pipeline reads or writes, derived from the project
/// root and the toolchain version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    /// Downloads and per-version toolchain trees.
    pub deps: PathBuf,
    pub toolchain: PathBuf,
    pub src: PathBuf,
    pub build: PathBuf,
    pub install: PathBuf,
    /// Xcode project output.
    pub ide: PathBuf,
    pub downstream: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>, toolchain_name: &str, version: &str) -> Self {
        let root = root.into();
        let deps = root.join("dependencies");
        let toolchain = deps.join(format!("{}-{}", toolchain_name, version));

        Layout {
            src: toolchain.join("src"),
            build: toolchain.join("build"),
            install: toolchain.join("install"),
            ide: root.join("xcode"),
            downstream: root.clone(),
            toolchain,
            deps,
            root,
        }
    }

    pub fn build_graph_file(&self) -> PathBuf {
        self.build.join("build.ninja")
    }

    pub fn llvm_config(&self) -> PathBuf {
        self.build.join("bin").join("llvm-config")
    }

    pub fn deps_ignore_file(&self) -> PathBuf {
        self.deps.join(".gitignore")
    }

    pub fn downstream_binary(&self, variant: BuildVariant, binary: &str) -> PathBuf {
        self.downstream
            .join("target")
            .join(variant.cargo_profile_dir())
            .join(binary)
    }
}

/// Options of one invocation.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub layout: Layout,
    pub variant: BuildVariant,
    pub assertions: bool,
    pub with_clang: bool,
    /// Also generate an Xcode project.
    pub ide: bool,
    pub verbose: bool,
    pub clean_all: bool,
}

impl EngineSettings {
    pub fn new(layout: Layout) -> Self {
        EngineSettings {
            layout,
            variant: BuildVariant::RelWithDebInfo,
            assertions: true,
            with_clang: false,
            ide: false,
            verbose: false,
            clean_all: false,
        }
    }
}

#[derive(Debug)]
pub struct Engine {
    pub settings: Arc<EngineSettings>,
    plan: Plan,
    downstream: Downstream,
    fetcher: Fetcher,
    extractor: Extractor,
    environment: Environment,
    runner: Arc<dyn ProcessRunner>,
}

impl Engine {
    pub fn new(settings: EngineSettings, plan: Plan, downstream: Downstream) -> Self {
        Self::from_parts(
            settings,
            plan,
            downstream,
            Arc::new(HttpTransport::new()),
            Arc::new(SystemRunner),
            Environment::detect(),
        )
    }

    pub fn from_parts(
        settings: EngineSettings,
        plan: Plan,
        downstream: Downstream,
        transport: Arc<dyn Transport>,
        runner: Arc<dyn ProcessRunner>,
        environment: Environment,
    ) -> Self {
        let settings = Arc::new(settings);
        Engine {
            fetcher: Fetcher::new(settings.clone(), transport, runner.clone()),
            extractor: Extractor::new(settings.clone()),
            settings,
            plan,
            downstream,
            environment,
            runner,
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn downstream_binary(&self) -> PathBuf {
        self.settings
            .layout
            .downstream_binary(self.settings.variant, &self.downstream.binary)
    }

    /// `-DCMAKE_C_COMPILER`/`-DCMAKE_CXX_COMPILER` pointing at the host clang.
    fn host_compiler_args(&self) -> Result<Vec<String>, KilnError> {
        let clang = self.runner.locate("clang")?;
        let clangpp = self.runner.locate("clang++")?;

        Ok(vec![
            format!("-DCMAKE_C_COMPILER={}", clang.display()),
            format!("-DCMAKE_CXX_COMPILER={}", clangpp.display()),
        ])
    }

    /// Host checks that have to pass before anything is touched on disk.
    pub async fn preflight(&self) -> anyhow::Result<()> {
        if let Some(required) = &self.plan.min_host_compiler {
            self.environment
                .ensure_clang_version(self.runner.as_ref(), &self.settings.layout.root, required)
                .await?;
        }

        Ok(())
    }

    /// Walks the pipeline once, running each step whose check asks for it.
    pub async fn run(&self) -> anyhow::Result<BuildState> {
        let mut state = BuildState::default();

        for step in SORTED_STEPS.iter().copied() {
            let stage = step.stage();
            match self.reconcile(step, &mut state).await {
                Ok(()) => {}
                Err(e) if !step.fatal() => {
                    tracing::warn!("{} failed, continuing: {:#}", stage, e);
                }
                Err(e) => return Err(e.context(format!("{} failed", stage))),
            }
        }

        Ok(state)
    }

    async fn reconcile(&self, step: &dyn StepVTable, state: &mut BuildState) -> anyhow::Result<()> {
        let stage = step.stage();
        match step.check(state, self).await? {
            Check::Satisfied => {
                tracing::debug!("{}: up to date", stage);
                state.skipped.push(stage);
            }
            Check::Required(reason) => {
                tracing::info!("{}: {}", stage, reason);
                step.execute(state, self).await?;
                state.executed.push(stage);
            }
        }

        Ok(())
    }
}

/// `path` relative to `base` when it lies below it.
pub fn display_path(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.display().to_string())
}
