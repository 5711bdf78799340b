//! The fixed bootstrap pipeline.
//!
//! Every step declares the [`Stage`] it belongs to, whether its failure aborts
//! the run, a `check` that decides if the step still has work to do and the
//! `run` that does it. [`Engine::run`](crate::engine::Engine::run) walks
//! [`SORTED_STEPS`] in stage order.

mod downstream;
mod prepare;
mod sources;
mod toolchain;

use crate::engine::build_state::BuildState;
use crate::engine::Engine;
use async_trait::async_trait;
use lazy_static::lazy_static;
use std::fmt::{Debug, Display, Formatter};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(u8)]
pub enum Stage {
    Reset,
    Scaffold,
    IgnoreDeps,
    Fetch,
    Extract,
    Patch,
    Configure,
    BuildToolchain,
    CleanDownstream,
    BuildDownstream,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Reset => "reset",
            Stage::Scaffold => "scaffold",
            Stage::IgnoreDeps => "ignore-deps",
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Patch => "patch",
            Stage::Configure => "configure",
            Stage::BuildToolchain => "build-toolchain",
            Stage::CleanDownstream => "clean-downstream",
            Stage::BuildDownstream => "build-downstream",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a step's precondition check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Nothing left to do for this step.
    Satisfied,
    /// The step has to run, with a human-readable reason.
    Required(String),
}

#[async_trait]
pub trait StepVTable: Debug + Sync {
    fn stage(&self) -> Stage;
    fn fatal(&self) -> bool;

    async fn check(&self, state: &mut BuildState, engine: &Engine) -> anyhow::Result<Check>;
    async fn execute(&self, state: &mut BuildState, engine: &Engine) -> anyhow::Result<()>;
}

type StepRef = &'static dyn StepVTable;

const STEPS: &[StepRef] = &[
    &downstream::BuildDownstream,
    &downstream::CleanDownstream,
    &prepare::IgnoreDeps,
    &prepare::Reset,
    &prepare::Scaffold,
    &sources::Extract,
    &sources::Fetch,
    &sources::Patch,
    &toolchain::BuildToolchain,
    &toolchain::Configure,
];

lazy_static! {
    pub static ref SORTED_STEPS: Vec<StepRef> = get_sorted_steps();
}

fn get_sorted_steps() -> Vec<StepRef> {
    let mut steps = STEPS.to_vec();
    steps.sort_by_key(|v| v.stage());
    steps
}

#[async_trait]
pub trait Step: Debug {
    const STAGE: Stage;
    /// Whether a failure aborts the pipeline or is only reported.
    const FATAL: bool = true;

    async fn check(&self, state: &mut BuildState, engine: &Engine) -> anyhow::Result<Check>;
    async fn run(&self, state: &mut BuildState, engine: &Engine) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: Step + Sync> StepVTable for T {
    fn stage(&self) -> Stage {
        Self::STAGE
    }

    fn fatal(&self) -> bool {
        Self::FATAL
    }

    async fn check(&self, state: &mut BuildState, engine: &Engine) -> anyhow::Result<Check> {
        Step::check(self, state, engine).await
    }

    async fn execute(&self, state: &mut BuildState, engine: &Engine) -> anyhow::Result<()> {
        self.run(state, engine).await
    }
}
