use crate::engine::steps::Stage;
use std::path::PathBuf;

/// Scratch state of one invocation; decisions are recomputed on every run.
#[derive(Debug, Default)]
pub struct BuildState {
    pub downloaded: Vec<String>,
    pub extracted: Vec<String>,
    pub reconfigure_reason: Option<String>,
    pub stale_entry: Option<PathBuf>,
    pub executed: Vec<Stage>,
    pub skipped: Vec<Stage>,
    pub binary: Option<PathBuf>,
}

impl BuildState {
    #[cfg(test)]
    pub fn ran(&self, stage: Stage) -> bool {
        self.executed.contains(&stage)
    }
}
