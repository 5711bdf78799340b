//! Fatal conditions raised by the bootstrap pipeline.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KilnError {
    // === Missing prerequisites ===
    #[error("required tool `{0}` not found in PATH")]
    MissingTool(String),

    #[error("not found: {}", .0.display())]
    MissingFile(PathBuf),

    // === Version preconditions ===
    #[error("{tool} {found} is too old, version {required} or later is required")]
    ToolTooOld {
        tool: String,
        found: semver::Version,
        required: semver::Version,
    },

    #[error("could not determine the version of {tool} from `{output}`")]
    UnknownToolVersion { tool: String, output: String },

    // === Platform preconditions ===
    #[error("{option} requires a {required} host")]
    UnsupportedPlatform {
        option: &'static str,
        required: &'static str,
    },

    #[error("unsupported toolchain version {requested} (expected one of: {})", .supported.join(", "))]
    UnsupportedVersion {
        requested: String,
        supported: Vec<String>,
    },

    // === External processes ===
    #[error("`{program}` exited with {status}")]
    ProcessFailed { program: String, status: String },

    // === Tree preparation ===
    #[error("archive {} did not contain the expected directory `{dir}`", .archive.display())]
    UnexpectedArchiveLayout { archive: PathBuf, dir: String },
}
