use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::path::Path;

/// Comment CMake's Ninja generator writes near the top of `build.ninja`.
const CONFIGURATION_PREFIX: &str = "# Configuration:";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum BuildVariant {
    Debug,
    RelWithDebInfo,
}

impl BuildVariant {
    pub fn from_debug_flag(debug: bool) -> Self {
        if debug {
            BuildVariant::Debug
        } else {
            BuildVariant::RelWithDebInfo
        }
    }

    /// Spelling used by `CMAKE_BUILD_TYPE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildVariant::Debug => "Debug",
            BuildVariant::RelWithDebInfo => "RelWithDebInfo",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        Some(match input {
            "Debug" => BuildVariant::Debug,
            "RelWithDebInfo" => BuildVariant::RelWithDebInfo,
            _ => return None,
        })
    }

    /// Cargo profile directory the downstream binary lands in.
    pub fn cargo_profile_dir(&self) -> &'static str {
        match self {
            BuildVariant::Debug => "debug",
            BuildVariant::RelWithDebInfo => "release",
        }
    }
}

impl Display for BuildVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The configuration name recorded in a generated `build.ninja`, verbatim.
pub fn recorded_configuration(contents: &str) -> Option<&str> {
    contents.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix(CONFIGURATION_PREFIX)?;
        rest.split_whitespace().next()
    })
}

/// Decides whether the build-graph generator has to run again.
///
/// Returns the reason when it does, `None` when the existing `build.ninja`
/// was generated for `requested`.
pub async fn needs_reconfigure(
    build_graph: &Path,
    requested: BuildVariant,
) -> anyhow::Result<Option<String>> {
    let contents = match tokio::fs::read_to_string(build_graph).await {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(Some(format!("no previous {}", build_graph.display())));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(match recorded_configuration(&contents) {
        None => {
            tracing::warn!(
                "no configuration recorded in {}, regenerating it",
                build_graph.display()
            );
            Some("build type of the previous configuration is unknown".to_string())
        }
        Some(recorded) => match BuildVariant::parse(recorded) {
            Some(previous) if previous == requested => None,
            _ => Some(format!("build type changed ({} -> {})", recorded, requested)),
        },
    })
}
