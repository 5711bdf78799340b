//! Command-line interface definitions for kiln.

use clap::Parser;
use std::path::PathBuf;

/// Download, patch and build LLVM/clang, then build the downstream project against it.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about)]
pub struct Cli {
    /// Clean everything before building.
    #[arg(long, short = 'c')]
    pub clean_all: bool,

    /// Build clang along with the tooling targets.
    #[arg(long)]
    pub with_clang: bool,

    /// Fetch and build the given toolchain version instead of the default.
    #[arg(long = "with-llvm-version", value_name = "VERSION")]
    pub llvm_version: Option<String>,

    /// Build the toolchain without assertions.
    #[arg(long)]
    pub without_assertions: bool,

    /// Generate Xcode project files (macOS only).
    #[arg(long, short = 'x')]
    pub xcode: bool,

    /// Emit verbose information during the build.
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Build the Debug variant instead of RelWithDebInfo.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Root directory of the downstream project (defaults to the current directory).
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Bootstrap definition to use instead of the built-in one.
    #[arg(long, value_name = "FILE")]
    pub definition: Option<PathBuf>,
}
