use crate::cli::Cli;
use crate::definition::parsing::parse_definition;
use crate::definition::Document;
use crate::engine::configure::BuildVariant;
use crate::engine::environment::Environment;
use crate::engine::{display_path, Engine, EngineSettings, Layout};
use crate::error::KilnError;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cli;
mod definition;
mod engine;
mod error;
mod utils;

pub const DEFAULT_DEFINITION: &str = include_str!("../kiln.kdl");

fn init_logging(verbose: bool) {
    let default = if verbose { "kiln=debug" } else { "kiln=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_definition(path: Option<&PathBuf>) -> anyhow::Result<Document> {
    let (source, name) = match path {
        Some(path) => (
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            path.display().to_string(),
        ),
        None => (DEFAULT_DEFINITION.to_string(), "kiln.kdl".to_string()),
    };

    match parse_definition(&source, Some(&name)) {
        Ok(document) => Ok(document),
        Err(report) => {
            eprintln!("{:?}", report);
            anyhow::bail!("invalid bootstrap definition {}", name)
        }
    }
}

/// Rejects option combinations before anything runs.
fn validate(cli: &Cli, document: &Document, environment: &Environment) -> Result<String, KilnError> {
    let toolchain = &document.toolchain;
    let version = cli
        .llvm_version
        .clone()
        .unwrap_or_else(|| toolchain.default_version.clone());

    if !toolchain.versions.contains(&version) {
        return Err(KilnError::UnsupportedVersion {
            requested: version,
            supported: toolchain.versions.clone(),
        });
    }

    if cli.xcode && !environment.is_mac() {
        return Err(KilnError::UnsupportedPlatform {
            option: "-x/--xcode",
            required: "macOS",
        });
    }

    Ok(version)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let document = load_definition(cli.definition.as_ref())?;
    let environment = Environment::detect();
    let version = validate(&cli, &document, &environment)?;

    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };

    let plan = document.toolchain.resolve(&version)?;
    let mut settings = EngineSettings::new(Layout::new(&root, &plan.name, &version));
    settings.variant = BuildVariant::from_debug_flag(cli.debug);
    settings.assertions = !cli.without_assertions;
    settings.with_clang = cli.with_clang;
    settings.ide = cli.xcode;
    settings.verbose = cli.verbose;
    settings.clean_all = cli.clean_all;

    let engine = Engine::new(settings, plan, document.downstream);
    tracing::info!(
        "bootstrapping {} {} ({}) in {}",
        engine.plan().name,
        engine.plan().version,
        engine.settings.variant,
        root.display()
    );

    engine.preflight().await?;
    let state = engine.run().await?;

    let cwd = std::env::current_dir().unwrap_or_else(|_| root.clone());
    let binary = state.binary.unwrap_or_else(|| engine.downstream_binary());
    println!("success! you may now run {}", display_path(&binary, &cwd));

    Ok(())
}
