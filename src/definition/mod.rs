pub mod parsing;

use anyhow::Context;
use handlebars::Handlebars;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Default, Debug, Clone)]
pub struct Document {
    pub toolchain: Toolchain,
    pub downstream: Downstream,
}

/// Toolchain section of a bootstrap definition, before the version is chosen.
#[derive(Default, Debug, Clone)]
pub struct Toolchain {
    pub name: String,
    pub default_version: String,
    pub versions: Vec<String>,
    pub min_host_compiler: Option<String>,
    pub public_key: String,
    pub archives: Vec<ArchiveTemplate>,
    pub patch: Option<Patch>,
    pub targets: Vec<String>,
    pub external_projects: Vec<ExternalProject>,
}

#[derive(Default, Debug, Clone)]
pub struct ArchiveTemplate {
    pub name: String,
    pub url: String,
    pub signature: String,
    pub file_name: Option<String>,
    pub archive_dir: String,
    pub extract_into: String,
    pub target_dir: String,
    pub verification: Verification,
}

#[derive(Default, Debug, Clone)]
pub struct Verification {
    pub sha256: Option<[u8; 32]>,
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub file: String,
    pub line: String,
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ExternalProject {
    pub name: String,
    pub source_dir: String,
}

#[derive(Default, Debug, Clone)]
pub struct Downstream {
    pub binary: String,
    pub features: Vec<String>,
    pub lib_dir_env: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct TemplateVars {
    pub name: String,
    pub version: String,
}

/// One entry of the acquisition plan, with every template rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSpec {
    pub name: String,
    pub url: String,
    pub signature_url: String,
    pub file_name: String,
    /// Top-level directory the upstream archive unpacks to.
    pub archive_dir: String,
    /// Parent directory, relative to the toolchain root.
    pub extract_into: PathBuf,
    /// Canonical name `archive_dir` gets renamed to.
    pub target_dir: String,
    pub sha256: Option<[u8; 32]>,
}

impl ArchiveSpec {
    pub fn signature_file_name(&self) -> String {
        file_name_of(&self.signature_url)
            .unwrap_or_else(|| format!("{}.sig", self.file_name))
    }

    /// Directory the canonical tree lives in once extracted, relative to the toolchain root.
    pub fn extracted_path(&self) -> PathBuf {
        self.extract_into.join(&self.target_dir)
    }
}

/// The toolchain section resolved for a single version.
#[derive(Debug, Clone)]
pub struct Plan {
    pub name: String,
    pub version: String,
    pub min_host_compiler: Option<semver::Version>,
    /// Public key file, relative to the project root.
    pub public_key: PathBuf,
    pub archives: Vec<ArchiveSpec>,
    pub patch: Option<Patch>,
    pub targets: Vec<String>,
    pub external_projects: Vec<ExternalProject>,
}

impl Toolchain {
    pub fn template_vars(&self, version: &str) -> TemplateVars {
        TemplateVars {
            name: self.name.clone(),
            version: version.to_string(),
        }
    }

    pub fn resolve(&self, version: &str) -> anyhow::Result<Plan> {
        let mut engine = Handlebars::new();
        engine.set_strict_mode(true);
        engine.register_escape_fn(handlebars::no_escape);

        let vars = self.template_vars(version);
        let render = |template: &str| -> anyhow::Result<String> {
            engine
                .render_template(template, &vars)
                .with_context(|| format!("failed to render `{}`", template))
        };

        let mut archives = Vec::with_capacity(self.archives.len());
        for archive in &self.archives {
            let url = render(&archive.url)?;
            let file_name = match &archive.file_name {
                Some(name) => render(name)?,
                None => file_name_of(&url)
                    .with_context(|| format!("cannot derive a file name from {}", url))?,
            };

            archives.push(ArchiveSpec {
                name: archive.name.clone(),
                signature_url: render(&archive.signature)?,
                url,
                file_name,
                archive_dir: render(&archive.archive_dir)?,
                extract_into: PathBuf::from(render(&archive.extract_into)?),
                target_dir: render(&archive.target_dir)?,
                sha256: archive.verification.sha256,
            });
        }

        let patch = match &self.patch {
            Some(patch) => Some(Patch {
                file: render(&patch.file)?,
                line: render(&patch.line)?,
            }),
            None => None,
        };

        let min_host_compiler = match &self.min_host_compiler {
            Some(v) => Some(
                semver::Version::parse(v)
                    .with_context(|| format!("invalid minimum host compiler version {}", v))?,
            ),
            None => None,
        };

        Ok(Plan {
            name: self.name.clone(),
            version: version.to_string(),
            min_host_compiler,
            public_key: PathBuf::from(render(&self.public_key)?),
            archives,
            patch,
            targets: self.targets.clone(),
            external_projects: self.external_projects.clone(),
        })
    }
}

fn file_name_of(url: &str) -> Option<String> {
    url.rsplit('/')
        .next()
        .and_then(|x| x.split('?').next())
        .filter(|x| !x.is_empty())
        .map(ToString::to_string)
}
