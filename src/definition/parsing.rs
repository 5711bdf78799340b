use crate::definition::{
    ArchiveTemplate, Document, Downstream, ExternalProject, Patch, Toolchain, Verification,
};
use kdl::{KdlDocument, KdlNode};
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[error("Failed parsing bootstrap definition")]
pub struct KilnParserCompoundError {
    #[source_code]
    pub source_code: NamedSource,
    #[related]
    pub(crate) errors: Vec<KilnParseError>,
}

#[derive(Debug, Diagnostic, Eq, PartialEq, Error)]
#[error("{kind}")]
pub struct KilnParseError {
    /// Offset in chars of the error.
    #[label("{}", label.unwrap_or("here"))]
    pub span: SourceSpan,

    /// Label text for this span. Defaults to `"here"`.
    pub label: Option<&'static str>,

    /// Suggestion for fixing the definition.
    #[help]
    pub help: Option<String>,

    /// Specific error kind for this parser error.
    pub kind: &'static str,
}

const EMPTY_NODES: &[KdlNode] = &[];

pub(crate) trait GetNodes {
    fn nodes(&self) -> &[KdlNode];
}

impl GetNodes for KdlNode {
    fn nodes(&self) -> &[KdlNode] {
        self.children().map_or(EMPTY_NODES, |x| x.nodes())
    }
}

fn named_source(source: &str, filename: Option<&str>) -> NamedSource {
    NamedSource::new(
        filename
            .map(ToString::to_string)
            .unwrap_or_else(|| "[memory.kdl]".to_string()),
        source.to_string(),
    )
}

pub trait ParseDocument {
    /// Parses `input`, failing on the first document that carries any error.
    fn parse_document_strict(
        input: &KdlDocument,
        source: &str,
        filename: Option<&str>,
    ) -> miette::Result<Self>
    where
        Self: Sized,
    {
        let (data, errors) = Self::parse_document_with_errors(input);

        match data {
            Some(obj) if errors.is_empty() => Ok(obj),

            _ => Err(KilnParserCompoundError {
                source_code: named_source(source, filename),
                errors,
            }
            .into()),
        }
    }

    fn parse_document_with_errors(input: &KdlDocument) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized;
}

pub trait ParseNode {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized;
}

/// Parses a definition from KDL text.
pub fn parse_definition(source: &str, filename: Option<&str>) -> miette::Result<Document> {
    let kdl_document: KdlDocument = source.parse()?;
    Document::parse_document_strict(&kdl_document, source, filename)
}

#[macro_export]
macro_rules! parse_string_into {
    ($input:ident, $into:expr, $errors:expr, $name:literal) => {{
        use $crate::definition::parsing::extract_single_string_value;

        match extract_single_string_value(
            $input,
            concat!($name, " missing"),
            concat!($name, " should be a string"),
            concat!("only 1 string expected for ", $name),
            concat!($name, " expected a value, property found instead"),
        ) {
            Ok(n) => $into = n.into(),
            Err(e) => $errors.push(e),
        };
    }};
}

#[macro_export]
macro_rules! parse_string_list_into {
    ($input:ident, $into:expr, $errors:expr, $name:literal) => {{
        use $crate::definition::parsing::extract_string_values;

        match extract_string_values(
            $input,
            concat!($name, " expects only string values"),
            concat!($name, " expected values, property found instead"),
        ) {
            Ok(n) => $into.extend(n),
            Err(e) => $errors.push(e),
        };
    }};
}

impl ParseDocument for Document {
    fn parse_document_with_errors(input: &KdlDocument) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut toolchain: Option<Toolchain> = None;
        let mut downstream: Option<Downstream> = None;
        let mut errors = vec![];

        for node in input.nodes() {
            match node.name().value() {
                "toolchain" => {
                    if toolchain.is_some() {
                        errors.push(KilnParseError {
                            span: *node.span(),
                            label: Some("second definition of toolchain here"),
                            help: None,
                            kind: "redefinition of toolchain, only one can be bootstrapped",
                        });
                        continue;
                    }

                    let (tc, err) = Toolchain::parse_node_with_errors(node);
                    errors.extend(err);
                    toolchain = tc;
                }

                "downstream" => {
                    let (ds, err) = Downstream::parse_node_with_errors(node);
                    errors.extend(err);
                    downstream = ds;
                }

                _ => errors.push(KilnParseError {
                    span: *node.name().span(),
                    label: None,
                    help: Some("expected `toolchain` or `downstream`".to_string()),
                    kind: "unknown top-level node",
                }),
            }
        }

        let (toolchain, downstream) = match (toolchain, downstream) {
            (Some(t), Some(d)) => (t, d),
            _ => {
                errors.push(KilnParseError {
                    span: SourceSpan::new(0usize.into(), 0usize.into()),
                    label: None,
                    help: None,
                    kind: "definition requires both a toolchain and a downstream node",
                });
                return (None, errors);
            }
        };

        (
            Some(Document {
                toolchain,
                downstream,
            }),
            errors,
        )
    }
}

impl ParseNode for Toolchain {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut errors: Vec<KilnParseError> = vec![];

        let mut name: String = "llvm".to_string();
        let mut default_version: Option<String> = None;
        let mut versions: Vec<String> = vec![];
        let mut min_host_compiler: Option<String> = None;
        let mut public_key: Option<String> = None;
        let mut archives: Vec<ArchiveTemplate> = vec![];
        let mut patch: Option<Patch> = None;
        let mut targets: Vec<String> = vec![];
        let mut external_projects: Vec<ExternalProject> = vec![];

        parse_string_into!(input, name, errors, "name of toolchain");
        for node in input.nodes() {
            match node.name().value() {
                "default-version" => {
                    parse_string_into!(node, default_version, errors, "default-version");
                }

                "versions" => {
                    parse_string_list_into!(node, versions, errors, "versions");
                }

                "min-host-compiler" => {
                    parse_string_into!(node, min_host_compiler, errors, "min-host-compiler");
                }

                "public-key" => {
                    parse_string_into!(node, public_key, errors, "public-key");
                }

                "archives" => {
                    let (arcs, err) = Vec::<ArchiveTemplate>::parse_node_with_errors(node);
                    errors.extend(err);

                    if let Some(arcs) = arcs {
                        archives.extend(arcs);
                    }
                }

                "patch" => {
                    let (p, err) = Patch::parse_node_with_errors(node);
                    errors.extend(err);
                    patch = p;
                }

                "targets" => {
                    parse_string_list_into!(node, targets, errors, "targets");
                }

                "external-project" => {
                    let (p, err) = ExternalProject::parse_node_with_errors(node);
                    errors.extend(err);

                    if let Some(p) = p {
                        external_projects.push(p);
                    }
                }

                _ => {}
            }
        }

        let default_version = match default_version {
            Some(v) => v,
            None => {
                errors.push(KilnParseError {
                    span: *input.span(),
                    label: None,
                    help: None,
                    kind: "toolchain missing default-version",
                });
                return (None, errors);
            }
        };

        if versions.is_empty() {
            versions.push(default_version.clone());
        } else if !versions.contains(&default_version) {
            errors.push(KilnParseError {
                span: *input.span(),
                label: None,
                help: Some(format!("add \"{}\" to versions", default_version)),
                kind: "default-version is not one of the supported versions",
            });
        }

        let public_key = match public_key {
            Some(k) => k,
            None => {
                errors.push(KilnParseError {
                    span: *input.span(),
                    label: None,
                    help: Some("archives are verified against this key".to_string()),
                    kind: "toolchain missing public-key",
                });
                return (None, errors);
            }
        };

        (
            Some(Toolchain {
                name,
                default_version,
                versions,
                min_host_compiler,
                public_key,
                archives,
                patch,
                targets,
                external_projects,
            }),
            errors,
        )
    }
}

impl ParseNode for Vec<ArchiveTemplate> {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut data = vec![];
        let mut errors = vec![];

        for node in input.nodes() {
            let (arc, err) = ArchiveTemplate::parse_node_with_errors(node);
            errors.extend(err);

            if let Some(arc) = arc {
                data.push(arc);
            }
        }

        (Some(data), errors)
    }
}

impl ParseNode for ArchiveTemplate {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        if input.name().value() != "fetch" {
            return (
                None,
                vec![KilnParseError {
                    span: *input.name().span(),
                    label: None,
                    help: Some("archives are declared with `fetch \"<name>\"`".to_string()),
                    kind: "Unknown type of archive",
                }],
            );
        }

        let (verification, mut errors) = Verification::parse_node_with_errors(input);
        let verification = verification.unwrap_or_default();

        let mut name = String::new();
        let mut url = None;
        let mut signature = None;
        let mut file_name = None;
        let mut archive_dir = None;
        let mut extract_into = ".".to_string();
        let mut target_dir = None;

        parse_string_into!(input, name, errors, "name of archive");
        for node in input.nodes() {
            match node.name().value() {
                "url" => {
                    parse_string_into!(node, url, errors, "url of archive");
                }

                "signature" => {
                    parse_string_into!(node, signature, errors, "signature of archive");
                }

                "file-name" => {
                    parse_string_into!(node, file_name, errors, "file-name of archive");
                }

                "archive-dir" => {
                    parse_string_into!(node, archive_dir, errors, "archive-dir");
                }

                "extract-into" => {
                    parse_string_into!(node, extract_into, errors, "extract-into");
                }

                "target-dir" => {
                    parse_string_into!(node, target_dir, errors, "target-dir");
                }

                _ => {}
            }
        }

        let (url, signature, archive_dir, target_dir) =
            match (url, signature, archive_dir, target_dir) {
                (Some(u), Some(s), Some(a), Some(t)) => (u, s, a, t),
                _ => {
                    errors.push(KilnParseError {
                        span: *input.span(),
                        label: None,
                        help: Some(
                            "fetch requires url, signature, archive-dir and target-dir"
                                .to_string(),
                        ),
                        kind: "incomplete archive definition",
                    });
                    return (None, errors);
                }
            };

        (
            Some(ArchiveTemplate {
                name,
                url,
                signature,
                file_name,
                archive_dir,
                extract_into,
                target_dir,
                verification,
            }),
            errors,
        )
    }
}

impl ParseNode for Verification {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut errors = vec![];
        let mut sha256 = None;
        for node in input.nodes() {
            if node.name().value() != "sha256" {
                continue;
            }

            let mut str_sha: Option<String> = None;
            parse_string_into!(node, str_sha, errors, "sha256");

            let (Some(str_sha), Some(entry)) = (str_sha, node.entries().first()) else {
                continue;
            };

            match hex::decode(str_sha) {
                Ok(v) => match <[u8; 32]>::try_from(v) {
                    Ok(v) => sha256 = Some(v),
                    Err(_) => errors.push(KilnParseError {
                        span: *entry.span(),
                        label: None,
                        help: None,
                        kind: "expected 32 byte long hex string for sha256",
                    }),
                },
                Err(v) => errors.push(KilnParseError {
                    span: *entry.span(),
                    label: None,
                    help: Some(format!("{}", v)),
                    kind: "invalid hex string",
                }),
            }
        }

        (Some(Verification { sha256 }), errors)
    }
}

impl ParseNode for Patch {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut errors = vec![];
        let mut file = String::new();
        let mut line = None;

        parse_string_into!(input, file, errors, "file to patch");
        for node in input.nodes() {
            if node.name().value() == "line" {
                parse_string_into!(node, line, errors, "patch line");
            }
        }

        match line {
            Some(line) if !line.trim().is_empty() => (Some(Patch { file, line }), errors),
            _ => {
                errors.push(KilnParseError {
                    span: *input.span(),
                    label: None,
                    help: None,
                    kind: "patch requires a non-empty line",
                });
                (None, errors)
            }
        }
    }
}

impl ParseNode for ExternalProject {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut values: Vec<String> = vec![];
        let mut errors = vec![];
        parse_string_list_into!(input, values, errors, "external-project");

        match <[String; 2]>::try_from(values) {
            Ok([name, source_dir]) => (Some(ExternalProject { name, source_dir }), errors),
            Err(_) => {
                errors.push(KilnParseError {
                    span: *input.span(),
                    label: None,
                    help: Some("external-project \"<NAME>\" \"<source dir>\"".to_string()),
                    kind: "external-project expects a name and a source directory",
                });
                (None, errors)
            }
        }
    }
}

impl ParseNode for Downstream {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut errors = vec![];
        let mut binary = String::new();
        let mut features = vec![];
        let mut lib_dir_env = None;

        parse_string_into!(input, binary, errors, "name of downstream binary");
        for node in input.nodes() {
            match node.name().value() {
                "features" => {
                    parse_string_list_into!(node, features, errors, "features");
                }

                "lib-dir-env" => {
                    parse_string_into!(node, lib_dir_env, errors, "lib-dir-env");
                }

                _ => {}
            }
        }

        (
            Some(Downstream {
                binary,
                features,
                lib_dir_env,
            }),
            errors,
        )
    }
}

pub(crate) fn extract_single_string_value(
    input: &KdlNode,
    missing_error: &'static str,
    wrong_type_error: &'static str,
    too_many_error: &'static str,
    property_found_error: &'static str,
) -> Result<String, KilnParseError> {
    match input.entries() {
        [] => Err(KilnParseError {
            span: *input.name().span(),
            label: None,
            help: None,
            kind: missing_error,
        }),

        [name_entry] => {
            if name_entry.name().is_some() {
                return Err(KilnParseError {
                    span: *name_entry.span(),
                    label: None,
                    help: None,
                    kind: property_found_error,
                });
            }

            if let Some(v) = name_entry.value().as_string() {
                Ok(v.to_string())
            } else {
                Err(KilnParseError {
                    span: *name_entry.span(),
                    label: None,
                    help: None,
                    kind: wrong_type_error,
                })
            }
        }

        [first, .., last] => {
            let start_args = first.span().offset();
            let end_args = last.span().len() + last.span().offset();

            let span = SourceSpan::new(start_args.into(), (end_args - start_args).into());
            Err(KilnParseError {
                span,
                label: None,
                help: None,
                kind: too_many_error,
            })
        }
    }
}

pub(crate) fn extract_string_values(
    input: &KdlNode,
    wrong_type_error: &'static str,
    property_found_error: &'static str,
) -> Result<Vec<String>, KilnParseError> {
    let mut values = vec![];

    for entry in input.entries() {
        if entry.name().is_some() {
            return Err(KilnParseError {
                span: *entry.span(),
                label: None,
                help: None,
                kind: property_found_error,
            });
        }

        if let Some(v) = entry.value().as_string() {
            values.push(v.to_string());
        } else {
            return Err(KilnParseError {
                span: *entry.span(),
                label: None,
                help: None,
                kind: wrong_type_error,
            });
        }
    }

    Ok(values)
}
