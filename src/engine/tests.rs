use crate::definition::parsing::parse_definition;
use crate::definition::{Document, Plan};
use crate::engine::build_state::BuildState;
use crate::engine::configure::BuildVariant;
use crate::engine::environment::Environment;
use crate::engine::fetcher::Transport;
use crate::engine::runner::{Invocation, ProcessRunner};
use crate::engine::steps::Stage;
use crate::engine::{Engine, EngineSettings, Layout};
use crate::error::KilnError;
use async_trait::async_trait;
use filetime::{set_file_mtime, FileTime};
use std::collections::HashMap;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const DEFINITION: &str = r#"
toolchain "llvm" {
    default-version "8.0.0"
    versions "7.0.1" "8.0.0"
    min-host-compiler "3.6.0"
    public-key "scripts/llvm-{{version}}-key.asc"
    archives {
        fetch "llvm" {
            url "https://mirror.test/{{version}}/llvm-{{version}}.src.tar"
            signature "https://mirror.test/{{version}}/llvm-{{version}}.src.tar.sig"
            archive-dir "llvm-{{version}}.src"
            target-dir "src"
        }
        fetch "clang" {
            url "https://mirror.test/{{version}}/cfe-{{version}}.src.tar"
            signature "https://mirror.test/{{version}}/cfe-{{version}}.src.tar.sig"
            archive-dir "cfe-{{version}}.src"
            extract-into "src/tools"
            target-dir "clang"
        }
        fetch "clang-tools-extra" {
            url "https://mirror.test/{{version}}/clang-tools-extra-{{version}}.src.tar"
            signature "https://mirror.test/{{version}}/clang-tools-extra-{{version}}.src.tar.sig"
            archive-dir "clang-tools-extra-{{version}}.src"
            extract-into "src/tools/clang/tools"
            target-dir "extra"
        }
    }
    patch "src/tools/clang/CMakeLists.txt" {
        line "add_clang_subdirectory(c2rust-ast-exporter)"
    }
    targets "c2rust-ast-exporter" "llvm-config" "install-clang-headers"
    external-project "C2RUST_AST_EXPORTER" "c2rust-ast-exporter/src"
}

downstream "c2rust" {
    features "llvm-static"
    lib-dir-env "C2RUST_AST_EXPORTER_LIB_DIR"
}
"#;

const MARKER: &str = "add_clang_subdirectory(c2rust-ast-exporter)";

async fn tarball(entries: &[(String, &str)]) -> Vec<u8> {
    let mut builder = tokio_tar::Builder::new(Vec::new());
    for (path, contents) in entries {
        let mut header = tokio_tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path.as_str(), contents.as_bytes())
            .await
            .unwrap();
    }

    builder.into_inner().await.unwrap()
}

/// Serves canned bytes per URL and records every request.
#[derive(Debug, Default)]
struct FakeTransport {
    files: HashMap<String, Vec<u8>>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransport {
    async fn llvm(version: &str) -> Self {
        let base = format!("https://mirror.test/{}", version);
        let archives = [
            (
                format!("{}/llvm-{}.src.tar", base, version),
                tarball(&[
                    (
                        format!("llvm-{}.src/CMakeLists.txt", version),
                        "project(LLVM)\n",
                    ),
                    (
                        format!("llvm-{}.src/tools/CMakeLists.txt", version),
                        "add_llvm_external_project(clang)\n",
                    ),
                ])
                .await,
            ),
            (
                format!("{}/cfe-{}.src.tar", base, version),
                tarball(&[
                    (
                        format!("cfe-{}.src/CMakeLists.txt", version),
                        "project(Clang)\n",
                    ),
                    (
                        format!("cfe-{}.src/tools/CMakeLists.txt", version),
                        "add_clang_subdirectory(clang-check)",
                    ),
                ])
                .await,
            ),
            (
                format!("{}/clang-tools-extra-{}.src.tar", base, version),
                tarball(&[(
                    format!("clang-tools-extra-{}.src/CMakeLists.txt", version),
                    "add_subdirectory(clang-tidy)\n",
                )])
                .await,
            ),
        ];

        let mut files = HashMap::new();
        for (url, bytes) in archives {
            files.insert(format!("{}.sig", url), b"signature".to_vec());
            files.insert(url, bytes);
        }

        FakeTransport {
            files,
            calls: Mutex::new(vec![]),
        }
    }

    fn take_calls(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn download(&self, url: &str, dest: &Path) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(url.to_string());
        match self.files.get(url) {
            Some(bytes) => {
                tokio::fs::write(dest, bytes).await?;
                Ok(())
            }
            None => anyhow::bail!("404 Not Found for {}", url),
        }
    }
}

/// Records invocations and imitates the side effects of the real tools.
#[derive(Debug)]
struct FakeRunner {
    clang_version: String,
    reject_signatures: bool,
    calls: Mutex<Vec<Invocation>>,
}

impl Default for FakeRunner {
    fn default() -> Self {
        FakeRunner {
            clang_version: "clang version 10.0.0 (tags/RELEASE_1000/final)".to_string(),
            reject_signatures: false,
            calls: Mutex::new(vec![]),
        }
    }
}

impl FakeRunner {
    fn take_calls(&self) -> Vec<Invocation> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn simulate(&self, invocation: &Invocation) -> std::io::Result<bool> {
        let cwd = &invocation.cwd;
        let args = &invocation.args;

        match invocation.program_name() {
            "gpg" => Ok(!(self.reject_signatures && args[0] == "--verify")),

            "cmake" => {
                if args.iter().any(|a| a == "Xcode") {
                    fs::create_dir_all(cwd.join("LLVM.xcodeproj"))?;
                } else {
                    let variant = args
                        .iter()
                        .find_map(|a| a.strip_prefix("-DCMAKE_BUILD_TYPE="))
                        .unwrap_or("Release");
                    fs::write(
                        cwd.join("build.ninja"),
                        format!(
                            "# Generated by \"Ninja\" Generator\n\nCONFIGURATION = {}\n# Configuration: {}\n",
                            variant, variant
                        ),
                    )?;
                }
                Ok(true)
            }

            "ninja" => {
                let toolchain = cwd.parent().unwrap();
                let llvm_config = cwd.join("bin/llvm-config");
                if !llvm_config.exists() {
                    fs::create_dir_all(cwd.join("bin"))?;
                    fs::create_dir_all(cwd.join("lib"))?;
                    fs::write(&llvm_config, "#!/bin/sh\n")?;
                }

                let headers = toolchain.join("install/lib/clang/8.0.0/include");
                if !headers.exists() {
                    fs::create_dir_all(&headers)?;
                }
                // Rewritten on every build, even when nothing changed.
                fs::write(headers.join("stddef.h"), "/* stddef */\n")?;
                fs::write(cwd.join(".ninja_log"), "# ninja log v5\n")?;
                Ok(true)
            }

            "cargo" => {
                match args[0].as_str() {
                    "build" => {
                        let profile = if args.iter().any(|a| a == "--release") {
                            "release"
                        } else {
                            "debug"
                        };
                        let dir = cwd.join("target").join(profile);
                        fs::create_dir_all(&dir)?;
                        fs::write(dir.join("c2rust"), "ELF")?;
                    }
                    "clean" => {
                        if cwd.join("target").exists() {
                            fs::remove_dir_all(cwd.join("target"))?;
                        }
                    }
                    _ => {}
                }
                Ok(true)
            }

            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    fn locate(&self, program: &str) -> Result<PathBuf, KilnError> {
        Ok(PathBuf::from("/fake/bin").join(program))
    }

    async fn status(&self, invocation: &Invocation) -> anyhow::Result<ExitStatus> {
        self.calls.lock().unwrap().push(invocation.clone());
        let code = if self.simulate(invocation)? { 0 } else { 1 };
        // Raw wait status: the exit code sits in the second byte.
        Ok(ExitStatus::from_raw(code << 8))
    }

    async fn output(&self, invocation: &Invocation) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(invocation.clone());
        Ok(format!("{}\nTarget: x86_64-pc-linux-gnu\n", self.clang_version))
    }
}

fn host() -> Environment {
    Environment {
        cpus: 8,
        memory: Some(64 << 30),
        os: "linux",
        arch: "x86_64",
    }
}

struct Fixture {
    dir: TempDir,
    document: Document,
    transport: Arc<FakeTransport>,
    runner: Arc<FakeRunner>,
}

impl Fixture {
    async fn new() -> Self {
        Self::with_runner(FakeRunner::default()).await
    }

    async fn with_runner(runner: FakeRunner) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("scripts")).unwrap();
        fs::write(dir.path().join("scripts/llvm-8.0.0-key.asc"), "KEY").unwrap();

        Fixture {
            dir,
            document: parse_definition(DEFINITION, Some("test.kdl")).unwrap(),
            transport: Arc::new(FakeTransport::llvm("8.0.0").await),
            runner: Arc::new(runner),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn plan(&self) -> Plan {
        self.document.toolchain.resolve("8.0.0").unwrap()
    }

    fn layout(&self) -> Layout {
        Layout::new(self.root(), "llvm", "8.0.0")
    }

    fn engine_with(&self, plan: Plan, configure: impl FnOnce(&mut EngineSettings)) -> Engine {
        let mut settings = EngineSettings::new(self.layout());
        configure(&mut settings);

        Engine::from_parts(
            settings,
            plan,
            self.document.downstream.clone(),
            self.transport.clone(),
            self.runner.clone(),
            host(),
        )
    }

    fn engine(&self, configure: impl FnOnce(&mut EngineSettings)) -> Engine {
        self.engine_with(self.plan(), configure)
    }

    async fn run(&self, configure: impl FnOnce(&mut EngineSettings)) -> BuildState {
        self.engine(configure).run().await.unwrap()
    }

    async fn run_err(&self) -> anyhow::Error {
        self.engine(|_| {}).run().await.unwrap_err()
    }

    fn programs(calls: &[Invocation]) -> Vec<&str> {
        calls.iter().map(|c| c.program_name()).collect()
    }
}

fn has_arg(invocation: &Invocation, arg: &str) -> bool {
    invocation.args.iter().any(|a| a == arg)
}

fn has_env(invocation: &Invocation, key: &str, value: &str) -> bool {
    invocation.env.iter().any(|(k, v)| k == key && v == value)
}

#[tokio::test]
async fn first_run_bootstraps_everything_once() {
    let fixture = Fixture::new().await;
    let layout = fixture.layout();

    let state = fixture.run(|_| {}).await;

    assert_eq!(
        state.executed,
        vec![
            Stage::Scaffold,
            Stage::IgnoreDeps,
            Stage::Fetch,
            Stage::Extract,
            Stage::Patch,
            Stage::Configure,
            Stage::BuildToolchain,
            Stage::BuildDownstream,
        ]
    );
    assert_eq!(state.skipped, vec![Stage::Reset, Stage::CleanDownstream]);
    assert_eq!(state.downloaded, vec!["llvm", "clang", "clang-tools-extra"]);
    assert_eq!(state.extracted, vec!["llvm", "clang", "clang-tools-extra"]);
    assert_eq!(state.stale_entry, None);
    assert_eq!(
        state.binary,
        Some(fixture.root().join("target/release/c2rust"))
    );

    assert_eq!(fixture.transport.take_calls().len(), 6);
    assert_eq!(
        fs::read_to_string(layout.deps.join(".gitignore")).unwrap(),
        "*\n"
    );
    assert!(layout.src.join("tools/clang/tools/extra/CMakeLists.txt").is_file());
    assert!(!layout.src.join("tools/cfe-8.0.0.src").exists());

    let patched = fs::read_to_string(layout.src.join("tools/clang/CMakeLists.txt")).unwrap();
    assert_eq!(patched.matches(MARKER).count(), 1);
    assert!(layout.install.join("bin").is_dir());

    let calls = fixture.runner.take_calls();
    assert_eq!(
        Fixture::programs(&calls),
        vec!["gpg", "gpg", "gpg", "gpg", "cmake", "ninja", "cargo"]
    );
    assert_eq!(calls[0].args[0], "--import");

    let cmake = &calls[4];
    assert_eq!(cmake.cwd, layout.build);
    assert_eq!(&cmake.args[..2], &["-G".to_string(), "Ninja".to_string()]);
    assert!(has_arg(cmake, "-DCMAKE_BUILD_TYPE=RelWithDebInfo"));
    assert!(has_arg(cmake, "-DLLVM_ENABLE_ASSERTIONS=1"));
    assert!(has_arg(cmake, "-DLLVM_PARALLEL_LINK_JOBS=4"));
    assert!(has_arg(cmake, "-DLLVM_TARGETS_TO_BUILD=X86"));
    assert!(has_arg(
        cmake,
        &format!(
            "-DLLVM_EXTERNAL_C2RUST_AST_EXPORTER_SOURCE_DIR={}",
            fixture.root().join("c2rust-ast-exporter/src").display()
        )
    ));

    let ninja = &calls[5];
    assert_eq!(
        ninja.args,
        vec!["c2rust-ast-exporter", "llvm-config", "install-clang-headers"]
    );

    let cargo = &calls[6];
    assert_eq!(cargo.cwd, fixture.root());
    assert_eq!(
        cargo.args,
        vec!["build", "--features", "llvm-static", "--release"]
    );
    assert!(has_env(
        cargo,
        "LLVM_CONFIG_PATH",
        &layout.llvm_config().display().to_string()
    ));
    assert!(has_env(
        cargo,
        "LLVM_SYSTEM_LIBS",
        "-lz -lrt -ltinfo -ldl -lpthread -lm"
    ));
    assert!(has_env(
        cargo,
        "C2RUST_AST_EXPORTER_LIB_DIR",
        &layout.build.join("lib").display().to_string()
    ));
    assert!(has_env(cargo, "ZLIB_NO_PKG_CONFIG", "1"));
    assert!(has_env(cargo, "LIBCURL_NO_PKG_CONFIG", "1"));
}

#[tokio::test]
async fn second_run_only_repeats_incremental_builds() {
    let fixture = Fixture::new().await;
    fixture.run(|_| {}).await;
    fixture.transport.take_calls();
    fixture.runner.take_calls();

    let state = fixture.run(|_| {}).await;

    assert_eq!(
        state.executed,
        vec![Stage::BuildToolchain, Stage::BuildDownstream]
    );
    assert!(state.downloaded.is_empty());
    assert!(state.extracted.is_empty());
    assert_eq!(state.reconfigure_reason, None);
    assert_eq!(state.stale_entry, None);

    assert!(fixture.transport.take_calls().is_empty());
    assert_eq!(
        Fixture::programs(&fixture.runner.take_calls()),
        vec!["ninja", "cargo"]
    );

    let patched =
        fs::read_to_string(fixture.layout().src.join("tools/clang/CMakeLists.txt")).unwrap();
    assert_eq!(patched.matches(MARKER).count(), 1);
}

#[tokio::test]
async fn switching_variant_reconfigures_without_cleaning() {
    let fixture = Fixture::new().await;
    fixture.run(|_| {}).await;
    fixture.runner.take_calls();

    let state = fixture
        .run(|s| s.variant = BuildVariant::Debug)
        .await;

    assert!(state.ran(Stage::Configure));
    assert!(!state.ran(Stage::CleanDownstream));
    assert_eq!(
        state.reconfigure_reason.as_deref(),
        Some("build type changed (RelWithDebInfo -> Debug)")
    );
    assert_eq!(
        state.binary,
        Some(fixture.root().join("target/debug/c2rust"))
    );

    let calls = fixture.runner.take_calls();
    assert_eq!(Fixture::programs(&calls), vec!["cmake", "ninja", "cargo"]);
    assert!(has_arg(&calls[0], "-DCMAKE_BUILD_TYPE=Debug"));
    assert!(!has_arg(&calls[2], "--release"));
}

#[tokio::test]
async fn newer_toolchain_files_clean_the_downstream_build() {
    let fixture = Fixture::new().await;
    fixture.run(|_| {}).await;
    fixture.runner.take_calls();

    let layout = fixture.layout();
    let library = layout.build.join("lib/libclangAST.a");
    fs::write(&library, "!<arch>\n").unwrap();
    let later = FileTime::from_unix_time(FileTime::now().unix_seconds() + 3600, 0);
    set_file_mtime(&library, later).unwrap();

    let state = fixture.run(|_| {}).await;

    assert!(state.ran(Stage::CleanDownstream));
    let stale = state.stale_entry.unwrap();
    assert!(stale.starts_with(&layout.build.join("lib")));

    let calls = fixture.runner.take_calls();
    assert_eq!(Fixture::programs(&calls), vec!["ninja", "cargo", "cargo"]);
    assert_eq!(calls[1].args, vec!["clean"]);
    assert_eq!(calls[2].args[0], "build");
    assert!(fixture.root().join("target/release/c2rust").is_file());
}

#[tokio::test]
async fn xcode_project_is_always_regenerated() {
    let fixture = Fixture::new().await;
    fixture.run(|_| {}).await;
    fixture.runner.take_calls();

    let state = fixture.run(|s| s.ide = true).await;

    assert_eq!(
        state.reconfigure_reason.as_deref(),
        Some("IDE project requested")
    );
    let calls = fixture.runner.take_calls();
    assert_eq!(&Fixture::programs(&calls)[..3], &["cmake", "cmake", "ninja"]);
    assert_eq!(calls[0].cwd, fixture.layout().build);
    assert_eq!(calls[1].cwd, fixture.layout().ide);
    assert_eq!(calls[1].args[1], "Xcode");
    assert!(fixture.layout().ide.join("LLVM.xcodeproj").is_dir());
}

#[tokio::test]
async fn options_reach_the_toolchain_build() {
    let fixture = Fixture::new().await;

    fixture
        .run(|s| {
            s.with_clang = true;
            s.assertions = false;
            s.verbose = true;
        })
        .await;

    let calls = fixture.runner.take_calls();
    let cmake = calls.iter().find(|c| c.program_name() == "cmake").unwrap();
    let ninja = calls.iter().find(|c| c.program_name() == "ninja").unwrap();
    let cargo = calls.iter().find(|c| c.program_name() == "cargo").unwrap();

    assert!(has_arg(cmake, "-DLLVM_ENABLE_ASSERTIONS=0"));
    assert_eq!(ninja.args.last().map(String::as_str), Some("clang"));
    assert!(has_arg(cargo, "-vv"));
}

#[tokio::test]
async fn clean_all_starts_from_scratch() {
    let fixture = Fixture::new().await;
    fixture.run(|_| {}).await;
    fixture.transport.take_calls();
    fixture.runner.take_calls();

    let state = fixture.run(|s| s.clean_all = true).await;

    assert!(state.ran(Stage::Reset));
    assert_eq!(state.downloaded.len(), 3);
    assert_eq!(state.extracted.len(), 3);
    assert_eq!(fixture.transport.take_calls().len(), 6);

    let calls = fixture.runner.take_calls();
    assert_eq!(calls[0].program_name(), "cargo");
    assert_eq!(calls[0].args, vec!["clean"]);
}

#[tokio::test]
async fn present_archive_is_not_downloaded_again() {
    let fixture = Fixture::new().await;
    let engine = fixture.engine(|_| {});
    engine.run().await.unwrap();
    fixture.transport.take_calls();

    let key = fixture.root().join(&engine.plan().public_key);
    for spec in &engine.plan().archives {
        let fetched = engine.fetcher.ensure_archive(spec, &key).await.unwrap();
        assert!(!fetched.downloaded);
        assert_eq!(fetched.path, fixture.layout().deps.join(&spec.file_name));
    }

    assert!(fixture.transport.take_calls().is_empty());
}

#[tokio::test]
async fn extracted_tree_survives_a_deleted_archive() {
    let fixture = Fixture::new().await;
    let engine = fixture.engine(|_| {});
    engine.run().await.unwrap();

    for spec in &engine.plan().archives {
        let archive = engine.fetcher.archive_path(spec);
        fs::remove_file(&archive).unwrap();

        assert!(!engine
            .extractor
            .ensure_extracted(&archive, spec)
            .await
            .unwrap());
    }
}

/// Places the fixture's bytes for `url` where the fetcher would have stored them.
fn stage_archive(fixture: &Fixture, engine: &Engine, index: usize, url: &str) -> PathBuf {
    let archive = engine.fetcher.archive_path(&engine.plan().archives[index]);
    fs::create_dir_all(archive.parent().unwrap()).unwrap();
    fs::write(&archive, &fixture.transport.files[url]).unwrap();
    archive
}

#[tokio::test]
async fn nested_archive_needs_its_parent_tree() {
    let fixture = Fixture::new().await;
    let engine = fixture.engine(|_| {});
    let layout = fixture.layout();
    fs::create_dir_all(&layout.toolchain).unwrap();

    let archive = stage_archive(
        &fixture,
        &engine,
        1,
        "https://mirror.test/8.0.0/cfe-8.0.0.src.tar",
    );
    let err = engine
        .extractor
        .ensure_extracted(&archive, &engine.plan().archives[1])
        .await
        .unwrap_err();

    assert!(err.chain().any(|e| matches!(
        e.downcast_ref::<KilnError>(),
        Some(KilnError::MissingFile(path)) if path == &layout.toolchain.join("src/tools")
    )));
    assert!(!layout.toolchain.join("src/tools/clang").exists());
}

#[tokio::test]
async fn archive_without_expected_directory_is_rejected() {
    let fixture = Fixture::new().await;
    let mut plan = fixture.plan();
    plan.archives[0].archive_dir = "nope".to_string();
    let engine = fixture.engine_with(plan, |_| {});
    let layout = fixture.layout();
    fs::create_dir_all(&layout.toolchain).unwrap();

    let archive = stage_archive(
        &fixture,
        &engine,
        0,
        "https://mirror.test/8.0.0/llvm-8.0.0.src.tar",
    );
    let err = engine
        .extractor
        .ensure_extracted(&archive, &engine.plan().archives[0])
        .await
        .unwrap_err();

    assert!(err.chain().any(|e| matches!(
        e.downcast_ref::<KilnError>(),
        Some(KilnError::UnexpectedArchiveLayout { dir, .. }) if dir == "nope"
    )));
    assert!(!layout.toolchain.join("src").exists());
}

#[tokio::test]
async fn digest_mismatch_leaves_nothing_behind() {
    let fixture = Fixture::new().await;
    let mut plan = fixture.plan();
    plan.archives[0].sha256 = Some([0; 32]);

    let err = fixture
        .engine_with(plan, |_| {})
        .run()
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).contains("sha256 expected 0000"));
    let deps = fixture.layout().deps;
    assert!(!deps.join("llvm-8.0.0.src.tar").exists());
    assert!(!deps.join("llvm-8.0.0.src.tar.part").exists());
    assert!(!deps.join("llvm-8.0.0.src.tar.sig").exists());
}

#[tokio::test]
async fn rejected_signature_is_fatal() {
    let fixture = Fixture::with_runner(FakeRunner {
        reject_signatures: true,
        ..FakeRunner::default()
    })
    .await;

    let err = fixture.run_err().await;

    assert!(format!("{:#}", err).contains("signature verification failed"));
    assert!(!fixture.layout().deps.join("llvm-8.0.0.src.tar").exists());
    assert!(!fixture
        .runner
        .take_calls()
        .iter()
        .any(|c| c.program_name() == "cmake"));
}

#[tokio::test]
async fn missing_public_key_is_fatal() {
    let fixture = Fixture::new().await;
    fs::remove_file(fixture.root().join("scripts/llvm-8.0.0-key.asc")).unwrap();

    let err = fixture.run_err().await;

    assert!(err.chain().any(|e| matches!(
        e.downcast_ref::<KilnError>(),
        Some(KilnError::MissingFile(_))
    )));
    assert!(fixture.transport.take_calls().is_empty());
}

#[tokio::test]
async fn missing_patch_target_stops_the_pipeline() {
    let fixture = Fixture::new().await;
    let mut plan = fixture.plan();
    plan.patch.as_mut().unwrap().file = "src/tools/clang/tools/CMakeLists.in".to_string();

    let err = fixture
        .engine_with(plan, |_| {})
        .run()
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).starts_with("patch failed"));
    assert!(err.chain().any(|e| matches!(
        e.downcast_ref::<KilnError>(),
        Some(KilnError::MissingFile(_))
    )));
    assert!(!fixture
        .runner
        .take_calls()
        .iter()
        .any(|c| c.program_name() == "cmake"));
}

#[tokio::test]
async fn preflight_rejects_an_old_host_compiler() {
    let fixture = Fixture::with_runner(FakeRunner {
        clang_version: "clang version 3.5.2 (tags/RELEASE_352/final)".to_string(),
        ..FakeRunner::default()
    })
    .await;

    let err = fixture.engine(|_| {}).preflight().await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<KilnError>(),
        Some(KilnError::ToolTooOld { .. })
    ));
}

#[tokio::test]
async fn preflight_accepts_a_recent_host_compiler() {
    let fixture = Fixture::new().await;
    fixture.engine(|_| {}).preflight().await.unwrap();

    let calls = fixture.runner.take_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args, vec!["--version"]);
}
