//! Integration tests for the toolchain runner.
//!
//! Each test builds a tiny "benchmark" with a shell script standing in for
//! the compiler. The script emits a program whose behavior depends on the
//! control string it was given.

#![cfg(unix)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use toolchain::{CommandSpec, Fixture, Stage, ToolError, ToolchainConfig, ToolchainRunner, Verdict};

const BUILD_SCRIPT: &str = r#"
case "$1" in
  *c12*) printf '#!/bin/sh\necho wrong\n' > prog ;;
  *c13*) printf '#!/bin/sh\nsleep 30\n' > prog ;;
  *c14*) printf '#!/bin/sh\necho right\nexit 4\n' > prog ;;
  *) printf '#!/bin/sh\necho right\n' > prog ;;
esac
chmod +x prog
"#;

fn bench_dir() -> TempDir {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("build.sh"), BUILD_SCRIPT).unwrap();
    tmp
}

fn config(fixture_timeout: u64) -> ToolchainConfig {
    let mut fixture = Fixture::expecting(&[], r"right\n");
    fixture.timeout_secs = fixture_timeout;
    ToolchainConfig {
        build: vec![CommandSpec::new(["sh", "build.sh", "{control}", "{source}"])],
        verify: None,
        executable: Some(PathBuf::from("prog")),
        fixtures: vec![fixture],
        ..ToolchainConfig::default()
    }
}

fn runner(dir: &Path, config: ToolchainConfig) -> ToolchainRunner {
    ToolchainRunner::new(config, dir.to_path_buf(), "kernel.c").unwrap()
}

#[tokio::test]
async fn test_safe_control_string_passes() {
    let tmp = bench_dir();
    let runner = runner(tmp.path(), config(10));
    let verdict = runner.validate("#f0f#c11").await.unwrap();
    assert_eq!(verdict, Verdict::Pass);
    assert!(tmp.path().join("prog").is_file());
}

#[tokio::test]
async fn test_wrong_output_is_mismatch() {
    let tmp = bench_dir();
    let runner = runner(tmp.path(), config(10));
    let verdict = runner.validate("#f0f#c12").await.unwrap();
    assert!(matches!(
        verdict,
        Verdict::Mismatch {
            stage: Stage::Fixture(0),
            ..
        }
    ));
}

#[tokio::test]
async fn test_wrong_exit_code_is_mismatch() {
    let tmp = bench_dir();
    let runner = runner(tmp.path(), config(10));
    let verdict = runner.validate("#f0f#c14").await.unwrap();
    match verdict {
        Verdict::Mismatch { detail, .. } => assert!(detail.contains("expected 0"), "{detail}"),
        other => panic!("expected mismatch, got {other}"),
    }
}

#[tokio::test]
async fn test_hanging_program_times_out() {
    let tmp = bench_dir();
    let runner = runner(tmp.path(), config(1));
    let verdict = runner.validate("#f0f#c13").await.unwrap();
    assert_eq!(
        verdict,
        Verdict::TimedOut {
            stage: Stage::Fixture(0),
            secs: 1
        }
    );
}

#[tokio::test]
async fn test_failing_build_is_error() {
    let tmp = bench_dir();
    let mut cfg = config(10);
    cfg.build = vec![CommandSpec::new(["sh", "-c", "exit 2"])];
    let runner = runner(tmp.path(), cfg);
    let err = runner.validate("").await.unwrap_err();
    assert!(matches!(
        err,
        ToolError::ToolExit {
            stage: Stage::Build(0),
            code: Some(2)
        }
    ));
}

#[tokio::test]
async fn test_stale_executable_is_removed_before_build() {
    let tmp = bench_dir();
    std::fs::write(tmp.path().join("prog"), "#!/bin/sh\necho right\n").unwrap();
    let mut cfg = config(10);
    cfg.build = vec![CommandSpec::new(["true"])];
    let runner = runner(tmp.path(), cfg);
    let err = runner.validate("#f0f#c11").await.unwrap_err();
    assert!(matches!(err, ToolError::MissingExecutable(_)));
    assert!(!tmp.path().join("prog").exists());
}

#[tokio::test]
async fn test_verify_command_decides_without_fixtures() {
    let tmp = bench_dir();
    let cfg = ToolchainConfig {
        build: vec![CommandSpec::new(["true"])],
        verify: Some(CommandSpec::new(["sh", "-c", "case '{control}' in *9*) exit 1;; esac"])),
        executable: None,
        fixtures: vec![],
        ..ToolchainConfig::default()
    };
    let runner = runner(tmp.path(), cfg);
    assert_eq!(runner.validate("#f0f#c11").await.unwrap(), Verdict::Pass);
    assert!(matches!(
        runner.validate("#f0f#c19").await.unwrap(),
        Verdict::Mismatch {
            stage: Stage::Verify,
            ..
        }
    ));
}

#[tokio::test]
async fn test_mismatch_is_appended_to_log() {
    let tmp = bench_dir();
    let mut cfg = config(10);
    cfg.mismatch_log = Some(PathBuf::from("mismatch.log"));
    cfg.keep_broken = true;
    let runner = runner(tmp.path(), cfg);

    assert_eq!(runner.validate("#f0f#c11").await.unwrap(), Verdict::Pass);
    assert!(!tmp.path().join("mismatch.log").exists());

    runner.validate("#f0f#c12").await.unwrap();
    runner.validate("#f3f#c12").await.unwrap();

    let log = std::fs::read_to_string(tmp.path().join("mismatch.log")).unwrap();
    assert!(log.contains("Control: #f0f#c12"), "{log}");
    assert!(log.contains("Control: #f3f#c12"), "{log}");
    assert!(log.contains("Stage: fixture 0"), "{log}");
    assert!(log.contains("wrong"), "{log}");
    assert_eq!(log.matches("Source: kernel.c").count(), 2);
    assert!(tmp.path().join("prog.broken").is_file());
}

#[tokio::test]
async fn test_unwritable_mismatch_log_keeps_verdict() {
    let tmp = bench_dir();
    let mut cfg = config(10);
    cfg.mismatch_log = Some(PathBuf::from("missing-dir/mismatch.log"));
    let runner = runner(tmp.path(), cfg);
    assert!(matches!(
        runner.validate("#f0f#c12").await.unwrap(),
        Verdict::Mismatch {
            stage: Stage::Fixture(0),
            ..
        }
    ));
    assert!(!tmp.path().join("prog.broken").exists());
}
