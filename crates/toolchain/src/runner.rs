use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use tokio::io::AsyncWriteExt;

use crate::process::{run_with_timeout, ProcessOutput};
use crate::types::{Fixture, OutputSource, Stage, ToolError, ToolchainConfig, Verdict};

/// Builds one source file under a control string and checks the result.
///
/// A runner is bound to a single working directory. Two runners must not
/// share a directory while validating concurrently, because builds write
/// their artifacts there.
pub struct ToolchainRunner {
    config: ToolchainConfig,
    working_dir: PathBuf,
    source: String,
    patterns: Vec<Regex>,
}

impl ToolchainRunner {
    /// Validate the configuration and compile every fixture's output pattern.
    pub fn new(
        config: ToolchainConfig,
        working_dir: PathBuf,
        source: impl Into<String>,
    ) -> Result<Self, ToolError> {
        config.validate()?;
        let working_dir = std::fs::canonicalize(&working_dir).map_err(|e| {
            ToolError::Config(format!(
                "working directory {} is not accessible: {e}",
                working_dir.display()
            ))
        })?;

        let patterns = config
            .fixtures
            .iter()
            .enumerate()
            .map(|(idx, fixture)| compile_pattern(idx, fixture, &working_dir))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            working_dir,
            source: source.into(),
            patterns,
        })
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Rebuild with `control` and check the result against every fixture.
    ///
    /// Failures of the build itself are errors; behavior that differs from
    /// the expectation is reported through the returned [`Verdict`].
    pub async fn validate(&self, control: &str) -> Result<Verdict, ToolError> {
        let executable = self.config.executable.as_ref().map(|e| self.working_dir.join(e));
        if let Some(path) = &executable {
            if tokio::fs::try_exists(path).await? {
                tokio::fs::remove_file(path).await?;
            }
        }

        for (idx, command) in self.config.build.iter().enumerate() {
            let stage = Stage::Build(idx);
            let argv = command.expand(control, &self.source);
            let Some(output) = self.run(&argv, None, command.timeout_secs).await? else {
                return Ok(Verdict::TimedOut {
                    stage,
                    secs: command.timeout_secs,
                });
            };
            if !output.success() {
                tracing::debug!(
                    %stage,
                    code = ?output.code,
                    stderr = %output.stderr_tail(5),
                    "Build step failed"
                );
                return Err(ToolError::ToolExit {
                    stage,
                    code: output.code,
                });
            }
        }

        if let Some(verify) = &self.config.verify {
            let argv = verify.expand(control, &self.source);
            match self.run(&argv, None, verify.timeout_secs).await? {
                None => {
                    return Ok(Verdict::TimedOut {
                        stage: Stage::Verify,
                        secs: verify.timeout_secs,
                    })
                }
                Some(output) if !output.success() => {
                    let detail = format!("exited with status {:?}", output.code);
                    self.record_mismatch(
                        control,
                        Stage::Verify,
                        &argv,
                        &detail,
                        &output.text(OutputSource::Both),
                        executable.as_deref(),
                    )
                    .await;
                    return Ok(Verdict::Mismatch {
                        stage: Stage::Verify,
                        detail,
                    });
                }
                Some(_) => {}
            }
        }

        let Some(executable) = executable else {
            return Ok(Verdict::Pass);
        };
        if !executable.is_file() {
            return Err(ToolError::MissingExecutable(executable));
        }

        for (idx, (fixture, pattern)) in self.config.fixtures.iter().zip(&self.patterns).enumerate() {
            let run = self.run_fixture(idx, fixture, pattern, &executable).await?;
            if let Verdict::Mismatch { stage, detail } = &run.verdict {
                self.record_mismatch(
                    control,
                    *stage,
                    &run.argv,
                    detail,
                    &run.output,
                    Some(&executable),
                )
                .await;
            }
            if !run.verdict.is_pass() {
                return Ok(run.verdict);
            }
        }
        Ok(Verdict::Pass)
    }

    async fn run_fixture(
        &self,
        idx: usize,
        fixture: &Fixture,
        pattern: &Regex,
        executable: &Path,
    ) -> Result<FixtureRun, ToolError> {
        let stage = Stage::Fixture(idx);
        let mut argv = vec![executable.display().to_string()];
        argv.extend(fixture.args.iter().cloned());

        let Some(output) = self
            .run(&argv, fixture.stdin.as_deref(), fixture.timeout_secs)
            .await?
        else {
            return Ok(FixtureRun {
                verdict: Verdict::TimedOut {
                    stage,
                    secs: fixture.timeout_secs,
                },
                argv,
                output: String::new(),
            });
        };

        if output.code != Some(fixture.exit_code) {
            return Ok(FixtureRun {
                verdict: Verdict::Mismatch {
                    stage,
                    detail: format!(
                        "exit status {:?}, expected {}",
                        output.code, fixture.exit_code
                    ),
                },
                output: output.text(fixture.capture),
                argv,
            });
        }

        let text = match &fixture.read_output_from {
            Some(path) => match tokio::fs::read(self.working_dir.join(path)).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    return Ok(FixtureRun {
                        verdict: Verdict::Mismatch {
                            stage,
                            detail: format!("output file {} unreadable: {e}", path.display()),
                        },
                        output: output.text(fixture.capture),
                        argv,
                    })
                }
            },
            None => output.text(fixture.capture),
        };

        let verdict = if pattern.is_match(&text) {
            Verdict::Pass
        } else {
            Verdict::Mismatch {
                stage,
                detail: "output does not match expected pattern".to_string(),
            }
        };
        Ok(FixtureRun {
            verdict,
            argv,
            output: text,
        })
    }

    /// Append a rejected run to the mismatch log and keep its executable.
    ///
    /// Failures here are logged and never change the verdict.
    async fn record_mismatch(
        &self,
        control: &str,
        stage: Stage,
        argv: &[String],
        detail: &str,
        output: &str,
        executable: Option<&Path>,
    ) {
        tracing::debug!(%stage, detail, "Run rejected");

        if let Some(log) = &self.config.mismatch_log {
            let path = self.working_dir.join(log);
            let record = format!(
                "Source: {}\nStage: {stage}\nCommand: {}\nControl: {control}\nDetail: {detail}\n{output}\n\n\n",
                self.source,
                argv.join(" "),
            );
            if let Err(e) = append(&path, &record).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write mismatch log");
            }
        }

        if self.config.keep_broken {
            if let Some(executable) = executable.filter(|e| e.is_file()) {
                let broken = broken_path(executable);
                if let Err(e) = tokio::fs::copy(executable, &broken).await {
                    tracing::warn!(path = %broken.display(), error = %e, "Failed to keep broken executable");
                }
            }
        }
    }

    async fn run(
        &self,
        argv: &[String],
        stdin: Option<&Path>,
        timeout_secs: u64,
    ) -> Result<Option<ProcessOutput>, ToolError> {
        run_with_timeout(
            argv,
            &self.working_dir,
            stdin,
            Duration::from_secs(timeout_secs),
        )
        .await
    }
}

/// One fixture execution and what it printed.
struct FixtureRun {
    verdict: Verdict,
    argv: Vec<String>,
    output: String,
}

/// `<executable>.broken`, next to the executable.
fn broken_path(executable: &Path) -> PathBuf {
    let mut name = executable.as_os_str().to_owned();
    name.push(".broken");
    PathBuf::from(name)
}

async fn append(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(text.as_bytes()).await?;
    file.flush().await
}

/// Anchor the fixture's pattern so it must match the whole output.
fn compile_pattern(idx: usize, fixture: &Fixture, working_dir: &Path) -> Result<Regex, ToolError> {
    let raw = match &fixture.output_file {
        Some(path) => std::fs::read_to_string(working_dir.join(path))?,
        None => fixture.output.clone(),
    };
    Regex::new(&format!("^(?:{raw})$")).map_err(|source| ToolError::InvalidPattern {
        fixture: idx,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CommandSpec;

    fn config(fixtures: Vec<Fixture>) -> ToolchainConfig {
        ToolchainConfig {
            build: vec![CommandSpec::new(["true"])],
            verify: None,
            executable: Some(PathBuf::from("prog")),
            fixtures,
            ..ToolchainConfig::default()
        }
    }

    #[test]
    fn test_pattern_is_anchored() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fixture = Fixture::expecting(&[], r"sum = \d+\n");
        let re = compile_pattern(0, &fixture, tmp.path()).unwrap();
        assert!(re.is_match("sum = 42\n"));
        assert!(!re.is_match("checksum: sum = 42\n"));
        assert!(!re.is_match("sum = 42\nextra"));
    }

    #[test]
    fn test_pattern_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("expected.txt"), "ok").unwrap();
        let mut fixture = Fixture::expecting(&[], "ignored");
        fixture.output_file = Some(PathBuf::from("expected.txt"));
        let re = compile_pattern(0, &fixture, tmp.path()).unwrap();
        assert!(re.is_match("ok"));
    }

    #[test]
    fn test_invalid_pattern_rejected_at_construction() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = ToolchainRunner::new(
            config(vec![Fixture::expecting(&[], "(unclosed")]),
            tmp.path().to_path_buf(),
            "main.c",
        );
        assert!(matches!(
            result,
            Err(ToolError::InvalidPattern { fixture: 0, .. })
        ));
    }

    #[test]
    fn test_missing_working_dir_rejected() {
        let result = ToolchainRunner::new(
            config(vec![]),
            PathBuf::from("/nonexistent/working/dir"),
            "main.c",
        );
        assert!(matches!(result, Err(ToolError::Config(_))));
    }
}
