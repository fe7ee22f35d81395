use std::fmt;
use std::path::PathBuf;

/// Placeholder replaced by the control string in command arguments.
pub const CONTROL_PLACEHOLDER: &str = "{control}";
/// Placeholder replaced by the source path in command arguments.
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Errors that can occur while driving the toolchain.
///
/// None of these are fatal to a resolution run: the oracle adapter turns
/// every one of them into a failed verdict.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// A command could not be started.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A build step exited with a nonzero status.
    #[error("{stage} exited with status {code:?}")]
    ToolExit { stage: Stage, code: Option<i32> },

    /// The build finished but produced no executable.
    #[error("executable not found at {}", .0.display())]
    MissingExecutable(PathBuf),

    /// A fixture's expected output is not a valid regular expression.
    #[error("invalid output pattern for fixture {fixture}: {source}")]
    InvalidPattern {
        fixture: usize,
        #[source]
        source: regex::Error,
    },

    /// The toolchain configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error while preparing or reading artifacts.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Stable category used to log each kind of failure only once.
    pub fn category(&self) -> String {
        match self {
            Self::Spawn { program, .. } => format!("spawn:{program}"),
            Self::ToolExit { stage, .. } => format!("exit:{}", stage.kind()),
            Self::MissingExecutable(_) => "missing_executable".to_string(),
            Self::InvalidPattern { .. } => "invalid_pattern".to_string(),
            Self::Config(_) => "config".to_string(),
            Self::Io(e) => format!("io:{:?}", e.kind()),
        }
    }
}

/// Phase of a validation in which something happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The n-th build command.
    Build(usize),
    /// The verification command.
    Verify,
    /// The n-th fixture run.
    Fixture(usize),
}

impl Stage {
    fn kind(&self) -> &'static str {
        match self {
            Self::Build(_) => "build",
            Self::Verify => "verify",
            Self::Fixture(_) => "fixture",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build(i) => write!(f, "build step {i}"),
            Self::Verify => write!(f, "verify command"),
            Self::Fixture(i) => write!(f, "fixture {i}"),
        }
    }
}

/// Outcome of one validation that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Build succeeded and every fixture matched.
    Pass,
    /// The program ran but its behavior differed from the expectation.
    Mismatch { stage: Stage, detail: String },
    /// A step exceeded its time limit.
    TimedOut { stage: Stage, secs: u64 },
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Mismatch { stage, detail } => write!(f, "mismatch in {stage}: {detail}"),
            Self::TimedOut { stage, secs } => write!(f, "{stage} timed out after {secs}s"),
        }
    }
}

/// A command line with its time limit.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CommandSpec {
    /// Program followed by its arguments. `{control}` and `{source}` are
    /// substituted in every argument.
    pub argv: Vec<String>,

    /// Time limit in seconds.
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new<S: Into<String>>(argv: impl IntoIterator<Item = S>) -> Self {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            timeout_secs: default_command_timeout(),
        }
    }

    /// Expand placeholders for one invocation.
    pub fn expand(&self, control: &str, source: &str) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| {
                arg.replace(CONTROL_PLACEHOLDER, control)
                    .replace(SOURCE_PLACEHOLDER, source)
            })
            .collect()
    }
}

/// Which output streams a fixture compares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSource {
    Stdout,
    Stderr,
    /// Stdout followed by stderr.
    #[default]
    Both,
}

/// One input/expected-output pair for the built executable.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Fixture {
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// File fed to the executable's stdin, relative to the working directory.
    #[serde(default)]
    pub stdin: Option<PathBuf>,

    /// Expected exit code.
    #[serde(default)]
    pub exit_code: i32,

    /// Regular expression the whole output must match.
    #[serde(default)]
    pub output: String,

    /// Read the expected pattern from this file instead of `output`.
    #[serde(default)]
    pub output_file: Option<PathBuf>,

    /// Read the program's output from this file instead of its streams.
    #[serde(default)]
    pub read_output_from: Option<PathBuf>,

    #[serde(default)]
    pub capture: OutputSource,

    /// Time limit in seconds.
    #[serde(default = "default_fixture_timeout")]
    pub timeout_secs: u64,
}

impl Fixture {
    /// Fixture expecting exit code 0 and output matching `pattern`.
    pub fn expecting(args: &[&str], pattern: &str) -> Self {
        Self {
            args: args.iter().map(|s| s.to_string()).collect(),
            stdin: None,
            exit_code: 0,
            output: pattern.to_string(),
            output_file: None,
            read_output_from: None,
            capture: OutputSource::Both,
            timeout_secs: default_fixture_timeout(),
        }
    }
}

/// How to build and check one benchmark.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ToolchainConfig {
    /// Build commands run in order; each must exit with status 0.
    pub build: Vec<CommandSpec>,

    /// Optional command whose exit status decides correctness on its own.
    #[serde(default)]
    pub verify: Option<CommandSpec>,

    /// Executable produced by the build, relative to the working directory.
    /// Deleted before each build so a stale binary is never tested.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    #[serde(default)]
    pub fixtures: Vec<Fixture>,

    /// Append a record of every run rejected as a mismatch to this file.
    /// Relative paths are taken from the working directory.
    #[serde(default)]
    pub mismatch_log: Option<PathBuf>,

    /// Keep the executable of a rejected run as `<executable>.broken`.
    #[serde(default)]
    pub keep_broken: bool,
}

impl ToolchainConfig {
    /// Check the configuration for structural problems.
    pub fn validate(&self) -> Result<(), ToolError> {
        if self.build.is_empty() {
            return Err(ToolError::Config("at least one build command is required".into()));
        }
        let commands = self.build.iter().chain(self.verify.iter());
        if commands.into_iter().any(|c| c.argv.is_empty()) {
            return Err(ToolError::Config("command with empty argv".into()));
        }
        if !self.fixtures.is_empty() && self.executable.is_none() {
            return Err(ToolError::Config(
                "fixtures require an `executable` to run".into(),
            ));
        }
        Ok(())
    }
}

fn default_command_timeout() -> u64 {
    600
}
fn default_fixture_timeout() -> u64 {
    60
}
