//! Contract with the external graph engine executable.
//!
//! The engine is a black box invoked as
//!
//! ```text
//! graphrag index --root <workspace> --verbose
//! graphrag query --config <settings.yaml> --root <workspace> --method <local|global> --query <text>
//! ```
//!
//! The credential travels in the child's environment (`GRAPHRAG_API_KEY`, `OPENAI_API_KEY`, and
//! optionally `OPENAI_BASE_URL`) and never in argv. Output is buffered in full and there is no
//! timeout; dropping the future kills the child.

use crate::config::Config;
use crate::query::QueryMode;
use async_trait::async_trait;
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Environment variable read by the engine for `${GRAPHRAG_API_KEY}` substitution.
pub const GRAPHRAG_API_KEY_ENV: &str = "GRAPHRAG_API_KEY";
/// Environment variable read by the OpenAI SDK inside the engine.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Optional endpoint override read by the OpenAI SDK inside the engine.
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";

/// Failures that prevent the engine from producing an exit status at all.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The executable does not exist on the search path.
    #[error("'{program}' CLI not found in PATH")]
    BinaryMissing {
        /// Program name or path that could not be resolved.
        program: String,
    },
    /// The executable exists but could not be started or awaited.
    #[error("failed to run '{program}': {source}")]
    Spawn {
        /// Program that failed to run.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Credential and endpoint forwarded to the engine.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    base_url: Option<String>,
}

impl Credentials {
    /// Credentials from configuration, or `None` when no API key is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        config.api_key().map(|api_key| Self {
            api_key: api_key.to_string(),
            base_url: config
                .openai_base_url
                .clone()
                .filter(|url| !url.trim().is_empty()),
        })
    }

    /// Custom endpoint, when configured.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    fn env_pairs(&self) -> Vec<(String, String)> {
        let mut envs = vec![
            (GRAPHRAG_API_KEY_ENV.to_string(), self.api_key.clone()),
            (OPENAI_API_KEY_ENV.to_string(), self.api_key.clone()),
        ];
        if let Some(url) = &self.base_url {
            envs.push((OPENAI_BASE_URL_ENV.to_string(), url.clone()));
        }
        envs
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// A fully shaped engine command: program, argv, and extra environment.
#[derive(Clone, PartialEq, Eq)]
pub struct EngineInvocation {
    /// Executable name or path.
    pub program: String,
    /// Arguments following the program name.
    pub args: Vec<String>,
    /// Variables added on top of the inherited environment.
    pub envs: Vec<(String, String)>,
}

impl EngineInvocation {
    /// `index --root <root> --verbose`.
    pub fn index(program: &str, root: &Path, credentials: &Credentials) -> Self {
        Self {
            program: program.to_string(),
            args: vec![
                "index".into(),
                "--root".into(),
                root.display().to_string(),
                "--verbose".into(),
            ],
            envs: credentials.env_pairs(),
        }
    }

    /// `query --config <settings> --root <root> --method <mode> --query <text>`.
    pub fn query(
        program: &str,
        settings_path: &Path,
        root: &Path,
        mode: QueryMode,
        text: &str,
        credentials: &Credentials,
    ) -> Self {
        Self {
            program: program.to_string(),
            args: vec![
                "query".into(),
                "--config".into(),
                settings_path.display().to_string(),
                "--root".into(),
                root.display().to_string(),
                "--method".into(),
                mode.as_str().into(),
                "--query".into(),
                text.to_string(),
            ],
            envs: credentials.env_pairs(),
        }
    }

    /// First argument (`index` or `query`).
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Value following `flag` in argv.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|index| self.args.get(index + 1))
            .map(String::as_str)
    }

    /// Value of an extra environment variable.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Debug for EngineInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_names: Vec<&str> = self.envs.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("EngineInvocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("envs", &env_names)
            .finish()
    }
}

/// Exit status and captured streams of a finished engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl EngineOutput {
    /// Whether the engine exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs engine invocations. The production implementation spawns a process; tests substitute
/// a recorder.
#[async_trait]
pub trait EngineRunner: Send + Sync {
    /// Run `invocation` to completion and capture its output.
    async fn run(&self, invocation: EngineInvocation) -> Result<EngineOutput, EngineError>;
}

/// Spawns the engine as a child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct CliRunner;

#[async_trait]
impl EngineRunner for CliRunner {
    async fn run(&self, invocation: EngineInvocation) -> Result<EngineOutput, EngineError> {
        let EngineInvocation {
            program,
            args,
            envs,
        } = invocation;

        tracing::debug!(program = %program, subcommand = ?args.first(), "Spawning engine process");
        let output = Command::new(&program)
            .args(&args)
            .envs(envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| match source.kind() {
                ErrorKind::NotFound => EngineError::BinaryMissing {
                    program: program.clone(),
                },
                _ => EngineError::Spawn {
                    program: program.clone(),
                    source,
                },
            })?;

        Ok(EngineOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn credentials(base_url: Option<&str>) -> Credentials {
        let mut config = Config::with_data_dir("/unused");
        config.openai_api_key = Some("sk-test".into());
        config.openai_base_url = base_url.map(str::to_string);
        Credentials::from_config(&config).expect("credentials")
    }

    #[test]
    fn credentials_require_api_key() {
        let config = Config::with_data_dir("/unused");
        assert!(Credentials::from_config(&config).is_none());
    }

    #[test]
    fn index_invocation_keeps_credential_out_of_argv() {
        let root = PathBuf::from("/data/kb/abc");
        let invocation = EngineInvocation::index("graphrag", &root, &credentials(None));

        assert_eq!(invocation.subcommand(), Some("index"));
        assert_eq!(invocation.flag_value("--root"), Some("/data/kb/abc"));
        assert!(invocation.args.iter().any(|arg| arg == "--verbose"));
        assert!(invocation.args.iter().all(|arg| !arg.contains("sk-test")));
        assert_eq!(invocation.env_value(GRAPHRAG_API_KEY_ENV), Some("sk-test"));
        assert_eq!(invocation.env_value(OPENAI_API_KEY_ENV), Some("sk-test"));
        assert_eq!(invocation.env_value(OPENAI_BASE_URL_ENV), None);
        assert!(!format!("{invocation:?}").contains("sk-test"));
    }

    #[test]
    fn query_invocation_passes_text_and_endpoint() {
        let invocation = EngineInvocation::query(
            "graphrag",
            Path::new("/kb/abc/settings.yaml"),
            Path::new("/kb/abc"),
            QueryMode::Global,
            "who signed the lease?",
            &credentials(Some("https://proxy.example/v1")),
        );

        assert_eq!(invocation.subcommand(), Some("query"));
        assert_eq!(invocation.flag_value("--config"), Some("/kb/abc/settings.yaml"));
        assert_eq!(invocation.flag_value("--root"), Some("/kb/abc"));
        assert_eq!(invocation.flag_value("--method"), Some("global"));
        assert_eq!(invocation.flag_value("--query"), Some("who signed the lease?"));
        assert_eq!(
            invocation.env_value(OPENAI_BASE_URL_ENV),
            Some("https://proxy.example/v1")
        );
    }

    #[tokio::test]
    async fn cli_runner_reports_missing_binary() {
        let invocation = EngineInvocation::index(
            "/nonexistent/graphkb-test/graphrag",
            Path::new("/tmp"),
            &credentials(None),
        );

        let error = CliRunner.run(invocation).await.expect_err("missing binary");
        assert!(matches!(error, EngineError::BinaryMissing { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cli_runner_captures_streams_exit_code_and_environment() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().expect("tempdir");
        let script = temp.path().join("fake-graphrag");
        std::fs::write(
            &script,
            "#!/bin/sh\necho \"args: $*\"\necho \"key: $GRAPHRAG_API_KEY\"\necho boom >&2\nexit 3\n",
        )
        .expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");

        let invocation = EngineInvocation::index(
            &script.display().to_string(),
            Path::new("/kb/root"),
            &credentials(None),
        );
        let output = CliRunner.run(invocation).await.expect("script runs");

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert!(output.stdout.contains("args: index --root /kb/root --verbose"));
        assert!(output.stdout.contains("key: sk-test"));
        assert_eq!(output.stderr.trim(), "boom");
    }
}
