//! Generator abstraction and the command-backed implementation
//!
//! A generator turns an ordered list of input files into the bytes of one
//! output artifact. Its fingerprint (for scripts, the script body) is part of
//! the change-detection hash, so editing a generator forces regeneration.

use crate::config::schema::PathsConfig;
use crate::error::{CardkeepError, CardkeepResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

/// Produces artifact content from input files
#[async_trait]
pub trait Generator: Send + Sync {
    /// Stable identifier, used to key the hash record
    fn id(&self) -> &str;

    /// Bytes identifying this generator's behavior
    async fn fingerprint(&self) -> CardkeepResult<Vec<u8>>;

    /// Produce the artifact body. Must not write to `output` itself.
    async fn generate(&self, inputs: &[PathBuf], output: &Path) -> CardkeepResult<Vec<u8>>;
}

/// Only programs under `root` may be executed as generators, and only
/// through one of the listed interpreters
#[derive(Debug, Clone)]
pub struct GeneratorAllowList {
    root: PathBuf,
    interpreters: Vec<String>,
}

impl GeneratorAllowList {
    /// Allow programs under `root`, run directly only
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            interpreters: Vec::new(),
        }
    }

    pub fn from_config(paths: &PathsConfig) -> Self {
        Self::new(&paths.generators_dir).with_interpreters(paths.interpreters.clone())
    }

    /// Interpreters that may run an allowed program, matched by exact name
    #[must_use]
    pub fn with_interpreters(mut self, interpreters: Vec<String>) -> Self {
        self.interpreters = interpreters;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `program` (following symlinks) and check it lies under the root
    pub async fn resolve(&self, program: &Path) -> CardkeepResult<PathBuf> {
        let root = fs::canonicalize(&self.root).await.map_err(|e| {
            CardkeepError::io(
                format!("resolving generators directory {}", self.root.display()),
                e,
            )
        })?;

        let resolved = match fs::canonicalize(program).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CardkeepError::PathNotFound(program.to_path_buf()))
            }
            Err(e) => {
                return Err(CardkeepError::io(
                    format!("resolving generator {}", program.display()),
                    e,
                ))
            }
        };

        if resolved == root || !resolved.starts_with(&root) {
            return Err(CardkeepError::GeneratorNotAllowed {
                path: program.to_path_buf(),
                allowed: root,
            });
        }

        if !resolved.is_file() {
            return Err(CardkeepError::GeneratorNotAllowed {
                path: program.to_path_buf(),
                allowed: root,
            });
        }

        Ok(resolved)
    }

    /// Accept `interpreter` only if it is listed verbatim
    pub fn check_interpreter(&self, interpreter: &str) -> CardkeepResult<()> {
        if self.interpreters.iter().any(|allowed| allowed == interpreter) {
            Ok(())
        } else {
            Err(CardkeepError::InterpreterNotAllowed {
                interpreter: interpreter.to_string(),
                allowed: self.interpreters.clone(),
            })
        }
    }
}

/// Runs an allow-listed program; its stdout is the artifact body.
///
/// Arguments are the declared inputs, then the output path, then any extra
/// arguments. The program must not write the output itself; stderr is kept
/// apart from the artifact and only logged.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    id: String,
    program: PathBuf,
    interpreter: Option<String>,
    extra_args: Vec<String>,
}

impl CommandGenerator {
    /// Create a generator for `program`, rejecting paths outside the allow-list
    pub async fn new(allow_list: &GeneratorAllowList, program: &Path) -> CardkeepResult<Self> {
        let resolved = allow_list.resolve(program).await?;
        let id = resolved
            .strip_prefix(
                fs::canonicalize(allow_list.root())
                    .await
                    .map_err(|e| CardkeepError::io("resolving generators directory", e))?,
            )
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| program.to_string_lossy().into_owned());

        Ok(Self {
            id,
            program: resolved,
            interpreter: None,
            extra_args: Vec::new(),
        })
    }

    /// Run the program through an allow-listed interpreter, e.g. `python3`
    pub fn with_interpreter(
        mut self,
        allow_list: &GeneratorAllowList,
        interpreter: impl Into<String>,
    ) -> CardkeepResult<Self> {
        let interpreter = interpreter.into();
        allow_list.check_interpreter(&interpreter)?;
        self.interpreter = Some(interpreter);
        Ok(self)
    }

    /// Arguments appended after the inputs and output
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self) -> Command {
        match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        }
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fingerprint(&self) -> CardkeepResult<Vec<u8>> {
        let mut bytes = fs::read(&self.program).await.map_err(|e| {
            CardkeepError::io(format!("reading generator {}", self.program.display()), e)
        })?;
        // Extra arguments change the output just like a script edit would
        for arg in &self.extra_args {
            bytes.push(0);
            bytes.extend_from_slice(arg.as_bytes());
        }
        Ok(bytes)
    }

    async fn generate(&self, inputs: &[PathBuf], output: &Path) -> CardkeepResult<Vec<u8>> {
        debug!(
            "Running generator {} for {} ({} input(s))",
            self.id,
            output.display(),
            inputs.len()
        );

        let result = self
            .command()
            .args(inputs)
            .arg(output)
            .args(&self.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CardkeepError::command_failed(self.program.display().to_string(), e))?;

        let stderr = String::from_utf8_lossy(&result.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            debug!("[{}] {}", self.id, line);
        }

        if !result.status.success() {
            let reason = match result.status.code() {
                Some(code) => format!("exit code {}: {}", code, last_line(&stderr)),
                None => "terminated by signal".to_string(),
            };
            return Err(CardkeepError::GenerationFailed {
                generator: self.id.clone(),
                reason,
            });
        }

        Ok(result.stdout)
    }
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
}
