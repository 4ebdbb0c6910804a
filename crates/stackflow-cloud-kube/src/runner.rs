//! Command execution
//!
//! Providers talk to external CLIs through [`CommandRunner`], so their logic
//! can be exercised without a cluster.

use crate::error::{KubeError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, feeding `stdin` when given.
    ///
    /// A non-zero exit is reported in the output, not as an error.
    async fn run(&self, program: &str, args: &[String], stdin: Option<&str>)
    -> Result<CommandOutput>;

    /// Whether `program` can be found
    fn is_installed(&self, program: &str) -> bool;
}

/// Runner that spawns real processes
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.kill_on_drop(true);

        tracing::debug!("Running: {} {}", program, args.join(" "));

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => KubeError::ToolNotFound(program.to_string()),
            _ => KubeError::IoError(e),
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            drop(pipe);
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn is_installed(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    struct Rule {
        program: String,
        needle: String,
        output: CommandOutput,
        remaining: Option<usize>,
    }

    /// A recorded invocation
    #[derive(Debug, Clone)]
    pub struct Call {
        pub program: String,
        pub args: Vec<String>,
        pub stdin: Option<String>,
    }

    impl Call {
        pub fn line(&self) -> String {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    /// Runner answering from scripted rules; unmatched commands succeed silently
    #[derive(Default)]
    pub struct FakeRunner {
        rules: Mutex<Vec<Rule>>,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer commands of `program` whose argument line contains `needle`
        pub fn on(self, program: &str, needle: &str, output: CommandOutput) -> Self {
            self.push(program, needle, output, None);
            self
        }

        /// Like `on`, for the next `times` matching calls only
        pub fn on_times(
            self,
            program: &str,
            needle: &str,
            times: usize,
            output: CommandOutput,
        ) -> Self {
            self.push(program, needle, output, Some(times));
            self
        }

        fn push(
            &self,
            program: &str,
            needle: &str,
            output: CommandOutput,
            remaining: Option<usize>,
        ) {
            self.rules.lock().unwrap().push(Rule {
                program: program.to_string(),
                needle: needle.to_string(),
                output,
                remaining,
            });
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn lines(&self) -> Vec<String> {
            self.calls().iter().map(Call::line).collect()
        }

        /// Calls whose line contains `needle`
        pub fn calls_matching(&self, needle: &str) -> Vec<Call> {
            self.calls()
                .into_iter()
                .filter(|c| c.line().contains(needle))
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            stdin: Option<&str>,
        ) -> Result<CommandOutput> {
            let line = args.join(" ");
            self.calls.lock().unwrap().push(Call {
                program: program.to_string(),
                args: args.to_vec(),
                stdin: stdin.map(str::to_string),
            });

            // One-shot rules first, then the most recently added match
            let mut rules = self.rules.lock().unwrap();
            let matching = |r: &Rule| r.program == program && line.contains(&r.needle);
            if let Some(rule) = rules
                .iter_mut()
                .find(|r| matching(r) && r.remaining.is_some_and(|n| n > 0))
            {
                rule.remaining = rule.remaining.map(|n| n - 1);
                return Ok(rule.output.clone());
            }
            Ok(rules
                .iter()
                .rev()
                .find(|r| matching(r) && r.remaining.is_none())
                .map(|r| r.output.clone())
                .unwrap_or_else(|| CommandOutput::ok("")))
        }

        fn is_installed(&self, _program: &str) -> bool {
            true
        }
    }
}
