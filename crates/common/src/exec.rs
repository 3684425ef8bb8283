//! External command execution
//!
//! All host tools (nginx, systemctl, certbot, package managers, chown,
//! mysql, docker) are reached through [`CommandRunner`]. Invocations carry
//! no timeout: a hung tool stalls its caller.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::{Error, Result};

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout followed by stderr, the way `2>&1` would show them
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, _) => self.stderr.trim().to_string(),
            (false, true) => self.stdout.trim().to_string(),
            (false, false) => format!("{}\n{}", self.stdout.trim(), self.stderr.trim()),
        }
    }

    /// Turn a non-zero exit into [`Error::ExternalTool`]
    pub fn into_result(self, tool: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            let diagnostic = self.combined();
            Err(Error::external(
                tool,
                if diagnostic.is_empty() {
                    format!("exited with code {:?}", self.code)
                } else {
                    diagnostic
                },
            ))
        }
    }
}

/// Runs external programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program to completion.
    ///
    /// A non-zero exit is reported through [`CommandOutput::success`];
    /// `Err` means the program could not be started at all.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Whether a program is on `PATH`
    async fn is_available(&self, program: &str) -> bool {
        self.run("which", &[program])
            .await
            .map(|o| o.success)
            .unwrap_or(false)
    }
}

/// Render a command line for logs and recordings
pub fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Runner backed by real host processes
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!("exec: {}", command_line(program, args));

        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::external(program, format!("failed to spawn: {}", e)))?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Programmable runner that records invocations instead of touching the
/// host.
///
/// Responses are chosen by command-line prefix; the most recently added
/// matching rule wins. Unmatched commands succeed with empty output.
/// Used for `--dry-run` and as a stand-in for host tools.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, CommandOutput)>>,
    invocations: Mutex<Vec<String>>,
    delay: Option<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner where every command succeeds and `nginx -t` reports success
    pub fn dry_run() -> Self {
        let runner = Self::new();
        runner.accept_config_check("nginx");
        runner
    }

    /// Make `{binary} -t` report a passing syntax check
    pub fn accept_config_check(&self, binary: &str) {
        self.respond(
            &format!("{} -t", binary),
            CommandOutput {
                success: true,
                code: Some(0),
                stdout: String::new(),
                stderr: "nginx: the configuration file syntax is ok\nnginx: configuration file test is successful".to_string(),
            },
        );
    }

    /// Hold every invocation open for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn respond(&self, prefix: &str, output: CommandOutput) {
        self.rules.lock().push((prefix.to_string(), output));
    }

    pub fn succeed(&self, prefix: &str, stdout: &str) {
        self.respond(prefix, CommandOutput::ok(stdout));
    }

    pub fn fail(&self, prefix: &str, stderr: &str) {
        self.respond(prefix, CommandOutput::failed(stderr));
    }

    /// Every command line run so far, in order
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().clone()
    }

    /// Number of recorded command lines starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.invocations
            .lock()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    /// Highest number of invocations that were in flight at once
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn lookup(&self, line: &str) -> CommandOutput {
        self.rules
            .lock()
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::ok(""))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        debug!("scripted exec: {}", line);
        self.invocations.lock().push(line.clone());

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(self.lookup(&line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result() {
        assert!(CommandOutput::ok("fine").into_result("tool").is_ok());

        let err = CommandOutput::failed("boom").into_result("tool").unwrap_err();
        match err {
            Error::ExternalTool { tool, diagnostic } => {
                assert_eq!(tool, "tool");
                assert_eq!(diagnostic, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_combined() {
        let out = CommandOutput {
            success: true,
            code: Some(0),
            stdout: "out\n".to_string(),
            stderr: "err\n".to_string(),
        };
        assert_eq!(out.combined(), "out\nerr");
    }

    #[tokio::test]
    async fn test_scripted_rules() {
        let runner = ScriptedRunner::new();
        runner.fail("certbot", "no network");
        runner.succeed("certbot renew", "renewed");

        let out = runner.run("certbot", &["renew", "--quiet"]).await.unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, "renewed");

        let out = runner.run("certbot", &["revoke"]).await.unwrap();
        assert!(!out.success);

        let out = runner.run("systemctl", &["reload", "nginx"]).await.unwrap();
        assert!(out.success);

        assert_eq!(runner.count("certbot"), 2);
        assert_eq!(runner.invocations().len(), 3);
    }

    #[tokio::test]
    async fn test_availability_check() {
        let runner = ScriptedRunner::new();
        runner.fail("which certbot", "");
        assert!(!runner.is_available("certbot").await);
        assert!(runner.is_available("apt-get").await);
    }

    #[tokio::test]
    async fn test_system_runner_reports_exit_status() {
        let runner = SystemRunner;
        let out = runner.run("sh", &["-c", "echo hi; exit 3"]).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hi");
    }
}
