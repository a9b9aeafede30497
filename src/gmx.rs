use anyhow::{Context, Result};
use itertools::Itertools;
use log::debug;
use std::ffi::{OsStr, OsString};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// Captured result of a finished `gmx` call.
#[derive(Debug)]
pub struct GmxOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl GmxOutput {
    #[inline]
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, `None` when the process was killed by a signal.
    #[inline]
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

#[derive(Debug, Clone)]
pub struct Gmx {
    executable: PathBuf,
}

impl Gmx {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn command(&self, subcommand: impl AsRef<OsStr>) -> GmxCommand {
        GmxCommand {
            executable: self.executable.clone(),
            args: vec![subcommand.as_ref().to_os_string()],
            prompt: None,
        }
    }
}

/// A single `gmx <subcommand>` invocation together with the answers to its
/// interactive group selection prompts.
#[derive(Debug, Clone)]
pub struct GmxCommand {
    executable: PathBuf,
    args: Vec<OsString>,
    prompt: Option<String>,
}

impl GmxCommand {
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    #[must_use]
    pub fn flag(self, name: &str, value: impl AsRef<OsStr>) -> Self {
        self.arg(name).arg(value)
    }

    /// Answers fed to stdin, one per line.
    #[must_use]
    pub fn prompt<I, S>(mut self, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let input = answers
            .into_iter()
            .map(|answer| format!("{}\n", answer.as_ref()))
            .join("");
        self.prompt = Some(input);
        self
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn prompt_input(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.executable.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(OsStr::to_string_lossy)
            .join(" ")
    }

    /// Runs the command to completion. Only a failure to start the process is an error;
    /// a non-zero exit status is returned in [`GmxOutput`].
    pub fn run(&self) -> Result<GmxOutput> {
        let command_line = self.command_line();
        debug!("running: {command_line}");
        let mut child = Command::new(&self.executable)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Starting {command_line}"))?;
        if let Some(mut stdin) = child.stdin.take() {
            let input = self.prompt.as_deref().unwrap_or_default();
            match stdin.write_all(input.as_bytes()) {
                Err(err) if err.kind() != io::ErrorKind::BrokenPipe => {
                    return Err(err).context(format!("Writing prompt answers to {command_line}"));
                }
                _ => {}
            }
        }
        let output = child
            .wait_with_output()
            .with_context(|| format!("Waiting for {command_line}"))?;
        Ok(GmxOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_args() {
        let command = Gmx::new("gmx")
            .command("trjconv")
            .flag("-f", "traj.xtc")
            .flag("-pbc", "nojump")
            .prompt(["Protein", "System"]);
        let args = command
            .args()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(args, ["trjconv", "-f", "traj.xtc", "-pbc", "nojump"]);
        assert_eq!(command.prompt_input(), Some("Protein\nSystem\n"));
        assert_eq!(command.command_line(), "gmx trjconv -f traj.xtc -pbc nojump");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_feeds_prompt() {
        let output = Gmx::new("sh")
            .command("-c")
            .arg("cat; echo failed >&2; exit 3")
            .prompt(["q"])
            .run()
            .unwrap();
        assert!(!output.success());
        assert_eq!(output.code(), Some(3));
        assert_eq!(output.stdout, "q\n");
        assert_eq!(output.stderr, "failed\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_without_prompt() {
        let output = Gmx::new("sh").command("-c").arg("echo ok").run().unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "ok\n");
    }

    #[test]
    fn test_missing_executable() {
        let err = Gmx::new("/nonexistent/gmx").command("cluster").run().unwrap_err();
        assert!(err.to_string().contains("Starting /nonexistent/gmx cluster"));
    }
}
