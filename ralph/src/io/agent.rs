//! Agent invocation boundary.
//!
//! The [`AgentRunner`] trait decouples the loop from the agent backend
//! (currently `opencode run`). Tests use scripted runners that return
//! predetermined output without spawning processes.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, info, instrument, warn};

/// Passthrough settings for the agent. Not interpreted by the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOptions {
    pub model: Option<String>,
    pub agent: Option<String>,
    pub format: Option<String>,
    pub variant: Option<String>,
    pub attach: Option<String>,
    pub port: Option<u16>,
    pub continue_session: bool,
    pub session: Option<String>,
    pub files: Vec<String>,
    pub title: Option<String>,
    /// Echo agent stdout/stderr live while capturing it.
    pub stream_output: bool,
}

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    pub prompt: String,
    pub options: AgentOptions,
}

/// Why an invocation did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum FailureCause {
    #[error("could not start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("exited with {}", describe_code(.code))]
    Exit { code: Option<i32> },
    #[error("{0}")]
    Other(String),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (killed by signal)".to_string(),
    }
}

/// A failed invocation together with whatever output was captured.
#[derive(Debug, thiserror::Error)]
#[error("agent invocation failed: {cause}")]
pub struct AgentFailure {
    /// Possibly partial output; still fed to the protocol extractor.
    pub captured: String,
    pub cause: FailureCause,
}

/// Abstraction over agent backends.
pub trait AgentRunner {
    /// Run the agent once and return its captured output.
    fn invoke(&self, request: &AgentRequest) -> Result<String, AgentFailure>;
}

/// Runner that spawns `opencode run`.
#[derive(Debug, Clone)]
pub struct OpencodeRunner {
    program: PathBuf,
}

impl Default for OpencodeRunner {
    fn default() -> Self {
        Self {
            program: PathBuf::from("opencode"),
        }
    }
}

impl OpencodeRunner {
    /// Use a different executable (same command-line contract).
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// Command-line arguments for `opencode` (program name excluded).
pub fn build_args(prompt: &str, options: &AgentOptions) -> Vec<String> {
    let mut args = vec!["run".to_string()];
    let mut push_opt = |flag: &str, value: Option<&str>| {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            args.push(flag.to_string());
            args.push(value.to_string());
        }
    };
    push_opt("-m", options.model.as_deref());
    push_opt("--agent", options.agent.as_deref());
    push_opt("--format", options.format.as_deref());
    push_opt("--variant", options.variant.as_deref());
    push_opt("--attach", options.attach.as_deref());
    if let Some(port) = options.port.filter(|p| *p != 0) {
        args.push("--port".to_string());
        args.push(port.to_string());
    }
    if options.continue_session {
        args.push("--continue".to_string());
    }
    if let Some(session) = options.session.as_deref().filter(|s| !s.is_empty()) {
        args.push("--session".to_string());
        args.push(session.to_string());
    }
    for file in options.files.iter().filter(|f| !f.is_empty()) {
        args.push("--file".to_string());
        args.push(file.clone());
    }
    if let Some(title) = options.title.as_deref().filter(|t| !t.is_empty()) {
        args.push("--title".to_string());
        args.push(title.to_string());
    }
    args.push(prompt.to_string());
    args
}

impl AgentRunner for OpencodeRunner {
    #[instrument(skip_all, fields(program = %self.program.display(), streaming = request.options.stream_output))]
    fn invoke(&self, request: &AgentRequest) -> Result<String, AgentFailure> {
        let program = self.program.display().to_string();
        info!(workdir = %request.workdir.display(), "starting agent");

        let mut cmd = Command::new(&self.program);
        cmd.args(build_args(&request.prompt, &request.options))
            .current_dir(&request.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| AgentFailure {
            captured: String::new(),
            cause: FailureCause::Spawn {
                program: program.clone(),
                source,
            },
        })?;

        let echo = request.options.stream_output;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_handle = thread::spawn(move || match stdout {
            Some(out) => read_stream(out, echo.then(std::io::stdout)),
            None => Ok(Vec::new()),
        });
        let stderr_handle = thread::spawn(move || match stderr {
            Some(err) => read_stream(err, echo.then(std::io::stderr)),
            None => Ok(Vec::new()),
        });

        let status = child.wait();
        let mut captured = Vec::new();
        let mut capture_error = None;
        for handle in [stdout_handle, stderr_handle] {
            match handle.join() {
                Ok(Ok(bytes)) => captured.extend_from_slice(&bytes),
                Ok(Err(err)) => capture_error = Some(err.to_string()),
                Err(_) => capture_error = Some("output reader thread panicked".to_string()),
            }
        }
        let captured = String::from_utf8_lossy(&captured).into_owned();

        let status = status.map_err(|err| AgentFailure {
            captured: captured.clone(),
            cause: FailureCause::Other(format!("wait for {program}: {err}")),
        })?;
        if let Some(message) = capture_error {
            debug!(err = %message, "agent output capture incomplete");
            return Err(AgentFailure {
                captured,
                cause: FailureCause::Other(message),
            });
        }
        if !status.success() {
            debug!(exit_code = ?status.code(), "agent failed");
            return Err(AgentFailure {
                captured,
                cause: FailureCause::Exit {
                    code: status.code(),
                },
            });
        }

        debug!(bytes = captured.len(), "agent completed successfully");
        Ok(captured)
    }
}

/// Drain `reader` line by line, optionally echoing each line as it arrives.
fn read_stream<R: Read, W: Write>(reader: R, mut echo: Option<W>) -> std::io::Result<Vec<u8>> {
    let mut reader = BufReader::new(reader);
    let mut collected = Vec::new();
    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        if let Some(out) = echo.as_mut()
            && let Err(err) = out.write_all(&line).and_then(|()| out.flush())
        {
            warn!(err = %err, "failed to echo agent output");
            echo = None;
        }
        collected.extend_from_slice(&line);
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn request(workdir: &std::path::Path) -> AgentRequest {
        AgentRequest {
            workdir: workdir.to_path_buf(),
            prompt: "do the work".to_string(),
            options: AgentOptions::default(),
        }
    }

    fn script(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("fake-opencode");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    #[test]
    fn minimal_args_are_run_and_prompt() {
        assert_eq!(
            build_args("hi", &AgentOptions::default()),
            vec!["run".to_string(), "hi".to_string()]
        );
    }

    #[test]
    fn all_options_map_to_flags_in_order() {
        let options = AgentOptions {
            model: Some("m1".to_string()),
            agent: Some("build".to_string()),
            format: Some("json".to_string()),
            variant: Some("high".to_string()),
            attach: Some("http://localhost:4096".to_string()),
            port: Some(4096),
            continue_session: true,
            session: Some("s-1".to_string()),
            files: vec!["a.md".to_string(), String::new(), "b.md".to_string()],
            title: Some("ralph".to_string()),
            stream_output: true,
        };
        let args = build_args("prompt text", &options);
        assert_eq!(
            args,
            [
                "run",
                "-m",
                "m1",
                "--agent",
                "build",
                "--format",
                "json",
                "--variant",
                "high",
                "--attach",
                "http://localhost:4096",
                "--port",
                "4096",
                "--continue",
                "--session",
                "s-1",
                "--file",
                "a.md",
                "--file",
                "b.md",
                "--title",
                "ralph",
                "prompt text",
            ]
        );
    }

    #[test]
    fn empty_values_are_skipped() {
        let options = AgentOptions {
            model: Some(String::new()),
            port: Some(0),
            ..AgentOptions::default()
        };
        assert_eq!(build_args("p", &options), vec!["run", "p"]);
    }

    #[test]
    fn captures_stdout_then_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let program = script(temp.path(), "echo \"out:$1:$2\"\necho err >&2");
        let output = OpencodeRunner::with_program(program)
            .invoke(&request(temp.path()))
            .expect("invoke");
        assert_eq!(output, "out:run:do the work\nerr\n");
    }

    #[test]
    fn non_zero_exit_keeps_partial_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let program = script(
            temp.path(),
            "echo '<ralph_notes>partial</ralph_notes>'\nexit 3",
        );
        let failure = OpencodeRunner::with_program(program)
            .invoke(&request(temp.path()))
            .unwrap_err();
        assert!(failure.captured.contains("<ralph_notes>partial</ralph_notes>"));
        assert!(matches!(failure.cause, FailureCause::Exit { code: Some(3) }));
        assert!(failure.to_string().contains("status 3"));
    }

    #[test]
    fn missing_program_is_a_spawn_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let failure = OpencodeRunner::with_program(temp.path().join("does-not-exist"))
            .invoke(&request(temp.path()))
            .unwrap_err();
        assert!(failure.captured.is_empty());
        assert!(matches!(failure.cause, FailureCause::Spawn { .. }));
    }
}
