//! Test doubles shared by unit and integration tests.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use tempfile::TempDir;

use crate::core::types::ProcessLiveness;
use crate::io::agent::{AgentFailure, AgentRequest, AgentRunner, FailureCause};
use crate::io::lock::LivenessProbe;
use crate::io::paths::RalphPaths;

/// One scripted agent response.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Output(String),
    /// Fails with the given partial output.
    Failure(String),
}

/// Agent double that replays scripted responses and records every prompt.
///
/// Once the script is exhausted the last reply repeats; an empty script
/// answers with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    replies: Mutex<VecDeque<ScriptedReply>>,
    last: Mutex<Option<ScriptedReply>>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedRunner {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Runner whose every call returns `output`.
    pub fn always(output: &str) -> Self {
        Self::new([ScriptedReply::Output(output.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl AgentRunner for ScriptedRunner {
    fn invoke(&self, request: &AgentRequest) -> Result<String, AgentFailure> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let mut last = self.last.lock().expect("last lock");
        let reply = match self.replies.lock().expect("replies lock").pop_front() {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => last
                .clone()
                .unwrap_or_else(|| ScriptedReply::Output(String::new())),
        };
        match reply {
            ScriptedReply::Output(output) => Ok(output),
            ScriptedReply::Failure(captured) => Err(AgentFailure {
                captured,
                cause: FailureCause::Other("scripted failure".to_string()),
            }),
        }
    }
}

/// Liveness probe returning a fixed answer and recording probed pids.
#[derive(Debug)]
pub struct FakeProbe {
    answer: ProcessLiveness,
    probed: Mutex<Vec<u32>>,
}

impl FakeProbe {
    pub fn new(answer: ProcessLiveness) -> Self {
        Self {
            answer,
            probed: Mutex::new(Vec::new()),
        }
    }

    pub fn probed(&self) -> Vec<u32> {
        self.probed.lock().expect("probed lock").clone()
    }
}

impl LivenessProbe for FakeProbe {
    fn probe(&self, pid: u32) -> ProcessLiveness {
        self.probed.lock().expect("probed lock").push(pid);
        self.answer
    }
}

/// Pid of a process that has already exited and been reaped.
pub fn dead_pid() -> u32 {
    let mut child = Command::new("true").spawn().expect("spawn true");
    let pid = child.id();
    child.wait().expect("wait true");
    pid
}

/// Temporary project directory seeded with the three loop inputs.
pub struct TestWorkspace {
    dir: TempDir,
    pub paths: RalphPaths,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = RalphPaths::new(dir.path());
        let workspace = Self { dir, paths };
        workspace.write("PROMPT.md", "Work through the specs one task at a time.\n");
        workspace.write("CONVENTIONS.md", "Keep commits small.\n");
        workspace.write("SPECS.md", "- [ ] first task\n- [ ] second task\n");
        workspace
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file relative to the root, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.dir.path().join(relative)).expect("read file")
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
