use std::{
    io::{BufRead, BufReader},
    ops::{Deref, DerefMut},
    path::Path,
    process::{Child, Command, Stdio},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use assert_cmd::cargo::CommandCargoExt;

pub const AGENT_BIN: &str = "telemetron-agent";

/// Constructs a `Command` that executes the agent binary in `workdir`.
///
/// This does NOT call `cargo run`, see [`assert_cmd::Command::cargo_bin`].
pub fn agent_command(args: &[&str], workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin(AGENT_BIN).expect("agent binary should be built");
    cmd.args(args).current_dir(workdir).env_remove("RUST_LOG").env_remove("TELEMETRON_CONFIG");
    cmd
}

/// A running agent whose logs (stderr) are read line by line.
pub struct RunningAgent {
    child: ChildGuard,
    lines: mpsc::Receiver<String>,
    pub logs: Vec<String>,
}

impl RunningAgent {
    pub fn spawn(args: &[&str], workdir: &Path) -> Self {
        let mut cmd = agent_command(args, workdir);
        let mut child = cmd
            .stderr(Stdio::piped())
            .spawn()
            .unwrap_or_else(|e| panic!("could not spawn process: {cmd:?}: {e}"));
        let stderr = child.stderr.take().expect("could not attach to child stderr");

        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else { break };
                eprintln!("[agent] {line}");
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self {
            child: ChildGuard::new(child),
            lines,
            logs: Vec::new(),
        }
    }

    /// Waits for a log line that contains `pattern`.
    pub fn wait_for_log(&mut self, pattern: &str, timeout: Duration) -> String {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    self.logs.push(line.clone());
                    if line.contains(pattern) {
                        return line;
                    }
                }
                Err(e) => panic!("no log containing {pattern:?} ({e}), logs: {:#?}", self.logs),
            }
        }
    }

    /// Sends a signal to the agent.
    #[cfg(unix)]
    pub fn signal(&self, signal: libc::c_int) {
        let pid = self.child.id() as libc::pid_t;
        let res = unsafe { libc::kill(pid, signal) };
        assert_eq!(res, 0, "failed to send signal {signal} to {pid}");
    }

    /// Waits for the agent to exit.
    pub fn wait(mut self, timeout: Duration) -> std::process::ExitStatus {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait().expect("could not wait for the agent") {
                return status;
            }
            assert!(Instant::now() < deadline, "the agent did not exit, logs: {:#?}", self.logs);
            thread::sleep(Duration::from_millis(50));
        }
    }
}

/// A wrapper around a child process that kills the child on drop.
pub struct ChildGuard(Option<Child>);

impl ChildGuard {
    pub fn new(process: Child) -> Self {
        Self(Some(process))
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.0.take() {
            if let Err(e) = child.kill() {
                println!("ERROR: failed to kill child {} on drop: {e}", child.id());
            }
        }
    }
}

impl Deref for ChildGuard {
    type Target = Child;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref().unwrap()
    }
}

impl DerefMut for ChildGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut().unwrap()
    }
}
