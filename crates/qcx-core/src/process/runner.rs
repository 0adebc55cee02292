use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ExplorerError;
use crate::events::{emit, EventSender, ExplorerEvent};
use crate::output::contains_payload;
use crate::process::command::Invocation;
use crate::result::TestState;

/// How long to wait for reader tasks once the process is gone.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for reader tasks after the process group was killed.
const KILL_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Prefixes of the live per-test status lines printed by the formatter.
const STREAM_TAGS: &[(&str, StreamTag)] = &[
    ("RUNNING:", StreamTag::Running),
    ("PASSED:", StreamTag::Passed),
    ("FAILED:", StreamTag::Failed),
    ("PENDING:", StreamTag::Pending),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamTag {
    Running,
    Passed,
    Failed,
    Pending,
}

impl StreamTag {
    fn state(self) -> TestState {
        match self {
            StreamTag::Running => TestState::Running,
            StreamTag::Passed => TestState::Passed,
            StreamTag::Failed => TestState::failed(),
            StreamTag::Pending => TestState::skipped(),
        }
    }
}

/// Parses a streamed status line such as `PASSED: ./spec/a_spec.rb[1:1]`.
pub fn classify_line(line: &str) -> Option<(String, TestState)> {
    STREAM_TAGS.iter().find_map(|(prefix, tag)| {
        let rest = line.strip_prefix(prefix)?;
        let id = rest.strip_prefix(' ').unwrap_or(rest);
        Some((id.to_string(), tag.state()))
    })
}

/// Cloneable handle that kills the live test process.
///
/// Once cancelled, no further processes are started until the next run resets
/// the handle.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.current().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.current().is_cancelled()
    }

    pub(crate) fn current(&self) -> CancellationToken {
        match self.token.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replaces a cancelled token with a fresh one.
    pub(crate) fn reset(&self) {
        let mut token = match self.token.lock() {
            Ok(token) => token,
            Err(poisoned) => poisoned.into_inner(),
        };
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }
}

/// Signal raised when the debugger announces it is listening.
#[derive(Debug, Clone)]
pub struct DebuggerReady {
    state: Arc<watch::Sender<bool>>,
}

impl Default for DebuggerReady {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { state: Arc::new(tx) }
    }
}

impl DebuggerReady {
    pub(crate) fn signal(&self) {
        self.state.send_replace(true);
    }

    pub(crate) fn reset(&self) {
        self.state.send_replace(false);
    }

    pub fn is_ready(&self) -> bool {
        *self.state.borrow()
    }

    /// Waits until the debugger is ready, failing after `limit`.
    pub async fn wait(&self, limit: Duration) -> Result<(), ExplorerError> {
        let mut rx = self.state.subscribe();
        let outcome = match timeout(limit, rx.wait_for(|ready| *ready)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ExplorerError::DebugSessionStartFailure(
                "debugger readiness signal dropped".to_string(),
            )),
            Err(_) => Err(ExplorerError::DebugSessionTimeout(format!(
                "debugger did not report ready within {}s",
                limit.as_secs()
            ))),
        };
        outcome
    }
}

/// Output collected from a process run to completion.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Result of waiting for a streaming process's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutput {
    /// The line carrying the start sentinel, seen before exit.
    Payload(String),
    /// stdout closed without a payload line; everything it printed.
    Exited(String),
    /// The run was cancelled; nothing to parse.
    Cancelled,
}

impl ProcessOutput {
    pub fn text(&self) -> &str {
        match self {
            ProcessOutput::Payload(text) | ProcessOutput::Exited(text) => text,
            ProcessOutput::Cancelled => "",
        }
    }
}

/// Owns the single live test-framework process.
pub struct ProcessRunner {
    events: EventSender,
    ready_marker: String,
    debugger_ready: DebuggerReady,
    cancel: CancelHandle,
    live: Arc<AtomicBool>,
}

impl ProcessRunner {
    pub fn new(events: EventSender, ready_marker: impl Into<String>) -> Self {
        Self {
            events,
            ready_marker: ready_marker.into(),
            debugger_ready: DebuggerReady::default(),
            cancel: CancelHandle::default(),
            live: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn debugger_ready(&self) -> DebuggerReady {
        self.debugger_ready.clone()
    }

    /// Whether a process started by this runner is still owned by someone.
    pub fn has_live_process(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Runs a command to completion, capturing all of its output.
    pub async fn capture(&self, invocation: &Invocation) -> Result<CapturedOutput, ExplorerError> {
        info!(command = %invocation.command_line, "running command");
        let mut command = invocation.to_command();
        command.stdin(Stdio::null()).kill_on_drop(true);

        let output = command
            .output()
            .await
            .map_err(|e| ExplorerError::spawn(&invocation.command_line, e))?;

        Ok(CapturedOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Starts a streaming run. Callers must `finish` it before spawning again.
    pub fn spawn(&self, invocation: &Invocation) -> Result<RunningProcess, ExplorerError> {
        if self.has_live_process() {
            warn!("spawning a test process while another one is still live");
        }
        info!(command = %invocation.command_line, "running command");

        let mut command = invocation.to_command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so cancellation reaches whatever the shell forks.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| ExplorerError::spawn(&invocation.command_line, e))?;
        self.live.store(true, Ordering::SeqCst);
        self.debugger_ready.reset();
        let pid = child.id();

        let (payload_tx, payload_rx) = oneshot::channel();
        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(read_stdout(stdout, self.events.clone(), payload_tx)));
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(read_stderr(
                stderr,
                self.ready_marker.clone(),
                self.debugger_ready.clone(),
            ))
        });

        Ok(RunningProcess {
            child,
            pid,
            killed: false,
            payload_rx: Some(payload_rx),
            stdout_task,
            stderr_task,
            cancel: self.cancel.current(),
            _live: LiveGuard(self.live.clone()),
        })
    }
}

/// Clears the runner's live flag when the process handle goes away.
struct LiveGuard(Arc<AtomicBool>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A spawned test process whose output is being streamed.
pub struct RunningProcess {
    child: Child,
    pid: Option<u32>,
    killed: bool,
    payload_rx: Option<oneshot::Receiver<String>>,
    stdout_task: Option<JoinHandle<String>>,
    stderr_task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    _live: LiveGuard,
}

impl RunningProcess {
    /// Waits for the payload line, stdout closing, or cancellation.
    pub async fn payload(&mut self) -> ProcessOutput {
        let Some(mut payload_rx) = self.payload_rx.take() else {
            return ProcessOutput::Exited(String::new());
        };
        let cancel = self.cancel.clone();

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("cancellation requested; killing test process");
                self.kill().await;
                ProcessOutput::Cancelled
            }
            line = &mut payload_rx => match line {
                Ok(line) => ProcessOutput::Payload(line),
                Err(_) => ProcessOutput::Exited(self.collect_stdout(IO_CAPTURE_TIMEOUT).await),
            }
        }
    }

    /// Waits for the process to exit (or kills it on cancellation) and drains
    /// its readers.
    pub async fn finish(mut self) -> Option<ExitStatus> {
        let cancel = self.cancel.clone();

        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                if !self.killed {
                    info!("cancellation requested; killing test process");
                    self.kill().await;
                }
                None
            }
            status = self.child.wait() => match status {
                Ok(status) => Some(status),
                Err(err) => {
                    warn!(error = %err, "failed while waiting for test process");
                    None
                }
            }
        };
        info!(?status, "test process exited");

        let limit = if self.killed {
            KILL_DRAIN_TIMEOUT
        } else {
            IO_CAPTURE_TIMEOUT
        };
        let stderr_task = self.stderr_task.take();
        tokio::join!(self.collect_stdout(limit), drain_stderr(stderr_task, limit));

        status
    }

    async fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        self.kill_group();
        if let Err(err) = self.child.kill().await {
            warn!(error = %err, "failed to kill test process");
        }
    }

    #[cfg(unix)]
    fn kill_group(&self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.pid {
            if let Err(err) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                debug!(error = %err, pid, "failed to kill test process group");
            }
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&self) {}

    async fn collect_stdout(&mut self, limit: Duration) -> String {
        let Some(mut task) = self.stdout_task.take() else {
            return String::new();
        };
        match timeout(limit, &mut task).await {
            Ok(Ok(captured)) => captured,
            Ok(Err(err)) => {
                warn!(error = %err, "stdout reader panicked");
                String::new()
            }
            Err(_) => {
                task.abort();
                warn!("stdout capture timed out");
                String::new()
            }
        }
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if !self.killed && matches!(self.child.try_wait(), Ok(None)) {
            self.kill_group();
        }
    }
}

async fn drain_stderr(task: Option<JoinHandle<()>>, limit: Duration) {
    let Some(mut task) = task else {
        return;
    };
    if timeout(limit, &mut task).await.is_err() {
        task.abort();
        warn!("stderr capture timed out");
    }
}

/// Reads one line, tolerating invalid UTF-8 and stripping `\n` / `\r\n`.
async fn next_line<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

async fn read_stdout<R: AsyncRead + Unpin>(
    stdout: R,
    events: EventSender,
    payload_tx: oneshot::Sender<String>,
) -> String {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut payload_tx = Some(payload_tx);
    let mut captured = String::new();

    loop {
        let line = match next_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "failed reading test process stdout");
                break;
            }
        };
        debug!(%line, "[child stdout]");

        if let Some((id, state)) = classify_line(&line) {
            emit(&events, ExplorerEvent::test(id, state));
        }
        if contains_payload(&line) {
            if let Some(tx) = payload_tx.take() {
                let _ = tx.send(line.clone());
            }
        }

        captured.push_str(&line);
        captured.push('\n');
    }

    captured
}

async fn read_stderr<R: AsyncRead + Unpin>(stderr: R, ready_marker: String, ready: DebuggerReady) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();

    loop {
        let line = match next_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "failed reading test process stderr");
                break;
            }
        };
        debug!(%line, "[child stderr]");

        if !ready_marker.is_empty() && line.starts_with(&ready_marker) {
            ready.signal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use std::path::PathBuf;
    use std::time::Instant;

    fn invocation(script: &str) -> Invocation {
        Invocation {
            command_line: script.to_string(),
            working_dir: std::env::temp_dir(),
            env: vec![("QCX_TEST_VAR".to_string(), "hello".to_string())],
        }
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(
            classify_line("PASSED: ./spec/a_spec.rb[1:1]"),
            Some(("./spec/a_spec.rb[1:1]".to_string(), TestState::Passed))
        );
        assert_eq!(
            classify_line("RUNNING: x[1]"),
            Some(("x[1]".to_string(), TestState::Running))
        );
        assert_eq!(
            classify_line("PENDING: x[2]"),
            Some(("x[2]".to_string(), TestState::skipped()))
        );
        assert_eq!(
            classify_line("FAILED: x[3]"),
            Some(("x[3]".to_string(), TestState::failed()))
        );
        assert_eq!(classify_line("Finished in 0.2 seconds"), None);
        assert_eq!(classify_line("  PASSED: indented"), None);
    }

    #[test]
    fn test_cancel_handle_reset() {
        let handle = CancelHandle::default();
        let before = handle.current();
        handle.cancel();
        assert!(before.is_cancelled());
        assert!(handle.is_cancelled());

        handle.reset();
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_debugger_ready_times_out() {
        let ready = DebuggerReady::default();
        let err = ready.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, ExplorerError::DebugSessionTimeout(_)));

        ready.signal();
        assert!(ready.wait(Duration::from_millis(20)).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_events_and_resolves_payload_early() {
        let (tx, mut rx) = events::channel();
        let runner = ProcessRunner::new(tx, "Fast Debugger");
        let mut process = runner
            .spawn(&invocation(
                "echo 'RUNNING: a[1]'; echo 'PASSED: a[1]'; \
                 echo 'START_OF_TEST_JSON{\"examples\":[]}END_OF_TEST_JSON'; \
                 echo 'Fast Debugger (ruby-debug-ide 0.7)' >&2; sleep 0.2",
            ))
            .unwrap();
        assert!(runner.has_live_process());

        let output = process.payload().await;
        assert_eq!(
            output,
            ProcessOutput::Payload("START_OF_TEST_JSON{\"examples\":[]}END_OF_TEST_JSON".to_string())
        );
        // Live events were sent before the payload resolved.
        assert_eq!(rx.try_recv().unwrap(), ExplorerEvent::test("a[1]", TestState::Running));
        assert_eq!(rx.try_recv().unwrap(), ExplorerEvent::test("a[1]", TestState::Passed));

        let status = process.finish().await;
        assert!(status.map(|s| s.success()).unwrap_or(false));
        assert!(!runner.has_live_process());
        assert!(runner.debugger_ready().is_ready());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_without_payload_returns_stdout() {
        let (tx, _rx) = events::channel();
        let runner = ProcessRunner::new(tx, "Fast Debugger");
        let mut process = runner
            .spawn(&invocation("echo \"var=$QCX_TEST_VAR\"; echo done"))
            .unwrap();
        assert_eq!(
            process.payload().await,
            ProcessOutput::Exited("var=hello\ndone\n".to_string())
        );
        process.finish().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_process() {
        let (tx, _rx) = events::channel();
        let runner = ProcessRunner::new(tx, "Fast Debugger");
        let cancel = runner.cancel_handle();
        let mut process = runner.spawn(&invocation("sleep 30")).unwrap();

        cancel.cancel();
        let output = timeout(Duration::from_secs(5), process.payload())
            .await
            .expect("cancelled wait must resolve");
        assert_eq!(output, ProcessOutput::Cancelled);
        assert_eq!(output.text(), "");
        assert!(process.killed);

        assert_eq!(process.finish().await, None);
        assert!(!runner.has_live_process());
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => !stat.contains(") Z"),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancel_kills_forked_children() {
        let (tx, mut rx) = events::channel();
        let runner = ProcessRunner::new(tx, "Fast Debugger");
        let cancel = runner.cancel_handle();
        let mut process = runner
            .spawn(&invocation("sleep 37 & echo \"RUNNING: $!\"; wait; echo done"))
            .unwrap();

        let sleeper = match timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(ExplorerEvent::Test {
                id,
                state: TestState::Running,
            })) => id,
            other => panic!("unexpected event {other:?}"),
        };
        assert!(is_running(&sleeper));

        let started = Instant::now();
        cancel.cancel();
        assert_eq!(process.payload().await, ProcessOutput::Cancelled);
        assert_eq!(process.finish().await, None);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!runner.has_live_process());

        // The orphan is gone or left as a zombie for init to reap.
        let deadline = Instant::now() + Duration::from_secs(2);
        while is_running(&sleeper) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!is_running(&sleeper));
    }

    #[tokio::test]
    async fn test_spawn_failure_in_missing_directory() {
        let (tx, _rx) = events::channel();
        let runner = ProcessRunner::new(tx, "Fast Debugger");
        let mut missing = invocation("true");
        missing.working_dir = PathBuf::from("/definitely/not/a/dir");
        let err = runner.spawn(&missing).err().expect("spawn must fail");
        assert!(matches!(err, ExplorerError::ProcessSpawnFailure { .. }));
        assert!(!runner.has_live_process());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture() {
        let (tx, _rx) = events::channel();
        let runner = ProcessRunner::new(tx, "Fast Debugger");
        let captured = runner
            .capture(&invocation("echo out; echo err >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(captured.stdout, "out\n");
        assert_eq!(captured.stderr, "err\n");
        assert_eq!(captured.status.code(), Some(3));
    }
}
