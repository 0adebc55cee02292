//! Discovery and run orchestration for one workspace.
//!
//! A [`Session`] owns the current test tree and the process runner. Runs walk
//! the selected nodes strictly one at a time: each node's process is spawned,
//! its payload reconciled, and the process reaped before the next node starts.

use std::future::Future;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DebuggerConfig};
use crate::descriptor::TestDescriptor;
use crate::error::ExplorerError;
use crate::events::{emit, EventSender, ExplorerEvent, SuiteState};
use crate::output::{self, parse_payload};
use crate::process::{
    CancelHandle, CommandBuilder, DebugOverlay, DebuggerReady, ProcessOutput, ProcessRunner,
    Target,
};
use crate::result::{RawExample, TestState};
use crate::tree::{Node, SuiteNode, TestNode, TreeBuilder};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Whether a run should go on with the next node.
type Flow = ControlFlow<()>;

/// The workspace folder tests are discovered in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub root: PathBuf,
    pub name: String,
}

impl Workspace {
    /// Names the workspace after its root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        Self { root, name }
    }
}

/// Host-side debugger integration.
///
/// The host starts its debug client once the test process listens, and tells
/// the session when the user ends the debug session.
#[async_trait]
pub trait DebugLauncher: Send + Sync {
    /// Starts and attaches a debug session to `overlay`.
    async fn start(&self, overlay: &DebugOverlay) -> Result<(), ExplorerError>;

    /// Resolves once the debug session has terminated.
    async fn terminated(&self);
}

/// Which records of a payload carry results for the invoked node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconcile {
    /// Every record (full suite or file runs).
    All,
    /// Only the first record (single test runs).
    First,
}

/// Test discovery and execution state for one workspace.
pub struct Session {
    config: Config,
    workspace: Workspace,
    tree: Option<Arc<Node>>,
    runner: ProcessRunner,
    events: EventSender,
}

impl Session {
    pub fn new(config: Config, workspace: Workspace, events: EventSender) -> Self {
        let runner = ProcessRunner::new(events.clone(), config.debugger.ready_marker.clone());
        Self {
            config,
            workspace,
            tree: None,
            runner,
            events,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// The current tree, if discovery has completed.
    pub fn tree(&self) -> Option<Arc<Node>> {
        self.tree.clone()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.runner.cancel_handle()
    }

    /// Kills the live test process, if any, and stops the current run.
    pub fn cancel(&self) {
        if self.runner.has_live_process() {
            info!("killing currently-running tests");
        } else {
            info!("no tests running currently, no process to kill");
        }
        self.runner.cancel_handle().cancel();
    }

    pub fn has_live_process(&self) -> bool {
        self.runner.has_live_process()
    }

    /// Remote debugger address from configuration.
    pub fn debug_overlay(&self) -> DebugOverlay {
        DebugOverlay {
            host: self.config.debugger.host.clone(),
            port: self.config.debugger.port,
        }
    }

    fn commands(&self) -> CommandBuilder<'_> {
        CommandBuilder::new(&self.config, &self.workspace.root)
    }

    fn workspace_root(&self) -> &Path {
        &self.workspace.root
    }

    /// Dry-runs the framework and returns every discovered test.
    pub async fn discover(&self) -> Result<Vec<TestDescriptor>, ExplorerError> {
        let invocation = self.commands().discovery();
        info!(command = %invocation.command_line, "running dry-run of test suite");

        let captured = self.runner.capture(&invocation).await?;
        debug!(output = %output::preview(&captured.stdout), "raw dry-run output");

        if !captured.status.success() {
            error!(status = %captured.status, "error while finding test suite");
            return Err(ExplorerError::Discovery {
                message: format!("test command exited with {}", captured.status),
                output: format!("{}{}", captured.stdout, captured.stderr),
            });
        }

        let payload = parse_payload::<TestDescriptor>(&captured.stdout)?;
        info!(tests = payload.examples.len(), "discovered tests");
        Ok(payload.examples)
    }

    /// Builds a tree from descriptors with this session's configuration.
    pub fn build_tree(&self, descriptors: &[TestDescriptor]) -> Node {
        TreeBuilder::new(&self.config, self.workspace_root(), &self.workspace.name)
            .build(descriptors)
    }

    /// Rediscovers the suite and replaces the current tree.
    pub async fn load(&mut self) -> Result<Arc<Node>, ExplorerError> {
        info!(workspace = %self.workspace.root.display(), "loading tests");
        emit(&self.events, ExplorerEvent::LoadStarted);

        match self.discover().await {
            Ok(descriptors) => {
                let tree = Arc::new(self.build_tree(&descriptors));
                self.tree = Some(tree.clone());
                emit(&self.events, ExplorerEvent::LoadFinished(Box::new((*tree).clone())));
                Ok(tree)
            }
            Err(err) => {
                error!(error = %err, "failed to load tests");
                emit(
                    &self.events,
                    ExplorerEvent::LoadFailed {
                        message: err.to_string(),
                        diagnostics: err.diagnostics(),
                    },
                );
                Err(err)
            }
        }
    }

    /// The current tree, loading it first if there is none yet.
    pub async fn tests(&mut self) -> Result<Arc<Node>, ExplorerError> {
        match &self.tree {
            Some(tree) => Ok(tree.clone()),
            None => self.load().await,
        }
    }

    /// Runs the selected suites and tests in order.
    ///
    /// Emits exactly one run-started and one run-finished event, whether the
    /// run completes, fails or is cancelled.
    pub async fn run(
        &mut self,
        ids: &[String],
        debug: Option<&DebugOverlay>,
    ) -> Result<(), ExplorerError> {
        info!(?ids, "running tests");
        self.runner.cancel_handle().reset();
        emit(&self.events, ExplorerEvent::RunStarted { ids: ids.to_vec() });

        let result = match self.tests().await {
            Ok(tree) => self.run_selection(&tree, ids, debug).await,
            Err(err) => Err(err),
        };

        info!("test run finished");
        emit(&self.events, ExplorerEvent::RunFinished);
        result
    }

    async fn run_selection(
        &self,
        tree: &Node,
        ids: &[String],
        debug: Option<&DebugOverlay>,
    ) -> Result<(), ExplorerError> {
        for id in ids {
            let Some(node) = tree.find(id) else {
                debug!(%id, "selected node not in current tree; skipping");
                continue;
            };
            if self.run_node(node, debug).await?.is_break() {
                info!("run cancelled; skipping remaining nodes");
                break;
            }
        }
        Ok(())
    }

    fn run_node<'a>(
        &'a self,
        node: &'a Node,
        debug: Option<&'a DebugOverlay>,
    ) -> BoxFuture<'a, Result<Flow, ExplorerError>> {
        Box::pin(async move {
            match node {
                Node::Suite(suite) if suite.is_root() => {
                    self.run_bulk(suite, Target::Everything, debug).await
                }
                Node::Suite(suite) if suite.is_file(&self.config.framework.file_extension) => {
                    let Some(file) = &suite.file else {
                        warn!(id = %suite.id, "file suite without a path; skipping");
                        return Ok(Flow::Continue(()));
                    };
                    self.run_bulk(suite, Target::File(file.clone()), debug).await
                }
                Node::Suite(suite) => {
                    emit(&self.events, ExplorerEvent::suite(&suite.id, SuiteState::Running));
                    let mut outcome = Ok(Flow::Continue(()));
                    for child in &suite.children {
                        outcome = self.run_node(child, debug).await;
                        if !matches!(outcome, Ok(Flow::Continue(()))) {
                            break;
                        }
                    }
                    emit(&self.events, ExplorerEvent::suite(&suite.id, SuiteState::Completed));
                    outcome
                }
                Node::Test(test) => self.run_single(test, debug).await,
            }
        })
    }

    /// Runs a whole suite or file with one process.
    async fn run_bulk(
        &self,
        suite: &SuiteNode,
        target: Target,
        debug: Option<&DebugOverlay>,
    ) -> Result<Flow, ExplorerError> {
        if self.runner.cancel_handle().is_cancelled() {
            return Ok(Flow::Break(()));
        }
        emit(&self.events, ExplorerEvent::suite(&suite.id, SuiteState::Running));

        let outcome = self.invoke(&target, debug, Reconcile::All).await;

        emit(&self.events, ExplorerEvent::suite(&suite.id, SuiteState::Completed));
        outcome
    }

    /// Runs one test, addressed by file and line.
    async fn run_single(
        &self,
        test: &TestNode,
        debug: Option<&DebugOverlay>,
    ) -> Result<Flow, ExplorerError> {
        let (Some(file), Some(line)) = (&test.file, test.line) else {
            debug!(id = %test.id, "test without a location; skipping");
            return Ok(Flow::Continue(()));
        };
        if self.runner.cancel_handle().is_cancelled() {
            return Ok(Flow::Break(()));
        }
        emit(&self.events, ExplorerEvent::test(&test.id, TestState::Running));

        // Tree lines are 0-indexed, the framework's are 1-indexed.
        let target = Target::Test {
            file: file.clone(),
            line: line + 1,
        };
        self.invoke(&target, debug, Reconcile::First).await
    }

    /// Spawns one process, reconciles its payload, then reaps it.
    async fn invoke(
        &self,
        target: &Target,
        debug: Option<&DebugOverlay>,
        reconcile: Reconcile,
    ) -> Result<Flow, ExplorerError> {
        let invocation = self.commands().execution(target, debug);
        let mut process = self.runner.spawn(&invocation)?;

        let output = process.payload().await;
        let flow = self.reconcile(&output, reconcile);
        process.finish().await;

        flow
    }

    fn reconcile(&self, output: &ProcessOutput, reconcile: Reconcile) -> Result<Flow, ExplorerError> {
        let text = match output {
            ProcessOutput::Cancelled => return Ok(Flow::Break(())),
            ProcessOutput::Payload(text) | ProcessOutput::Exited(text) => text,
        };

        let payload = parse_payload::<RawExample>(text)?;
        match reconcile {
            Reconcile::All => payload.examples.iter().for_each(|e| self.handle_status(e)),
            Reconcile::First => match payload.examples.first() {
                Some(example) => self.handle_status(example),
                None => warn!("single test run returned no results"),
            },
        }
        Ok(Flow::Continue(()))
    }

    fn handle_status(&self, example: &RawExample) {
        debug!(id = %example.id, status = %example.status, "handling status of test");
        if let Some(state) = example.state() {
            emit(&self.events, ExplorerEvent::test(&example.id, state));
        }
    }

    /// Runs the selection under the remote debugger.
    ///
    /// Waits for the test process to report that the debugger listens, then
    /// asks `launcher` to attach. If attaching fails or times out, or once the
    /// debug session ends, the run is cancelled.
    pub async fn debug(
        &mut self,
        ids: &[String],
        launcher: &dyn DebugLauncher,
    ) -> Result<(), ExplorerError> {
        info!(?ids, "debugging tests");
        let overlay = self.debug_overlay();
        let debugger = self.config.debugger.clone();
        let ready = self.runner.debugger_ready();
        let cancel = self.cancel_handle();
        ready.reset();

        let run = self.run(ids, Some(&overlay));
        tokio::pin!(run);
        let attach = attach_debugger(&ready, launcher, &overlay, &debugger);
        tokio::pin!(attach);

        tokio::select! {
            result = &mut run => result,
            attached = &mut attach => match attached {
                Ok(()) => {
                    info!("debug session ended");
                    cancel.cancel();
                    run.await
                }
                Err(err) => {
                    error!(error = %err, "failed starting the debug session - aborting");
                    cancel.cancel();
                    if let Err(run_err) = run.await {
                        warn!(error = %run_err, "cancelled debug run also failed");
                    }
                    Err(err)
                }
            }
        }
    }
}

async fn attach_debugger(
    ready: &DebuggerReady,
    launcher: &dyn DebugLauncher,
    overlay: &DebugOverlay,
    debugger: &DebuggerConfig,
) -> Result<(), ExplorerError> {
    ready.wait(debugger.ready_timeout()).await?;
    info!(%overlay, "starting the debug session");

    match timeout(debugger.session_timeout(), launcher.start(overlay)).await {
        Ok(started) => started?,
        Err(_) => {
            return Err(ExplorerError::DebugSessionTimeout(format!(
                "debug session failed to start within {}s",
                debugger.session_timeout_secs
            )))
        }
    }

    launcher.terminated().await;
    Ok(())
}
