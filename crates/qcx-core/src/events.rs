//! Events published to the host's test explorer.

use tokio::sync::mpsc;

use crate::result::TestState;
use crate::tree::Node;

/// Sending half of the event stream.
pub type EventSender = mpsc::UnboundedSender<ExplorerEvent>;

/// Receiving half of the event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<ExplorerEvent>;

/// Creates the event stream shared by a session and its host.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Lifecycle state of a suite during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteState {
    Running,
    Completed,
}

/// Everything the host needs to render discovery and runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ExplorerEvent {
    /// Discovery started
    LoadStarted,
    /// Discovery finished with a new tree
    LoadFinished(Box<Node>),
    /// Discovery failed; carries text for a "view error" panel
    LoadFailed { message: String, diagnostics: String },
    /// A run over the given identities started
    RunStarted { ids: Vec<String> },
    /// The run is over (completed, failed or cancelled)
    RunFinished,
    /// A suite changed state
    Suite { id: String, state: SuiteState },
    /// A test changed state
    Test { id: String, state: TestState },
}

impl ExplorerEvent {
    pub fn test(id: impl Into<String>, state: TestState) -> Self {
        ExplorerEvent::Test {
            id: id.into(),
            state,
        }
    }

    pub fn suite(id: impl Into<String>, state: SuiteState) -> Self {
        ExplorerEvent::Suite {
            id: id.into(),
            state,
        }
    }
}

/// Sends an event, ignoring a host that stopped listening.
pub(crate) fn emit(tx: &EventSender, event: ExplorerEvent) {
    if tx.send(event).is_err() {
        tracing::trace!("event receiver dropped");
    }
}
