use async_trait::async_trait;
use qcx_core::{DebugLauncher, DebugOverlay, ExplorerError};

/// Asks the user to attach their own debugger client.
///
/// The session stays open until the run finishes or is interrupted.
pub struct TerminalLauncher;

#[async_trait]
impl DebugLauncher for TerminalLauncher {
    async fn start(&self, overlay: &DebugOverlay) -> Result<(), ExplorerError> {
        tracing::info!(%overlay, "debugger is listening");
        eprintln!("Debugger listening on {overlay}. Attach a remote debug client to continue.");
        Ok(())
    }

    async fn terminated(&self) {
        std::future::pending::<()>().await;
    }
}
