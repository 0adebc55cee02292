use thiserror::Error;

use crate::config::ConfigError;
use crate::output;

/// Errors that can occur while discovering or running tests.
#[derive(Debug, Error)]
pub enum ExplorerError {
    /// Sentinels missing, or the text between them is not a valid payload.
    #[error("Malformed test output: {reason}")]
    MalformedOutput { reason: String, raw: String },

    #[error("Failed to start `{command}`: {source}")]
    ProcessSpawnFailure {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Debug session timed out: {0}")]
    DebugSessionTimeout(String),

    #[error("Debug session failed to start: {0}")]
    DebugSessionStartFailure(String),

    /// The dry-run used to discover tests failed.
    #[error("Test discovery failed: {message}")]
    Discovery { message: String, output: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ExplorerError {
    pub fn malformed(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        ExplorerError::MalformedOutput {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    pub fn spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        ExplorerError::ProcessSpawnFailure {
            command: command.into(),
            source,
        }
    }

    /// Raw process output attached to this error, if any.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            ExplorerError::MalformedOutput { raw, .. } => Some(raw),
            ExplorerError::Discovery { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Text suitable for a "view error message" panel.
    ///
    /// Prefers the framework's own `messages` from the payload embedded in the
    /// raw output; falls back to the error message itself.
    pub fn diagnostics(&self) -> String {
        self.raw_output()
            .and_then(output::messages_from_output)
            .filter(|messages| !messages.is_empty())
            .map(|messages| messages.join("\n\n"))
            .unwrap_or_else(|| self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_prefers_framework_messages() {
        let err = ExplorerError::Discovery {
            message: "exit status 1".to_string(),
            output: r#"noise START_OF_TEST_JSON{"examples":[],"messages":["LoadError","cannot load foo"]}END_OF_TEST_JSON"#
                .to_string(),
        };
        assert_eq!(err.diagnostics(), "LoadError\n\ncannot load foo");
    }

    #[test]
    fn test_diagnostics_falls_back_to_message() {
        let err = ExplorerError::Discovery {
            message: "exit status 127".to_string(),
            output: "sh: qcumber.sh: not found".to_string(),
        };
        assert_eq!(err.diagnostics(), "Test discovery failed: exit status 127");

        let err = ExplorerError::DebugSessionTimeout("no debugger".to_string());
        assert_eq!(err.raw_output(), None);
        assert!(err.diagnostics().contains("no debugger"));
    }
}
