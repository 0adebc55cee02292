//! Default values for qcx configuration.
//!
//! All hardcoded defaults are centralized here for easy maintenance.

use std::time::Duration;

// ============================================================================
// Test Command Defaults
// ============================================================================

/// Default command used to invoke the test framework.
pub const DEFAULT_TEST_COMMAND: &str = "docker exec -t q-views qcumber.sh";

/// Default test directory, relative to the workspace root.
pub const DEFAULT_TEST_DIRECTORY: &str = "./spec/";

/// Default file-name globs used during discovery.
pub const DEFAULT_FILE_PATTERNS: &[&str] = &["*_test.rb", "test_*.rb"];

// ============================================================================
// Framework Defaults
// ============================================================================

/// Framework name shown in the root suite label.
pub const DEFAULT_FRAMEWORK_NAME: &str = "QCumber";

/// Suffix stripped from file labels before they are PascalCased.
pub const DEFAULT_FILE_SUFFIX: &str = "_spec.rb";

/// Extension that marks a suite as a single test file.
pub const DEFAULT_FILE_EXTENSION: &str = ".rb";

/// Formatter class passed to `--format`.
pub const DEFAULT_FORMATTER_CLASS: &str = "CustomFormatter";

/// Formatter source file, relative to the assets directory.
pub const DEFAULT_FORMATTER_FILE: &str = "custom_formatter.rb";

/// Description prefix the framework uses for examples without a name.
pub const DEFAULT_PLACEHOLDER_PREFIX: &str = "example at ";

// ============================================================================
// Debugger Defaults
// ============================================================================

/// Default remote debugger host.
pub const DEFAULT_DEBUGGER_HOST: &str = "127.0.0.1";

/// Default remote debugger port.
pub const DEFAULT_DEBUGGER_PORT: u16 = 1234;

/// Remote-debug launcher binary.
pub const DEFAULT_DEBUGGER_LAUNCHER: &str = "rdebug-ide";

/// Script run by the launcher, relative to `$EXT_DIR`.
pub const DEFAULT_DEBUGGER_SCRIPT: &str = "debug_rspec.rb";

/// stderr line prefix printed once the debugger listens.
pub const DEFAULT_DEBUGGER_READY_MARKER: &str = "Fast Debugger";

/// How long to wait for the debugger-ready marker (seconds).
pub const DEFAULT_DEBUGGER_READY_TIMEOUT_SECS: u64 = 10;

/// How long the host may take to start the debug session (seconds).
pub const DEFAULT_DEBUG_SESSION_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// Assets Defaults
// ============================================================================

/// Directory containing the formatter and the `ruby` helper directory.
pub const DEFAULT_ASSETS_DIR: &str = ".";

/// Subdirectory of the assets directory exported as `$EXT_DIR`.
pub const DEFAULT_EXT_SUBDIR: &str = "ruby";

/// Environment variable pointing the debug script at the helper directory.
pub const EXT_DIR_ENV: &str = "EXT_DIR";

// ============================================================================
// Config Files
// ============================================================================

/// Project-local config file name.
pub const PROJECT_CONFIG_FILE: &str = "qcx.toml";

/// Directory under the user's config dir.
pub const USER_CONFIG_DIR: &str = "qcx";

/// File name inside [`USER_CONFIG_DIR`].
pub const USER_CONFIG_FILE: &str = "config.toml";

pub(crate) fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}
