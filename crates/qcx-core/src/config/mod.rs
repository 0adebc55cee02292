//! Configuration management for qcx.
//!
//! Configuration is loaded from multiple sources with the following priority:
//! 1. Environment variables (highest priority)
//! 2. Project-local `qcx.toml` file in the workspace root
//! 3. User config `~/.config/qcx/config.toml`
//! 4. Built-in defaults (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod defaults;

pub use defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How to invoke the test framework.
    pub test: TestConfig,

    /// Conventions of the concrete framework binding.
    pub framework: FrameworkConfig,

    /// Remote debugger settings.
    pub debugger: DebuggerConfig,

    /// Where the formatter and helper scripts live.
    pub assets: AssetsConfig,
}

impl Config {
    /// Load configuration for a workspace.
    ///
    /// Searches for config in order:
    /// 1. `<workspace>/qcx.toml` (project local)
    /// 2. `~/.config/qcx/config.toml` (user config)
    /// 3. Falls back to defaults
    pub fn load(workspace: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let project_config = workspace.as_ref().join(PROJECT_CONFIG_FILE);
        if project_config.exists() {
            return Self::from_file(&project_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(USER_CONFIG_DIR).join(USER_CONFIG_FILE);
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Self::default().finalize()
    }

    /// Load configuration from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.finalize()
    }

    /// Applies environment overrides and checks the result.
    fn finalize(mut self) -> Result<Self, ConfigError> {
        self.apply_env_overrides()?;
        self.validate()?;
        Ok(self)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(command) = std::env::var("QCX_COMMAND") {
            self.test.command = command;
        }
        if let Ok(dir) = std::env::var("QCX_TEST_DIRECTORY") {
            self.test.directory = dir;
        }
        if let Ok(patterns) = std::env::var("QCX_FILE_PATTERN") {
            self.test.file_pattern = patterns
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(host) = std::env::var("QCX_DEBUGGER_HOST") {
            self.debugger.host = host;
        }
        if let Ok(port) = std::env::var("QCX_DEBUGGER_PORT") {
            self.debugger.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("QCX_DEBUGGER_PORT: {port}")))?;
        }

        if let Ok(dir) = std::env::var("QCX_ASSETS_DIR") {
            self.assets.dir = PathBuf::from(dir);
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.test.file_pattern.is_empty() {
            return Err(ConfigError::Invalid(
                "test.file_pattern must list at least one glob".to_string(),
            ));
        }
        if self.framework.file_extension.is_empty() {
            return Err(ConfigError::Invalid(
                "framework.file_extension must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a workspace-relative path (e.g. `./spec/models/a_spec.rb`)
    /// lives under the test directory, i.e. saving it should reload the tree.
    pub fn is_test_file(&self, relative_path: &str) -> bool {
        !self.test.directory.is_empty() && relative_path.starts_with(&self.test.directory)
    }

    /// Create a default config file content as a string.
    pub fn default_config_string() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Test command configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Shell command that runs the framework.
    pub command: String,

    /// Test directory, relative to the workspace root (e.g. `./spec/`).
    pub directory: String,

    /// File-name globs passed to `--pattern` during discovery.
    pub file_pattern: Vec<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_TEST_COMMAND.to_string(),
            directory: DEFAULT_TEST_DIRECTORY.to_string(),
            file_pattern: DEFAULT_FILE_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TestConfig {
    /// Discovery pattern: every glob anchored under the test directory.
    pub fn pattern_argument(&self) -> String {
        self.file_pattern
            .iter()
            .map(|p| format!("{}/**/{}", self.directory, p))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Conventions of the framework binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    /// Name shown in the root suite label.
    pub name: String,

    /// File suffix removed before PascalCasing a file label.
    pub file_suffix: String,

    /// Suite labels ending with this are run as one file.
    pub file_extension: String,

    /// Class name passed to `--format`.
    pub formatter_class: String,

    /// Description prefix of unnamed examples.
    pub placeholder_prefix: String,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_FRAMEWORK_NAME.to_string(),
            file_suffix: DEFAULT_FILE_SUFFIX.to_string(),
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            formatter_class: DEFAULT_FORMATTER_CLASS.to_string(),
            placeholder_prefix: DEFAULT_PLACEHOLDER_PREFIX.to_string(),
        }
    }
}

/// Remote debugger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggerConfig {
    pub host: String,
    pub port: u16,

    /// Launcher binary that wraps the test run.
    pub launcher: String,

    /// Script the launcher runs, relative to `$EXT_DIR`.
    pub script: String,

    /// stderr prefix signalling the debugger is listening.
    pub ready_marker: String,

    pub ready_timeout_secs: u64,

    pub session_timeout_secs: u64,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DEBUGGER_HOST.to_string(),
            port: DEFAULT_DEBUGGER_PORT,
            launcher: DEFAULT_DEBUGGER_LAUNCHER.to_string(),
            script: DEFAULT_DEBUGGER_SCRIPT.to_string(),
            ready_marker: DEFAULT_DEBUGGER_READY_MARKER.to_string(),
            ready_timeout_secs: DEFAULT_DEBUGGER_READY_TIMEOUT_SECS,
            session_timeout_secs: DEFAULT_DEBUG_SESSION_TIMEOUT_SECS,
        }
    }
}

impl DebuggerConfig {
    pub fn ready_timeout(&self) -> Duration {
        secs(self.ready_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        secs(self.session_timeout_secs)
    }
}

/// Location of the formatter and helper scripts shipped with qcx.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub dir: PathBuf,
    pub formatter_file: String,
    pub ext_subdir: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_ASSETS_DIR),
            formatter_file: DEFAULT_FORMATTER_FILE.to_string(),
            ext_subdir: DEFAULT_EXT_SUBDIR.to_string(),
        }
    }
}

impl AssetsConfig {
    /// Path passed to `--require`.
    pub fn formatter_path(&self) -> PathBuf {
        self.dir.join(&self.formatter_file)
    }

    /// Value exported as `$EXT_DIR`.
    pub fn ext_dir(&self) -> PathBuf {
        self.dir.join(&self.ext_subdir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.test.command, DEFAULT_TEST_COMMAND);
        assert_eq!(config.test.directory, DEFAULT_TEST_DIRECTORY);
        assert_eq!(config.framework.name, DEFAULT_FRAMEWORK_NAME);
        assert_eq!(config.debugger.port, DEFAULT_DEBUGGER_PORT);
        assert_eq!(config.test.file_pattern, vec!["*_test.rb", "test_*.rb"]);
    }

    #[test]
    fn test_finalize_rejects_empty_patterns() {
        let mut config = Config::default();
        config.test.file_pattern.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        if std::env::var_os("QCX_FILE_PATTERN").is_none() {
            assert!(matches!(config.finalize(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_config_to_toml() {
        let toml_str = Config::default_config_string();
        assert!(toml_str.contains("[test]"));
        assert!(toml_str.contains("[framework]"));
        assert!(toml_str.contains("[debugger]"));
        assert!(toml_str.contains("[assets]"));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[test]
command = "bundle exec rspec"
directory = "./test/"
file_pattern = ["*_test.rb", "test_*.rb"]

[debugger]
port = 4321
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.test.command, "bundle exec rspec");
        assert_eq!(config.test.directory, "./test/");
        assert_eq!(config.test.file_pattern.len(), 2);
        assert_eq!(config.debugger.port, 4321);
        assert_eq!(config.debugger.host, DEFAULT_DEBUGGER_HOST);
    }

    #[test]
    fn test_pattern_argument() {
        let test = TestConfig {
            directory: "./spec/".to_string(),
            file_pattern: vec!["*_spec.rb".to_string(), "*_check.rb".to_string()],
            ..TestConfig::default()
        };
        assert_eq!(
            test.pattern_argument(),
            "./spec//**/*_spec.rb,./spec//**/*_check.rb"
        );
    }

    #[test]
    fn test_is_test_file() {
        let mut config = Config::default();
        assert!(config.is_test_file("./spec/models/game_spec.rb"));
        assert!(!config.is_test_file("./app/models/game.rb"));

        config.test.directory = String::new();
        assert!(!config.is_test_file("./spec/models/game_spec.rb"));
    }

    #[test]
    fn test_asset_paths() {
        let assets = AssetsConfig {
            dir: PathBuf::from("/opt/qcx"),
            ..AssetsConfig::default()
        };
        assert_eq!(assets.formatter_path(), PathBuf::from("/opt/qcx/custom_formatter.rb"));
        assert_eq!(assets.ext_dir(), PathBuf::from("/opt/qcx/ruby"));
    }
}
