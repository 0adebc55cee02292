//! Construction of framework command lines.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{Config, EXT_DIR_ENV};

/// What an execution invocation should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The whole suite.
    Everything,
    /// Every test in one file.
    File(PathBuf),
    /// One test, addressed by its 1-indexed line.
    Test { file: PathBuf, line: u32 },
}

impl Target {
    /// Location argument appended to the command, if any.
    pub fn location(&self) -> Option<String> {
        match self {
            Target::Everything => None,
            Target::File(file) => Some(file.display().to_string()),
            Target::Test { file, line } => Some(format!("{}:{}", file.display(), line)),
        }
    }
}

/// Remote debugger address the run should listen on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugOverlay {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for DebugOverlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A fully-formed shell command ready to be spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command_line: String,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Wraps the command line in the platform shell.
    pub fn to_command(&self) -> tokio::process::Command {
        let mut command = if cfg!(windows) {
            let mut cmd = tokio::process::Command::new("cmd");
            cmd.arg("/C");
            cmd
        } else {
            let mut cmd = tokio::process::Command::new("sh");
            cmd.arg("-c");
            cmd
        };
        command
            .arg(&self.command_line)
            .current_dir(&self.working_dir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        command
    }
}

/// Builds discovery and execution invocations from configuration.
pub struct CommandBuilder<'a> {
    config: &'a Config,
    workspace_root: &'a Path,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(config: &'a Config, workspace_root: &'a Path) -> Self {
        Self {
            config,
            workspace_root,
        }
    }

    fn formatter_args(&self) -> String {
        format!(
            "--require {} --format {}",
            self.config.assets.formatter_path().display(),
            self.config.framework.formatter_class
        )
    }

    fn env(&self) -> Vec<(String, String)> {
        vec![(
            EXT_DIR_ENV.to_string(),
            self.config.assets.ext_dir().display().to_string(),
        )]
    }

    fn invocation(&self, command_line: String) -> Invocation {
        Invocation {
            command_line,
            working_dir: self.workspace_root.to_path_buf(),
            env: self.env(),
        }
    }

    /// Dry run listing every test matched by the file patterns.
    pub fn discovery(&self) -> Invocation {
        let command_line = format!(
            "{} --pattern {} {} --order defined --dry-run",
            self.config.test.command,
            shell_quote(&self.config.test.pattern_argument()),
            self.formatter_args(),
        );
        self.invocation(command_line)
    }

    /// Run of `target`, optionally wrapped in the remote-debug launcher.
    pub fn execution(&self, target: &Target, debug: Option<&DebugOverlay>) -> Invocation {
        let mut command_line = match debug {
            Some(overlay) => format!(
                "{} --host {} --port {} -- {}/{} {}",
                self.config.debugger.launcher,
                overlay.host,
                overlay.port,
                ext_dir_reference(),
                self.config.debugger.script,
                self.formatter_args(),
            ),
            None => format!("{} {}", self.config.test.command, self.formatter_args()),
        };
        if let Some(location) = target.location() {
            command_line.push(' ');
            command_line.push_str(&shell_quote(&location));
        }
        self.invocation(command_line)
    }
}

fn ext_dir_reference() -> String {
    if cfg!(windows) {
        format!("%{EXT_DIR_ENV}%")
    } else {
        format!("${EXT_DIR_ENV}")
    }
}

/// Single-quotes an argument for `sh`.
fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}
