//! Interpretation of per-test result records.

use regex::Regex;
use serde::Deserialize;

/// One example in a run payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RawExample {
    pub id: String,
    #[serde(default)]
    pub full_description: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub line_number: u32,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub exception: Option<RawException>,
    #[serde(default)]
    pub pending_message: Option<String>,
}

/// Exception attached to a failed example.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawException {
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub backtrace: Option<Vec<String>>,
}

/// Inline marker placed on the failing line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoration {
    /// 0-indexed line.
    pub line: u32,
    pub message: String,
}

/// State of a single test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestState {
    Running,
    Passed,
    Failed {
        message: Option<String>,
        decoration: Option<Decoration>,
    },
    Skipped {
        message: Option<String>,
    },
}

impl TestState {
    /// A failure reported by the live stream, before details are known.
    pub fn failed() -> Self {
        TestState::Failed {
            message: None,
            decoration: None,
        }
    }

    pub fn skipped() -> Self {
        TestState::Skipped { message: None }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TestState::Running)
    }
}

impl RawExample {
    /// Maps this record to its terminal state.
    ///
    /// Returns `None` for statuses the formatter is not expected to produce.
    pub fn state(&self) -> Option<TestState> {
        match self.status.as_str() {
            "passed" => Some(TestState::Passed),
            "failed" if self.pending_message.is_some() => Some(TestState::Skipped {
                message: self.pending_message.clone(),
            }),
            "failed" => Some(self.failure()),
            "pending" => Some(TestState::Skipped {
                message: self.pending_message.clone(),
            }),
            other => {
                tracing::warn!(id = %self.id, status = other, "unknown test status");
                None
            }
        }
    }

    fn failure(&self) -> TestState {
        let exception = self.exception.clone().unwrap_or_default();
        let flat_message = replace_first_line_break(&exception.message);

        let mut message = format!("{}:\n{}", exception.class, flat_message);
        let mut backtrace_line = None;

        if let Some(backtrace) = &exception.backtrace {
            message.push_str("\n\nBacktrace:\n");
            for line in backtrace {
                message.push_str(line);
                message.push('\n');
                if let Some(found) = self.line_in_backtrace(line) {
                    backtrace_line = Some(found);
                }
            }
        }

        let line = backtrace_line
            .filter(|n| *n > 0)
            .unwrap_or(self.line_number)
            .saturating_sub(1);

        TestState::Failed {
            message: Some(message),
            decoration: Some(Decoration {
                line,
                message: flat_message,
            }),
        }
    }

    /// Line number of this example's file in one backtrace line, e.g. 75 in
    /// `spec/models/game_spec.rb:75:in 'block (3 levels)'`.
    fn line_in_backtrace(&self, line: &str) -> Option<u32> {
        let file_path = self.file_path.replacen("./", "", 1);
        if file_path.is_empty() || !line.contains(&file_path) {
            return None;
        }
        let file_name = file_path.rsplit('/').next()?;
        let pattern = Regex::new(&format!(r"{}:(\d+)", regex::escape(file_name))).ok()?;
        pattern.captures(line)?.get(1)?.as_str().parse().ok()
    }
}

fn replace_first_line_break(text: &str) -> String {
    match text.find(['\r', '\n']) {
        Some(idx) => {
            let width = if text[idx..].starts_with("\r\n") { 2 } else { 1 };
            format!("{} {}", &text[..idx], &text[idx + width..])
        }
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(backtrace: Option<Vec<&str>>, pending: Option<&str>) -> RawExample {
        RawExample {
            id: "./spec/models/game_spec.rb[1:2]".to_string(),
            full_description: "Game scores".to_string(),
            description: "scores".to_string(),
            file_path: "./spec/models/game_spec.rb".to_string(),
            line_number: 12,
            status: "failed".to_string(),
            exception: Some(RawException {
                class: "RSpec::Expectations::ExpectationNotMetError".to_string(),
                message: "expected: 1\n     got: 2\n".to_string(),
                backtrace: backtrace.map(|b| b.into_iter().map(str::to_string).collect()),
            }),
            pending_message: pending.map(str::to_string),
        }
    }

    #[test]
    fn test_passed() {
        let mut example = failed(None, None);
        example.status = "passed".to_string();
        assert_eq!(example.state(), Some(TestState::Passed));
    }

    #[test]
    fn test_failed_with_pending_message_is_skipped() {
        let example = failed(None, Some("Not yet implemented"));
        assert_eq!(
            example.state(),
            Some(TestState::Skipped {
                message: Some("Not yet implemented".to_string())
            })
        );
    }

    #[test]
    fn test_failed_uses_backtrace_line() {
        let example = failed(
            Some(vec![
                "/gems/rspec-expectations/lib/fail_with.rb:37:in `fail_with'",
                "./spec/models/game_spec.rb:75:in `block (3 levels) in <top (required)>'",
            ]),
            None,
        );
        let Some(TestState::Failed {
            message: Some(message),
            decoration: Some(decoration),
        }) = example.state()
        else {
            panic!("expected failure details");
        };
        assert_eq!(decoration.line, 74);
        assert_eq!(decoration.message, "expected: 1      got: 2\n");
        assert!(message.starts_with(
            "RSpec::Expectations::ExpectationNotMetError:\nexpected: 1      got: 2\n"
        ));
        assert!(message.contains("\n\nBacktrace:\n/gems/rspec-expectations"));
        assert!(message.ends_with("in <top (required)>'\n"));
    }

    #[test]
    fn test_failed_without_backtrace_match_uses_declared_line() {
        let example = failed(Some(vec!["./lib/other.rb:5:in `x'"]), None);
        match example.state() {
            Some(TestState::Failed {
                decoration: Some(decoration),
                ..
            }) => assert_eq!(decoration.line, 11),
            other => panic!("unexpected state {other:?}"),
        }

        let example = failed(None, None);
        match example.state() {
            Some(TestState::Failed {
                message: Some(message),
                decoration: Some(decoration),
            }) => {
                assert_eq!(decoration.line, 11);
                assert!(!message.contains("Backtrace"));
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_last_matching_backtrace_line_wins() {
        let example = failed(
            Some(vec![
                "./spec/models/game_spec.rb:80:in `helper'",
                "./spec/models/game_spec.rb:75:in `block (2 levels)'",
            ]),
            None,
        );
        match example.state() {
            Some(TestState::Failed {
                decoration: Some(decoration),
                ..
            }) => assert_eq!(decoration.line, 74),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_failed_without_exception() {
        let mut example = failed(None, None);
        example.exception = None;
        assert!(matches!(example.state(), Some(TestState::Failed { .. })));
    }

    #[test]
    fn test_unknown_status_is_ignored() {
        let mut example = failed(None, None);
        example.status = "flaky".to_string();
        assert_eq!(example.state(), None);
    }

    #[test]
    fn test_deserializes_null_pending_message() {
        let example: RawExample = serde_json::from_str(
            r#"{"id":"a[1]","status":"failed","pending_message":null,
                "exception":{"class":"E","message":"m"}}"#,
        )
        .unwrap();
        assert!(example.pending_message.is_none());
        assert!(matches!(example.state(), Some(TestState::Failed { .. })));
    }
}
