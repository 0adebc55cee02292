//! Terminal rendering of explorer events.

use std::collections::HashMap;
use std::mem;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use qcx_core::{EventReceiver, ExplorerEvent, Node, TestState};

/// Final tally of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Prints test progress while a session works.
pub struct Reporter {
    spinner: ProgressBar,
    labels: HashMap<String, String>,
    finished: HashMap<String, TestState>,
    load_failed: bool,
    view_error: bool,
}

impl Reporter {
    /// With `view_error`, discovery failures print the framework's own output.
    pub fn new(view_error: bool) -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(style);
        }
        spinner.enable_steady_tick(Duration::from_millis(100));
        Self {
            spinner,
            labels: HashMap::new(),
            finished: HashMap::new(),
            load_failed: false,
            view_error,
        }
    }

    /// Consumes events until the session drops its sender.
    pub async fn run(mut self, mut rx: EventReceiver) -> Summary {
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        self.spinner.finish_and_clear();
        self.summary()
    }

    fn handle(&mut self, event: ExplorerEvent) {
        match event {
            ExplorerEvent::LoadStarted => self.spinner.set_message("Loading tests..."),
            ExplorerEvent::LoadFinished(tree) => {
                self.collect_labels(&tree);
                self.spinner
                    .set_message(format!("Loaded {} tests", tree.test_ids().len()));
            }
            ExplorerEvent::LoadFailed {
                message,
                diagnostics,
            } => {
                self.load_failed = true;
                self.spinner.println(format!("Failed to load tests: {message}"));
                if self.view_error {
                    self.spinner.println(indent(&diagnostics));
                } else if diagnostics != message {
                    self.spinner.println("Run again with --view-error for details.");
                }
            }
            ExplorerEvent::RunStarted { .. } => self.spinner.set_message("Running tests..."),
            ExplorerEvent::RunFinished => self.spinner.set_message("Done"),
            ExplorerEvent::Suite { id, state } => {
                tracing::debug!(%id, ?state, "suite state changed");
            }
            ExplorerEvent::Test { id, state } => self.on_test(id, state),
        }
    }

    fn collect_labels(&mut self, node: &Node) {
        self.labels.insert(node.id().to_string(), node.label().to_string());
        for child in node.children() {
            self.collect_labels(child);
        }
    }

    fn label<'a>(&'a self, id: &'a str) -> &'a str {
        self.labels.get(id).map(String::as_str).unwrap_or(id)
    }

    fn on_test(&mut self, id: String, state: TestState) {
        if !state.is_terminal() {
            self.spinner.set_message(self.label(&id).to_string());
            return;
        }

        let previous = self.finished.insert(id.clone(), state.clone());
        let changed = previous
            .as_ref()
            .map(|p| mem::discriminant(p) != mem::discriminant(&state))
            .unwrap_or(true);

        if changed {
            let line = match &state {
                TestState::Passed => format!("  ok    {}", self.label(&id)),
                TestState::Failed { .. } => format!("  FAIL  {}", self.label(&id)),
                TestState::Skipped { message } => match message {
                    Some(reason) => format!("  skip  {} ({reason})", self.label(&id)),
                    None => format!("  skip  {}", self.label(&id)),
                },
                TestState::Running => return,
            };
            self.spinner.println(line);
        }

        if let TestState::Failed {
            message: Some(message),
            ..
        } = &state
        {
            self.spinner.println(indent(message));
        }
    }

    fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for state in self.finished.values() {
            match state {
                TestState::Passed => summary.passed += 1,
                TestState::Failed { .. } => summary.failed += 1,
                TestState::Skipped { .. } => summary.skipped += 1,
                TestState::Running => {}
            }
        }
        if self.load_failed {
            summary.failed = summary.failed.max(1);
        }
        summary
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("        {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders the tree as an indented outline.
pub fn outline(node: &Node) -> String {
    let mut out = String::new();
    write_outline(node, 0, &mut out);
    out
}

fn write_outline(node: &Node, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    match node {
        Node::Suite(suite) => {
            out.push_str(&format!("{pad}{}\n", suite.label));
            for child in &suite.children {
                write_outline(child, depth + 1, out);
            }
        }
        Node::Test(test) => match test.line {
            Some(line) => out.push_str(&format!("{pad}{}  (line {})\n", test.label, line + 1)),
            None => out.push_str(&format!("{pad}{}\n", test.label)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcx_core::{SuiteNode, TestNode};

    fn tree() -> Node {
        let mut file = SuiteNode::new("./spec/a_spec.rb", "a_spec.rb");
        file.children = vec![Node::Test(TestNode {
            id: "./spec/a_spec.rb[1:1]".to_string(),
            label: "adds".to_string(),
            file: None,
            line: Some(3),
        })];
        let mut root = SuiteNode::new("root", "shop QCumber");
        root.children = vec![Node::Suite(file)];
        Node::Suite(root)
    }

    #[test]
    fn test_outline() {
        assert_eq!(
            outline(&tree()),
            "shop QCumber\n  a_spec.rb\n    adds  (line 4)\n"
        );
    }

    #[test]
    fn test_summary_counts_final_states() {
        let mut reporter = Reporter::new(false);
        reporter.handle(ExplorerEvent::LoadFinished(Box::new(tree())));
        reporter.handle(ExplorerEvent::test("a[1]", TestState::Running));
        reporter.handle(ExplorerEvent::test("a[1]", TestState::failed()));
        reporter.handle(ExplorerEvent::test(
            "a[1]",
            TestState::Skipped {
                message: Some("later".to_string()),
            },
        ));
        reporter.handle(ExplorerEvent::test("a[2]", TestState::Passed));
        reporter.handle(ExplorerEvent::test("a[2]", TestState::Passed));

        assert_eq!(
            reporter.summary(),
            Summary {
                passed: 1,
                failed: 0,
                skipped: 1
            }
        );
        assert_eq!(reporter.label("./spec/a_spec.rb[1:1]"), "adds");
        assert_eq!(reporter.label("unknown"), "unknown");
    }
}
