use std::collections::HashSet;
use std::path::Path;

use crate::config::Config;
use crate::descriptor::{LocationOrder, Normalizer, TestDescriptor};
use crate::tree::node::{Node, SuiteNode, TestNode, ROOT_ID};

/// Builds the suite hierarchy (root → subdirectory → file → test) from a flat
/// list of discovered tests.
pub struct TreeBuilder<'a> {
    config: &'a Config,
    workspace_root: &'a Path,
    workspace_name: &'a str,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(config: &'a Config, workspace_root: &'a Path, workspace_name: &'a str) -> Self {
        Self {
            config,
            workspace_root,
            workspace_name,
        }
    }

    fn test_directory(&self) -> &str {
        &self.config.test.directory
    }

    fn normalizer(&self) -> Normalizer<'_> {
        Normalizer::new(
            self.test_directory(),
            self.workspace_root,
            &self.config.framework,
        )
    }

    /// Builds the root suite.
    pub fn build(&self, descriptors: &[TestDescriptor]) -> Node {
        let mut root = SuiteNode::new(
            ROOT_ID,
            format!("{} {}", self.workspace_name, self.config.framework.name),
        );

        let files = unique_files(descriptors);

        let mut directory_suites = self
            .subdirectories(&files)
            .into_iter()
            .map(|dir| self.directory_suite(descriptors, &files, dir))
            .collect::<Vec<_>>();
        sort_suites_by_label(&mut directory_suites);
        root.children
            .extend(directory_suites.into_iter().map(Node::Suite));

        append_top_level_files(&mut root, self.top_level_files(descriptors, &files));

        Node::Suite(root)
    }

    fn relative_segments(&self, file: &str) -> Vec<String> {
        file.replacen(self.test_directory(), "", 1)
            .split('/')
            .map(str::to_string)
            .collect()
    }

    /// First path segment of every file nested below the test directory.
    fn subdirectories(&self, files: &[&str]) -> Vec<String> {
        let mut seen = HashSet::new();
        files
            .iter()
            .map(|file| self.relative_segments(file))
            .filter(|segments| segments.len() > 1)
            .filter_map(|segments| segments.into_iter().next())
            .filter(|dir| seen.insert(dir.clone()))
            .collect()
    }

    fn directory_suite(
        &self,
        descriptors: &[TestDescriptor],
        files: &[&str],
        dir: String,
    ) -> SuiteNode {
        let prefix = format!("{}{}/", self.test_directory(), dir);
        let mut suite = SuiteNode::new(dir.clone(), dir.clone());
        suite.children = files
            .iter()
            .filter(|file| file.starts_with(&prefix))
            .map(|file| Node::Suite(self.file_suite(descriptors, file, Some(dir.as_str()))))
            .collect();
        suite
    }

    fn top_level_files(&self, descriptors: &[TestDescriptor], files: &[&str]) -> Vec<SuiteNode> {
        files
            .iter()
            .filter(|file| self.relative_segments(file).len() == 1)
            .map(|file| self.file_suite(descriptors, file, None))
            .collect()
    }

    /// Suite for one file, with its tests in location order.
    pub fn file_suite(
        &self,
        descriptors: &[TestDescriptor],
        file: &str,
        subdirectory: Option<&str>,
    ) -> SuiteNode {
        let normalizer = self.normalizer();
        let file_label = normalizer.file_label(file, subdirectory);
        let class_label = normalizer.class_label(&file_label);

        let children = descriptors
            .iter()
            .filter(|d| d.file_path == file)
            .map(|d| {
                Node::Test(TestNode {
                    id: d.id.clone(),
                    label: normalizer.test_label(d, &class_label),
                    file: Some(normalizer.absolute_path(&d.file_path)),
                    line: Some(d.line_number.saturating_sub(1)),
                })
            })
            .collect();

        let mut suite = SuiteNode {
            id: file.to_string(),
            label: file_label,
            file: Some(normalizer.absolute_path(file)),
            children,
        };
        sort_tests_by_location(&mut suite, LocationOrder);
        suite
    }
}

/// Distinct file paths in order of first appearance.
fn unique_files(descriptors: &[TestDescriptor]) -> Vec<&str> {
    let mut seen = HashSet::new();
    descriptors
        .iter()
        .map(|d| d.file_path.as_str())
        .filter(|file| seen.insert(*file))
        .collect()
}

/// Sorts sibling suites lexicographically by label.
pub fn sort_suites_by_label(suites: &mut [SuiteNode]) {
    suites.sort_by(|a, b| a.label.cmp(&b.label));
}

/// Appends file suites that live directly in the test directory.
///
/// These keep discovery order; unlike subdirectories they are not sorted.
pub fn append_top_level_files(root: &mut SuiteNode, files: Vec<SuiteNode>) {
    root.children.extend(files.into_iter().map(Node::Suite));
}

/// Stable sort of the test children of `suite`; suite children keep their slots.
pub fn sort_tests_by_location(suite: &mut SuiteNode, order: LocationOrder) {
    let slots: Vec<usize> = suite
        .children
        .iter()
        .enumerate()
        .filter(|(_, child)| matches!(child, Node::Test(_)))
        .map(|(idx, _)| idx)
        .collect();

    let mut tests: Vec<Node> = slots
        .iter()
        .map(|&idx| suite.children[idx].clone())
        .collect();
    tests.sort_by(|a, b| order.compare(a.id(), b.id()));

    for (idx, test) in slots.into_iter().zip(tests) {
        suite.children[idx] = test;
    }
}
