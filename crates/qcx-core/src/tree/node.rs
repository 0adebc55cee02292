//! Node types for the test tree.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identity of the root suite.
pub const ROOT_ID: &str = "root";

/// An element of the test tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Suite(SuiteNode),
    Test(TestNode),
}

/// A group of tests: the root, a subdirectory or a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteNode {
    /// Unique identifier within the tree.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Absolute path, for file suites.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Ordered children.
    pub children: Vec<Node>,
}

/// A single runnable test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestNode {
    /// Framework identity, unique within the tree.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Absolute path of the file declaring the test.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// 0-indexed declaration line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl SuiteNode {
    /// Create a suite without a file.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            file: None,
            children: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_ID
    }

    /// Whether this suite stands for a single test file.
    pub fn is_file(&self, file_extension: &str) -> bool {
        self.label.ends_with(file_extension)
    }
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Suite(suite) => &suite.id,
            Node::Test(test) => &test.id,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Node::Suite(suite) => &suite.label,
            Node::Test(test) => &test.label,
        }
    }

    pub fn children(&self) -> &[Node] {
        match self {
            Node::Suite(suite) => &suite.children,
            Node::Test(_) => &[],
        }
    }

    /// Depth-first search for a node by identity.
    pub fn find(&self, id: &str) -> Option<&Node> {
        if self.id() == id {
            return Some(self);
        }
        self.children().iter().find_map(|child| child.find(id))
    }

    /// Identities of every test below (or at) this node, in tree order.
    pub fn test_ids(&self) -> Vec<&str> {
        match self {
            Node::Test(test) => vec![test.id.as_str()],
            Node::Suite(suite) => suite.children.iter().flat_map(Node::test_ids).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test(id: &str) -> Node {
        Node::Test(TestNode {
            id: id.to_string(),
            label: id.to_string(),
            file: None,
            line: Some(0),
        })
    }

    fn sample_tree() -> Node {
        let mut file = SuiteNode::new("./spec/models/a_spec.rb", "a_spec.rb");
        file.children = vec![test("a[1:1]"), test("a[1:2]")];
        let mut models = SuiteNode::new("models", "models");
        models.children = vec![Node::Suite(file)];
        let mut root = SuiteNode::new(ROOT_ID, "ws QCumber");
        root.children = vec![Node::Suite(models)];
        Node::Suite(root)
    }

    #[test]
    fn test_find() {
        let tree = sample_tree();
        assert_eq!(tree.find("root").map(Node::id), Some("root"));
        assert_eq!(tree.find("a[1:2]").map(Node::label), Some("a[1:2]"));
        assert!(tree.find("missing").is_none());
    }

    #[test]
    fn test_test_ids() {
        assert_eq!(sample_tree().test_ids(), vec!["a[1:1]", "a[1:2]"]);
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let json = serde_json::to_value(sample_tree()).unwrap();
        assert_eq!(json["type"], "suite");
        assert_eq!(json["id"], "root");
        let leaf = &json["children"][0]["children"][0]["children"][0];
        assert_eq!(leaf["type"], "test");
        assert_eq!(leaf["line"], 0);
        assert!(leaf.get("file").is_none());
    }

    #[test]
    fn test_is_file() {
        let suite = SuiteNode::new("./spec/a_spec.rb", "a_spec.rb");
        assert!(suite.is_file(".rb"));
        assert!(!SuiteNode::new("models", "models").is_file(".rb"));
    }
}
